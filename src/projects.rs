use chrono::Utc;
use uuid::Uuid;

use crate::models::{ProjectRecord, ProjectStatus};
use crate::store::Store;

#[derive(Debug, Default)]
pub struct CreateProjectInput {
    pub project_name: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub funds_raised: Option<f64>,
    pub impact_score: Option<f64>,
}

pub async fn create(store: &Store, input: CreateProjectInput) -> Result<ProjectRecord, sqlx::Error> {
    let now = Utc::now();
    let project = ProjectRecord {
        id: Uuid::new_v4().to_string(),
        project_name: input.project_name,
        location: input.location,
        description: input.description,
        funds_raised: input.funds_raised.unwrap_or(0.0),
        impact_score: input.impact_score.unwrap_or(0.0),
        status: ProjectStatus::Pending,
        created_at: now,
        updated_at: now,
    };
    store.insert_project(&project).await?;
    Ok(project)
}

pub async fn list(store: &Store) -> Result<Vec<ProjectRecord>, sqlx::Error> {
    store.list_projects(100).await
}

/// PENDING -> APPROVED, the only project transition. Returns None for an
/// unknown id; approving an already-approved project is a no-op that still
/// returns the record.
pub async fn approve(store: &Store, id: &str) -> Result<Option<ProjectRecord>, sqlx::Error> {
    let rows = store.approve_project(id, Utc::now()).await?;
    if rows == 0 {
        return Ok(None);
    }
    store.project_by_id(id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_store;

    #[tokio::test]
    async fn create_defaults_to_pending_with_zero_metrics() {
        let store = memory_store().await;
        let project = create(
            &store,
            CreateProjectInput { project_name: "Kelp Forest".into(), ..Default::default() },
        )
        .await
        .unwrap();
        assert_eq!(project.status, ProjectStatus::Pending);
        assert_eq!(project.funds_raised, 0.0);
        assert_eq!(project.impact_score, 0.0);
    }

    #[tokio::test]
    async fn approve_transitions_and_unknown_id_is_none() {
        let store = memory_store().await;
        let project = create(
            &store,
            CreateProjectInput { project_name: "Peatland".into(), ..Default::default() },
        )
        .await
        .unwrap();

        let approved = approve(&store, &project.id).await.unwrap().expect("known id");
        assert_eq!(approved.status, ProjectStatus::Approved);
        assert!(approved.updated_at >= project.updated_at);

        assert!(approve(&store, "nope").await.unwrap().is_none());
    }
}
