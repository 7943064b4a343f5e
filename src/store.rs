use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::models::{
    ImpactNftRecord, ProjectRecord, ProjectStatus, Role, StakeRecord, StakeStatus, UserRecord,
};

/// Document-style persistence over SQLite: four collections keyed by string
/// id, with equality filters on the indexed join fields (email,
/// wallet_address, project_id). Wallet keys are lowercased before every write
/// and every query.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(url: &str) -> Result<Store, sqlx::Error> {
        let opts = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // A shared in-memory database only exists per-connection.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;
        Ok(Store { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE,
                username TEXT,
                wallet_address TEXT UNIQUE,
                password_hash TEXT,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stakes (
                id TEXT PRIMARY KEY,
                wallet_address TEXT NOT NULL,
                amount REAL NOT NULL,
                rewards REAL NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_claim_at TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS impact_nfts (
                id TEXT PRIMARY KEY,
                wallet_address TEXT NOT NULL,
                project_id TEXT,
                carbon_offset REAL,
                created_at TEXT NOT NULL,
                date TEXT,
                badge_tier TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                project_name TEXT NOT NULL,
                location TEXT,
                description TEXT,
                funds_raised REAL NOT NULL,
                impact_score REAL NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        for idx in [
            "CREATE INDEX IF NOT EXISTS idx_stakes_wallet ON stakes(wallet_address)",
            "CREATE INDEX IF NOT EXISTS idx_impact_wallet ON impact_nfts(wallet_address)",
            "CREATE INDEX IF NOT EXISTS idx_impact_project ON impact_nfts(project_id)",
        ] {
            sqlx::query(idx).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ---- users ----

    pub async fn insert_user(&self, user: &UserRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO users (id, email, username, wallet_address, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&user.id)
        .bind(user.email.as_deref().map(str::to_lowercase))
        .bind(&user.username)
        .bind(user.wallet_address.as_deref().map(str::to_lowercase))
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn user_by_id(&self, id: &str) -> Result<Option<UserRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?1 LIMIT 1")
            .bind(email.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    pub async fn user_by_wallet(&self, wallet: &str) -> Result<Option<UserRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM users WHERE wallet_address = ?1 LIMIT 1")
            .bind(wallet.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    pub async fn list_users(&self, limit: i64) -> Result<Vec<UserRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY created_at DESC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(user_from_row).collect()
    }

    pub async fn count_users(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM users").fetch_one(&self.pool).await?;
        row.try_get("n")
    }

    // ---- stakes ----

    pub async fn insert_stake(&self, stake: &StakeRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO stakes (id, wallet_address, amount, rewards, status, created_at, updated_at, last_claim_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&stake.id)
        .bind(stake.wallet_address.to_lowercase())
        .bind(stake.amount)
        .bind(stake.rewards)
        .bind(stake.status.as_str())
        .bind(stake.created_at)
        .bind(stake.updated_at)
        .bind(stake.last_claim_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn stake_by_id(&self, id: &str) -> Result<Option<StakeRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM stakes WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| stake_from_row(&r)).transpose()
    }

    pub async fn stakes_by_wallet(&self, wallet: &str) -> Result<Vec<StakeRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM stakes WHERE wallet_address = ?1 ORDER BY rowid")
            .bind(wallet.to_lowercase())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(stake_from_row).collect()
    }

    /// Sum of all principal and all accrued rewards across every stake record.
    pub async fn stake_totals(&self) -> Result<(f64, f64), sqlx::Error> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0.0) AS staked, COALESCE(SUM(rewards), 0.0) AS rewards FROM stakes",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((row.try_get("staked")?, row.try_get("rewards")?))
    }

    /// Conditional claim write: only applies when the record is still ACTIVE
    /// and unchanged since it was read. Returns the number of rows updated so
    /// the caller can detect a lost race.
    pub async fn apply_claim(
        &self,
        id: &str,
        rewards: f64,
        now: DateTime<Utc>,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE stakes SET rewards = ?1, last_claim_at = ?2, updated_at = ?3
             WHERE id = ?4 AND status = 'ACTIVE' AND updated_at = ?5",
        )
        .bind(rewards)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(expected_updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn apply_withdraw(
        &self,
        id: &str,
        now: DateTime<Utc>,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE stakes SET status = 'WITHDRAWN', updated_at = ?1
             WHERE id = ?2 AND status = 'ACTIVE' AND updated_at = ?3",
        )
        .bind(now)
        .bind(id)
        .bind(expected_updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ---- impact nfts ----

    /// Merge-upsert keyed by token id. Optional fields absent from the write
    /// keep their previous value; present fields overwrite. Re-ingesting the
    /// same event is therefore idempotent.
    pub async fn upsert_impact_nft(&self, nft: &ImpactNftRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO impact_nfts (id, wallet_address, project_id, carbon_offset, created_at, date, badge_tier)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                wallet_address = excluded.wallet_address,
                project_id = COALESCE(excluded.project_id, impact_nfts.project_id),
                carbon_offset = COALESCE(excluded.carbon_offset, impact_nfts.carbon_offset),
                created_at = excluded.created_at,
                date = COALESCE(excluded.date, impact_nfts.date),
                badge_tier = COALESCE(excluded.badge_tier, impact_nfts.badge_tier)",
        )
        .bind(&nft.id)
        .bind(nft.wallet_address.to_lowercase())
        .bind(&nft.project_id)
        .bind(nft.carbon_offset)
        .bind(nft.created_at)
        .bind(&nft.date)
        .bind(&nft.badge_tier)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn impact_by_wallet(&self, wallet: &str) -> Result<Vec<ImpactNftRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM impact_nfts WHERE wallet_address = ?1 ORDER BY rowid")
            .bind(wallet.to_lowercase())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(impact_from_row).collect()
    }

    pub async fn impact_by_project(&self, project_id: &str) -> Result<Vec<ImpactNftRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM impact_nfts WHERE project_id = ?1 ORDER BY rowid")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(impact_from_row).collect()
    }

    pub async fn all_impact(&self) -> Result<Vec<ImpactNftRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM impact_nfts ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(impact_from_row).collect()
    }

    /// NFT count and total carbon offset in one pass.
    pub async fn impact_totals(&self) -> Result<(i64, f64), sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n, COALESCE(SUM(carbon_offset), 0.0) AS carbon FROM impact_nfts",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((row.try_get("n")?, row.try_get("carbon")?))
    }

    // ---- projects ----

    pub async fn insert_project(&self, project: &ProjectRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO projects (id, project_name, location, description, funds_raised, impact_score, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&project.id)
        .bind(&project.project_name)
        .bind(&project.location)
        .bind(&project.description)
        .bind(project.funds_raised)
        .bind(project.impact_score)
        .bind(project.status.as_str())
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn project_by_id(&self, id: &str) -> Result<Option<ProjectRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| project_from_row(&r)).transpose()
    }

    pub async fn list_projects(&self, limit: i64) -> Result<Vec<ProjectRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY created_at DESC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(project_from_row).collect()
    }

    pub async fn list_projects_by_name(&self) -> Result<Vec<ProjectRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY project_name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(project_from_row).collect()
    }

    pub async fn approve_project(&self, id: &str, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE projects SET status = 'APPROVED', updated_at = ?1 WHERE id = ?2",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_projects(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM projects").fetch_one(&self.pool).await?;
        row.try_get("n")
    }
}

fn user_from_row(row: &SqliteRow) -> Result<UserRecord, sqlx::Error> {
    Ok(UserRecord {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        wallet_address: row.try_get("wallet_address")?,
        password_hash: row.try_get("password_hash")?,
        role: Role::parse(&row.try_get::<String, _>("role")?),
        created_at: row.try_get("created_at")?,
    })
}

fn stake_from_row(row: &SqliteRow) -> Result<StakeRecord, sqlx::Error> {
    Ok(StakeRecord {
        id: row.try_get("id")?,
        wallet_address: row.try_get("wallet_address")?,
        amount: row.try_get("amount")?,
        rewards: row.try_get("rewards")?,
        status: StakeStatus::parse(&row.try_get::<String, _>("status")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_claim_at: row.try_get("last_claim_at")?,
    })
}

fn impact_from_row(row: &SqliteRow) -> Result<ImpactNftRecord, sqlx::Error> {
    Ok(ImpactNftRecord {
        id: row.try_get("id")?,
        wallet_address: row.try_get("wallet_address")?,
        project_id: row.try_get("project_id")?,
        carbon_offset: row.try_get("carbon_offset")?,
        created_at: row.try_get("created_at")?,
        date: row.try_get("date")?,
        badge_tier: row.try_get("badge_tier")?,
    })
}

fn project_from_row(row: &SqliteRow) -> Result<ProjectRecord, sqlx::Error> {
    Ok(ProjectRecord {
        id: row.try_get("id")?,
        project_name: row.try_get("project_name")?,
        location: row.try_get("location")?,
        description: row.try_get("description")?,
        funds_raised: row.try_get("funds_raised")?,
        impact_score: row.try_get("impact_score")?,
        status: ProjectStatus::parse(&row.try_get::<String, _>("status")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
pub(crate) async fn memory_store() -> Store {
    let store = Store::connect("sqlite::memory:").await.expect("in-memory store");
    store.migrate().await.expect("migrate");
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn nft(id: &str, wallet: &str, carbon: Option<f64>) -> ImpactNftRecord {
        ImpactNftRecord {
            id: id.into(),
            wallet_address: wallet.into(),
            project_id: Some("reforest-01".into()),
            carbon_offset: carbon,
            created_at: Utc::now(),
            date: Some("2026-08-01".into()),
            badge_tier: Some("gold".into()),
        }
    }

    #[tokio::test]
    async fn wallet_queries_are_case_insensitive() {
        let store = memory_store().await;
        store.upsert_impact_nft(&nft("1", "0xABCDEF", Some(2.0))).await.unwrap();

        let found = store.impact_by_wallet("0xAbCdEf").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].wallet_address, "0xabcdef");
    }

    #[tokio::test]
    async fn merge_upsert_keeps_previous_optional_fields() {
        let store = memory_store().await;
        store.upsert_impact_nft(&nft("7", "0xaa", Some(3.5))).await.unwrap();

        let partial = ImpactNftRecord {
            id: "7".into(),
            wallet_address: "0xaa".into(),
            project_id: None,
            carbon_offset: Some(4.0),
            created_at: Utc::now(),
            date: None,
            badge_tier: None,
        };
        store.upsert_impact_nft(&partial).await.unwrap();

        let all = store.all_impact().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].carbon_offset, Some(4.0));
        assert_eq!(all[0].project_id.as_deref(), Some("reforest-01"));
        assert_eq!(all[0].badge_tier.as_deref(), Some("gold"));
    }

    #[tokio::test]
    async fn conditional_claim_requires_matching_checkpoint() {
        let store = memory_store().await;
        let now = Utc::now();
        let stake = StakeRecord {
            id: "s1".into(),
            wallet_address: "0xaa".into(),
            amount: 100.0,
            rewards: 0.0,
            status: StakeStatus::Active,
            created_at: now,
            updated_at: now,
            last_claim_at: None,
        };
        store.insert_stake(&stake).await.unwrap();

        let stale = now - Duration::seconds(30);
        assert_eq!(store.apply_claim("s1", 1.0, Utc::now(), stale).await.unwrap(), 0);
        assert_eq!(store.apply_claim("s1", 1.0, Utc::now(), now).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn totals_are_zero_on_empty_collections() {
        let store = memory_store().await;
        assert_eq!(store.stake_totals().await.unwrap(), (0.0, 0.0));
        assert_eq!(store.impact_totals().await.unwrap(), (0, 0.0));
        assert_eq!(store.count_users().await.unwrap(), 0);
        assert_eq!(store.count_projects().await.unwrap(), 0);
    }
}
