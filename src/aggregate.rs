use std::collections::HashMap;

use serde::Serialize;

use crate::models::ImpactNftRecord;
use crate::store::Store;

pub const DEFAULT_LEADERBOARD_LIMIT: usize = 20;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserImpact {
    pub wallet: String,
    pub total_carbon_offset: f64,
    pub nfts: Vec<ImpactNftRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub wallet_address: String,
    pub total_carbon_offset: f64,
    pub nfts: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectImpact {
    pub project_id: String,
    pub total_carbon_offset: f64,
    pub nfts: Vec<ImpactNftRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOverview {
    pub total_users: i64,
    pub total_staked: f64,
    pub rewards_paid_out: f64,
    pub nfts_minted: i64,
    pub total_carbon_offset: f64,
    pub projects_count: i64,
}

pub async fn user_impact(store: &Store, wallet: &str) -> Result<UserImpact, sqlx::Error> {
    let wallet = wallet.to_lowercase();
    let nfts = store.impact_by_wallet(&wallet).await?;
    let total_carbon_offset = nfts.iter().filter_map(|n| n.carbon_offset).sum();
    Ok(UserImpact { wallet, total_carbon_offset, nfts })
}

/// Normalizes a caller-supplied limit: anything non-finite or below one falls
/// back to the default of 20.
pub fn normalize_limit(limit: Option<f64>) -> usize {
    match limit {
        Some(l) if l.is_finite() && l >= 1.0 => l as usize,
        _ => DEFAULT_LEADERBOARD_LIMIT,
    }
}

/// Full-scan leaderboard: group by wallet, sum carbon and count NFTs, sort by
/// carbon descending. Ties keep first-seen scan order (the sort is stable and
/// groups are accumulated in scan order).
pub async fn leaderboard(store: &Store, limit: Option<f64>) -> Result<Vec<LeaderboardEntry>, sqlx::Error> {
    let limit = normalize_limit(limit);
    let all = store.all_impact().await?;

    let mut order: Vec<String> = Vec::new();
    let mut by_wallet: HashMap<String, (f64, u64)> = HashMap::new();
    for nft in &all {
        let wallet = nft.wallet_address.to_lowercase();
        let entry = by_wallet.entry(wallet.clone()).or_insert_with(|| {
            order.push(wallet.clone());
            (0.0, 0)
        });
        entry.0 += nft.carbon_offset.unwrap_or(0.0);
        entry.1 += 1;
    }

    let mut entries: Vec<LeaderboardEntry> = order
        .into_iter()
        .map(|wallet| {
            let (total, count) = by_wallet[&wallet];
            LeaderboardEntry { wallet_address: wallet, total_carbon_offset: total, nfts: count }
        })
        .collect();
    entries.sort_by(|a, b| {
        b.total_carbon_offset
            .partial_cmp(&a.total_carbon_offset)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    entries.truncate(limit);
    Ok(entries)
}

pub async fn project_impact(store: &Store, project_id: &str) -> Result<ProjectImpact, sqlx::Error> {
    let nfts = store.impact_by_project(project_id).await?;
    let total_carbon_offset = nfts.iter().filter_map(|n| n.carbon_offset).sum();
    Ok(ProjectImpact { project_id: project_id.to_string(), total_carbon_offset, nfts })
}

/// Platform-wide rollup. The four sub-aggregations are independent and run
/// concurrently; if any one fails the whole overview fails, no partial result
/// is returned.
pub async fn admin_overview(store: &Store) -> Result<AdminOverview, sqlx::Error> {
    let (total_users, (total_staked, rewards_paid_out), (nfts_minted, total_carbon_offset), projects_count) = tokio::try_join!(
        store.count_users(),
        store.stake_totals(),
        store.impact_totals(),
        store.count_projects(),
    )?;
    Ok(AdminOverview {
        total_users,
        total_staked,
        rewards_paid_out,
        nfts_minted,
        total_carbon_offset,
        projects_count,
    })
}
