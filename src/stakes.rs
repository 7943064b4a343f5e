use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::chain::{Chain, ChainError};
use crate::models::{StakeRecord, StakeStatus};
use crate::rewards;
use crate::store::Store;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeRate {
    pub apr: f64,
    pub lock_days: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStakes {
    pub stakes: Vec<StakeRecord>,
    pub total_staked: f64,
    pub total_rewards_accrued: f64,
}

impl WalletStakes {
    fn empty() -> WalletStakes {
        WalletStakes { stakes: Vec::new(), total_staked: 0.0, total_rewards_accrued: 0.0 }
    }
}

/// Stake reads and writes. Reads follow a fixed precedence: the chain is the
/// source of truth whenever it answers (including answering "no stake"); the
/// store is the degraded secondary used only when the chain path fails.
/// Writes (initiate/claim/withdraw) touch the store only.
#[derive(Clone)]
pub struct StakeService {
    chain: Arc<dyn Chain>,
    store: Store,
    default_apr: f64,
    default_lock_days: f64,
}

const CLAIM_RETRIES: u32 = 3;

impl StakeService {
    pub fn new(chain: Arc<dyn Chain>, store: Store, default_apr: f64, default_lock_days: f64) -> StakeService {
        StakeService { chain, store, default_apr, default_lock_days }
    }

    /// Current APR and lock period, chain-derived when possible. Never fails:
    /// any chain problem yields the configured defaults.
    pub async fn rate(&self) -> StakeRate {
        match self.chain.rate_config().await {
            Ok(cfg) => StakeRate {
                apr: cfg.apr_bps as f64 / 100.0,
                lock_days: cfg.lock_secs as f64 / 86_400.0,
            },
            Err(ChainError::NotConfigured) => self.default_rate(),
            Err(err) => {
                warn!("rate config chain read failed, using defaults: {err}");
                self.default_rate()
            }
        }
    }

    fn default_rate(&self) -> StakeRate {
        StakeRate { apr: self.default_apr, lock_days: self.default_lock_days }
    }

    /// Per-wallet stake view. Chain path first; a zero on-chain stake is an
    /// authoritative empty answer, not a reason to fall back. Only a failed
    /// chain read falls through to the persisted records, and both paths
    /// produce the same response shape.
    pub async fn wallet_stakes(&self, wallet: &str) -> Result<WalletStakes, sqlx::Error> {
        let wallet = wallet.to_lowercase();
        match self.chain_stakes(&wallet).await {
            Ok(view) => Ok(view),
            Err(err) => {
                warn!("on-chain stake read failed for {wallet}, serving from store: {err}");
                self.store_stakes(&wallet).await
            }
        }
    }

    async fn chain_stakes(&self, wallet: &str) -> Result<WalletStakes, ChainError> {
        let info = self.chain.stake_info(wallet).await?;
        let pending = self.chain.pending_reward(wallet).await?;

        if info.amount <= 0.0 {
            return Ok(WalletStakes::empty());
        }

        let created_at = unix_or_epoch(info.start_time);
        let updated_at = if info.last_updated > 0 { unix_or_epoch(info.last_updated) } else { created_at };
        let rewards = pending + info.reward_debt;

        let stake = StakeRecord {
            id: wallet.to_string(),
            wallet_address: wallet.to_string(),
            amount: info.amount,
            rewards,
            status: StakeStatus::Active,
            created_at,
            updated_at,
            last_claim_at: None,
        };
        Ok(WalletStakes {
            total_staked: stake.amount,
            total_rewards_accrued: stake.rewards,
            stakes: vec![stake],
        })
    }

    async fn store_stakes(&self, wallet: &str) -> Result<WalletStakes, sqlx::Error> {
        let stakes = self.store.stakes_by_wallet(wallet).await?;
        let total_staked = stakes.iter().map(|s| s.amount).sum();
        let total_rewards_accrued = stakes.iter().map(|s| s.rewards).sum();
        Ok(WalletStakes { stakes, total_staked, total_rewards_accrued })
    }

    pub async fn initiate(&self, wallet: &str, amount: f64) -> Result<StakeRecord, sqlx::Error> {
        let now = Utc::now();
        let stake = StakeRecord {
            id: Uuid::new_v4().to_string(),
            wallet_address: wallet.to_lowercase(),
            amount,
            rewards: 0.0,
            status: StakeStatus::Active,
            created_at: now,
            updated_at: now,
            last_claim_at: None,
        };
        self.store.insert_stake(&stake).await?;
        Ok(stake)
    }

    /// Folds accrued reward into the record and resets the accrual
    /// checkpoint. Principal and status are untouched. Returns None for an
    /// unknown or withdrawn stake. A concurrent update loses the conditional
    /// write and retries against the fresh record.
    pub async fn claim(&self, id: &str) -> Result<Option<StakeRecord>, sqlx::Error> {
        for _ in 0..CLAIM_RETRIES {
            let Some(stake) = self.store.stake_by_id(id).await? else {
                return Ok(None);
            };
            if stake.status == StakeStatus::Withdrawn {
                return Ok(None);
            }

            let now = Utc::now();
            let earned = rewards::accrued_since(
                stake.amount,
                self.default_apr,
                stake.created_at,
                stake.last_claim_at,
                now,
            );
            let folded = stake.rewards + earned;

            if self.store.apply_claim(id, folded, now, stake.updated_at).await? == 1 {
                return self.store.stake_by_id(id).await;
            }
        }
        warn!("claim on stake {id} kept losing the conditional update");
        Ok(None)
    }

    /// Marks the stake WITHDRAWN. Terminal: a later claim or withdraw on the
    /// same id reports not-found.
    pub async fn withdraw(&self, id: &str) -> Result<Option<StakeRecord>, sqlx::Error> {
        for _ in 0..CLAIM_RETRIES {
            let Some(stake) = self.store.stake_by_id(id).await? else {
                return Ok(None);
            };
            if stake.status == StakeStatus::Withdrawn {
                return Ok(None);
            }

            let now = Utc::now();
            if self.store.apply_withdraw(id, now, stake.updated_at).await? == 1 {
                return self.store.stake_by_id(id).await;
            }
        }
        warn!("withdraw on stake {id} kept losing the conditional update");
        Ok(None)
    }
}

fn unix_or_epoch(secs: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0).single().unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}
