use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::chain::{Chain, ChainError, MintEvent};
use crate::models::ImpactNftRecord;
use crate::store::Store;

/// Polls the chain for MintImpactNFT events and reconciles them into the
/// store. Owns the high-water-mark block cursor: the cursor is advanced only
/// after a fetched range has been ingested, so a failed fetch is retried on
/// the next cycle and an ingested range is never reprocessed.
pub struct Reconciler {
    chain: Arc<dyn Chain>,
    store: Store,
    interval: Duration,
    cursor: u64,
}

impl Reconciler {
    pub fn new(chain: Arc<dyn Chain>, store: Store, interval: Duration) -> Reconciler {
        Reconciler { chain, store, interval, cursor: 0 }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Runs until `shutdown` flips to true. The cursor starts at the current
    /// head: only events from process start onward are captured, there is no
    /// historical replay. A missing chain configuration disables the loop
    /// entirely; any other startup failure does the same, matching the
    /// one-shot initialization of the cursor.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        match self.chain.latest_block().await {
            Ok(block) => {
                self.cursor = block;
                info!(cursor = block, "event sync started");
            }
            Err(ChainError::NotConfigured) => {
                info!("chain not configured; event sync disabled");
                return;
            }
            Err(err) => {
                error!("unable to read initial block number, event sync disabled: {err}");
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("event sync stopping");
                        return;
                    }
                }
            }
            // Errors here are transient by definition; the timer above
            // guarantees forward progress into the next cycle either way.
            if let Err(err) = self.poll_once().await {
                warn!("event poll cycle failed: {err}");
            }
        }
    }

    /// One poll cycle: read head, fetch `[cursor+1, head]`, ingest each event
    /// in log order, then advance the cursor. Returns the number of events
    /// ingested. An RPC failure propagates without moving the cursor; a
    /// single bad event is logged and skipped so it cannot stall the batch.
    pub async fn poll_once(&mut self) -> Result<usize, ChainError> {
        let latest = self.chain.latest_block().await?;
        let from = self.cursor + 1;
        if latest < from {
            return Ok(0);
        }

        let events = self.chain.mint_events(from, latest).await?;
        let mut ingested = 0;
        for event in &events {
            match ingest_event(&self.store, event).await {
                Ok(()) => ingested += 1,
                Err(err) => {
                    warn!(token_id = %event.token_id, "failed to ingest mint event: {err}");
                }
            }
        }

        self.cursor = latest;
        Ok(ingested)
    }
}

/// Upserts one mint event as an impact NFT document keyed by token id.
/// At-least-once delivery is safe: a replayed event overwrites the same
/// document instead of duplicating it.
pub async fn ingest_event(store: &Store, event: &MintEvent) -> Result<(), sqlx::Error> {
    let record = ImpactNftRecord {
        id: event.token_id.clone(),
        wallet_address: event.wallet.to_lowercase(),
        project_id: Some(event.project_name.clone()),
        carbon_offset: Some(event.carbon_offset),
        created_at: Utc::now(),
        date: Some(event.date.clone()),
        badge_tier: Some(event.badge_tier.clone()),
    };
    store.upsert_impact_nft(&record).await
}
