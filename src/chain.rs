use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::abi::{self, ParamType};
use ethers::prelude::*;
use ethers::utils::{format_ether, keccak256, parse_ether};

use crate::config::Config;

abigen!(
    GreenFiCore,
    r#"[
        function aprBps() view returns (uint256)
        function lockPeriod() view returns (uint256)
        function stakes(address) view returns (uint256 amount, uint256 rewardDebt, uint256 lastUpdated, uint256 startTime)
        function pendingReward(address) view returns (uint256)
        function mintImpactNFTForUser(address _user, uint256 _carbonOffset, string _projectName, string _date, string _badgeTier, string _tokenURI) returns (uint256)
    ]"#
);

const MINT_EVENT_SIG: &str = "MintImpactNFT(address,uint256,uint256,string,string,string)";

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("chain not configured")]
    NotConfigured,
    #[error("chain call timed out")]
    Timeout,
    #[error("rpc error: {0}")]
    Rpc(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StakeInfo {
    /// Principal in token units (converted from wei).
    pub amount: f64,
    pub reward_debt: f64,
    /// Unix seconds of the last on-chain update; zero when unset.
    pub last_updated: u64,
    pub start_time: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateConfig {
    pub apr_bps: u64,
    pub lock_secs: u64,
}

/// One decoded MintImpactNFT log.
#[derive(Clone, Debug, PartialEq)]
pub struct MintEvent {
    pub wallet: String,
    pub token_id: String,
    pub carbon_offset: f64,
    pub project_name: String,
    pub date: String,
    pub badge_tier: String,
}

#[derive(Clone, Debug)]
pub struct MintNftRequest {
    pub wallet: String,
    pub carbon_offset: f64,
    pub project_name: String,
    pub date: String,
    pub badge_tier: String,
    pub token_uri: String,
}

/// Read (and one write) surface of the staking contract. Injected as a trait
/// object everywhere so tests can script chain behaviour; unavailability is a
/// value (`ChainError`), never a panic.
#[async_trait]
pub trait Chain: Send + Sync {
    async fn latest_block(&self) -> Result<u64, ChainError>;
    async fn stake_info(&self, wallet: &str) -> Result<StakeInfo, ChainError>;
    async fn pending_reward(&self, wallet: &str) -> Result<f64, ChainError>;
    async fn rate_config(&self) -> Result<RateConfig, ChainError>;
    async fn mint_events(&self, from_block: u64, to_block: u64) -> Result<Vec<MintEvent>, ChainError>;
    async fn mint_impact_nft(&self, req: &MintNftRequest) -> Result<String, ChainError>;
}

/// ethers-backed implementation against a JSON-RPC endpoint. Every call runs
/// under a timeout so a stalled RPC node cannot wedge a poll cycle or a
/// request handler.
pub struct EthersChain {
    provider: Option<Arc<Provider<Http>>>,
    address: Option<Address>,
    operator_key: Option<String>,
    call_timeout: Duration,
}

impl EthersChain {
    pub fn new(cfg: &Config) -> EthersChain {
        let provider = cfg.rpc_url.as_deref().and_then(|url| match Provider::<Http>::try_from(url) {
            Ok(p) => Some(Arc::new(p)),
            Err(err) => {
                tracing::warn!("invalid GREENFI_RPC_URL, chain reads disabled: {err}");
                None
            }
        });
        let address = cfg.core_address.as_deref().and_then(|a| match a.parse::<Address>() {
            Ok(addr) => Some(addr),
            Err(err) => {
                tracing::warn!("invalid GREENFI_CORE_ADDRESS, chain reads disabled: {err}");
                None
            }
        });
        EthersChain {
            provider,
            address,
            operator_key: cfg.operator_key.clone(),
            call_timeout: cfg.chain_call_timeout,
        }
    }

    fn configured(&self) -> Result<(Arc<Provider<Http>>, Address), ChainError> {
        match (&self.provider, &self.address) {
            (Some(p), Some(a)) => Ok((p.clone(), *a)),
            _ => Err(ChainError::NotConfigured),
        }
    }

    fn read_contract(&self) -> Result<GreenFiCore<Provider<Http>>, ChainError> {
        let (provider, address) = self.configured()?;
        Ok(GreenFiCore::new(address, provider))
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, ChainError>>,
    {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| ChainError::Timeout)?
    }
}

fn rpc_err(err: impl std::fmt::Display) -> ChainError {
    ChainError::Rpc(err.to_string())
}

fn wei_to_decimal(wei: U256) -> f64 {
    format_ether(wei).parse::<f64>().unwrap_or(0.0)
}

fn parse_wallet(wallet: &str) -> Result<Address, ChainError> {
    wallet.parse::<Address>().map_err(|e| ChainError::Rpc(format!("invalid wallet address: {e}")))
}

fn decode_mint_log(log: &Log) -> Result<MintEvent, ChainError> {
    if log.topics.len() < 3 {
        return Err(ChainError::Rpc("mint log missing indexed topics".into()));
    }
    let wallet = Address::from_slice(&log.topics[1].as_bytes()[12..]);
    let token_id = U256::from_big_endian(log.topics[2].as_bytes());
    // non-indexed: carbonOffset(uint256), projectName, date, badgeTier
    let tokens = abi::decode(
        &[ParamType::Uint(256), ParamType::String, ParamType::String, ParamType::String],
        &log.data,
    )
    .map_err(rpc_err)?;
    let carbon = tokens
        .first()
        .and_then(|t| t.clone().into_uint())
        .unwrap_or_default();
    let get_str = |i: usize| tokens.get(i).and_then(|t| t.clone().into_string()).unwrap_or_default();
    Ok(MintEvent {
        wallet: format!("{wallet:?}").to_lowercase(),
        token_id: token_id.to_string(),
        carbon_offset: wei_to_decimal(carbon),
        project_name: get_str(1),
        date: get_str(2),
        badge_tier: get_str(3),
    })
}

#[async_trait]
impl Chain for EthersChain {
    async fn latest_block(&self) -> Result<u64, ChainError> {
        let (provider, _) = self.configured()?;
        self.bounded(async move {
            let n = provider.get_block_number().await.map_err(rpc_err)?;
            Ok(n.as_u64())
        })
        .await
    }

    async fn stake_info(&self, wallet: &str) -> Result<StakeInfo, ChainError> {
        let contract = self.read_contract()?;
        let who = parse_wallet(wallet)?;
        self.bounded(async move {
            let (amount, reward_debt, last_updated, start_time) =
                contract.stakes(who).call().await.map_err(rpc_err)?;
            Ok(StakeInfo {
                amount: wei_to_decimal(amount),
                reward_debt: wei_to_decimal(reward_debt),
                last_updated: last_updated.as_u64(),
                start_time: start_time.as_u64(),
            })
        })
        .await
    }

    async fn pending_reward(&self, wallet: &str) -> Result<f64, ChainError> {
        let contract = self.read_contract()?;
        let who = parse_wallet(wallet)?;
        self.bounded(async move {
            let wei = contract.pending_reward(who).call().await.map_err(rpc_err)?;
            Ok(wei_to_decimal(wei))
        })
        .await
    }

    async fn rate_config(&self) -> Result<RateConfig, ChainError> {
        let contract = self.read_contract()?;
        self.bounded(async move {
            let apr_bps = contract.apr_bps().call().await.map_err(rpc_err)?;
            let lock_secs = contract.lock_period().call().await.map_err(rpc_err)?;
            Ok(RateConfig { apr_bps: apr_bps.as_u64(), lock_secs: lock_secs.as_u64() })
        })
        .await
    }

    async fn mint_events(&self, from_block: u64, to_block: u64) -> Result<Vec<MintEvent>, ChainError> {
        let (provider, address) = self.configured()?;
        let topic0 = H256::from(keccak256(MINT_EVENT_SIG.as_bytes()));
        self.bounded(async move {
            let filter = Filter::new()
                .address(address)
                .from_block(from_block)
                .to_block(to_block)
                .topic0(topic0);
            let logs = provider.get_logs(&filter).await.map_err(rpc_err)?;
            let mut events = Vec::with_capacity(logs.len());
            for log in &logs {
                match decode_mint_log(log) {
                    Ok(ev) => events.push(ev),
                    Err(err) => tracing::warn!("skipping undecodable mint log: {err}"),
                }
            }
            Ok(events)
        })
        .await
    }

    async fn mint_impact_nft(&self, req: &MintNftRequest) -> Result<String, ChainError> {
        let (provider, address) = self.configured()?;
        let key = self.operator_key.as_deref().ok_or(ChainError::NotConfigured)?;
        let wallet_key: LocalWallet = key.parse().map_err(rpc_err)?;
        let user = parse_wallet(&req.wallet)?;
        let carbon_wei = parse_ether(req.carbon_offset).map_err(rpc_err)?;
        let req = req.clone();

        // Sends are allowed more headroom than reads: one receipt wait spans
        // at least a block interval.
        let deadline = self.call_timeout * 6;
        tokio::time::timeout(deadline, async move {
            let chain_id = provider.get_chainid().await.map_err(rpc_err)?;
            let signer = wallet_key.with_chain_id(chain_id.as_u64());
            let client = Arc::new(SignerMiddleware::new((*provider).clone(), signer));
            let contract = GreenFiCore::new(address, client);
            let call = contract.mint_impact_nft_for_user(
                user,
                carbon_wei,
                req.project_name.trim().to_string(),
                req.date.trim().to_string(),
                req.badge_tier.trim().to_string(),
                req.token_uri.trim().to_string(),
            );
            let pending = call.send().await.map_err(rpc_err)?;
            let tx_hash = pending.tx_hash();
            let receipt = pending.await.map_err(rpc_err)?;
            let hash = receipt.map(|r| r.transaction_hash).unwrap_or(tx_hash);
            Ok(format!("{hash:?}"))
        })
        .await
        .map_err(|_| ChainError::Timeout)?
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockState {
        pub latest_block: u64,
        pub fail_latest: bool,
        pub fail_logs: bool,
        pub not_configured: bool,
        /// (block number, event) pairs served by `mint_events`.
        pub events: Vec<(u64, MintEvent)>,
        pub stake: Option<StakeInfo>,
        pub pending_reward: f64,
        pub fail_stake_reads: bool,
        pub rate: Option<RateConfig>,
        pub minted: Vec<MintNftRequest>,
        pub log_fetches: u32,
    }

    /// Scripted chain double for tests.
    pub struct MockChain {
        state: Mutex<MockState>,
    }

    impl MockChain {
        pub fn new() -> Arc<MockChain> {
            Arc::new(MockChain { state: Mutex::new(MockState::default()) })
        }

        pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
            f(&mut self.state.lock().unwrap())
        }
    }

    #[async_trait]
    impl Chain for MockChain {
        async fn latest_block(&self) -> Result<u64, ChainError> {
            let st = self.state.lock().unwrap();
            if st.not_configured {
                return Err(ChainError::NotConfigured);
            }
            if st.fail_latest {
                return Err(ChainError::Rpc("latest block unavailable".into()));
            }
            Ok(st.latest_block)
        }

        async fn stake_info(&self, _wallet: &str) -> Result<StakeInfo, ChainError> {
            let st = self.state.lock().unwrap();
            if st.not_configured {
                return Err(ChainError::NotConfigured);
            }
            if st.fail_stake_reads {
                return Err(ChainError::Rpc("stake read failed".into()));
            }
            st.stake.ok_or(ChainError::NotConfigured)
        }

        async fn pending_reward(&self, _wallet: &str) -> Result<f64, ChainError> {
            let st = self.state.lock().unwrap();
            if st.fail_stake_reads || st.not_configured {
                return Err(ChainError::Rpc("pending reward failed".into()));
            }
            Ok(st.pending_reward)
        }

        async fn rate_config(&self) -> Result<RateConfig, ChainError> {
            let st = self.state.lock().unwrap();
            st.rate.ok_or(ChainError::NotConfigured)
        }

        async fn mint_events(&self, from_block: u64, to_block: u64) -> Result<Vec<MintEvent>, ChainError> {
            let mut st = self.state.lock().unwrap();
            st.log_fetches += 1;
            if st.fail_logs {
                return Err(ChainError::Rpc("log fetch failed".into()));
            }
            Ok(st
                .events
                .iter()
                .filter(|(block, _)| *block >= from_block && *block <= to_block)
                .map(|(_, ev)| ev.clone())
                .collect())
        }

        async fn mint_impact_nft(&self, req: &MintNftRequest) -> Result<String, ChainError> {
            let mut st = self.state.lock().unwrap();
            if st.not_configured {
                return Err(ChainError::NotConfigured);
            }
            st.minted.push(req.clone());
            Ok(format!("0xmock{:04}", st.minted.len()))
        }
    }
}
