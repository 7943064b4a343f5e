use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StakeStatus {
    Active,
    Claimed,
    Withdrawn,
}

impl StakeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StakeStatus::Active => "ACTIVE",
            StakeStatus::Claimed => "CLAIMED",
            StakeStatus::Withdrawn => "WITHDRAWN",
        }
    }

    pub fn parse(s: &str) -> StakeStatus {
        match s {
            "WITHDRAWN" => StakeStatus::Withdrawn,
            "CLAIMED" => StakeStatus::Claimed,
            _ => StakeStatus::Active,
        }
    }
}

/// One wallet's staking position. `wallet_address` is always lowercased so it
/// joins cleanly against chain-derived records.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeRecord {
    pub id: String,
    pub wallet_address: String,
    pub amount: f64,
    pub rewards: f64,
    pub status: StakeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_claim_at: Option<DateTime<Utc>>,
}

/// A minted carbon-impact badge. `id` is the on-chain token id, which makes
/// re-ingestion of the same mint event an overwrite rather than a duplicate.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactNftRecord {
    pub id: String,
    pub wallet_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carbon_offset: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge_tier: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectStatus {
    Pending,
    Approved,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Pending => "PENDING",
            ProjectStatus::Approved => "APPROVED",
        }
    }

    pub fn parse(s: &str) -> ProjectStatus {
        if s == "APPROVED" {
            ProjectStatus::Approved
        } else {
            ProjectStatus::Pending
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: String,
    pub project_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub funds_raised: f64,
    pub impact_score: f64,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Role {
        if s == "ADMIN" {
            Role::Admin
        } else {
            Role::User
        }
    }
}

/// Account identity bridging off-chain login to a wallet. At least one of
/// `email` / `wallet_address` is present; wallet-only accounts carry no
/// password hash. The hash is never serialized out.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}
