use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{Role, UserRecord};
use crate::store::Store;

#[derive(Debug, Default)]
pub struct RegisterInput {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub wallet_address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub wallet: String,
    pub total_staked: f64,
    pub total_rewards: f64,
    pub nft_count: usize,
}

/// Creates an account. Role is decided exactly once, here: ADMIN iff the
/// lowercased email matches the configured admin email. There is no
/// promote/demote path afterwards.
pub async fn register(
    store: &Store,
    admin_email: Option<&str>,
    input: RegisterInput,
) -> Result<UserRecord, ApiError> {
    let email = input.email.map(|e| e.to_lowercase());
    let wallet = input.wallet_address.map(|w| w.to_lowercase());

    if email.is_none() && wallet.is_none() {
        return Err(ApiError::bad_request("email or walletAddress is required"));
    }

    let role = match (&email, admin_email) {
        (Some(e), Some(admin)) if e == admin => Role::Admin,
        _ => Role::User,
    };

    let password_hash = match input.password {
        Some(pw) => Some(
            bcrypt::hash(pw, bcrypt::DEFAULT_COST)
                .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hash failed: {e}")))?,
        ),
        None => None,
    };

    let user = UserRecord {
        id: Uuid::new_v4().to_string(),
        email,
        username: input.username,
        wallet_address: wallet,
        password_hash,
        role,
        created_at: Utc::now(),
    };
    store.insert_user(&user).await?;
    Ok(user)
}

/// Email + password login check. Wallet-only accounts (no hash) never match.
pub async fn verify_password(
    store: &Store,
    email: &str,
    password: &str,
) -> Result<Option<UserRecord>, ApiError> {
    let Some(user) = store.user_by_email(email).await? else {
        return Ok(None);
    };
    let Some(hash) = user.password_hash.as_deref() else {
        return Ok(None);
    };
    let ok = bcrypt::verify(password, hash)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password verify failed: {e}")))?;
    Ok(ok.then_some(user))
}

/// Store-side rollup for one user's wallet: staked/reward sums plus NFT count.
pub async fn user_stats(store: &Store, user: &UserRecord) -> Result<UserStats, ApiError> {
    let wallet = user
        .wallet_address
        .clone()
        .ok_or_else(|| ApiError::not_found("User or wallet not found"))?;

    let stakes = store.stakes_by_wallet(&wallet).await?;
    let nfts = store.impact_by_wallet(&wallet).await?;
    Ok(UserStats {
        wallet,
        total_staked: stakes.iter().map(|s| s.amount).sum(),
        total_rewards: stakes.iter().map(|s| s.rewards).sum(),
        nft_count: nfts.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory_store;

    #[tokio::test]
    async fn admin_email_match_grants_admin_role_once() {
        let store = memory_store().await;
        let admin = register(
            &store,
            Some("ops@greenfi.earth"),
            RegisterInput { email: Some("OPS@GreenFi.earth".into()), password: Some("hunter22".into()), ..Default::default() },
        )
        .await
        .unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert_eq!(admin.email.as_deref(), Some("ops@greenfi.earth"));

        let user = register(
            &store,
            Some("ops@greenfi.earth"),
            RegisterInput { email: Some("user@greenfi.earth".into()), password: Some("hunter22".into()), ..Default::default() },
        )
        .await
        .unwrap();
        assert_eq!(user.role, Role::User);
    }

    #[tokio::test]
    async fn registration_requires_email_or_wallet() {
        let store = memory_store().await;
        let err = register(&store, None, RegisterInput::default()).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let wallet_only = register(
            &store,
            None,
            RegisterInput { wallet_address: Some("0xFEED".into()), ..Default::default() },
        )
        .await
        .unwrap();
        assert_eq!(wallet_only.wallet_address.as_deref(), Some("0xfeed"));
        assert!(wallet_only.password_hash.is_none());
    }

    #[tokio::test]
    async fn password_verify_round_trip() {
        let store = memory_store().await;
        register(
            &store,
            None,
            RegisterInput { email: Some("who@x.io".into()), password: Some("s3cretpw".into()), ..Default::default() },
        )
        .await
        .unwrap();

        assert!(verify_password(&store, "who@x.io", "s3cretpw").await.unwrap().is_some());
        assert!(verify_password(&store, "who@x.io", "wrong").await.unwrap().is_none());
        assert!(verify_password(&store, "nobody@x.io", "s3cretpw").await.unwrap().is_none());
    }
}
