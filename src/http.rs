use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::aggregate;
use crate::auth::{self, AdminUser, AuthUser};
use crate::chain::{Chain, ChainError, MintNftRequest};
use crate::config::Config;
use crate::error::ApiError;
use crate::projects::{self, CreateProjectInput};
use crate::stakes::StakeService;
use crate::store::Store;
use crate::users::{self, RegisterInput};

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub chain: Arc<dyn Chain>,
    pub stakes: StakeService,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Store, chain: Arc<dyn Chain>, config: Config) -> AppState {
        let stakes = StakeService::new(
            chain.clone(),
            store.clone(),
            config.default_apr,
            config.default_lock_days,
        );
        AppState { store, chain, stakes, config: Arc::new(config) }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth_register))
        .route("/auth/login", post(auth_login))
        .route("/auth/wallet/connect", post(auth_wallet_connect))
        .route("/user/:id", get(get_user))
        .route("/user/:id/stats", get(get_user_stats))
        .route("/user/:id/nfts", get(get_user_nfts))
        .route("/stake/rate", get(stake_rate))
        .route("/stake/:wallet", get(get_wallet_stakes))
        .route("/stake/initiate", post(stake_initiate))
        .route("/stake/claim", post(stake_claim))
        .route("/stake/withdraw", post(stake_withdraw))
        .route("/projects", get(list_projects))
        .route("/projects/add", post(add_project))
        .route("/projects/approve/:id", post(approve_project))
        .route("/impact/user/:wallet", get(impact_user))
        .route("/impact/leaderboard", get(impact_leaderboard))
        .route("/impact/project/:id", get(impact_project))
        .route("/admin/overview", get(admin_overview))
        .route("/admin/impact/mint", post(admin_mint))
        .route("/admin/users", get(admin_users))
        .route("/admin/projects", get(admin_projects))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "greenfi-api" }))
}

// ---- auth ----

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterReq {
    email: Option<String>,
    username: Option<String>,
    password: Option<String>,
    wallet_address: Option<String>,
}

fn check_email(email: &str) -> Result<(), ApiError> {
    if !email.contains('@') || email.trim().len() < 3 {
        return Err(ApiError::bad_request("Invalid payload"));
    }
    Ok(())
}

async fn auth_register(
    State(st): State<AppState>,
    Json(req): Json<RegisterReq>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.email.is_none() && req.wallet_address.is_none() {
        return Err(ApiError::bad_request("email or walletAddress is required"));
    }
    let password = req.password.ok_or_else(|| ApiError::bad_request("Invalid payload"))?;
    if password.len() < 6 {
        return Err(ApiError::bad_request("Invalid payload"));
    }
    if let Some(email) = req.email.as_deref() {
        check_email(email)?;
        if st.store.user_by_email(email).await?.is_some() {
            return Err(ApiError::Conflict("Email already in use".into()));
        }
    }
    if let Some(wallet) = req.wallet_address.as_deref() {
        if st.store.user_by_wallet(wallet).await?.is_some() {
            return Err(ApiError::Conflict("Wallet already connected".into()));
        }
    }

    let user = users::register(
        &st.store,
        st.config.admin_email.as_deref(),
        RegisterInput {
            email: req.email,
            username: req.username,
            password: Some(password),
            wallet_address: req.wallet_address,
        },
    )
    .await?;
    let token = auth::sign_token(&st.config.jwt_secret, &user.id, user.role)?;
    Ok((StatusCode::CREATED, Json(json!({ "token": token, "user": user }))))
}

#[derive(Deserialize)]
struct LoginReq {
    email: String,
    password: String,
}

async fn auth_login(
    State(st): State<AppState>,
    Json(req): Json<LoginReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    check_email(&req.email)?;
    if req.password.len() < 6 {
        return Err(ApiError::bad_request("Invalid payload"));
    }
    let user = users::verify_password(&st.store, &req.email, &req.password)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid email or password".into()))?;
    let token = auth::sign_token(&st.config.jwt_secret, &user.id, user.role)?;
    Ok(Json(json!({ "token": token, "user": user })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletConnectReq {
    wallet_address: String,
    email: Option<String>,
}

/// Login-or-register keyed by wallet address.
async fn auth_wallet_connect(
    State(st): State<AppState>,
    Json(req): Json<WalletConnectReq>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.wallet_address.trim().is_empty() {
        return Err(ApiError::bad_request("walletAddress is required"));
    }

    if let Some(existing) = st.store.user_by_wallet(&req.wallet_address).await? {
        let token = auth::sign_token(&st.config.jwt_secret, &existing.id, existing.role)?;
        return Ok((StatusCode::OK, Json(json!({ "token": token, "user": existing }))));
    }

    if let Some(email) = req.email.as_deref() {
        check_email(email)?;
        if st.store.user_by_email(email).await?.is_some() {
            return Err(ApiError::Conflict("Email already in use".into()));
        }
    }

    let user = users::register(
        &st.store,
        st.config.admin_email.as_deref(),
        RegisterInput {
            email: req.email,
            wallet_address: Some(req.wallet_address),
            ..Default::default()
        },
    )
    .await?;
    let token = auth::sign_token(&st.config.jwt_secret, &user.id, user.role)?;
    Ok((StatusCode::CREATED, Json(json!({ "token": token, "user": user }))))
}

// ---- users ----

async fn get_user(
    State(st): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = st
        .store
        .user_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(json!({ "user": user })))
}

async fn get_user_stats(
    State(st): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = st
        .store
        .user_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("User or wallet not found"))?;
    let stats = users::user_stats(&st.store, &user).await?;
    Ok(Json(serde_json::to_value(stats).unwrap_or_default()))
}

async fn get_user_nfts(
    State(st): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = st
        .store
        .user_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("User or wallet not found"))?;
    let wallet = user
        .wallet_address
        .ok_or_else(|| ApiError::not_found("User or wallet not found"))?;
    let nfts = st.store.impact_by_wallet(&wallet).await?;
    Ok(Json(json!({ "wallet": wallet, "nfts": nfts })))
}

// ---- stakes ----

async fn stake_rate(State(st): State<AppState>) -> Json<serde_json::Value> {
    let rate = st.stakes.rate().await;
    Json(json!({ "apr": rate.apr, "lockDays": rate.lock_days }))
}

async fn get_wallet_stakes(
    State(st): State<AppState>,
    Path(wallet): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if wallet.trim().is_empty() {
        return Err(ApiError::bad_request("wallet is required"));
    }
    let view = st.stakes.wallet_stakes(&wallet).await?;
    Ok(Json(serde_json::to_value(view).unwrap_or_default()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateReq {
    wallet_address: Option<String>,
    amount: Option<f64>,
}

async fn stake_initiate(
    State(st): State<AppState>,
    Json(req): Json<InitiateReq>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let wallet = req
        .wallet_address
        .filter(|w| !w.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("walletAddress is required"))?;
    let amount = match req.amount {
        Some(a) if a.is_finite() && a > 0.0 => a,
        _ => return Err(ApiError::bad_request("amount must be a positive number")),
    };
    let stake = st.stakes.initiate(&wallet, amount).await?;
    Ok((StatusCode::CREATED, Json(json!({ "stake": stake }))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StakeIdReq {
    stake_id: Option<String>,
}

async fn stake_claim(
    State(st): State<AppState>,
    Json(req): Json<StakeIdReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = req.stake_id.ok_or_else(|| ApiError::bad_request("stakeId is required"))?;
    let stake = st
        .stakes
        .claim(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Stake not found"))?;
    Ok(Json(json!({ "stake": stake })))
}

async fn stake_withdraw(
    State(st): State<AppState>,
    Json(req): Json<StakeIdReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = req.stake_id.ok_or_else(|| ApiError::bad_request("stakeId is required"))?;
    let stake = st
        .stakes
        .withdraw(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Stake not found"))?;
    Ok(Json(json!({ "stake": stake })))
}

// ---- projects ----

async fn list_projects(State(st): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let projects = projects::list(&st.store).await?;
    Ok(Json(json!({ "projects": projects })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddProjectReq {
    project_name: Option<String>,
    location: Option<String>,
    description: Option<String>,
    funds_raised: Option<f64>,
    impact_score: Option<f64>,
}

async fn add_project(
    State(st): State<AppState>,
    _admin: AdminUser,
    Json(req): Json<AddProjectReq>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let name = req
        .project_name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("projectName is required"))?;
    let project = projects::create(
        &st.store,
        CreateProjectInput {
            project_name: name,
            location: req.location,
            description: req.description,
            funds_raised: req.funds_raised,
            impact_score: req.impact_score,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(json!({ "project": project }))))
}

async fn approve_project(
    State(st): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let project = projects::approve(&st.store, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;
    Ok(Json(json!({ "project": project })))
}

// ---- impact ----

async fn impact_user(
    State(st): State<AppState>,
    Path(wallet): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if wallet.trim().is_empty() {
        return Err(ApiError::bad_request("wallet is required"));
    }
    let impact = aggregate::user_impact(&st.store, &wallet).await?;
    Ok(Json(serde_json::to_value(impact).unwrap_or_default()))
}

#[derive(Deserialize)]
struct LeaderboardParams {
    limit: Option<String>,
}

async fn impact_leaderboard(
    State(st): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = params.limit.and_then(|l| l.parse::<f64>().ok());
    let board = aggregate::leaderboard(&st.store, limit).await?;
    Ok(Json(json!({ "leaderboard": board })))
}

async fn impact_project(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::bad_request("projectId is required"));
    }
    let impact = aggregate::project_impact(&st.store, &id).await?;
    Ok(Json(serde_json::to_value(impact).unwrap_or_default()))
}

// ---- admin ----

async fn admin_overview(
    State(st): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let overview = aggregate::admin_overview(&st.store).await?;
    Ok(Json(serde_json::to_value(overview).unwrap_or_default()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminMintReq {
    wallet_address: Option<String>,
    carbon_offset: Option<f64>,
    project_name: Option<String>,
    date: Option<String>,
    badge_tier: Option<String>,
    #[serde(rename = "tokenURI")]
    token_uri: Option<String>,
}

async fn admin_mint(
    State(st): State<AppState>,
    _admin: AdminUser,
    Json(req): Json<AdminMintReq>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let wallet = req
        .wallet_address
        .filter(|w| !w.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("walletAddress is required"))?;
    let carbon = match req.carbon_offset {
        Some(c) if c.is_finite() && c > 0.0 => c,
        _ => return Err(ApiError::bad_request("carbonOffset must be a positive number")),
    };
    let project_name = req
        .project_name
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("projectName is required"))?;
    let date = req
        .date
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("date is required"))?;
    let badge_tier = req
        .badge_tier
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("badgeTier is required"))?;

    let mint = MintNftRequest {
        wallet: wallet.to_lowercase(),
        carbon_offset: carbon,
        project_name,
        date,
        badge_tier,
        token_uri: req.token_uri.unwrap_or_default(),
    };
    let tx_hash = match st.chain.mint_impact_nft(&mint).await {
        Ok(hash) => hash,
        Err(ChainError::NotConfigured) => {
            return Err(ApiError::Unavailable("Contract not configured".into()));
        }
        Err(err) => {
            error!("impact NFT mint failed: {err}");
            return Err(ApiError::Unavailable("Failed to mint impact NFT".into()));
        }
    };
    Ok((
        StatusCode::CREATED,
        Json(json!({ "txHash": tx_hash, "network": st.config.network })),
    ))
}

async fn admin_users(
    State(st): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let users = st.store.list_users(200).await?;
    Ok(Json(json!({ "users": users })))
}

async fn admin_projects(
    State(st): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let projects = st.store.list_projects_by_name().await?;
    Ok(Json(json!({ "projects": projects })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use crate::models::Role;
    use crate::store::memory_store;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn test_app() -> (Router, AppState, Arc<MockChain>) {
        let store = memory_store().await;
        let chain = MockChain::new();
        let mut config = Config::default();
        config.admin_email = Some("admin@greenfi.earth".into());
        let state = AppState::new(store, chain.clone(), config);
        (router(state.clone()), state, chain)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn with_bearer(mut req: Request<Body>, token: &str) -> Request<Body> {
        req.headers_mut()
            .insert(header::AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        req
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn admin_token(state: &AppState) -> String {
        auth::sign_token(&state.config.jwt_secret, "admin-id", Role::Admin).unwrap()
    }

    #[tokio::test]
    async fn stake_lifecycle_over_http() {
        let (app, _state, chain) = test_app().await;
        chain.with(|st| st.fail_stake_reads = true); // force store reads

        let resp = app
            .clone()
            .oneshot(post_json("/stake/initiate", json!({"walletAddress": "0xAB12", "amount": 50.0})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        let stake_id = body["stake"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["stake"]["walletAddress"], "0xab12");

        let resp = app
            .clone()
            .oneshot(post_json("/stake/claim", json!({"stakeId": stake_id})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(post_json("/stake/withdraw", json!({"stakeId": stake_id})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["stake"]["status"], "WITHDRAWN");

        // withdrawn stake is gone for claim purposes
        let resp = app
            .clone()
            .oneshot(post_json("/stake/claim", json!({"stakeId": stake_id})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        // and the wallet view (store fallback) still reports the record
        let resp = app.clone().oneshot(get_req("/stake/0xab12")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["stakes"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stake_initiate_rejects_bad_amounts() {
        let (app, _state, _chain) = test_app().await;
        for amount in [json!(0.0), json!(-5.0), serde_json::Value::Null] {
            let resp = app
                .clone()
                .oneshot(post_json("/stake/initiate", json!({"walletAddress": "0x1", "amount": amount})))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn claim_without_id_is_bad_request() {
        let (app, _state, _chain) = test_app().await;
        let resp = app.clone().oneshot(post_json("/stake/claim", json!({}))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["message"], "stakeId is required");
    }

    #[tokio::test]
    async fn stake_rate_returns_defaults_without_chain() {
        let (app, _state, _chain) = test_app().await;
        let resp = app.clone().oneshot(get_req("/stake/rate")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["apr"], 12.0);
        assert_eq!(body["lockDays"], 0.0);
    }

    #[tokio::test]
    async fn admin_routes_enforce_auth_before_logic() {
        let (app, state, _chain) = test_app().await;

        let resp = app.clone().oneshot(get_req("/admin/overview")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let user_token = auth::sign_token(&state.config.jwt_secret, "u1", Role::User).unwrap();
        let resp = app
            .clone()
            .oneshot(with_bearer(get_req("/admin/overview"), &user_token))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = app
            .clone()
            .oneshot(with_bearer(get_req("/admin/overview"), &admin_token(&state)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["totalUsers"], 0);
        assert_eq!(body["nftsMinted"], 0);
    }

    #[tokio::test]
    async fn leaderboard_endpoint_orders_and_shapes() {
        let (app, state, _chain) = test_app().await;
        for (id, wallet, carbon) in [("1", "0xa", 5.0), ("2", "0xb", 10.0), ("3", "0xa", 3.0)] {
            crate::reconciler::ingest_event(
                &state.store,
                &crate::chain::MintEvent {
                    wallet: wallet.into(),
                    token_id: id.into(),
                    carbon_offset: carbon,
                    project_name: "wind".into(),
                    date: "2026-02-02".into(),
                    badge_tier: "gold".into(),
                },
            )
            .await
            .unwrap();
        }

        let resp = app.clone().oneshot(get_req("/impact/leaderboard?limit=10")).await.unwrap();
        let body = body_json(resp).await;
        let board = body["leaderboard"].as_array().unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0]["walletAddress"], "0xb");
        assert_eq!(board[0]["totalCarbonOffset"], 10.0);
        assert_eq!(board[0]["nfts"], 1);
        assert_eq!(board[1]["walletAddress"], "0xa");
        assert_eq!(board[1]["totalCarbonOffset"], 8.0);

        // junk limit falls back to the default instead of erroring
        let resp = app.clone().oneshot(get_req("/impact/leaderboard?limit=banana")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_mint_validates_then_submits() {
        let (app, state, chain) = test_app().await;
        let token = admin_token(&state);

        let resp = app
            .clone()
            .oneshot(with_bearer(
                post_json("/admin/impact/mint", json!({"walletAddress": "0xCAFE", "carbonOffset": -1.0})),
                &token,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .clone()
            .oneshot(with_bearer(
                post_json(
                    "/admin/impact/mint",
                    json!({
                        "walletAddress": "0xCAFE",
                        "carbonOffset": 2.5,
                        "projectName": "Mangroves",
                        "date": "2026-08-01",
                        "badgeTier": "gold"
                    }),
                ),
                &token,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert!(body["txHash"].as_str().unwrap().starts_with("0x"));
        assert_eq!(body["network"], "hedera-testnet");
        assert_eq!(chain.with(|st| st.minted.len()), 1);
        assert_eq!(chain.with(|st| st.minted[0].wallet.clone()), "0xcafe");
    }

    #[tokio::test]
    async fn admin_mint_without_contract_is_unavailable() {
        let (app, state, chain) = test_app().await;
        chain.with(|st| st.not_configured = true);
        let resp = app
            .clone()
            .oneshot(with_bearer(
                post_json(
                    "/admin/impact/mint",
                    json!({
                        "walletAddress": "0x1",
                        "carbonOffset": 1.0,
                        "projectName": "p",
                        "date": "d",
                        "badgeTier": "t"
                    }),
                ),
                &admin_token(&state),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["message"], "Contract not configured");
    }

    #[tokio::test]
    async fn register_login_and_duplicate_email() {
        let (app, _state, _chain) = test_app().await;

        let resp = app
            .clone()
            .oneshot(post_json(
                "/auth/register",
                json!({"email": "Admin@GreenFi.earth", "password": "longenough"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert!(body["token"].as_str().is_some());
        assert_eq!(body["user"]["role"], "ADMIN");
        assert!(body["user"].get("passwordHash").is_none());

        let resp = app
            .clone()
            .oneshot(post_json(
                "/auth/register",
                json!({"email": "admin@greenfi.earth", "password": "longenough"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app
            .clone()
            .oneshot(post_json("/auth/login", json!({"email": "admin@greenfi.earth", "password": "longenough"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(post_json("/auth/login", json!({"email": "admin@greenfi.earth", "password": "wrongpass"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wallet_connect_registers_then_logs_in() {
        let (app, _state, _chain) = test_app().await;

        let resp = app
            .clone()
            .oneshot(post_json("/auth/wallet/connect", json!({"walletAddress": "0xBEEF"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let first = body_json(resp).await;
        let user_id = first["user"]["id"].as_str().unwrap().to_string();

        let resp = app
            .clone()
            .oneshot(post_json("/auth/wallet/connect", json!({"walletAddress": "0xbeef"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let second = body_json(resp).await;
        assert_eq!(second["user"]["id"], user_id.as_str());
    }

    #[tokio::test]
    async fn project_flow_with_admin_auth() {
        let (app, state, _chain) = test_app().await;
        let token = admin_token(&state);

        let resp = app
            .clone()
            .oneshot(with_bearer(
                post_json("/projects/add", json!({"projectName": "Solar Coop", "location": "Kenya"})),
                &token,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        let project_id = body["project"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["project"]["status"], "PENDING");

        let resp = app
            .clone()
            .oneshot(with_bearer(
                post_json(&format!("/projects/approve/{project_id}"), json!({})),
                &token,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["project"]["status"], "APPROVED");

        // public listing shows it without auth
        let resp = app.clone().oneshot(get_req("/projects")).await.unwrap();
        let body = body_json(resp).await;
        assert_eq!(body["projects"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn user_routes_need_a_token_and_404_without_wallet() {
        let (app, state, _chain) = test_app().await;
        let user = users::register(
            &state.store,
            None,
            RegisterInput { email: Some("x@y.io".into()), password: Some("pw12345".into()), ..Default::default() },
        )
        .await
        .unwrap();
        let token = auth::sign_token(&state.config.jwt_secret, &user.id, user.role).unwrap();

        let resp = app.clone().oneshot(get_req(&format!("/user/{}", user.id))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .clone()
            .oneshot(with_bearer(get_req(&format!("/user/{}", user.id)), &token))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // no wallet on this account, so stats has nothing to sum over
        let resp = app
            .clone()
            .oneshot(with_bearer(get_req(&format!("/user/{}/stats", user.id)), &token))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .clone()
            .oneshot(with_bearer(get_req("/user/missing"), &token))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
