use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    http::{header::CONTENT_TYPE, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tokio::signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::envelope::{extract_scan, parse_envelope};
use crate::errors::ServiceError;
use crate::platform::PlatformClient;
use crate::scene::{SceneState, SceneStore};
use crate::signature::verify_signature;
use crate::token::issue_access_token;
use crate::users::UserDirectory;

/// Fixed acknowledgment the platform expects from the event endpoint.
const WEBHOOK_ACK: &str = "success";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scenes: Arc<SceneStore>,
    pub users: Arc<UserDirectory>,
    pub platform: Arc<PlatformClient>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let platform = Arc::new(PlatformClient::new(&config));
        Self {
            config: Arc::new(config),
            scenes: Arc::new(SceneStore::new()),
            users: Arc::new(UserDirectory::new()),
            platform,
        }
    }

    fn scene_ttl(&self) -> Duration {
        Duration::from_secs(self.config.scene_ttl_secs)
    }
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    product: &'static str,
}

#[derive(Serialize)]
struct QrNewResponse {
    scene_id: String,
    qr_url: String,
}

#[derive(Deserialize)]
struct PollQuery {
    scene_id: String,
}

#[derive(Serialize)]
struct PollStatusResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct PollSuccessResponse {
    status: &'static str,
    access_token: String,
    token_type: &'static str,
}

#[derive(Deserialize)]
struct VerifyQuery {
    signature: String,
    timestamp: String,
    nonce: String,
    echostr: String,
}

#[derive(Deserialize)]
struct EventQuery {
    signature: Option<String>,
    timestamp: Option<String>,
    nonce: Option<String>,
}

#[derive(Deserialize)]
struct PasswordLoginForm {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
}

#[derive(Deserialize)]
struct RegisterRequest {
    email: String,
    password: Option<String>,
}

#[derive(Serialize)]
struct UserResponse {
    id: u64,
    email: Option<String>,
    is_active: bool,
    is_verified: bool,
}

#[derive(Deserialize)]
struct EmailCodeRequest {
    email: String,
}

#[derive(Serialize)]
struct EmailCodeResponse {
    message: &'static str,
    code: String,
}

#[derive(Deserialize)]
struct EmailLoginRequest {
    email: String,
    code: String,
}

#[derive(Serialize)]
struct EmailLoginResponse {
    access_token: String,
    token_type: &'static str,
    user_id: u64,
    email: Option<String>,
}

#[derive(Deserialize)]
struct MockScanQuery {
    scene_id: String,
}

#[derive(Serialize)]
struct MockScanResponse {
    message: &'static str,
    external_identity: String,
}

fn error_to_http(err: ServiceError) -> (StatusCode, String) {
    let status = match err {
        ServiceError::BadSignature => StatusCode::FORBIDDEN,
        ServiceError::TokenInvalid(_) => StatusCode::UNAUTHORIZED,
        ServiceError::MalformedEnvelope(_)
        | ServiceError::BadCredentials
        | ServiceError::PasswordNotSet
        | ServiceError::InactiveUser
        | ServiceError::UserExists
        | ServiceError::CodeInvalid => StatusCode::BAD_REQUEST,
        ServiceError::PlatformToken(_) | ServiceError::PlatformQr(_) => StatusCode::BAD_GATEWAY,
        ServiceError::TokenIssue(_) | ServiceError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let code = err.code();
    (status, format!("{} ({code})", err))
}

fn random_scene_id() -> String {
    (OsRng.next_u32() % 900_000 + 100_000).to_string()
}

fn random_external_identity() -> String {
    let mut buf = [0u8; 4];
    OsRng.fill_bytes(&mut buf);
    format!("test_ext_{}", hex::encode(buf))
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        product: "aura-auth",
    })
}

async fn qr_new(State(state): State<AppState>) -> impl IntoResponse {
    let scene_id = random_scene_id();
    state
        .scenes
        .create_scene(&scene_id, Instant::now(), state.scene_ttl());

    match state.platform.qr_url(&scene_id).await {
        Ok(qr_url) => (StatusCode::OK, Json(QrNewResponse { scene_id, qr_url })).into_response(),
        Err(e) => {
            state.scenes.remove(&scene_id);
            let (status, msg) = error_to_http(e);
            (status, msg).into_response()
        }
    }
}

async fn qr_poll(
    State(state): State<AppState>,
    Query(q): Query<PollQuery>,
) -> impl IntoResponse {
    let now = Instant::now();
    let ttl = state.scene_ttl();

    let Some(session) = state.scenes.get(&q.scene_id) else {
        return (StatusCode::OK, Json(PollStatusResponse { status: "expired" })).into_response();
    };

    if now.saturating_duration_since(session.created_at) >= ttl {
        state.scenes.remove(&q.scene_id);
        return (StatusCode::OK, Json(PollStatusResponse { status: "expired" })).into_response();
    }

    if session.state == SceneState::Pending {
        return (StatusCode::OK, Json(PollStatusResponse { status: "waiting" })).into_response();
    }

    // Scanned: the one state-changing read. Resolve the account, issue the
    // token, and retire the scene so a later poll cannot replay it.
    let Some(external_identity) = session.external_identity else {
        let (status, msg) = error_to_http(ServiceError::Internal("scanned scene without identity"));
        return (status, msg).into_response();
    };

    let user = state
        .users
        .resolve_or_create_external(&external_identity, state.platform.stub_mode());

    let token = match issue_access_token(
        user.id,
        state.config.access_token_expire_minutes,
        &state.config.secret_key,
    ) {
        Ok(token) => token,
        Err(e) => {
            let (status, msg) = error_to_http(e);
            return (status, msg).into_response();
        }
    };

    state.scenes.remove(&q.scene_id);
    info!(user_id = user.id, "qr login resolved");
    (
        StatusCode::OK,
        Json(PollSuccessResponse {
            status: "success",
            access_token: token,
            token_type: "bearer",
        }),
    )
        .into_response()
}

async fn webhook_verify(
    State(state): State<AppState>,
    Query(q): Query<VerifyQuery>,
) -> impl IntoResponse {
    if verify_signature(
        &q.signature,
        &q.timestamp,
        &q.nonce,
        &state.config.callback_token,
    ) {
        (StatusCode::OK, q.echostr).into_response()
    } else {
        warn!("webhook challenge signature mismatch");
        let (status, msg) = error_to_http(ServiceError::BadSignature);
        (status, msg).into_response()
    }
}

async fn webhook_event(
    State(state): State<AppState>,
    Query(q): Query<EventQuery>,
    body: String,
) -> impl IntoResponse {
    let verified = match (&q.signature, &q.timestamp, &q.nonce) {
        (Some(signature), Some(timestamp), Some(nonce)) => {
            verify_signature(signature, timestamp, nonce, &state.config.callback_token)
        }
        _ => false,
    };
    if !verified {
        warn!("webhook event signature mismatch");
        let (status, msg) = error_to_http(ServiceError::BadSignature);
        return (status, msg).into_response();
    }

    // Authenticated delivery: always acknowledge, even when the payload is
    // unusable, or the platform will retry the event indefinitely.
    match parse_envelope(&body) {
        Ok(envelope) => {
            if let Some((scene_id, external_identity)) = extract_scan(&envelope) {
                state
                    .scenes
                    .mark_scanned(&scene_id, &external_identity, Instant::now());
                info!(%scene_id, "scan event recorded");
            }
        }
        Err(e) => {
            warn!("dropping webhook payload: {e}");
        }
    }

    (StatusCode::OK, WEBHOOK_ACK).into_response()
}

async fn login_access_token(
    State(state): State<AppState>,
    Form(form): Form<PasswordLoginForm>,
) -> impl IntoResponse {
    let user = match state.users.authenticate(&form.username, &form.password) {
        Ok(user) => user,
        Err(e) => {
            let (status, msg) = error_to_http(e);
            return (status, msg).into_response();
        }
    };

    match issue_access_token(
        user.id,
        state.config.access_token_expire_minutes,
        &state.config.secret_key,
    ) {
        Ok(token) => (
            StatusCode::OK,
            Json(TokenResponse {
                access_token: token,
                token_type: "bearer",
            }),
        )
            .into_response(),
        Err(e) => {
            let (status, msg) = error_to_http(e);
            (status, msg).into_response()
        }
    }
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    match state.users.register(&req.email, req.password.as_deref()) {
        Ok(user) => (
            StatusCode::OK,
            Json(UserResponse {
                id: user.id,
                email: user.email,
                is_active: user.is_active,
                is_verified: user.is_verified,
            }),
        )
            .into_response(),
        Err(e) => {
            let (status, msg) = error_to_http(e);
            (status, msg).into_response()
        }
    }
}

async fn email_code(
    State(state): State<AppState>,
    Json(req): Json<EmailCodeRequest>,
) -> impl IntoResponse {
    let code = state.users.issue_email_code(&req.email, Instant::now());
    // Demo convenience: hand the code back instead of requiring a mailbox.
    (
        StatusCode::OK,
        Json(EmailCodeResponse {
            message: "Verification code sent",
            code,
        }),
    )
}

async fn login_email(
    State(state): State<AppState>,
    Json(req): Json<EmailLoginRequest>,
) -> impl IntoResponse {
    let user = match state
        .users
        .redeem_email_code(&req.email, &req.code, Instant::now())
    {
        Ok(user) => user,
        Err(e) => {
            let (status, msg) = error_to_http(e);
            return (status, msg).into_response();
        }
    };

    match issue_access_token(
        user.id,
        state.config.access_token_expire_minutes,
        &state.config.secret_key,
    ) {
        Ok(token) => (
            StatusCode::OK,
            Json(EmailLoginResponse {
                access_token: token,
                token_type: "bearer",
                user_id: user.id,
                email: user.email,
            }),
        )
            .into_response(),
        Err(e) => {
            let (status, msg) = error_to_http(e);
            (status, msg).into_response()
        }
    }
}

async fn mock_scan(
    State(state): State<AppState>,
    Query(q): Query<MockScanQuery>,
) -> impl IntoResponse {
    if !state.platform.stub_mode() {
        return (
            StatusCode::FORBIDDEN,
            "mock scan is only available in stub mode".to_string(),
        )
            .into_response();
    }

    let external_identity = random_external_identity();
    state
        .scenes
        .mark_scanned(&q.scene_id, &external_identity, Instant::now());
    info!(scene_id = %q.scene_id, "mock scan recorded");

    (
        StatusCode::OK,
        Json(MockScanResponse {
            message: "Scanned",
            external_identity,
        }),
    )
        .into_response()
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(health))
        .route("/login/qr/new", post(qr_new))
        .route("/login/qr/poll", get(qr_poll))
        .route("/login/webhook", get(webhook_verify).post(webhook_event))
        .route("/login/access-token", post(login_access_token))
        .route("/register", post(register))
        .route("/email-code", post(email_code))
        .route("/login/email", post(login_email))
        .route("/login/mock-scan", get(mock_scan))
        .layer(cors)
        .with_state(state)
}

/// Binds and serves the API until SIGINT/SIGTERM.
pub async fn run_http_server(addr: SocketAddr, state: AppState) {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind api listener");
    info!("aura-auth API listening on http://{addr}");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("run api server");

    info!("server shut down");
}

async fn shutdown_signal() {
    let interrupt = async {
        ctrl_c().await.expect("install Ctrl+C handler");
        info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("install terminate handler")
            .recv()
            .await;
        info!("received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }
}
