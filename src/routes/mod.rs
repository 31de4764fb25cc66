use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

pub mod accounts;
pub mod auth;
pub mod comments;
pub mod directory;
pub mod files;
pub mod forms;
pub mod health;
pub mod incoming;
pub mod outgoing;

pub fn create_router(state: AppState) -> Router<()> {
    let incoming_routes = Router::new()
        .route(
            "/",
            get(incoming::list_incoming).post(incoming::create_incoming),
        )
        .route("/:slug", get(incoming::get_incoming))
        .route("/:slug/update", post(incoming::update_incoming))
        .route("/:slug/comments", post(incoming::comment_incoming));

    let outgoing_routes = Router::new()
        .route(
            "/",
            get(outgoing::list_outgoing).post(outgoing::create_outgoing),
        )
        .route("/:slug", get(outgoing::get_outgoing))
        .route("/:slug/update", post(outgoing::update_outgoing))
        .route("/:slug/comments", post(outgoing::comment_outgoing));

    let users_routes = Router::new()
        .route("/", get(directory::list_users))
        .route(
            "/me",
            get(accounts::my_profile).post(accounts::update_profile),
        )
        .route(
            "/register",
            get(accounts::register_page).post(accounts::register),
        )
        .route("/activate/:uidb64/:token", get(accounts::activate))
        .route(
            "/forgot-password",
            get(accounts::forgot_password_page).post(accounts::forgot_password),
        )
        .route(
            "/reset-password/:uidb64/:token",
            get(accounts::reset_password_page).post(accounts::reset_password),
        )
        .route(
            "/change-password",
            get(accounts::change_password_page).post(accounts::change_password),
        )
        .route(
            "/change-password/done",
            get(accounts::change_password_done),
        )
        .route("/:slug", get(accounts::user_detail));

    let router = Router::new()
        .route("/", get(incoming::list_incoming))
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/logout", post(auth::logout))
        .route(
            "/departments",
            get(directory::list_departments).post(directory::create_department),
        )
        .route("/files/:token", get(files::download))
        .nest("/incoming", incoming_routes)
        .nest("/outgoing", outgoing_routes)
        .nest("/users", users_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http());

    match cors_layer(state.config.cors_allowed_origin.as_deref()) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// Cross-origin access for the listed origins only. The session cookie
/// authorizes every form post, so without an explicit list the service
/// stays same-origin.
fn cors_layer(allowed: Option<&str>) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = allowed?
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .filter_map(|value| match value.parse::<HeaderValue>() {
            Ok(header) => Some(header),
            Err(_) => {
                tracing::warn!(origin = %value, "ignoring invalid CORS allowed origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true),
    )
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}
