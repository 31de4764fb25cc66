use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Form,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    auth::{
        password::verify_password,
        session::{build_clear_session_cookie, build_session_cookie, revoke_session, start_session},
        CurrentUser,
    },
    error::{AppError, AppResult},
    flash::{Notice, Notices, Redirect, Rendered},
    models::User,
    schema::users,
    state::AppState,
};

use super::forms::safe_next;

pub const PROFILE_PATH: &str = "/users/me";

const INVALID_LOGIN: &str =
    "Please enter a correct username and password. Note that both fields may be case-sensitive.";

#[derive(Deserialize)]
pub struct LoginQuery {
    pub next: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub next: Option<String>,
}

#[derive(Serialize)]
struct LoginPage {
    next: Option<String>,
}

pub async fn login_page(
    current: Option<CurrentUser>,
    Query(query): Query<LoginQuery>,
    notices: Notices,
) -> Response {
    if let Some(current) = current {
        return Redirect::to(PROFILE_PATH)
            .with_notice(Notice::info(format!(
                "You are already logged in as {}",
                current.user.username
            )))
            .into_response();
    }

    Rendered::new(
        notices,
        LoginPage {
            next: safe_next(query.next.as_deref()),
        },
    )
    .into_response()
}

pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> AppResult<Redirect> {
    let username = form.username.trim().to_lowercase();
    if username.is_empty() || form.password.is_empty() {
        return Err(AppError::field("", INVALID_LOGIN));
    }

    let mut conn = state.db()?;
    let user = users::table
        .filter(users::username.eq(&username))
        .first::<User>(&mut conn)
        .optional()?;

    let Some(user) = user else {
        warn!(username = %username, "login attempt for unknown user");
        return Err(AppError::field("", INVALID_LOGIN));
    };

    if !verify_password(&form.password, &user.password_hash)? || !user.is_active {
        warn!(user_id = user.id, "login rejected");
        return Err(AppError::field("", INVALID_LOGIN));
    }

    let (token, expires_at) = start_session(&mut conn, &state.config, user.id)?;
    let cookie = build_session_cookie(&state.config, &token, expires_at)?;
    info!(user_id = user.id, "user logged in");

    let target = safe_next(form.next.as_deref()).unwrap_or_else(|| PROFILE_PATH.to_string());
    Ok(Redirect::to(target).with_cookie(cookie))
}

pub async fn logout(
    State(state): State<AppState>,
    current: Option<CurrentUser>,
) -> AppResult<Redirect> {
    if let Some(current) = current {
        let mut conn = state.db()?;
        revoke_session(&mut conn, current.session_id)?;
        info!(user_id = current.user.id, "user logged out");
    }

    let cookie = build_clear_session_cookie(&state.config)?;
    Ok(Redirect::to("/")
        .with_cookie(cookie)
        .with_notice(Notice::success("You have been logged out.")))
}
