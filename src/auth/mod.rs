pub mod password;
pub mod session;
pub mod tokens;

use axum::{
    async_trait,
    extract::{FromRequestParts, OriginalUri},
    http::{request::Parts, Uri},
    response::{IntoResponse, Response},
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use uuid::Uuid;

use crate::{
    error::AppResult,
    flash::{Notice, Redirect},
    models::User,
    state::AppState,
};

pub const LOGIN_PATH: &str = "/login";
pub const REQUEST_DENIED: &str = "Your request could not be completed.";

/// The active user behind the request's session cookie. Rejects with a
/// redirect to the login page that remembers where the user was going.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub session_id: Uuid,
}

impl CurrentUser {
    async fn authenticate(parts: &mut Parts, state: &AppState) -> AppResult<Option<Self>> {
        let Ok(TypedHeader(cookies)) =
            TypedHeader::<Cookie>::from_request_parts(parts, state).await
        else {
            return Ok(None);
        };
        let Some(token) = cookies.get(session::SESSION_COOKIE_NAME) else {
            return Ok(None);
        };
        if token.is_empty() {
            return Ok(None);
        }

        let mut conn = state.db()?;
        let found = session::find_session(&mut conn, token)?;
        Ok(found.map(|(session, user)| CurrentUser {
            user,
            session_id: session.id,
        }))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match Self::authenticate(parts, state).await {
            Ok(Some(current)) => Ok(current),
            Ok(None) => {
                let uri = request_uri(parts);
                let next = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
                let location = format!(
                    "{LOGIN_PATH}?next={}",
                    utf8_percent_encode(next, NON_ALPHANUMERIC)
                );
                Err(Redirect::to(location).into_response())
            }
            Err(err) => Err(err.into_response()),
        }
    }
}

/// The URI as the client sent it. Nested routers only see the part below
/// their prefix in `parts.uri`.
fn request_uri(parts: &Parts) -> Uri {
    parts
        .extensions
        .get::<OriginalUri>()
        .map(|original| original.0.clone())
        .unwrap_or_else(|| parts.uri.clone())
}

/// Gate for correspondence pages: requires an authenticated creator.
#[derive(Debug, Clone)]
pub struct CreatorAccess(pub CurrentUser);

/// Gate for the user directory: requires an authenticated administrator.
#[derive(Debug, Clone)]
pub struct AdminAccess(pub CurrentUser);

async fn gate(
    parts: &mut Parts,
    state: &AppState,
    allowed: fn(&User) -> bool,
) -> Result<CurrentUser, Response> {
    match CurrentUser::authenticate(parts, state).await {
        Ok(Some(current)) if allowed(&current.user) => Ok(current),
        Ok(Some(current)) => {
            tracing::info!(
                user_id = current.user.id,
                path = %request_uri(parts).path(),
                "permission denied"
            );
            Err(denied())
        }
        Ok(None) => Err(denied()),
        Err(err) => Err(err.into_response()),
    }
}

fn denied() -> Response {
    Redirect::to(LOGIN_PATH)
        .with_notice(Notice::info(REQUEST_DENIED))
        .into_response()
}

#[async_trait]
impl FromRequestParts<AppState> for CreatorAccess {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        gate(parts, state, |user| user.is_creator).await.map(CreatorAccess)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminAccess {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        gate(parts, state, |user| user.is_admin).await.map(AdminAccess)
    }
}
