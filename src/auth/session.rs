use axum::http::HeaderValue;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    models::{NewSession, Session, User},
    schema::{sessions, users},
};

pub const SESSION_COOKIE_NAME: &str = "sessionid";

/// Opens a session for `user`, stamps `last_login`, and returns the cookie
/// value to hand to the client. Only the hash of that value is stored.
pub fn start_session(
    conn: &mut PgConnection,
    config: &AppConfig,
    user_id: i64,
) -> AppResult<(String, DateTime<Utc>)> {
    let now = Utc::now();
    let token = generate_session_token();
    let expires_at = now + ChronoDuration::days(config.session_expiry_days);

    let new_session = NewSession {
        id: Uuid::new_v4(),
        user_id,
        token_hash: hash_session_token(&token),
        issued_at: now.naive_utc(),
        expires_at: expires_at.naive_utc(),
    };

    conn.transaction(|conn| {
        diesel::insert_into(sessions::table)
            .values(&new_session)
            .execute(conn)?;
        diesel::update(users::table.find(user_id))
            .set(users::last_login.eq(Some(now.naive_utc())))
            .execute(conn)?;
        Ok::<_, diesel::result::Error>(())
    })?;

    Ok((token, expires_at))
}

/// Resolves a session cookie to its live session and active user.
pub fn find_session(conn: &mut PgConnection, token: &str) -> AppResult<Option<(Session, User)>> {
    let now = Utc::now().naive_utc();
    let found = sessions::table
        .inner_join(users::table)
        .filter(sessions::token_hash.eq(hash_session_token(token)))
        .filter(sessions::revoked_at.is_null())
        .filter(sessions::expires_at.gt(now))
        .filter(users::is_active.eq(true))
        .select((sessions::all_columns, users::all_columns))
        .first::<(Session, User)>(conn)
        .optional()
        .map_err(AppError::from)?;
    Ok(found)
}

pub fn revoke_session(conn: &mut PgConnection, session_id: Uuid) -> AppResult<()> {
    let now = Utc::now().naive_utc();
    diesel::update(
        sessions::table
            .find(session_id)
            .filter(sessions::revoked_at.is_null()),
    )
    .set((sessions::revoked_at.eq(now), sessions::updated_at.eq(now)))
    .execute(conn)?;
    Ok(())
}

/// Revokes every live session of `user_id` except `keep`.
pub fn revoke_other_sessions(
    conn: &mut PgConnection,
    user_id: i64,
    keep: Option<Uuid>,
) -> AppResult<usize> {
    let now = Utc::now().naive_utc();
    let live = sessions::table
        .filter(sessions::user_id.eq(user_id))
        .filter(sessions::revoked_at.is_null());
    let changes = (sessions::revoked_at.eq(now), sessions::updated_at.eq(now));

    let revoked = match keep {
        Some(keep) => diesel::update(live.filter(sessions::id.ne(keep)))
            .set(changes)
            .execute(conn)?,
        None => diesel::update(live).set(changes).execute(conn)?,
    };
    Ok(revoked)
}

pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn build_session_cookie(
    config: &AppConfig,
    token: &str,
    expires_at: DateTime<Utc>,
) -> AppResult<HeaderValue> {
    let max_age = ChronoDuration::days(config.session_expiry_days).num_seconds();

    let mut parts = vec![format!("{}={}", SESSION_COOKIE_NAME, token)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Lax".into());
    parts.push(format!("Max-Age={}", max_age));
    parts.push(format!("Expires={}", expires_at.to_rfc2822()));
    if config.session_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &config.session_cookie_domain {
        parts.push(format!("Domain={}", domain));
    }

    HeaderValue::from_str(&parts.join("; "))
        .map_err(|err| AppError::internal(format!("invalid session cookie: {err}")))
}

pub fn build_clear_session_cookie(config: &AppConfig) -> AppResult<HeaderValue> {
    let mut parts = vec![format!("{}=", SESSION_COOKIE_NAME)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Lax".into());
    parts.push("Max-Age=0".into());
    parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".into());
    if config.session_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &config.session_cookie_domain {
        parts.push(format!("Domain={}", domain));
    }

    HeaderValue::from_str(&parts.join("; "))
        .map_err(|err| AppError::internal(format!("invalid session cookie: {err}")))
}
