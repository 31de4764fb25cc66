use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use diesel::{dsl::exists, prelude::*, select};
use tracing::{info, warn};

use crate::{
    auth::tokens::RecordKind,
    error::{AppError, AppResult},
    models::User,
    schema::{incoming, outgoing, sessions, users},
    state::AppState,
    storage::{attachment_content_disposition, attachment_key, new_attachment_revision},
};

use super::forms::UploadedFile;

const PRESIGNED_URL_EXPIRY_SECONDS: u64 = 300;

/// An attachment as stored on a record row.
pub struct StoredFile {
    pub key: String,
    pub file_name: String,
    pub content_type: Option<String>,
}

/// Uploads `file` under a fresh key below the record's prefix and returns
/// what to store on the row.
pub async fn store_attachment(
    state: &AppState,
    kind: RecordKind,
    slug: &str,
    file: UploadedFile,
) -> AppResult<StoredFile> {
    let key = attachment_key(kind, slug, &new_attachment_revision(), &file.file_name);
    let file_name = if file.file_name.trim().is_empty() {
        key.rsplit('/').next().unwrap_or_default().to_string()
    } else {
        file.file_name.trim().to_string()
    };
    let content_type = file.content_type.or_else(|| {
        mime_guess::from_path(&file_name)
            .first_raw()
            .map(str::to_owned)
    });

    state
        .storage
        .put_object(
            &key,
            file.bytes,
            content_type.clone(),
            attachment_content_disposition(&file_name),
        )
        .await
        .map_err(|err| AppError::internal(format!("failed to store attachment: {err}")))?;

    info!(kind = kind.as_str(), %slug, %key, "attachment stored");
    Ok(StoredFile {
        key,
        file_name,
        content_type,
    })
}

/// Best effort; an orphaned object is logged and left behind.
pub async fn discard_attachment(state: &AppState, key: &str) {
    if let Err(err) = state.storage.delete_object(key).await {
        warn!(%key, error = %err, "failed to delete attachment");
    }
}

pub fn download_path(state: &AppState, kind: RecordKind, slug: &str, user: &User) -> AppResult<String> {
    let token = state.tokens.generate_download_token(kind, slug, user.id)?;
    Ok(format!("/files/{token}"))
}

/// Follows a signed download link to a short-lived presigned URL. The
/// token's user must still be an active creator with a live session.
pub async fn download(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<impl IntoResponse> {
    let claims = state
        .tokens
        .verify_download_token(&token)
        .map_err(|_| AppError::unauthorized())?;

    let mut conn = state.db()?;

    let user: User = users::table
        .find(claims.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;
    if !user.is_active || !user.is_creator {
        return Err(AppError::unauthorized());
    }

    let now = chrono::Utc::now().naive_utc();
    let has_live_session: bool = select(exists(
        sessions::table
            .filter(sessions::user_id.eq(user.id))
            .filter(sessions::revoked_at.is_null())
            .filter(sessions::expires_at.gt(now)),
    ))
    .get_result(&mut conn)?;
    if !has_live_session {
        return Err(AppError::unauthorized());
    }

    let key: String = match claims.kind {
        RecordKind::Incoming => incoming::table
            .filter(incoming::slug.eq(&claims.slug))
            .select(incoming::file_key)
            .first(&mut conn)?,
        RecordKind::Outgoing => outgoing::table
            .filter(outgoing::slug.eq(&claims.slug))
            .select(outgoing::file_key)
            .first(&mut conn)?,
    };

    drop(conn);

    let presigned_url = state
        .storage
        .presign_get_object(&key, Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS))
        .await
        .map_err(|err| AppError::internal(format!("failed to generate download URL: {err}")))?;

    Ok(axum::response::Redirect::temporary(&presigned_url))
}
