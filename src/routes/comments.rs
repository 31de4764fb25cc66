use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::{AppError, AppResult};

use super::{directory::UserSummary, forms::REQUIRED, to_iso};

/// A posted comment. The body is required even though the column is
/// nullable; authors that were deleted later leave a null there instead.
pub struct CommentForm {
    pub body: String,
}

impl CommentForm {
    pub fn parse(mut fields: HashMap<String, String>) -> AppResult<Self> {
        let body = fields
            .remove("comment")
            .map(|value| value.trim().to_string())
            .unwrap_or_default();
        if body.is_empty() {
            return Err(AppError::field("comment", REQUIRED));
        }
        Ok(Self { body })
    }
}

#[derive(Debug, Serialize)]
pub struct CommentView {
    pub id: i64,
    pub comment: Option<String>,
    pub created_by: Option<UserSummary>,
    pub created_at: String,
}

impl CommentView {
    pub fn build(
        id: i64,
        comment: Option<String>,
        created_by: Option<i64>,
        created_at: NaiveDateTime,
        people: &HashMap<i64, UserSummary>,
    ) -> Self {
        Self {
            id,
            comment,
            created_by: created_by.and_then(|user_id| people.get(&user_id).cloned()),
            created_at: to_iso(created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_comment_is_rejected() {
        let mut fields = HashMap::new();
        fields.insert("comment".to_string(), "   ".to_string());
        let err = CommentForm::parse(fields).err().unwrap();
        assert_eq!(err.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
        assert!(CommentForm::parse(HashMap::new()).is_err());
    }

    #[test]
    fn comment_body_is_trimmed() {
        let mut fields = HashMap::new();
        fields.insert("comment".to_string(), "  Forwarded to legal.\n".to_string());
        assert_eq!(CommentForm::parse(fields).unwrap().body, "Forwarded to legal.");
    }
}
