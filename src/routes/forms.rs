//! Form decoding and field validation shared by the form-post handlers.

use std::collections::HashMap;

use axum::extract::Multipart;
use chrono::NaiveDate;
use tracing::warn;

use crate::error::{AppError, AppResult, FieldErrors};

pub const REQUIRED: &str = "This field is required.";

pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Text fields of a submitted form plus at most one file.
#[derive(Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    pub file: Option<UploadedFile>,
}

impl FormData {
    pub fn from_fields(fields: HashMap<String, String>) -> Self {
        Self { fields, file: None }
    }

    /// Reads a `multipart/form-data` body. The part named `file_field` is
    /// kept as the upload; an empty file part counts as no file.
    pub async fn from_multipart(mut multipart: Multipart, file_field: &str) -> AppResult<Self> {
        let mut form = FormData::default();

        while let Some(field) = multipart.next_field().await.map_err(|err| {
            warn!(error = %err, "invalid multipart data");
            AppError::bad_request(format!("invalid multipart data: {err}"))
        })? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };

            if name == file_field {
                let file_name = field.file_name().map(str::to_owned).unwrap_or_default();
                let content_type = field.content_type().map(str::to_owned);
                let data = field.bytes().await.map_err(|err| {
                    warn!(error = %err, "failed to read uploaded file");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                if !data.is_empty() {
                    form.file = Some(UploadedFile {
                        file_name,
                        content_type,
                        bytes: data.to_vec(),
                    });
                }
            } else {
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid value for {name}: {err}"))
                })?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    pub fn raw(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    fn trimmed(&self, name: &str) -> Option<&str> {
        self.raw(name).map(str::trim).filter(|value| !value.is_empty())
    }

    /// Checkbox semantics: absent, empty, `0`, `false` and `off` are false.
    pub fn checkbox(&self, name: &str) -> bool {
        match self.raw(name).map(|value| value.trim().to_ascii_lowercase()) {
            None => false,
            Some(value) => !matches!(value.as_str(), "" | "0" | "false" | "off"),
        }
    }
}

/// Collects per-field errors while values are pulled out of a form.
#[derive(Default)]
pub struct Validator {
    errors: FieldErrors,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn required(&mut self, form: &FormData, name: &str, max_len: usize) -> String {
        match form.trimmed(name) {
            Some(value) => {
                self.check_length(name, value, max_len);
                value.to_string()
            }
            None => {
                self.error(name, REQUIRED);
                String::new()
            }
        }
    }

    pub fn optional(&mut self, form: &FormData, name: &str, max_len: usize) -> Option<String> {
        let value = form.trimmed(name)?;
        self.check_length(name, value, max_len);
        Some(value.to_string())
    }

    /// Free text with no length limit; blank becomes `None`.
    pub fn text(&mut self, form: &FormData, name: &str) -> Option<String> {
        form.trimmed(name).map(str::to_owned)
    }

    pub fn optional_email(&mut self, form: &FormData, name: &str) -> Option<String> {
        let value = self.optional(form, name, 254)?;
        if value.parse::<lettre::Address>().is_err() {
            self.error(name, "Enter a valid email address.");
        }
        Some(value.to_lowercase())
    }

    pub fn required_email(&mut self, form: &FormData, name: &str) -> String {
        if form.trimmed(name).is_none() {
            self.error(name, REQUIRED);
            return String::new();
        }
        self.optional_email(form, name).unwrap_or_default()
    }

    pub fn required_date(&mut self, form: &FormData, name: &str) -> Option<NaiveDate> {
        match form.trimmed(name) {
            Some(value) => self.parse_date(name, value),
            None => {
                self.error(name, REQUIRED);
                None
            }
        }
    }

    pub fn optional_date(&mut self, form: &FormData, name: &str) -> Option<NaiveDate> {
        let value = form.trimmed(name)?;
        self.parse_date(name, value)
    }

    fn parse_date(&mut self, name: &str, value: &str) -> Option<NaiveDate> {
        match parse_date(value) {
            Some(date) => Some(date),
            None => {
                self.error(name, "Enter a valid date.");
                None
            }
        }
    }

    fn check_length(&mut self, name: &str, value: &str, max_len: usize) {
        let len = value.chars().count();
        if len > max_len {
            self.error(
                name,
                format!(
                    "Ensure this value has at most {max_len} characters (it has {len})."
                ),
            );
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn finish(self) -> AppResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::validation(self.errors))
        }
    }
}

/// Accepts `YYYY-MM-DD` and `MM/DD/YYYY`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%m/%d/%Y"))
        .ok()
}

/// Only same-site absolute paths are followed after login.
pub fn safe_next(next: Option<&str>) -> Option<String> {
    let next = next?.trim();
    if next.starts_with('/') && !next.starts_with("//") && !next.contains('\\') {
        Some(next.to_string())
    } else {
        None
    }
}
