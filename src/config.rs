use std::env;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_PAGE_SIZE: i64 = 20;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub site_url: String,
    pub secret_key: String,
    pub token_issuer: String,
    pub account_token_expiry_minutes: i64,
    pub download_token_expiry_minutes: i64,
    pub session_expiry_days: i64,
    pub session_cookie_secure: bool,
    pub session_cookie_domain: Option<String>,
    pub cors_allowed_origin: Option<String>,
    pub page_size: i64,
    pub max_upload_bytes: usize,
    pub aws_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: String,
    pub s3_bucket: String,
    pub smtp: Option<SmtpConfig>,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub from_address: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let site_url = env::var("SITE_URL")
            .unwrap_or_else(|_| format!("http://{server_host}:{server_port}"))
            .trim_end_matches('/')
            .to_string();
        let secret_key = env::var("SECRET_KEY").context("SECRET_KEY must be set")?;
        let token_issuer = env::var("TOKEN_ISSUER").unwrap_or_else(|_| "mailroom".to_string());
        let account_token_expiry_minutes = env::var("ACCOUNT_TOKEN_EXPIRY_MINUTES")
            .unwrap_or_else(|_| (3 * 24 * 60).to_string())
            .parse()
            .context("ACCOUNT_TOKEN_EXPIRY_MINUTES must be an integer")?;
        let download_token_expiry_minutes = env::var("DOWNLOAD_TOKEN_EXPIRY_MINUTES")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("DOWNLOAD_TOKEN_EXPIRY_MINUTES must be an integer")?;
        let session_expiry_days = env::var("SESSION_EXPIRY_DAYS")
            .unwrap_or_else(|_| "14".to_string())
            .parse()
            .context("SESSION_EXPIRY_DAYS must be an integer")?;
        let session_cookie_secure = env::var("SESSION_COOKIE_SECURE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let session_cookie_domain = env::var("SESSION_COOKIE_DOMAIN").ok();
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let page_size = env::var("PAGE_SIZE")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let max_upload_bytes = env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| (25 * 1024 * 1024).to_string())
            .parse()
            .context("MAX_UPLOAD_BYTES must be an integer")?;
        let aws_endpoint_url = env::var("AWS_ENDPOINT_URL").ok();
        let aws_access_key_id = env::var("AWS_ACCESS_KEY_ID").ok();
        let aws_secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok();
        let aws_region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let s3_bucket = env::var("S3_BUCKET").context("S3_BUCKET must be set")?;
        let smtp = SmtpConfig::from_env()?;

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            site_url,
            secret_key,
            token_issuer,
            account_token_expiry_minutes,
            download_token_expiry_minutes,
            session_expiry_days,
            session_cookie_secure,
            session_cookie_domain,
            cors_allowed_origin,
            page_size,
            max_upload_bytes,
            aws_endpoint_url,
            aws_access_key_id,
            aws_secret_access_key,
            aws_region,
            s3_bucket,
            smtp,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

impl SmtpConfig {
    /// Returns `None` when `SMTP_HOST` is unset; the worker then refuses to start.
    fn from_env() -> Result<Option<Self>> {
        let Ok(host) = env::var("SMTP_HOST") else {
            return Ok(None);
        };
        let port = env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse()
            .context("SMTP_PORT must be a valid u16")?;
        let from_address =
            env::var("SMTP_FROM").unwrap_or_else(|_| "noreply@mailroom.local".to_string());

        Ok(Some(Self {
            host,
            port,
            from_address,
            user: env::var("SMTP_USER").ok(),
            password: env::var("SMTP_PASSWORD").ok(),
        }))
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
