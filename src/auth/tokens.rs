use anyhow::Result;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::{config::AppConfig, models::User};

const ACCOUNT_AUDIENCE: &str = "mailroom-account";
const DOWNLOAD_AUDIENCE: &str = "mailroom-download";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountPurpose {
    Activate,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Incoming,
    Outgoing,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Incoming => "incoming",
            RecordKind::Outgoing => "outgoing",
        }
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is malformed, expired or signed with another key")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("token was issued for a different purpose")]
    WrongPurpose,
    #[error("token does not belong to this account")]
    WrongUser,
    #[error("account changed since the token was issued")]
    Stale,
}

#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    account_expiry: Duration,
    download_expiry: Duration,
}

impl TokenService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            encoding: EncodingKey::from_secret(config.secret_key.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret_key.as_bytes()),
            issuer: config.token_issuer.clone(),
            account_expiry: Duration::minutes(config.account_token_expiry_minutes),
            download_expiry: Duration::minutes(config.download_token_expiry_minutes),
        })
    }

    /// Issues an activation or password-reset token bound to the current
    /// state of `user`. Activating the account, logging in or changing the
    /// password changes that state and voids the token.
    pub fn generate_account_token(&self, user: &User, purpose: AccountPurpose) -> Result<String> {
        self.generate_account_token_at(user, purpose, Utc::now())
    }

    fn generate_account_token_at(
        &self,
        user: &User,
        purpose: AccountPurpose,
        now: chrono::DateTime<Utc>,
    ) -> Result<String> {
        let exp = now + self.account_expiry;
        let claims = AccountClaims {
            sub: user.uid,
            purpose,
            state: state_fingerprint(user),
            iss: self.issuer.clone(),
            aud: ACCOUNT_AUDIENCE.to_string(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_account_token(
        &self,
        user: &User,
        purpose: AccountPurpose,
        token: &str,
    ) -> Result<AccountClaims, TokenError> {
        let claims = self.decode_account_token(token)?;
        if claims.purpose != purpose {
            return Err(TokenError::WrongPurpose);
        }
        if claims.sub != user.uid {
            return Err(TokenError::WrongUser);
        }
        if claims.state != state_fingerprint(user) {
            return Err(TokenError::Stale);
        }
        Ok(claims)
    }

    fn decode_account_token(&self, token: &str) -> Result<AccountClaims, TokenError> {
        let mut validation = Validation::default();
        validation.set_audience(&[ACCOUNT_AUDIENCE]);
        validation.set_issuer(&[self.issuer.clone()]);
        validation.leeway = 0;
        let data = decode::<AccountClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    pub fn generate_download_token(
        &self,
        kind: RecordKind,
        slug: &str,
        user_id: i64,
    ) -> Result<String> {
        let now = Utc::now();
        let exp = now + self.download_expiry;
        let claims = DownloadClaims {
            kind,
            slug: slug.to_owned(),
            user_id,
            iss: self.issuer.clone(),
            aud: DOWNLOAD_AUDIENCE.to_string(),
            iat: now.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_download_token(&self, token: &str) -> Result<DownloadClaims> {
        let mut validation = Validation::default();
        validation.set_audience(&[DOWNLOAD_AUDIENCE]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<DownloadClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountClaims {
    pub sub: Uuid,
    pub purpose: AccountPurpose,
    pub state: String,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadClaims {
    pub kind: RecordKind,
    pub slug: String,
    pub user_id: i64,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

/// URL segment identifying the account an emailed link belongs to.
pub fn encode_uid(uid: Uuid) -> String {
    URL_SAFE_NO_PAD.encode(uid.as_bytes())
}

pub fn decode_uid(raw: &str) -> Option<Uuid> {
    let bytes = URL_SAFE_NO_PAD.decode(raw.trim()).ok()?;
    Uuid::from_slice(&bytes).ok()
}

fn state_fingerprint(user: &User) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user.id.to_be_bytes());
    hasher.update(user.password_hash.as_bytes());
    hasher.update([u8::from(user.is_active)]);
    if let Some(last_login) = user.last_login {
        hasher.update(last_login.and_utc().timestamp_micros().to_be_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;

    fn service() -> TokenService {
        TokenService {
            encoding: EncodingKey::from_secret(b"test-secret"),
            decoding: DecodingKey::from_secret(b"test-secret"),
            issuer: "test-issuer".to_string(),
            account_expiry: Duration::minutes(30),
            download_expiry: Duration::minutes(5),
        }
    }

    fn user() -> User {
        let now = NaiveDateTime::default();
        User {
            id: 7,
            uid: Uuid::new_v4(),
            slug: "slug".to_string(),
            username: "clerk".to_string(),
            email: "clerk@example.org".to_string(),
            password_hash: "hash-1".to_string(),
            first_name: String::new(),
            last_name: String::new(),
            phone: None,
            job_title: None,
            location: None,
            department_id: None,
            is_active: false,
            is_creator: false,
            is_manager: false,
            is_admin: false,
            can_register_users: false,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn activation_token_verifies_for_unchanged_user() {
        let tokens = service();
        let user = user();
        let token = tokens
            .generate_account_token(&user, AccountPurpose::Activate)
            .unwrap();
        let claims = tokens
            .verify_account_token(&user, AccountPurpose::Activate, &token)
            .unwrap();
        assert_eq!(claims.sub, user.uid);
    }

    #[test]
    fn activation_token_is_single_use() {
        let tokens = service();
        let mut user = user();
        let token = tokens
            .generate_account_token(&user, AccountPurpose::Activate)
            .unwrap();
        user.is_active = true;
        assert!(matches!(
            tokens.verify_account_token(&user, AccountPurpose::Activate, &token),
            Err(TokenError::Stale)
        ));
    }

    #[test]
    fn reset_token_dies_with_password_change() {
        let tokens = service();
        let mut user = user();
        let token = tokens
            .generate_account_token(&user, AccountPurpose::Reset)
            .unwrap();
        user.password_hash = "hash-2".to_string();
        assert!(tokens
            .verify_account_token(&user, AccountPurpose::Reset, &token)
            .is_err());
    }

    #[test]
    fn purposes_are_not_interchangeable() {
        let tokens = service();
        let user = user();
        let token = tokens
            .generate_account_token(&user, AccountPurpose::Reset)
            .unwrap();
        assert!(matches!(
            tokens.verify_account_token(&user, AccountPurpose::Activate, &token),
            Err(TokenError::WrongPurpose)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = service();
        let user = user();
        let issued = Utc::now() - Duration::hours(2);
        let token = tokens
            .generate_account_token_at(&user, AccountPurpose::Activate, issued)
            .unwrap();
        assert!(matches!(
            tokens.verify_account_token(&user, AccountPurpose::Activate, &token),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn uid_segment_roundtrips_and_rejects_garbage() {
        let uid = Uuid::new_v4();
        assert_eq!(decode_uid(&encode_uid(uid)), Some(uid));
        assert_eq!(decode_uid("not base64!"), None);
        assert_eq!(decode_uid("AAAA"), None);
    }

    #[test]
    fn download_token_carries_record() {
        let tokens = service();
        let token = tokens
            .generate_download_token(RecordKind::Outgoing, "abc", 3)
            .unwrap();
        let claims = tokens.verify_download_token(&token).unwrap();
        assert_eq!(claims.kind, RecordKind::Outgoing);
        assert_eq!(claims.slug, "abc");
        assert_eq!(claims.user_id, 3);
    }
}
