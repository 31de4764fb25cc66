use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;

pub const MIN_PASSWORD_LENGTH: usize = 8;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?
        .to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(password_hash).map_err(|err| anyhow!(err))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Checks a new password and its confirmation, returning the messages to
/// show next to the form fields.
pub fn validate_new_password(password: &str, confirmation: &str) -> Vec<String> {
    let mut problems = Vec::new();
    if password != confirmation {
        problems.push("The two password fields didn't match.".to_string());
        return problems;
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        problems.push(format!(
            "This password is too short. It must contain at least {MIN_PASSWORD_LENGTH} characters."
        ));
    }
    if !password.is_empty() && password.chars().all(|ch| ch.is_ascii_digit()) {
        problems.push("This password is entirely numeric.".to_string());
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("battery staple", &hash).unwrap());
    }

    #[test]
    fn verify_rejects_malformed_hash() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }

    #[test]
    fn new_password_rules() {
        assert!(validate_new_password("long enough", "long enough").is_empty());
        assert_eq!(validate_new_password("abc", "abd").len(), 1);
        assert_eq!(validate_new_password("short", "short").len(), 1);
        assert_eq!(validate_new_password("1234", "1234").len(), 2);
        assert_eq!(validate_new_password("12345678901", "12345678901").len(), 1);
    }
}
