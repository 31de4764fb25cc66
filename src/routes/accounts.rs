use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Form,
};
use chrono::Utc;
use diesel::{prelude::*, result::DatabaseErrorKind, PgConnection};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    auth::{
        password::{hash_password, validate_new_password, verify_password},
        session::{build_session_cookie, revoke_other_sessions, start_session},
        tokens::{decode_uid, encode_uid, AccountPurpose},
        CurrentUser, LOGIN_PATH, REQUEST_DENIED,
    },
    error::{AppError, AppResult},
    flash::{Notice, Notices, Redirect, Rendered},
    mail::{activation_email, enqueue_email, password_reset_email},
    models::{NewUser, User},
    schema::{departments, users},
    slug::SlugIdentity,
    state::AppState,
};

use super::{
    auth::PROFILE_PATH,
    directory::{all_departments, load_profile, DepartmentSummary, UserProfile},
    forms::{FormData, Validator},
};

const REGISTER_PATH: &str = "/users/register";
const FORGOT_PASSWORD_PATH: &str = "/users/forgot-password";
const CHANGE_PASSWORD_DONE_PATH: &str = "/users/change-password/done";

const INVALID_RESET_LINK: &str = "The reset link is invalid or has expired.";
const INVALID_ACTIVATION_LINK: &str = "The activation link is invalid or has expired.";

#[derive(Serialize)]
pub struct ProfilePage {
    pub user: UserProfile,
    pub departments: Vec<DepartmentSummary>,
}

#[derive(Serialize)]
pub struct EmptyPage {}

pub async fn my_profile(
    State(state): State<AppState>,
    current: CurrentUser,
    notices: Notices,
) -> AppResult<Rendered<ProfilePage>> {
    let mut conn = state.db()?;
    let user = load_profile(&mut conn, current.user)?;
    let departments = all_departments(&mut conn)?
        .into_iter()
        .map(DepartmentSummary::from)
        .collect();
    Ok(Rendered::new(notices, ProfilePage { user, departments }))
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
#[diesel(treat_none_as_null = true)]
struct ProfileChangeset {
    first_name: String,
    last_name: String,
    email: String,
    phone: Option<String>,
    job_title: Option<String>,
    location: Option<String>,
    department_id: Option<i64>,
    updated_at: chrono::NaiveDateTime,
}

pub async fn update_profile(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(fields): Form<HashMap<String, String>>,
) -> AppResult<Redirect> {
    let form = FormData::from_fields(fields);
    let mut conn = state.db()?;

    let mut validator = Validator::new();
    let department_id = department_field(&mut conn, &form, &mut validator)?;
    let changeset = ProfileChangeset {
        first_name: validator.optional(&form, "first_name", 150).unwrap_or_default(),
        last_name: validator.optional(&form, "last_name", 150).unwrap_or_default(),
        email: validator.required_email(&form, "email"),
        phone: validator.optional(&form, "phone", 15),
        job_title: validator.optional(&form, "job_title", 255),
        location: validator.optional(&form, "location", 255),
        department_id,
        updated_at: Utc::now().naive_utc(),
    };
    if !changeset.email.is_empty()
        && changeset.email != current.user.email
        && email_taken(&mut conn, &changeset.email)?
    {
        validator.error("email", "A user with that email already exists.");
    }
    validator.finish()?;

    diesel::update(users::table.find(current.user.id))
        .set(&changeset)
        .execute(&mut conn)?;

    info!(user_id = current.user.id, "profile updated");
    Ok(Redirect::to(PROFILE_PATH).with_notice(Notice::success("Your profile has been updated.")))
}

pub async fn user_detail(
    State(state): State<AppState>,
    _current: CurrentUser,
    Path(slug): Path<String>,
    notices: Notices,
) -> AppResult<Rendered<UserProfile>> {
    let mut conn = state.db()?;
    let user: User = users::table
        .filter(users::slug.eq(&slug))
        .first(&mut conn)?;
    Ok(Rendered::new(notices, load_profile(&mut conn, user)?))
}

fn registration_denied(current: &CurrentUser) -> Redirect {
    info!(user_id = current.user.id, "registration not permitted");
    Redirect::to(format!("/users/{}", current.user.slug)).with_notice(Notice::info(REQUEST_DENIED))
}

#[derive(Serialize)]
pub struct RegisterPage {
    pub departments: Vec<DepartmentSummary>,
}

pub async fn register_page(
    State(state): State<AppState>,
    current: CurrentUser,
    notices: Notices,
) -> AppResult<Response> {
    if !current.user.can_register_users {
        return Ok(registration_denied(&current).into_response());
    }

    let mut conn = state.db()?;
    let departments = all_departments(&mut conn)?
        .into_iter()
        .map(DepartmentSummary::from)
        .collect();
    Ok(Rendered::new(notices, RegisterPage { departments }).into_response())
}

/// Creates the account inactive and queues the activation email in the
/// same transaction.
pub async fn register(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(fields): Form<HashMap<String, String>>,
) -> AppResult<Redirect> {
    if !current.user.can_register_users {
        return Ok(registration_denied(&current));
    }

    let form = FormData::from_fields(fields);
    let mut conn = state.db()?;

    let mut validator = Validator::new();
    let username = validator.required(&form, "username", 150).to_lowercase();
    if !username.is_empty() && !valid_username(&username) {
        validator.error(
            "username",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        );
    }
    let email = validator.required_email(&form, "email");
    let department_id = department_field(&mut conn, &form, &mut validator)?;
    let first_name = validator.optional(&form, "first_name", 150).unwrap_or_default();
    let last_name = validator.optional(&form, "last_name", 150).unwrap_or_default();
    let phone = validator.optional(&form, "phone", 15);
    let job_title = validator.optional(&form, "job_title", 255);
    let location = validator.optional(&form, "location", 255);
    for message in validate_new_password(
        form.raw("password1").unwrap_or_default(),
        form.raw("password2").unwrap_or_default(),
    ) {
        validator.error("password2", message);
    }

    if !username.is_empty() && username_taken(&mut conn, &username)? {
        validator.error("username", "A user with that username already exists.");
    }
    if !email.is_empty() && email_taken(&mut conn, &email)? {
        validator.error("email", "A user with that email already exists.");
    }
    validator.finish()?;

    let password_hash = hash_password(form.raw("password1").unwrap_or_default())?;
    let identity = SlugIdentity::generate();
    let new_user = NewUser {
        uid: identity.uid,
        slug: identity.slug,
        username,
        email,
        password_hash,
        first_name,
        last_name,
        phone,
        job_title,
        location,
        department_id,
        is_active: false,
        is_creator: false,
        is_manager: false,
        is_admin: false,
        can_register_users: false,
    };

    let created = conn.transaction::<_, AppError, _>(|conn| {
        let user: User = diesel::insert_into(users::table)
            .values(&new_user)
            .get_result(conn)
            .map_err(|err| match err {
                diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    AppError::field("username", "A user with that username already exists.")
                }
                other => AppError::from(other),
            })?;

        let token = state
            .tokens
            .generate_account_token(&user, AccountPurpose::Activate)?;
        let link = state.site_link(&format!(
            "/users/activate/{}/{}",
            encode_uid(user.uid),
            token
        ));
        enqueue_email(conn, &activation_email(&user, &link))?;
        Ok(user)
    })?;

    info!(
        user_id = current.user.id,
        new_user_id = created.id,
        "user registered, activation email queued"
    );
    Ok(Redirect::to(REGISTER_PATH).with_notice(Notice::success(
        "Confirmation email has been sent to the email address.",
    )))
}

pub async fn activate(
    State(state): State<AppState>,
    Path((uidb64, token)): Path<(String, String)>,
) -> AppResult<Redirect> {
    let mut conn = state.db()?;
    let activated = conn.transaction::<_, AppError, _>(|conn| {
        let Some(user) = resolve_account_link(&state, conn, &uidb64, &token, AccountPurpose::Activate)? else {
            return Ok(None);
        };
        diesel::update(users::table.find(user.id))
            .set((
                users::is_active.eq(true),
                users::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
        Ok(Some(user))
    })?;
    let Some(user) = activated else {
        return Ok(Redirect::to(LOGIN_PATH).with_notice(Notice::error(INVALID_ACTIVATION_LINK)));
    };

    let (session_token, expires_at) = start_session(&mut conn, &state.config, user.id)?;
    let cookie = build_session_cookie(&state.config, &session_token, expires_at)?;
    info!(user_id = user.id, "account activated");

    Ok(Redirect::to("/")
        .with_cookie(cookie)
        .with_notice(Notice::success("Your account has been activated.")))
}

pub async fn forgot_password_page(notices: Notices) -> Rendered<EmptyPage> {
    Rendered::new(notices, EmptyPage {})
}

/// Always answers the same way so the form cannot be used to check for
/// registered addresses.
pub async fn forgot_password(
    State(state): State<AppState>,
    Form(fields): Form<HashMap<String, String>>,
) -> AppResult<Redirect> {
    let form = FormData::from_fields(fields);
    let mut validator = Validator::new();
    let email = validator.required_email(&form, "email");
    validator.finish()?;

    let mut conn = state.db()?;
    let user = users::table
        .filter(users::email.eq(&email))
        .filter(users::is_active.eq(true))
        .order(users::id.asc())
        .first::<User>(&mut conn)
        .optional()?;

    match user {
        Some(user) => {
            let token = state
                .tokens
                .generate_account_token(&user, AccountPurpose::Reset)?;
            let link = state.site_link(&format!(
                "/users/reset-password/{}/{}",
                encode_uid(user.uid),
                token
            ));
            enqueue_email(&mut conn, &password_reset_email(&user, &link))?;
            info!(user_id = user.id, "password reset email queued");
        }
        None => warn!("password reset requested for unknown address"),
    }

    Ok(Redirect::to(LOGIN_PATH).with_notice(Notice::success(
        "A password reset link has been sent to your email.",
    )))
}

#[derive(Serialize)]
pub struct ResetPasswordPage {
    pub uidb64: String,
    pub token: String,
}

pub async fn reset_password_page(
    State(state): State<AppState>,
    Path((uidb64, token)): Path<(String, String)>,
    notices: Notices,
) -> AppResult<Response> {
    let mut conn = state.db()?;
    if resolve_account_link(&state, &mut conn, &uidb64, &token, AccountPurpose::Reset)?.is_none() {
        return Ok(invalid_reset_link().into_response());
    }
    Ok(Rendered::new(notices, ResetPasswordPage { uidb64, token }).into_response())
}

pub async fn reset_password(
    State(state): State<AppState>,
    Path((uidb64, token)): Path<(String, String)>,
    Form(fields): Form<HashMap<String, String>>,
) -> AppResult<Redirect> {
    let form = FormData::from_fields(fields);
    let mut conn = state.db()?;
    let reset = conn.transaction::<_, AppError, _>(|conn| {
        let Some(user) = resolve_account_link(&state, conn, &uidb64, &token, AccountPurpose::Reset)? else {
            return Ok(None);
        };
        set_new_password(conn, &user, &form)?;
        revoke_other_sessions(conn, user.id, None)?;
        Ok(Some(user))
    })?;
    let Some(user) = reset else {
        return Ok(invalid_reset_link());
    };

    info!(user_id = user.id, "password reset");
    Ok(Redirect::to(LOGIN_PATH)
        .with_notice(Notice::success("Your password has been successfully reset.")))
}

pub async fn change_password_page(_current: CurrentUser, notices: Notices) -> Rendered<EmptyPage> {
    Rendered::new(notices, EmptyPage {})
}

pub async fn change_password(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(fields): Form<HashMap<String, String>>,
) -> AppResult<Redirect> {
    let form = FormData::from_fields(fields);
    let old_password = form.raw("old_password").unwrap_or_default();
    if !verify_password(old_password, &current.user.password_hash)? {
        return Err(AppError::field(
            "old_password",
            "Your old password was entered incorrectly. Please enter it again.",
        ));
    }

    let mut conn = state.db()?;
    set_new_password(&mut conn, &current.user, &form)?;
    let revoked = revoke_other_sessions(&mut conn, current.user.id, Some(current.session_id))?;

    info!(user_id = current.user.id, revoked, "password changed");
    Ok(Redirect::to(CHANGE_PASSWORD_DONE_PATH)
        .with_notice(Notice::success("Your password has been updated successfully!")))
}

pub async fn change_password_done(_current: CurrentUser, notices: Notices) -> Rendered<EmptyPage> {
    Rendered::new(notices, EmptyPage {})
}

fn invalid_reset_link() -> Redirect {
    Redirect::to(FORGOT_PASSWORD_PATH).with_notice(Notice::error(INVALID_RESET_LINK))
}

/// Validates `new_password1`/`new_password2` and stores the new hash.
fn set_new_password(conn: &mut PgConnection, user: &User, form: &FormData) -> AppResult<()> {
    let password = form.raw("new_password1").unwrap_or_default();
    let mut validator = Validator::new();
    for message in validate_new_password(password, form.raw("new_password2").unwrap_or_default()) {
        validator.error("new_password2", message);
    }
    validator.finish()?;

    let password_hash = hash_password(password)?;
    diesel::update(users::table.find(user.id))
        .set((
            users::password_hash.eq(password_hash),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;
    Ok(())
}

/// The account behind an emailed link, if the link still verifies. The user
/// row is locked, so inside a transaction a second use of the same link
/// waits for the first and then sees the state it left behind.
fn resolve_account_link(
    state: &AppState,
    conn: &mut PgConnection,
    uidb64: &str,
    token: &str,
    purpose: AccountPurpose,
) -> AppResult<Option<User>> {
    let Some(uid) = decode_uid(uidb64) else {
        return Ok(None);
    };
    let Some(user) = users::table
        .filter(users::uid.eq(uid))
        .for_update()
        .first::<User>(conn)
        .optional()?
    else {
        return Ok(None);
    };

    match state.tokens.verify_account_token(&user, purpose, token) {
        Ok(_) => Ok(Some(user)),
        Err(err) => {
            warn!(user_id = user.id, ?purpose, error = %err, "account link rejected");
            Ok(None)
        }
    }
}

/// Optional department chosen by slug.
fn department_field(
    conn: &mut PgConnection,
    form: &FormData,
    validator: &mut Validator,
) -> AppResult<Option<i64>> {
    let Some(slug) = validator.optional(form, "department", 255) else {
        return Ok(None);
    };
    let found = departments::table
        .filter(departments::slug.eq(&slug))
        .select(departments::id)
        .first::<i64>(conn)
        .optional()?;
    if found.is_none() {
        validator.error(
            "department",
            "Select a valid choice. That choice is not one of the available choices.",
        );
    }
    Ok(found)
}

fn username_taken(conn: &mut PgConnection, username: &str) -> AppResult<bool> {
    let count: i64 = users::table
        .filter(users::username.eq(username))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

fn email_taken(conn: &mut PgConnection, email: &str) -> AppResult<bool> {
    let count: i64 = users::table
        .filter(users::email.eq(email))
        .count()
        .get_result(conn)?;
    Ok(count > 0)
}

/// Letters, digits and `@ . + - _`.
pub fn valid_username(username: &str) -> bool {
    !username.is_empty()
        && username
            .chars()
            .all(|ch| ch.is_alphanumeric() || matches!(ch, '@' | '.' | '+' | '-' | '_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_allow_the_usual_punctuation() {
        assert!(valid_username("amina.okafor+registry@hq"));
        assert!(valid_username("clerk_01"));
        assert!(!valid_username("two words"));
        assert!(!valid_username("semi;colon"));
        assert!(!valid_username(""));
    }
}
