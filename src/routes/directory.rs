use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Query, State},
    Form,
};
use diesel::{pg::Pg, prelude::*, result::DatabaseErrorKind, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    auth::AdminAccess,
    error::{AppError, AppResult},
    flash::{Notice, Notices, Redirect, Rendered},
    listing::{contains_pattern, ListParams, PageInfo, Paginator},
    models::{Department, NewDepartment, User},
    schema::{departments, users},
    slug::slugify,
    state::AppState,
};

pub const DIRECTORY_PAGE_SIZE: i64 = 20;

/// Who created, updated or sent something, as shown next to it.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub slug: String,
    pub username: String,
    pub display_name: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            slug: user.slug.clone(),
            username: user.username.clone(),
            display_name: user.display_name(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DepartmentSummary {
    pub name: String,
    pub slug: String,
}

impl From<Department> for DepartmentSummary {
    fn from(department: Department) -> Self {
        Self {
            name: department.name,
            slug: department.slug,
        }
    }
}

/// Full directory entry, shown on profile pages and in the admin list.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub slug: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub job_title: Option<String>,
    pub location: Option<String>,
    pub department: Option<DepartmentSummary>,
    pub is_active: bool,
    pub is_creator: bool,
    pub is_manager: bool,
    pub is_admin: bool,
    pub can_register_users: bool,
    pub last_login: Option<String>,
    pub date_joined: String,
}

impl UserProfile {
    pub fn build(user: User, department: Option<Department>) -> Self {
        let display_name = user.display_name();
        Self {
            slug: user.slug,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            display_name,
            phone: user.phone,
            job_title: user.job_title,
            location: user.location,
            department: department.map(DepartmentSummary::from),
            is_active: user.is_active,
            is_creator: user.is_creator,
            is_manager: user.is_manager,
            is_admin: user.is_admin,
            can_register_users: user.can_register_users,
            last_login: user.last_login.map(super::to_iso),
            date_joined: super::to_iso(user.created_at),
        }
    }
}

pub fn load_profile(conn: &mut PgConnection, user: User) -> AppResult<UserProfile> {
    let department = match user.department_id {
        Some(id) => departments::table
            .find(id)
            .first::<Department>(conn)
            .optional()?,
        None => None,
    };
    Ok(UserProfile::build(user, department))
}

/// Looks up the users behind a set of audit columns in one query.
pub fn load_user_summaries(
    conn: &mut PgConnection,
    ids: impl IntoIterator<Item = i64>,
) -> AppResult<HashMap<i64, UserSummary>> {
    let ids: Vec<i64> = ids.into_iter().collect::<HashSet<_>>().into_iter().collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<User> = users::table
        .filter(users::id.eq_any(ids))
        .load(conn)?;
    Ok(rows
        .iter()
        .map(|user| (user.id, UserSummary::from(user)))
        .collect())
}

pub fn all_departments(conn: &mut PgConnection) -> AppResult<Vec<Department>> {
    Ok(departments::table
        .order(departments::name.asc())
        .load(conn)?)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryFilter {
    pub query: Option<String>,
    pub department: Option<String>,
    pub location: Option<String>,
}

impl DirectoryFilter {
    pub fn from_params(params: &ListParams) -> Self {
        Self {
            query: params.text("q"),
            department: params.text("department"),
            location: params.text("location"),
        }
    }

    fn apply(&self, department_id: Option<i64>) -> users::BoxedQuery<'static, Pg> {
        let mut query = users::table.into_boxed();

        if let Some(pattern) = self.query.as_deref().map(contains_pattern) {
            query = query.filter(
                users::username
                    .ilike(pattern.clone())
                    .or(users::email.ilike(pattern.clone()))
                    .or(users::first_name.ilike(pattern.clone()))
                    .or(users::last_name.ilike(pattern.clone()))
                    .or(users::phone.ilike(pattern.clone()))
                    .or(users::job_title.ilike(pattern)),
            );
        }
        if self.department.is_some() {
            // An unknown department slug matches nobody.
            query = query.filter(users::department_id.eq(department_id.unwrap_or(-1)));
        }
        if let Some(location) = &self.location {
            query = query.filter(users::location.eq(location.clone()));
        }

        query
    }
}

#[derive(Serialize)]
pub struct UserListPage {
    pub users: Vec<UserProfile>,
    pub user_count: i64,
    pub departments: Vec<DepartmentSummary>,
    pub page: PageInfo,
    pub query_params: String,
}

pub async fn list_users(
    State(state): State<AppState>,
    AdminAccess(_admin): AdminAccess,
    Query(pairs): Query<Vec<(String, String)>>,
    notices: Notices,
) -> AppResult<Rendered<UserListPage>> {
    let params = ListParams::new(pairs);
    let filter = DirectoryFilter::from_params(&params);
    let mut conn = state.db()?;

    let department_id = match &filter.department {
        Some(slug) => departments::table
            .filter(departments::slug.eq(slug))
            .select(departments::id)
            .first::<i64>(&mut conn)
            .optional()?,
        None => None,
    };

    let user_count: i64 = filter.apply(department_id).count().get_result(&mut conn)?;
    let paginator = Paginator::resolve(user_count, DIRECTORY_PAGE_SIZE, params.page())?;

    let rows: Vec<User> = filter
        .apply(department_id)
        .order(users::username.asc())
        .limit(paginator.limit())
        .offset(paginator.offset())
        .load(&mut conn)?;

    let departments = all_departments(&mut conn)?;
    let by_id: HashMap<i64, &Department> = departments.iter().map(|d| (d.id, d)).collect();

    let users = rows
        .into_iter()
        .map(|user| {
            let department = user
                .department_id
                .and_then(|id| by_id.get(&id))
                .map(|d| (*d).clone());
            UserProfile::build(user, department)
        })
        .collect();

    let page = paginator.info(&params);
    let query_params = page.query_params.clone();
    Ok(Rendered::new(
        notices,
        UserListPage {
            users,
            user_count,
            departments: departments.into_iter().map(DepartmentSummary::from).collect(),
            page,
            query_params,
        },
    ))
}

#[derive(Serialize)]
pub struct DepartmentListPage {
    pub departments: Vec<DepartmentSummary>,
}

pub async fn list_departments(
    State(state): State<AppState>,
    AdminAccess(_admin): AdminAccess,
    notices: Notices,
) -> AppResult<Rendered<DepartmentListPage>> {
    let mut conn = state.db()?;
    let departments = all_departments(&mut conn)?
        .into_iter()
        .map(DepartmentSummary::from)
        .collect();
    Ok(Rendered::new(notices, DepartmentListPage { departments }))
}

#[derive(Deserialize)]
pub struct DepartmentForm {
    #[serde(default)]
    pub name: String,
}

pub async fn create_department(
    State(state): State<AppState>,
    AdminAccess(admin): AdminAccess,
    Form(form): Form<DepartmentForm>,
) -> AppResult<Redirect> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(AppError::field("name", super::forms::REQUIRED));
    }
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(AppError::field("name", "Enter a name containing letters or digits."));
    }

    let mut conn = state.db()?;
    let result = diesel::insert_into(departments::table)
        .values(&NewDepartment {
            name: name.to_string(),
            slug: slug.clone(),
        })
        .execute(&mut conn);

    match result {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::field(
                "name",
                "A department with this name already exists.",
            ));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    info!(user_id = admin.user.id, department = %slug, "department created");
    Ok(Redirect::to("/departments").with_notice(Notice::success(format!(
        "Department \"{name}\" created."
    ))))
}
