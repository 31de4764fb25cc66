use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = departments)]
pub struct Department {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = departments)]
pub struct NewDepartment {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = users)]
#[diesel(belongs_to(Department))]
pub struct User {
    pub id: i64,
    pub uid: Uuid,
    pub slug: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub job_title: Option<String>,
    pub location: Option<String>,
    pub department_id: Option<i64>,
    pub is_active: bool,
    pub is_creator: bool,
    pub is_manager: bool,
    pub is_admin: bool,
    pub can_register_users: bool,
    pub last_login: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    /// Full name when both parts are present, otherwise the email address.
    pub fn display_name(&self) -> String {
        if !self.first_name.is_empty() && !self.last_name.is_empty() {
            format!("{} {}", self.first_name, self.last_name)
        } else {
            self.email.clone()
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub uid: Uuid,
    pub slug: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub job_title: Option<String>,
    pub location: Option<String>,
    pub department_id: Option<i64>,
    pub is_active: bool,
    pub is_creator: bool,
    pub is_manager: bool,
    pub is_admin: bool,
    pub can_register_users: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = sessions)]
#[diesel(belongs_to(User))]
pub struct Session {
    pub id: Uuid,
    pub user_id: i64,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: i64,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = incoming)]
pub struct Incoming {
    pub id: i64,
    pub uid: Uuid,
    pub slug: String,
    pub conf: bool,
    pub urgent: bool,
    pub received: NaiveDate,
    pub r_from: String,
    pub note: Option<String>,
    pub sender: Option<String>,
    pub dated: NaiveDate,
    pub subject: String,
    pub phone: Option<String>,
    pub phone1: Option<String>,
    pub email: Option<String>,
    pub file_key: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub created_by: i64,
    pub updated_by: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = incoming)]
pub struct NewIncoming {
    pub uid: Uuid,
    pub slug: String,
    pub conf: bool,
    pub urgent: bool,
    pub received: NaiveDate,
    pub r_from: String,
    pub note: Option<String>,
    pub sender: Option<String>,
    pub dated: NaiveDate,
    pub subject: String,
    pub phone: Option<String>,
    pub phone1: Option<String>,
    pub email: Option<String>,
    pub file_key: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub created_by: i64,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = incoming_comments)]
#[diesel(belongs_to(Incoming))]
pub struct IncomingComment {
    pub id: i64,
    pub incoming_id: i64,
    pub comment: Option<String>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = incoming_comments)]
pub struct NewIncomingComment {
    pub incoming_id: i64,
    pub comment: Option<String>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = outgoing)]
pub struct Outgoing {
    pub id: i64,
    pub uid: Uuid,
    pub slug: String,
    pub add_to: String,
    pub conf: bool,
    pub urgent: bool,
    pub note: Option<String>,
    pub sender_id: i64,
    pub dated: NaiveDate,
    pub subject: String,
    pub file_key: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub created_by: i64,
    pub updated_by: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = outgoing)]
pub struct NewOutgoing {
    pub uid: Uuid,
    pub slug: String,
    pub add_to: String,
    pub conf: bool,
    pub urgent: bool,
    pub note: Option<String>,
    pub sender_id: i64,
    pub dated: NaiveDate,
    pub subject: String,
    pub file_key: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub created_by: i64,
    pub updated_by: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = outgoing_comments)]
#[diesel(belongs_to(Outgoing))]
pub struct OutgoingComment {
    pub id: i64,
    pub outgoing_id: i64,
    pub comment: Option<String>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = outgoing_comments)]
pub struct NewOutgoingComment {
    pub outgoing_id: i64,
    pub comment: Option<String>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}
