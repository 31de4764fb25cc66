use std::collections::HashMap;

use axum::{
    extract::{Multipart, Path, Query, State},
    Form,
};
use chrono::{NaiveDate, Utc};
use diesel::{pg::Pg, prelude::*, PgConnection};
use serde::Serialize;
use tracing::info;

use crate::{
    auth::{tokens::RecordKind, CreatorAccess},
    error::{AppError, AppResult},
    flash::{Notices, Redirect, Rendered},
    listing::{ListParams, PageInfo, Paginator, RecordFilter},
    models::{Incoming, IncomingComment, NewIncoming, NewIncomingComment},
    schema::{incoming, incoming_comments},
    slug::SlugIdentity,
    state::AppState,
};

use super::{
    comments::{CommentForm, CommentView},
    directory::{load_user_summaries, UserSummary},
    files::{discard_attachment, download_path, store_attachment},
    forms::{FormData, Validator, REQUIRED},
    to_iso,
};

const FILE_FIELD: &str = "file";

#[derive(Serialize)]
pub struct IncomingSummary {
    pub slug: String,
    pub conf: bool,
    pub urgent: bool,
    pub received: NaiveDate,
    pub dated: NaiveDate,
    pub r_from: String,
    pub sender: Option<String>,
    pub subject: String,
    pub phone: Option<String>,
    pub file_name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Incoming> for IncomingSummary {
    fn from(record: &Incoming) -> Self {
        Self {
            slug: record.slug.clone(),
            conf: record.conf,
            urgent: record.urgent,
            received: record.received,
            dated: record.dated,
            r_from: record.r_from.clone(),
            sender: record.sender.clone(),
            subject: record.subject.clone(),
            phone: record.phone.clone(),
            file_name: record.file_name.clone(),
            created_at: to_iso(record.created_at),
            updated_at: to_iso(record.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct IncomingListPage {
    pub records: Vec<IncomingSummary>,
    pub page: PageInfo,
    pub q: Option<String>,
    pub urgent: bool,
    pub conf: bool,
    pub query_params: String,
}

#[derive(Serialize)]
pub struct IncomingDetail {
    #[serde(flatten)]
    pub summary: IncomingSummary,
    pub note: Option<String>,
    pub phone1: Option<String>,
    pub email: Option<String>,
    pub content_type: Option<String>,
    pub download_path: String,
    pub created_by: Option<UserSummary>,
    pub updated_by: Option<UserSummary>,
    pub comments: Vec<CommentView>,
}

fn filtered(filter: &RecordFilter) -> incoming::BoxedQuery<'static, Pg> {
    let mut query = incoming::table.into_boxed();

    if let Some(pattern) = filter.like_pattern() {
        query = query.filter(
            incoming::r_from
                .ilike(pattern.clone())
                .or(incoming::subject.ilike(pattern.clone()))
                .or(incoming::note.ilike(pattern.clone()))
                .or(incoming::sender.ilike(pattern.clone()))
                .or(incoming::phone.ilike(pattern.clone()))
                .or(incoming::phone1.ilike(pattern)),
        );
    }
    if filter.urgent {
        query = query.filter(incoming::urgent.eq(true));
    }
    if filter.confidential {
        query = query.filter(incoming::conf.eq(true));
    }

    query
}

pub async fn list_incoming(
    State(state): State<AppState>,
    CreatorAccess(_current): CreatorAccess,
    Query(pairs): Query<Vec<(String, String)>>,
    notices: Notices,
) -> AppResult<Rendered<IncomingListPage>> {
    let params = ListParams::new(pairs);
    let filter = RecordFilter::from_params(&params);
    let mut conn = state.db()?;

    let count: i64 = filtered(&filter).count().get_result(&mut conn)?;
    let paginator = Paginator::resolve(count, state.config.page_size, params.page())?;

    let rows: Vec<Incoming> = filtered(&filter)
        .order((incoming::dated.desc(), incoming::id.desc()))
        .limit(paginator.limit())
        .offset(paginator.offset())
        .load(&mut conn)?;

    let page = paginator.info(&params);
    let query_params = page.query_params.clone();
    Ok(Rendered::new(
        notices,
        IncomingListPage {
            records: rows.iter().map(IncomingSummary::from).collect(),
            page,
            q: filter.query,
            urgent: filter.urgent,
            conf: filter.confidential,
            query_params,
        },
    ))
}

/// Validated form values, shared by create and update.
struct IncomingInput {
    conf: bool,
    urgent: bool,
    received: NaiveDate,
    r_from: String,
    note: Option<String>,
    sender: Option<String>,
    dated: NaiveDate,
    subject: String,
    phone: Option<String>,
    phone1: Option<String>,
    email: Option<String>,
}

fn validate(form: &FormData, mut validator: Validator) -> AppResult<IncomingInput> {
    let received = validator
        .optional_date(form, "received")
        .unwrap_or_else(|| Utc::now().date_naive());
    let dated = validator.required_date(form, "dated");
    let input = IncomingInput {
        conf: form.checkbox("conf"),
        urgent: form.checkbox("urgent"),
        received,
        r_from: validator.required(form, "r_from", 255),
        note: validator.text(form, "note"),
        sender: validator.optional(form, "sender", 255),
        dated: dated.unwrap_or_default(),
        subject: validator.required(form, "subject", 255),
        phone: validator.optional(form, "phone", 15),
        phone1: validator.optional(form, "phone1", 15),
        email: validator.optional_email(form, "email"),
    };
    validator.finish()?;
    Ok(input)
}

pub async fn create_incoming(
    State(state): State<AppState>,
    CreatorAccess(current): CreatorAccess,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let mut form = FormData::from_multipart(multipart, FILE_FIELD).await?;

    let mut validator = Validator::new();
    if form.file.is_none() {
        validator.error(FILE_FIELD, REQUIRED);
    }
    let input = validate(&form, validator)?;
    let Some(file) = form.file.take() else {
        return Err(AppError::field(FILE_FIELD, REQUIRED));
    };

    let identity = SlugIdentity::generate();
    let stored = store_attachment(&state, RecordKind::Incoming, &identity.slug, file).await?;

    let new_record = NewIncoming {
        uid: identity.uid,
        slug: identity.slug.clone(),
        conf: input.conf,
        urgent: input.urgent,
        received: input.received,
        r_from: input.r_from,
        note: input.note,
        sender: input.sender,
        dated: input.dated,
        subject: input.subject,
        phone: input.phone,
        phone1: input.phone1,
        email: input.email,
        file_key: stored.key.clone(),
        file_name: stored.file_name,
        content_type: stored.content_type,
        created_by: current.user.id,
        updated_by: current.user.id,
    };

    let inserted = state.db().and_then(|mut conn| {
        diesel::insert_into(incoming::table)
            .values(&new_record)
            .execute(&mut conn)
            .map_err(AppError::from)
    });
    if let Err(err) = inserted {
        discard_attachment(&state, &stored.key).await;
        return Err(err);
    }

    info!(user_id = current.user.id, slug = %identity.slug, "incoming record created");
    Ok(Redirect::to(format!("/incoming/{}", identity.slug)))
}

#[derive(AsChangeset)]
#[diesel(table_name = incoming)]
#[diesel(treat_none_as_null = true)]
struct IncomingChangeset {
    conf: bool,
    urgent: bool,
    received: NaiveDate,
    r_from: String,
    note: Option<String>,
    sender: Option<String>,
    dated: NaiveDate,
    subject: String,
    phone: Option<String>,
    phone1: Option<String>,
    email: Option<String>,
    file_key: String,
    file_name: String,
    content_type: Option<String>,
    updated_by: i64,
    updated_at: chrono::NaiveDateTime,
}

pub async fn update_incoming(
    State(state): State<AppState>,
    CreatorAccess(current): CreatorAccess,
    Path(slug): Path<String>,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let existing = {
        let mut conn = state.db()?;
        find_by_slug(&mut conn, &slug)?
    };

    let mut form = FormData::from_multipart(multipart, FILE_FIELD).await?;
    let input = validate(&form, Validator::new())?;

    let replaced = match form.file.take() {
        Some(file) => Some(store_attachment(&state, RecordKind::Incoming, &existing.slug, file).await?),
        None => None,
    };

    let (file_key, file_name, content_type) = match &replaced {
        Some(stored) => (
            stored.key.clone(),
            stored.file_name.clone(),
            stored.content_type.clone(),
        ),
        None => (
            existing.file_key.clone(),
            existing.file_name.clone(),
            existing.content_type.clone(),
        ),
    };

    let changeset = IncomingChangeset {
        conf: input.conf,
        urgent: input.urgent,
        received: input.received,
        r_from: input.r_from,
        note: input.note,
        sender: input.sender,
        dated: input.dated,
        subject: input.subject,
        phone: input.phone,
        phone1: input.phone1,
        email: input.email,
        file_key: file_key.clone(),
        file_name,
        content_type,
        updated_by: current.user.id,
        updated_at: Utc::now().naive_utc(),
    };

    let updated = state.db().and_then(|mut conn| {
        diesel::update(incoming::table.find(existing.id))
            .set(&changeset)
            .execute(&mut conn)
            .map_err(AppError::from)
    });
    if let Err(err) = updated {
        if let Some(stored) = &replaced {
            discard_attachment(&state, &stored.key).await;
        }
        return Err(err);
    }

    if replaced.is_some() && existing.file_key != file_key {
        discard_attachment(&state, &existing.file_key).await;
    }

    info!(user_id = current.user.id, slug = %existing.slug, "incoming record updated");
    Ok(Redirect::to(format!("/incoming/{}", existing.slug)))
}

pub async fn get_incoming(
    State(state): State<AppState>,
    CreatorAccess(current): CreatorAccess,
    Path(slug): Path<String>,
    notices: Notices,
) -> AppResult<Rendered<IncomingDetail>> {
    let mut conn = state.db()?;
    let record = find_by_slug(&mut conn, &slug)?;

    let comments: Vec<IncomingComment> = incoming_comments::table
        .filter(incoming_comments::incoming_id.eq(record.id))
        .order((
            incoming_comments::created_at.desc(),
            incoming_comments::id.desc(),
        ))
        .load(&mut conn)?;

    let mut user_ids = vec![record.created_by, record.updated_by];
    user_ids.extend(comments.iter().filter_map(|comment| comment.created_by));
    let people = load_user_summaries(&mut conn, user_ids)?;

    let comments = comments
        .into_iter()
        .map(|comment| {
            CommentView::build(
                comment.id,
                comment.comment,
                comment.created_by,
                comment.created_at,
                &people,
            )
        })
        .collect();

    let download_path = download_path(&state, RecordKind::Incoming, &record.slug, &current.user)?;

    Ok(Rendered::new(
        notices,
        IncomingDetail {
            summary: IncomingSummary::from(&record),
            note: record.note.clone(),
            phone1: record.phone1.clone(),
            email: record.email.clone(),
            content_type: record.content_type.clone(),
            download_path,
            created_by: people.get(&record.created_by).cloned(),
            updated_by: people.get(&record.updated_by).cloned(),
            comments,
        },
    ))
}

pub async fn comment_incoming(
    State(state): State<AppState>,
    CreatorAccess(current): CreatorAccess,
    Path(slug): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> AppResult<Redirect> {
    let mut conn = state.db()?;
    let record = find_by_slug(&mut conn, &slug)?;
    let comment = CommentForm::parse(form)?;

    diesel::insert_into(incoming_comments::table)
        .values(&NewIncomingComment {
            incoming_id: record.id,
            comment: Some(comment.body),
            created_by: Some(current.user.id),
            updated_by: Some(current.user.id),
        })
        .execute(&mut conn)?;

    info!(user_id = current.user.id, slug = %record.slug, "incoming comment added");
    Ok(Redirect::to(format!("/incoming/{}", record.slug)))
}

fn find_by_slug(conn: &mut PgConnection, slug: &str) -> AppResult<Incoming> {
    Ok(incoming::table
        .filter(incoming::slug.eq(slug))
        .first::<Incoming>(conn)?)
}
