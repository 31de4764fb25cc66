use std::collections::HashMap;

use axum::{
    extract::{Multipart, Path, Query, State},
    Form,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::{pg::Pg, prelude::*, PgConnection};
use serde::Serialize;
use tracing::info;

use crate::{
    auth::{tokens::RecordKind, CreatorAccess},
    error::{AppError, AppResult},
    flash::{Notices, Redirect, Rendered},
    listing::{ListParams, PageInfo, Paginator, RecordFilter},
    models::{NewOutgoing, NewOutgoingComment, Outgoing, OutgoingComment},
    schema::{outgoing, outgoing_comments, users},
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
pub struct OutgoingSummary {
    pub slug: String,
    pub add_to: String,
    pub conf: bool,
    pub urgent: bool,
    pub dated: NaiveDate,
    pub subject: String,
    pub sender: Option<UserSummary>,
    pub file_name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl OutgoingSummary {
    fn build(record: &Outgoing, people: &HashMap<i64, UserSummary>) -> Self {
        Self {
            slug: record.slug.clone(),
            add_to: record.add_to.clone(),
            conf: record.conf,
            urgent: record.urgent,
            dated: record.dated,
            subject: record.subject.clone(),
            sender: people.get(&record.sender_id).cloned(),
            file_name: record.file_name.clone(),
            created_at: to_iso(record.created_at),
            updated_at: to_iso(record.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct OutgoingListPage {
    pub records: Vec<OutgoingSummary>,
    pub page: PageInfo,
    pub q: Option<String>,
    pub urgent: bool,
    pub conf: bool,
    pub query_params: String,
}

#[derive(Serialize)]
pub struct OutgoingDetail {
    #[serde(flatten)]
    pub summary: OutgoingSummary,
    pub note: Option<String>,
    pub content_type: Option<String>,
    pub download_path: String,
    pub created_by: Option<UserSummary>,
    pub updated_by: Option<UserSummary>,
    pub comments: Vec<CommentView>,
}

fn filtered(filter: &RecordFilter) -> outgoing::BoxedQuery<'static, Pg> {
    let mut query = outgoing::table.into_boxed();

    if let Some(pattern) = filter.like_pattern() {
        query = query.filter(
            outgoing::add_to
                .ilike(pattern.clone())
                .or(outgoing::subject.ilike(pattern.clone()))
                .or(outgoing::note.ilike(pattern)),
        );
    }
    if filter.urgent {
        query = query.filter(outgoing::urgent.eq(true));
    }
    if filter.confidential {
        query = query.filter(outgoing::conf.eq(true));
    }

    query
}

pub async fn list_outgoing(
    State(state): State<AppState>,
    CreatorAccess(_current): CreatorAccess,
    Query(pairs): Query<Vec<(String, String)>>,
    notices: Notices,
) -> AppResult<Rendered<OutgoingListPage>> {
    let params = ListParams::new(pairs);
    let filter = RecordFilter::from_params(&params);
    let mut conn = state.db()?;

    let count: i64 = filtered(&filter).count().get_result(&mut conn)?;
    let paginator = Paginator::resolve(count, state.config.page_size, params.page())?;

    let rows: Vec<Outgoing> = filtered(&filter)
        .order((outgoing::dated.desc(), outgoing::id.desc()))
        .limit(paginator.limit())
        .offset(paginator.offset())
        .load(&mut conn)?;

    let people = load_user_summaries(&mut conn, rows.iter().map(|row| row.sender_id))?;

    let page = paginator.info(&params);
    let query_params = page.query_params.clone();
    Ok(Rendered::new(
        notices,
        OutgoingListPage {
            records: rows
                .iter()
                .map(|row| OutgoingSummary::build(row, &people))
                .collect(),
            page,
            q: filter.query,
            urgent: filter.urgent,
            conf: filter.confidential,
            query_params,
        },
    ))
}

struct OutgoingInput {
    add_to: String,
    conf: bool,
    urgent: bool,
    note: Option<String>,
    sender_id: i64,
    dated: NaiveDate,
    subject: String,
}

fn validate(
    conn: &mut PgConnection,
    form: &FormData,
    mut validator: Validator,
) -> AppResult<OutgoingInput> {
    let sender_slug = validator.required(form, "sender", 255);
    let sender_id = if sender_slug.is_empty() {
        None
    } else {
        let found = users::table
            .filter(users::slug.eq(&sender_slug))
            .select(users::id)
            .first::<i64>(conn)
            .optional()?;
        if found.is_none() {
            validator.error(
                "sender",
                "Select a valid choice. That choice is not one of the available choices.",
            );
        }
        found
    };

    let dated = validator.required_date(form, "dated");
    let input = OutgoingInput {
        add_to: validator.required(form, "add_to", 255),
        conf: form.checkbox("conf"),
        urgent: form.checkbox("urgent"),
        note: validator.text(form, "note"),
        sender_id: sender_id.unwrap_or_default(),
        dated: dated.unwrap_or_default(),
        subject: validator.required(form, "subject", 255),
    };
    validator.finish()?;
    Ok(input)
}

pub async fn create_outgoing(
    State(state): State<AppState>,
    CreatorAccess(current): CreatorAccess,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let mut form = FormData::from_multipart(multipart, FILE_FIELD).await?;

    let mut validator = Validator::new();
    if form.file.is_none() {
        validator.error(FILE_FIELD, REQUIRED);
    }
    let input = {
        let mut conn = state.db()?;
        validate(&mut conn, &form, validator)?
    };
    let Some(file) = form.file.take() else {
        return Err(AppError::field(FILE_FIELD, REQUIRED));
    };

    let identity = SlugIdentity::generate();
    let stored = store_attachment(&state, RecordKind::Outgoing, &identity.slug, file).await?;

    let new_record = NewOutgoing {
        uid: identity.uid,
        slug: identity.slug.clone(),
        add_to: input.add_to,
        conf: input.conf,
        urgent: input.urgent,
        note: input.note,
        sender_id: input.sender_id,
        dated: input.dated,
        subject: input.subject,
        file_key: stored.key.clone(),
        file_name: stored.file_name,
        content_type: stored.content_type,
        created_by: current.user.id,
        updated_by: current.user.id,
    };

    let inserted = state.db().and_then(|mut conn| {
        diesel::insert_into(outgoing::table)
            .values(&new_record)
            .execute(&mut conn)
            .map_err(AppError::from)
    });
    if let Err(err) = inserted {
        discard_attachment(&state, &stored.key).await;
        return Err(err);
    }

    info!(user_id = current.user.id, slug = %identity.slug, "outgoing record created");
    Ok(Redirect::to(format!("/outgoing/{}", identity.slug)))
}

#[derive(AsChangeset)]
#[diesel(table_name = outgoing)]
#[diesel(treat_none_as_null = true)]
struct OutgoingChangeset {
    add_to: String,
    conf: bool,
    urgent: bool,
    note: Option<String>,
    sender_id: i64,
    dated: NaiveDate,
    subject: String,
    file_key: String,
    file_name: String,
    content_type: Option<String>,
    updated_by: i64,
    updated_at: NaiveDateTime,
}

pub async fn update_outgoing(
    State(state): State<AppState>,
    CreatorAccess(current): CreatorAccess,
    Path(slug): Path<String>,
    multipart: Multipart,
) -> AppResult<Redirect> {
    let mut form = FormData::from_multipart(multipart, FILE_FIELD).await?;

    let (existing, input) = {
        let mut conn = state.db()?;
        let existing = find_by_slug(&mut conn, &slug)?;
        let input = validate(&mut conn, &form, Validator::new())?;
        (existing, input)
    };

    let replaced = match form.file.take() {
        Some(file) => Some(store_attachment(&state, RecordKind::Outgoing, &existing.slug, file).await?),
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

    let changeset = OutgoingChangeset {
        add_to: input.add_to,
        conf: input.conf,
        urgent: input.urgent,
        note: input.note,
        sender_id: input.sender_id,
        dated: input.dated,
        subject: input.subject,
        file_key: file_key.clone(),
        file_name,
        content_type,
        updated_by: current.user.id,
        updated_at: Utc::now().naive_utc(),
    };

    let updated = state.db().and_then(|mut conn| {
        diesel::update(outgoing::table.find(existing.id))
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

    info!(user_id = current.user.id, slug = %existing.slug, "outgoing record updated");
    Ok(Redirect::to(format!("/outgoing/{}", existing.slug)))
}

pub async fn get_outgoing(
    State(state): State<AppState>,
    CreatorAccess(current): CreatorAccess,
    Path(slug): Path<String>,
    notices: Notices,
) -> AppResult<Rendered<OutgoingDetail>> {
    let mut conn = state.db()?;
    let record = find_by_slug(&mut conn, &slug)?;

    let comments: Vec<OutgoingComment> = outgoing_comments::table
        .filter(outgoing_comments::outgoing_id.eq(record.id))
        .order((
            outgoing_comments::created_at.desc(),
            outgoing_comments::id.desc(),
        ))
        .load(&mut conn)?;

    let mut user_ids = vec![record.sender_id, record.created_by, record.updated_by];
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

    let download_path = download_path(&state, RecordKind::Outgoing, &record.slug, &current.user)?;

    Ok(Rendered::new(
        notices,
        OutgoingDetail {
            summary: OutgoingSummary::build(&record, &people),
            note: record.note.clone(),
            content_type: record.content_type.clone(),
            download_path,
            created_by: people.get(&record.created_by).cloned(),
            updated_by: people.get(&record.updated_by).cloned(),
            comments,
        },
    ))
}

pub async fn comment_outgoing(
    State(state): State<AppState>,
    CreatorAccess(current): CreatorAccess,
    Path(slug): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> AppResult<Redirect> {
    let mut conn = state.db()?;
    let record = find_by_slug(&mut conn, &slug)?;
    let comment = CommentForm::parse(form)?;

    diesel::insert_into(outgoing_comments::table)
        .values(&NewOutgoingComment {
            outgoing_id: record.id,
            comment: Some(comment.body),
            created_by: Some(current.user.id),
            updated_by: Some(current.user.id),
        })
        .execute(&mut conn)?;

    info!(user_id = current.user.id, slug = %record.slug, "outgoing comment added");
    Ok(Redirect::to(format!("/outgoing/{}", record.slug)))
}

fn find_by_slug(conn: &mut PgConnection, slug: &str) -> AppResult<Outgoing> {
    Ok(outgoing::table
        .filter(outgoing::slug.eq(slug))
        .first::<Outgoing>(conn)?)
}
