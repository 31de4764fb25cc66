mod common;

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use common::{acquire_db_lock, FakeMailer, TestApp};
use diesel::prelude::*;
use mailroom::jobs::{
    enqueue_job, requeue_failed, reserve_job, JOB_SEND_EMAIL, MAX_ATTEMPTS, PROCESSING_LEASE,
    STATUS_FAILED, STATUS_PROCESSING, STATUS_QUEUED, STATUS_SUCCEEDED,
};
use mailroom::mail::{enqueue_email, OutgoingEmail};
use mailroom::schema::jobs;
use serde_json::json;
use uuid::Uuid;

fn email_to(to: &str) -> OutgoingEmail {
    OutgoingEmail {
        to: to.to_string(),
        subject: "Activate your account".to_string(),
        body: "Hello,\n\nhttp://mailroom.test/users/activate/x/y\n".to_string(),
    }
}

async fn queue_email(app: &TestApp, to: &str) -> Result<Uuid> {
    let email = email_to(to);
    app.with_conn(move |conn| Ok(enqueue_email(conn, &email)?.id))
        .await
}

/// Moves a job's `updated_at` back by `lease + extra`, as if its worker had
/// gone quiet that long ago.
async fn age_job(app: &TestApp, id: Uuid, extra: ChronoDuration) -> Result<()> {
    let lease = ChronoDuration::from_std(PROCESSING_LEASE)?;
    app.with_conn(move |conn| {
        diesel::update(jobs::table.find(id))
            .set(jobs::updated_at.eq(Utc::now().naive_utc() - lease - extra))
            .execute(conn)?;
        Ok(())
    })
    .await
}

#[tokio::test]
async fn queued_email_is_delivered_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let mailer = Arc::new(FakeMailer::default());
    let worker = app.worker(mailer.clone());

    let id = queue_email(&app, "amina@mailroom.test").await?;

    assert!(worker.run_once().await?);
    assert!(!worker.run_once().await?);

    let sent = mailer.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "amina@mailroom.test");

    let job = app.job(id).await?;
    assert_eq!(job.status, STATUS_SUCCEEDED);
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.is_none());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn unreachable_relay_schedules_a_retry() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let mailer = Arc::new(FakeMailer::default());
    mailer.set_unreachable(true);
    let worker = app.worker(mailer.clone());

    let id = queue_email(&app, "amina@mailroom.test").await?;
    let before = Utc::now().naive_utc();

    assert!(worker.run_once().await?);

    let job = app.job(id).await?;
    assert_eq!(job.status, STATUS_QUEUED);
    assert_eq!(job.attempts, 1);
    assert!(job
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("did not answer"));
    assert!(job.run_after >= before + ChronoDuration::seconds(29));

    // Not due yet.
    assert!(!worker.run_once().await?);
    assert!(mailer.sent().await.is_empty());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn last_attempt_fails_the_job() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let mailer = Arc::new(FakeMailer::default());
    mailer.set_unreachable(true);
    let worker = app.worker(mailer.clone());

    let id = queue_email(&app, "amina@mailroom.test").await?;
    app.with_conn(move |conn| {
        diesel::update(jobs::table.find(id))
            .set(jobs::attempts.eq(MAX_ATTEMPTS - 1))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    assert!(worker.run_once().await?);

    let job = app.job(id).await?;
    assert_eq!(job.status, STATUS_FAILED);
    assert_eq!(job.attempts, MAX_ATTEMPTS);
    assert!(job.last_error.is_some());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn bad_address_and_bad_payload_fail_immediately() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let mailer = Arc::new(FakeMailer::default());
    let worker = app.worker(mailer.clone());

    let bad_address = queue_email(&app, "not-an-address").await?;
    let bad_payload = app
        .with_conn(|conn| Ok(enqueue_job(conn, JOB_SEND_EMAIL, json!({ "to": 7 }), None)?.id))
        .await?;

    assert!(worker.run_once().await?);
    assert!(worker.run_once().await?);
    assert!(!worker.run_once().await?);

    let job = app.job(bad_address).await?;
    assert_eq!(job.status, STATUS_FAILED);
    assert_eq!(job.attempts, 1);

    let job = app.job(bad_payload).await?;
    assert_eq!(job.status, STATUS_FAILED);
    assert!(job
        .last_error
        .as_deref()
        .unwrap_or_default()
        .starts_with("invalid email payload"));

    assert!(mailer.sent().await.is_empty());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn job_abandoned_mid_send_is_reclaimed_after_its_lease() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let mailer = Arc::new(FakeMailer::default());
    let worker = app.worker(mailer.clone());

    let id = queue_email(&app, "amina@mailroom.test").await?;

    // A worker claims the job and dies before recording an outcome.
    let claimed = app
        .with_conn(|conn| Ok(reserve_job(conn, &[JOB_SEND_EMAIL])?))
        .await?;
    assert_eq!(claimed.map(|job| job.id), Some(id));

    assert!(!worker.run_once().await?);
    assert_eq!(app.job(id).await?.status, STATUS_PROCESSING);

    age_job(&app, id, ChronoDuration::minutes(1)).await?;

    assert!(worker.run_once().await?);
    assert_eq!(mailer.sent().await.len(), 1);

    let job = app.job(id).await?;
    assert_eq!(job.status, STATUS_SUCCEEDED);
    assert_eq!(job.attempts, 2);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn retry_failed_emails_requeues_failed_and_stalled_jobs() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let failed = queue_email(&app, "a@mailroom.test").await?;
    let stalled = queue_email(&app, "b@mailroom.test").await?;
    let busy = queue_email(&app, "c@mailroom.test").await?;

    app.with_conn(move |conn| {
        diesel::update(jobs::table.find(failed))
            .set((jobs::status.eq(STATUS_FAILED), jobs::attempts.eq(MAX_ATTEMPTS)))
            .execute(conn)?;
        diesel::update(jobs::table.filter(jobs::id.eq_any(vec![stalled, busy])))
            .set((jobs::status.eq(STATUS_PROCESSING), jobs::attempts.eq(1)))
            .execute(conn)?;
        Ok(())
    })
    .await?;
    age_job(&app, stalled, ChronoDuration::minutes(1)).await?;

    let requeued = app
        .with_conn(|conn| Ok(requeue_failed(conn, JOB_SEND_EMAIL)?))
        .await?;
    assert_eq!(requeued, 2);

    for id in [failed, stalled] {
        let job = app.job(id).await?;
        assert_eq!(job.status, STATUS_QUEUED);
        assert_eq!(job.attempts, 0);
    }
    assert_eq!(app.job(busy).await?.status, STATUS_PROCESSING);

    let mailer = Arc::new(FakeMailer::default());
    let worker = app.worker(mailer.clone());
    while worker.run_once().await? {}
    assert_eq!(mailer.sent().await.len(), 2);

    app.cleanup().await?;
    Ok(())
}
