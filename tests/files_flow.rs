mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, location, TestApp, CREATOR};
use diesel::prelude::*;
use mailroom::schema::users;

const LETTER: (&str, &str, &[u8]) = ("letter.pdf", "application/pdf", b"%PDF-1.4 first");

async fn create_record(app: &TestApp, cookie: &str) -> Result<String> {
    let response = app
        .post_multipart(
            "/incoming",
            &[
                ("r_from", "Treasury"),
                ("subject", "Quarterly allocation"),
                ("dated", "2024-05-02"),
            ],
            Some(LETTER),
            Some(cookie),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    Ok(location(&response)
        .expect("redirect to detail")
        .trim_start_matches("/incoming/")
        .to_string())
}

async fn download_path(app: &TestApp, slug: &str, cookie: &str) -> Result<String> {
    let detail = body_json(app.get(&format!("/incoming/{slug}"), Some(cookie)).await?).await?;
    Ok(detail["download_path"]
        .as_str()
        .expect("download path")
        .to_string())
}

#[tokio::test]
async fn download_link_redirects_to_presigned_url() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.insert_user("clerk", "registry-pass", CREATOR).await?;
    let cookie = app.login("clerk", "registry-pass").await?;

    let slug = create_record(&app, &cookie).await?;
    let stored = app
        .storage()
        .find(&format!("incoming/{slug}"), "letter.pdf")
        .await
        .expect("attachment stored");
    let path = download_path(&app, &slug, &cookie).await?;

    let response = app.get(&path, None).await?;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response),
        Some(format!("https://fake-storage/{}?expires_in=300", stored.key))
    );

    let mut tampered = path.clone();
    tampered.push('x');
    let response = app.get(&tampered, None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/files/not-a-token", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn download_link_dies_with_the_session() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.insert_user("clerk", "registry-pass", CREATOR).await?;
    let cookie = app.login("clerk", "registry-pass").await?;

    let slug = create_record(&app, &cookie).await?;
    let path = download_path(&app, &slug, &cookie).await?;

    let response = app.post_form("/logout", &[], Some(&cookie)).await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let response = app.get(&path, None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn download_link_requires_creator_flag_at_use() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let clerk = app.insert_user("clerk", "registry-pass", CREATOR).await?;
    let cookie = app.login("clerk", "registry-pass").await?;

    let slug = create_record(&app, &cookie).await?;
    let path = download_path(&app, &slug, &cookie).await?;

    let user_id = clerk.id;
    app.with_conn(move |conn| {
        diesel::update(users::table.find(user_id))
            .set(users::is_creator.eq(false))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    let response = app.get(&path, None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn replacing_with_same_file_name_keeps_one_fresh_object() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.insert_user("clerk", "registry-pass", CREATOR).await?;
    let cookie = app.login("clerk", "registry-pass").await?;

    let slug = create_record(&app, &cookie).await?;
    let original = app
        .storage()
        .find(&format!("incoming/{slug}"), "letter.pdf")
        .await
        .expect("attachment stored");

    let response = app
        .post_multipart(
            &format!("/incoming/{slug}/update"),
            &[
                ("r_from", "Treasury"),
                ("subject", "Quarterly allocation"),
                ("dated", "2024-05-02"),
            ],
            Some(("letter.pdf", "application/pdf", &b"%PDF-1.4 second"[..])),
            Some(&cookie),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let storage = app.storage();
    assert_eq!(storage.object_count().await, 1);
    assert!(storage.get(&original.key).await.is_none());
    let replacement = storage
        .find(&format!("incoming/{slug}"), "letter.pdf")
        .await
        .expect("replacement stored");
    assert_ne!(replacement.key, original.key);
    assert_eq!(replacement.bytes, b"%PDF-1.4 second");

    let path = download_path(&app, &slug, &cookie).await?;
    let response = app.get(&path, None).await?;
    assert_eq!(
        location(&response),
        Some(format!("https://fake-storage/{}?expires_in=300", replacement.key))
    );

    app.cleanup().await?;
    Ok(())
}
