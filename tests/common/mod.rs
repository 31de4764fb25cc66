use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use http_body_util::BodyExt;
use mailroom::auth::password::hash_password;
use mailroom::auth::tokens::TokenService;
use mailroom::config::AppConfig;
use mailroom::db::{self, PgPool};
use mailroom::mail::{MailError, Mailer, OutgoingEmail};
use mailroom::models::{Job, NewDepartment, NewUser, User};
use mailroom::routes;
use mailroom::schema::{departments, jobs, users};
use mailroom::slug::{slugify, SlugIdentity};
use mailroom::state::AppState;
use mailroom::storage::ObjectStorage;
use mailroom::workers::{default_handlers, Worker};
use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
            content_disposition,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    /// The object for `file_name` stored under `prefix`, whatever its
    /// revision segment.
    #[allow(dead_code)]
    pub async fn find(&self, prefix: &str, file_name: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        let prefix = format!("{prefix}/");
        let suffix = format!("/{file_name}");
        guard
            .values()
            .find(|object| object.key.starts_with(&prefix) && object.key.ends_with(&suffix))
            .cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

/// Records delivered emails. Recipients must parse as addresses, like on a
/// real transport; `set_unreachable(true)` makes every send time out.
#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    unreachable: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        email.to.parse::<lettre::Address>()?;
        if self.unreachable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(MailError::Timeout(Duration::from_secs(1)));
        }
        self.sent.lock().await.push(email.clone());
        Ok(())
    }
}

#[allow(dead_code)]
impl FakeMailer {
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable
            .store(unreachable, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }
}

/// Account flags for seeded users. Seeded users are active unless
/// `inactive` is set.
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Flags {
    pub creator: bool,
    pub admin: bool,
    pub can_register: bool,
    pub inactive: bool,
}

#[allow(dead_code)]
pub const CREATOR: Flags = Flags {
    creator: true,
    admin: false,
    can_register: false,
    inactive: false,
};

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
}

#[allow(dead_code)]
impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::with_config(|_| {}).await
    }

    /// Like [`TestApp::new`], with a chance to adjust the configuration
    /// before the router is built.
    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let mut config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            site_url: "http://mailroom.test".to_string(),
            secret_key: "test-secret".to_string(),
            token_issuer: "test-issuer".to_string(),
            account_token_expiry_minutes: 60,
            download_token_expiry_minutes: 60,
            session_expiry_days: 14,
            session_cookie_secure: false,
            session_cookie_domain: None,
            cors_allowed_origin: None,
            page_size: 20,
            max_upload_bytes: 5 * 1024 * 1024,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            smtp: None,
        };
        customize(&mut config);

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let tokens = TokenService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, storage_for_state, tokens);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub async fn insert_user(&self, username: &str, password: &str, flags: Flags) -> Result<User> {
        let username = username.to_lowercase();
        let password = password.to_string();
        self.with_conn(move |conn| {
            let identity = SlugIdentity::generate();
            let user = NewUser {
                uid: identity.uid,
                slug: identity.slug,
                email: format!("{username}@mailroom.test"),
                username,
                password_hash: hash_password(&password)?,
                first_name: String::new(),
                last_name: String::new(),
                phone: None,
                job_title: None,
                location: None,
                department_id: None,
                is_active: !flags.inactive,
                is_creator: flags.creator,
                is_manager: false,
                is_admin: flags.admin,
                can_register_users: flags.can_register,
            };
            diesel::insert_into(users::table)
                .values(&user)
                .get_result::<User>(conn)
                .context("failed to insert user")
        })
        .await
    }

    pub async fn insert_department(&self, name: &str) -> Result<String> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let slug = slugify(&name);
            diesel::insert_into(departments::table)
                .values(&NewDepartment {
                    name,
                    slug: slug.clone(),
                })
                .execute(conn)
                .context("failed to insert department")?;
            Ok(slug)
        })
        .await
    }

    pub async fn find_user(&self, username: &str) -> Result<User> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            users::table
                .filter(users::username.eq(&username))
                .first::<User>(conn)
                .context("user not found")
        })
        .await
    }

    /// A worker over this app's database that delivers through `mailer`.
    pub fn worker(&self, mailer: Arc<FakeMailer>) -> Worker {
        Worker::new(
            Arc::new(self.state.clone()),
            default_handlers(mailer),
            Duration::from_millis(10),
        )
    }

    pub async fn job(&self, id: Uuid) -> Result<Job> {
        self.with_conn(move |conn| {
            jobs::table
                .find(id)
                .first::<Job>(conn)
                .context("job not found")
        })
        .await
    }

    pub async fn jobs_by_type(&self, ty: &str) -> Result<Vec<Job>> {
        let ty = ty.to_string();
        self.with_conn(move |conn| {
            jobs::table
                .filter(jobs::job_type.eq(&ty))
                .load::<Job>(conn)
                .context("failed to load jobs")
        })
        .await
    }

    /// Logs in through the form and returns the `Cookie` header value to
    /// send on later requests.
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let response = self
            .post_form(
                "/login",
                &[("username", username), ("password", password)],
                None,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::SEE_OTHER,
            "login failed with status {}",
            response.status()
        );
        session_cookie(&response).context("login response did not set a session cookie")
    }

    pub async fn get(&self, path: &str, cookie: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty())?).await
    }

    pub async fn post_form(
        &self,
        path: &str,
        fields: &[(&str, &str)],
        cookie: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body))?).await
    }

    /// Posts `multipart/form-data` with text `fields` and an optional
    /// `(file name, content type, bytes)` in the `file` part. An empty
    /// content type omits the part's `Content-Type` header.
    pub async fn post_multipart(
        &self,
        path: &str,
        fields: &[(&str, &str)],
        file: Option<(&str, &str, &[u8])>,
        cookie: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();

        for (name, value) in fields {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend(value.as_bytes());
            body.extend(b"\r\n");
        }

        if let Some((filename, content_type, data)) = file {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
                )
                .as_bytes(),
            );
            if !content_type.is_empty() {
                body.extend(format!("Content-Type: {content_type}\r\n").as_bytes());
            }
            body.extend(b"\r\n");
            body.extend(data);
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let mut builder = Request::builder().method(Method::POST).uri(path).header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        );
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body))?).await
    }

    pub async fn send(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_json(response: hyper::Response<Body>) -> Result<serde_json::Value> {
    let body = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&body)?)
}

#[allow(dead_code)]
pub fn location(response: &hyper::Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// `name=value` of the `sessionid` cookie set by the response, if any.
#[allow(dead_code)]
pub fn session_cookie(response: &hyper::Response<Body>) -> Option<String> {
    set_cookie(response, "sessionid").filter(|cookie| cookie != "sessionid=")
}

/// `name=value` of a cookie set by the response.
#[allow(dead_code)]
pub fn set_cookie(response: &hyper::Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .find(|pair| pair.starts_with(&format!("{name}=")))
        .map(str::to_owned)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool)?;
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE incoming_comments, outgoing_comments, incoming, outgoing, sessions, jobs, users, departments RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
