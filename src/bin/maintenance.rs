use std::env;

use anyhow::{bail, Context, Result};
use diesel::prelude::*;

use mailroom::{
    auth::password::hash_password,
    config::AppConfig,
    db,
    jobs::{requeue_failed, JOB_SEND_EMAIL},
    models::{NewDepartment, NewUser},
    routes::accounts::valid_username,
    schema::{departments, users},
    slug::{slugify, SlugIdentity},
};

const USAGE: &str = "Usage:
  maintenance create-user <username> <email> <password> [--admin] [--creator] [--manager] [--can-register]
  maintenance create-department <name>
  maintenance retry-failed-emails";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt().with_target(false).compact().init();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("create-user") => create_user(&args[1..])?,
        Some("create-department") => create_department(&args[1..])?,
        Some("retry-failed-emails") => retry_failed_emails()?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<db::PgPool> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    Ok(pool)
}

fn create_user(args: &[String]) -> Result<()> {
    let positional: Vec<&String> = args.iter().filter(|arg| !arg.starts_with("--")).collect();
    let [username, email, password] = positional.as_slice() else {
        bail!("create-user needs <username> <email> <password>\n{USAGE}");
    };
    let has_flag = |flag: &str| args.iter().any(|arg| arg == flag);

    let username = username.trim().to_lowercase();
    if !valid_username(&username) {
        bail!("invalid username: {username}");
    }
    let email = email.trim().to_lowercase();
    email
        .parse::<lettre::Address>()
        .with_context(|| format!("invalid email address: {email}"))?;

    let identity = SlugIdentity::generate();
    let new_user = NewUser {
        uid: identity.uid,
        slug: identity.slug.clone(),
        username: username.clone(),
        email,
        password_hash: hash_password(password)?,
        first_name: String::new(),
        last_name: String::new(),
        phone: None,
        job_title: None,
        location: None,
        department_id: None,
        is_active: true,
        is_creator: has_flag("--creator"),
        is_manager: has_flag("--manager"),
        is_admin: has_flag("--admin"),
        can_register_users: has_flag("--can-register"),
    };

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    diesel::insert_into(users::table)
        .values(&new_user)
        .execute(&mut conn)
        .with_context(|| format!("failed to create user {username}"))?;

    println!("Created user {username} ({})", identity.slug);
    Ok(())
}

fn create_department(args: &[String]) -> Result<()> {
    let name = args.join(" ");
    let name = name.trim();
    let slug = slugify(name);
    if slug.is_empty() {
        bail!("create-department needs a <name>\n{USAGE}");
    }

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    diesel::insert_into(departments::table)
        .values(&NewDepartment {
            name: name.to_string(),
            slug: slug.clone(),
        })
        .execute(&mut conn)
        .with_context(|| format!("failed to create department {name}"))?;

    println!("Created department {name} ({slug})");
    Ok(())
}

fn retry_failed_emails() -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let requeued = requeue_failed(&mut conn, JOB_SEND_EMAIL)
        .context("failed to requeue email jobs")?;
    println!("Requeued {requeued} failed or stalled email jobs.");
    Ok(())
}
