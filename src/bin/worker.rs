use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use mailroom::{
    auth::tokens::TokenService, config::AppConfig, db, default_handlers, mail::SmtpMailer,
    s3::build_storage, state::AppState, Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        s3_bucket = %config.s3_bucket,
        "loaded configuration"
    );

    let smtp = config
        .smtp
        .clone()
        .context("SMTP_HOST must be set for the email worker")?;
    tracing::info!(host = %smtp.host, port = smtp.port, from = %smtp.from_address, "smtp relay configured");
    let mailer = Arc::new(SmtpMailer::new(smtp).context("failed to build SMTP transport")?);

    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let storage = build_storage(&config).await?;
    let tokens = TokenService::from_config(&config)?;

    let state = Arc::new(AppState::new(pool, config, storage, tokens));
    let worker = Worker::new(state, default_handlers(mailer), Duration::from_secs(2));

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
