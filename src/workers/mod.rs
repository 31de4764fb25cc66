use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    jobs::{mark_job_failed, mark_job_succeeded, reserve_job, retry_job_after, JobQueueError},
    mail::Mailer,
    models::Job,
    state::AppState,
};

pub mod email;

#[derive(Debug)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;
}

pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let map = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            handlers: map,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!(
            job_types = ?self.handlers.keys().collect::<Vec<_>>(),
            "worker started"
        );
        loop {
            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Reserves and processes at most one job. Returns whether a job was
    /// found, so the caller knows whether to poll again immediately.
    pub async fn run_once(&self) -> Result<bool, JobQueueError> {
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let job = {
            let mut conn = match self.state.db() {
                Ok(conn) => conn,
                Err(err) => {
                    error!(?err, "failed to obtain database connection in worker");
                    return Ok(false);
                }
            };
            match reserve_job(&mut conn, &job_types)? {
                Some(job) => job,
                None => return Ok(false),
            }
        };

        let execution = match self.handlers.get(job.job_type.as_str()) {
            Some(handler) => handler.handle(self.state.clone(), job.clone()).await,
            None => JobExecution::Failed {
                error: "no handler registered".to_string(),
            },
        };
        self.record(&job, execution)?;
        Ok(true)
    }

    fn record(&self, job: &Job, execution: JobExecution) -> Result<(), JobQueueError> {
        // On failure the row stays `processing` and is reclaimed once its
        // lease runs out.
        let mut conn = self.state.pool.get().map_err(|err| {
            error!(job_id = %job.id, error = %err, "failed to record job outcome due to pool error");
            JobQueueError::Pool(err.to_string())
        })?;

        match execution {
            JobExecution::Success => {
                mark_job_succeeded(&mut conn, job.id)?;
                info!(job_id = %job.id, job_type = %job.job_type, "job completed successfully");
            }
            JobExecution::Retry { delay, error } => {
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    retry_in_secs = delay.as_secs(),
                    %error,
                    "job will retry"
                );
                retry_job_after(&mut conn, job.id, delay, &error)?;
            }
            JobExecution::Failed { error } => {
                error!(job_id = %job.id, job_type = %job.job_type, %error, "job failed");
                mark_job_failed(&mut conn, job.id, &error)?;
            }
        }
        Ok(())
    }
}

pub fn default_handlers(mailer: Arc<dyn Mailer>) -> Vec<Arc<dyn JobHandler>> {
    vec![Arc::new(email::SendEmailJob::new(mailer))]
}
