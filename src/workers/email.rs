use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::{
    jobs::{retry_delay, JOB_SEND_EMAIL, MAX_ATTEMPTS},
    mail::{Mailer, OutgoingEmail},
    models::Job,
    state::AppState,
};

use super::{JobExecution, JobHandler};

pub struct SendEmailJob {
    mailer: Arc<dyn Mailer>,
}

impl SendEmailJob {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl JobHandler for SendEmailJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_EMAIL
    }

    async fn handle(&self, _state: Arc<AppState>, job: Job) -> JobExecution {
        let email: OutgoingEmail = match serde_json::from_value(job.payload.clone()) {
            Ok(email) => email,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid email payload: {err}"),
                }
            }
        };

        match self.mailer.send(&email).await {
            Ok(()) => JobExecution::Success,
            Err(err) if err.is_permanent() => JobExecution::Failed {
                error: err.to_string(),
            },
            Err(err) if job.attempts >= MAX_ATTEMPTS => {
                warn!(job_id = %job.id, attempts = job.attempts, "giving up on email");
                JobExecution::Failed {
                    error: err.to_string(),
                }
            }
            Err(err) => JobExecution::Retry {
                delay: retry_delay(job.attempts),
                error: err.to_string(),
            },
        }
    }
}
