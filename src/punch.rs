//! The complete login+submit cycle as one [`Punch`] implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;

use crate::cancel::CancellationToken;
use crate::captcha::CaptchaSolver;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::credentials::Credential;
use crate::error::PunchError;
use crate::form::FormPipeline;
use crate::http::SessionClient;
use crate::schedule::Punch;
use crate::session::LoginSession;

/// One punch = fresh cookie jar → login → form pipeline, bounded by the
/// configured cycle timeout. State never survives a cycle; every attempt
/// starts from an unauthenticated client.
pub struct DailyPunch {
    config: Config,
    tz: Tz,
    timeout: Duration,
    credential: Credential,
    solver: Arc<dyn CaptchaSolver>,
    clock: Arc<dyn Clock>,
}

impl DailyPunch {
    pub fn new(
        config: Config,
        tz: Tz,
        credential: Credential,
        solver: Arc<dyn CaptchaSolver>,
    ) -> Self {
        let timeout = config.schedule.punch_timeout;
        Self {
            config,
            tz,
            timeout,
            credential,
            solver,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<(), PunchError> {
        let client = SessionClient::new(&self.config.http)?;
        LoginSession::new(&client, self.solver.as_ref(), &self.config.login, cancel)
            .login(&self.credential)
            .await?;
        FormPipeline::new(
            &client,
            &self.config.form,
            self.tz,
            self.clock.as_ref(),
            cancel,
        )
        .run()
        .await
    }
}

#[async_trait]
impl Punch for DailyPunch {
    async fn punch(&self, cancel: &CancellationToken) -> Result<(), PunchError> {
        match tokio::time::timeout(self.timeout, self.cycle(cancel)).await {
            Ok(result) => result,
            Err(_) => Err(PunchError::Timeout(self.timeout)),
        }
    }
}
