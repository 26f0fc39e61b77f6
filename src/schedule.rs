//! Daily schedule runner.
//!
//! Computes the next trigger (next calendar day at the configured local
//! wall-clock time, jittered), runs the punch pipeline, retries failures at
//! a fixed delay up to the per-day attempt bound and escalates through the
//! notifier exactly once when the bound is exhausted.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, LocalResult, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info, warn};

use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::error::PunchError;
use crate::notify::Notifier;

/// The login+submit pipeline as the scheduler sees it.
#[async_trait]
pub trait Punch: Send + Sync {
    async fn punch(&self, cancel: &CancellationToken) -> Result<(), PunchError>;
}

/// Jitter window added to every trigger.
const JITTER: Duration = Duration::from_secs(10 * 60);

/// Validated schedule parameters (see `ScheduleConfig::resolve`).
#[derive(Debug, Clone)]
pub struct SchedulePlan {
    pub hour: u32,
    pub minute: u32,
    pub tz: Tz,
    pub max_attempts: u8,
    pub retry_after: Duration,
    pub punch_timeout: Duration,
    pub run_at_start: bool,
}

/// Next calendar day at `hour:minute` in `now`'s zone, plus a uniform
/// jitter in `[0, JITTER)`.
pub fn next_trigger(
    now: DateTime<Tz>,
    hour: u32,
    minute: u32,
    rng: &mut impl Rng,
) -> DateTime<Tz> {
    let date = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .unwrap_or_else(|| now.date_naive());
    let base = date
        .and_hms_opt(hour, minute, 0)
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN));
    let local = match now.timezone().from_local_datetime(&base) {
        LocalResult::Single(at) => at,
        LocalResult::Ambiguous(earliest, _) => earliest,
        // DST gap: fall back to reading the naive time as UTC
        LocalResult::None => now.timezone().from_utc_datetime(&base),
    };
    local + chrono::Duration::seconds(rng.gen_range(0..JITTER.as_secs()) as i64)
}

pub struct ScheduleRunner<'a> {
    plan: SchedulePlan,
    punch: &'a dyn Punch,
    notifier: &'a dyn Notifier,
    clock: &'a dyn Clock,
    display_name: String,
    account_name: String,
    rng: StdRng,
}

impl<'a> ScheduleRunner<'a> {
    pub fn new(
        plan: SchedulePlan,
        punch: &'a dyn Punch,
        notifier: &'a dyn Notifier,
        clock: &'a dyn Clock,
        display_name: impl Into<String>,
        account_name: impl Into<String>,
    ) -> Self {
        Self {
            plan,
            punch,
            notifier,
            clock,
            display_name: display_name.into(),
            account_name: account_name.into(),
            // seeded once per process
            rng: StdRng::from_entropy(),
        }
    }

    /// Drive the daily cycle until cancellation or a day exhausts its
    /// attempts. The caller decides whether exhaustion is fatal.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), PunchError> {
        if cancel.is_cancelled() {
            return Err(PunchError::Cancelled);
        }
        info!(
            hour = self.plan.hour,
            minute = self.plan.minute,
            tz = %self.plan.tz,
            "punching on a 24-hour cycle"
        );
        if self.plan.run_at_start {
            self.run_day(cancel).await?;
        }
        loop {
            let trigger = self.next_trigger();
            info!(trigger = %trigger, "waiting for next cycle");
            self.wait_until(cancel, trigger).await?;
            self.run_day(cancel).await?;
        }
    }

    fn next_trigger(&mut self) -> DateTime<Tz> {
        let now = self.clock.now_in(self.plan.tz);
        next_trigger(now, self.plan.hour, self.plan.minute, &mut self.rng)
    }

    async fn wait_until(
        &self,
        cancel: &CancellationToken,
        trigger: DateTime<Tz>,
    ) -> Result<(), PunchError> {
        let until = (trigger.with_timezone(&Utc) - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        cancel.wait(until).await
    }

    /// One day's cycle: punch, retry at a fixed delay, escalate once on
    /// exhaustion.
    async fn run_day(&self, cancel: &CancellationToken) -> Result<(), PunchError> {
        let mut last: Option<PunchError> = None;
        for attempt in 1..=self.plan.max_attempts {
            info!(attempt, "starting punch");
            match self.punch.punch(cancel).await {
                Ok(()) => {
                    info!(attempt, "punch finished");
                    return Ok(());
                }
                Err(PunchError::Cancelled) => return Err(PunchError::Cancelled),
                Err(err) => {
                    warn!(
                        attempt,
                        retry_after = ?self.plan.retry_after,
                        error = %err,
                        "punch failed"
                    );
                    last = Some(err);
                }
            }
            if attempt < self.plan.max_attempts {
                cancel.wait(self.plan.retry_after).await?;
            }
        }

        let last = last.unwrap_or(PunchError::MaxAttemptsExceeded);
        self.escalate(&last).await;
        error!(
            max_attempts = self.plan.max_attempts,
            error = %last,
            "maximum attempts reached"
        );
        Err(PunchError::MaxAttemptsExceeded)
    }

    async fn escalate(&self, last: &PunchError) {
        let date = self.clock.now_in(self.plan.tz).format("%Y-%m-%d");
        let subject = format!("{} {date}", self.display_name);
        let body = format!(
            "account {}: daily punch failed ({last})",
            self.account_name
        );
        if let Err(err) = self.notifier.send(&self.display_name, &subject, &body).await {
            warn!(error = %err, "failed to deliver notification");
        }
    }
}
