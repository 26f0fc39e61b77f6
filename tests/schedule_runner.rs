use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use autopunch::cancel::CancellationToken;
use autopunch::clock::SystemClock;
use autopunch::error::PunchError;
use autopunch::notify::Notifier;
use autopunch::schedule::{Punch, SchedulePlan, ScheduleRunner};

struct ScriptedPunch {
    calls: AtomicUsize,
    /// Outcomes per call; once exhausted every further call succeeds.
    failures: usize,
}

impl ScriptedPunch {
    fn failing(failures: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Punch for ScriptedPunch {
    async fn punch(&self, _cancel: &CancellationToken) -> Result<(), PunchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(PunchError::LoginRejected("boom".to_string()))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, display_name: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((
            display_name.to_string(),
            subject.to_string(),
            body.to_string(),
        ));
        Ok(())
    }
}

fn plan(max_attempts: u8, retry_after: Duration) -> SchedulePlan {
    SchedulePlan {
        hour: 8,
        minute: 0,
        tz: chrono_tz::Asia::Shanghai,
        max_attempts,
        retry_after,
        punch_timeout: Duration::from_secs(30),
        run_at_start: true,
    }
}

#[tokio::test]
async fn exhaustion_escalates_exactly_once_with_last_error() {
    let punch = ScriptedPunch::failing(usize::MAX);
    let notifier = RecordingNotifier::default();
    let clock = SystemClock;
    let mut runner = ScheduleRunner::new(
        plan(3, Duration::from_millis(5)),
        &punch,
        &notifier,
        &clock,
        "punch status",
        "student1",
    );

    let cancel = CancellationToken::new();
    let err = runner.run(&cancel).await.unwrap_err();

    assert!(matches!(err, PunchError::MaxAttemptsExceeded));
    assert_eq!(punch.calls(), 3);
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "punch status");
    assert!(sent[0].2.contains("student1"));
    assert!(sent[0].2.contains("boom"));
}

#[tokio::test]
async fn cancellation_during_retry_wait_stops_without_escalation() {
    let punch = ScriptedPunch::failing(usize::MAX);
    let notifier = RecordingNotifier::default();
    let clock = SystemClock;
    let mut runner = ScheduleRunner::new(
        plan(3, Duration::from_secs(60)),
        &punch,
        &notifier,
        &clock,
        "punch status",
        "student1",
    );

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    let (result, _) = tokio::join!(runner.run(&cancel), async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    assert!(matches!(result, Err(PunchError::Cancelled)));
    assert_eq!(punch.calls(), 1);
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn success_advances_to_waiting_without_escalation() {
    let punch = ScriptedPunch::failing(0);
    let notifier = RecordingNotifier::default();
    let clock = SystemClock;
    let mut runner = ScheduleRunner::new(
        plan(3, Duration::from_millis(5)),
        &punch,
        &notifier,
        &clock,
        "punch status",
        "student1",
    );

    // cancel while the runner waits for the next day's trigger
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    let (result, _) = tokio::join!(runner.run(&cancel), async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    assert!(matches!(result, Err(PunchError::Cancelled)));
    assert_eq!(punch.calls(), 1);
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn retries_until_a_success_within_the_bound() {
    let punch = ScriptedPunch::failing(2);
    let notifier = RecordingNotifier::default();
    let clock = SystemClock;
    let mut runner = ScheduleRunner::new(
        plan(5, Duration::from_millis(5)),
        &punch,
        &notifier,
        &clock,
        "punch status",
        "student1",
    );

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    let (result, _) = tokio::join!(runner.run(&cancel), async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    assert!(matches!(result, Err(PunchError::Cancelled)));
    assert_eq!(punch.calls(), 3);
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn already_cancelled_runner_never_punches() {
    let punch = ScriptedPunch::failing(0);
    let notifier = RecordingNotifier::default();
    let clock = SystemClock;
    let mut runner = ScheduleRunner::new(
        plan(3, Duration::from_millis(5)),
        &punch,
        &notifier,
        &clock,
        "punch status",
        "student1",
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = runner.run(&cancel).await;
    assert!(matches!(result, Err(PunchError::Cancelled)));
    assert_eq!(punch.calls(), 0);
}
