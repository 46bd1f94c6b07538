//! Unit tests for the pure supervision state machine.
//!
//! Time is passed in explicitly, so these run without a runtime.

use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

use studio_launcher::host::{DaemonEvent, OutputStream, StopOutcome};
use studio_launcher::models::daemon::{DaemonKind, DaemonStatus};
use studio_launcher::supervisor::process::{Reaction, RestartPolicy, SupervisedProcess};
use studio_launcher::AppError;

fn process(kind: DaemonKind) -> SupervisedProcess {
    SupervisedProcess::new(kind, RestartPolicy::default())
}

fn path() -> PathBuf {
    PathBuf::from("/projects/obby")
}

fn exited(code: i32) -> DaemonEvent {
    DaemonEvent::Stopped { code: Some(code) }
}

#[test]
fn new_process_is_stopped_without_instance() {
    let p = process(DaemonKind::FileSync);
    assert_eq!(p.status(), DaemonStatus::Stopped);
    assert!(p.instance().is_none());
    assert_eq!(p.restart_count(), 0);
}

#[test]
fn start_opens_a_new_epoch_and_instance() {
    let mut p = process(DaemonKind::FileSync);

    let attempt = p.start(path()).unwrap();

    assert_eq!(attempt.epoch, 1);
    assert_eq!(attempt.project_path, path());
    assert_eq!(p.status(), DaemonStatus::Starting);
    assert!(p.instance().is_some());
    assert!(!p.operator_stop());
}

#[test]
fn start_while_active_changes_nothing() {
    let mut p = process(DaemonKind::FileSync);
    p.start(path()).unwrap();

    let err = p.start(path()).unwrap_err();

    assert!(matches!(err, AppError::AlreadyRunning(_)));
    assert_eq!(p.epoch(), 1);
}

#[test]
fn started_records_port() {
    let mut p = process(DaemonKind::FileSync);
    let attempt = p.start(path()).unwrap();

    let reaction = p.on_event(
        attempt.epoch,
        DaemonEvent::Started { port: Some(34872) },
        Instant::now(),
    );

    assert_eq!(
        reaction,
        Reaction::Started {
            epoch: 1,
            port: Some(34872)
        }
    );
    assert_eq!(p.snapshot().port, Some(34872));
    assert_eq!(p.status(), DaemonStatus::Running);
}

#[test]
fn output_does_not_change_status() {
    let mut p = process(DaemonKind::FileSync);
    let attempt = p.start(path()).unwrap();

    let reaction = p.on_event(
        attempt.epoch,
        DaemonEvent::Output {
            line: "hi".into(),
            stream: OutputStream::Stdout,
        },
        Instant::now(),
    );

    assert!(matches!(reaction, Reaction::Output { .. }));
    assert_eq!(p.status(), DaemonStatus::Starting);
}

#[test]
fn events_from_old_epoch_are_stale() {
    let mut p = process(DaemonKind::FileSync);
    let first = p.start(path()).unwrap();
    p.stop();
    p.start(path()).unwrap();

    let reaction = p.on_event(first.epoch, exited(1), Instant::now());

    assert_eq!(reaction, Reaction::Stale);
    assert_eq!(p.status(), DaemonStatus::Starting);
    assert_eq!(p.restart_count(), 0);
}

#[test]
fn crash_within_budget_schedules_restart() {
    let mut p = process(DaemonKind::FileSync);
    let attempt = p.start(path()).unwrap();

    let reaction = p.on_event(attempt.epoch, exited(1), Instant::now());

    assert_eq!(
        reaction,
        Reaction::Restart {
            attempt: 1,
            max: 3,
            code: Some(1),
            delay: Duration::from_secs(2),
            ticket: attempt.epoch,
        }
    );
    assert_eq!(p.status(), DaemonStatus::Starting);
    assert_eq!(p.pending_restart(), Some(attempt.epoch));
}

#[test]
fn relaunch_keeps_counter_and_path() {
    let mut p = process(DaemonKind::FileSync);
    let attempt = p.start(path()).unwrap();
    p.on_event(attempt.epoch, exited(1), Instant::now());

    let relaunch = p.relaunch(attempt.epoch).unwrap();

    assert_eq!(relaunch.epoch, attempt.epoch + 1);
    assert_eq!(relaunch.project_path, path());
    assert_eq!(p.restart_count(), 1);
    assert!(p.pending_restart().is_none());
}

#[test]
fn fourth_crash_in_window_gives_up() {
    let mut p = process(DaemonKind::FileSync);
    let t0 = Instant::now();
    let mut epoch = p.start(path()).unwrap().epoch;

    for n in 1..=3u64 {
        let now = t0 + Duration::from_secs(n * 3);
        assert!(matches!(
            p.on_event(epoch, exited(1), now),
            Reaction::Restart { .. }
        ));
        epoch = p.relaunch(epoch).unwrap().epoch;
    }

    let reaction = p.on_event(epoch, exited(1), t0 + Duration::from_secs(12));

    assert_eq!(
        reaction,
        Reaction::GaveUp {
            crashes: 4,
            code: Some(1)
        }
    );
    assert_eq!(p.status(), DaemonStatus::Stopped);
    assert!(p.instance().is_none());
    assert!(p.pending_restart().is_none());

    p.start(path()).unwrap();
    assert_eq!(p.restart_count(), 0);
}

#[test]
fn zero_restart_budget_gives_up_immediately() {
    let policy = RestartPolicy {
        max_restarts: 0,
        ..RestartPolicy::default()
    };
    let mut p = SupervisedProcess::new(DaemonKind::FileSync, policy);
    let attempt = p.start(path()).unwrap();

    let reaction = p.on_event(attempt.epoch, exited(1), Instant::now());

    assert!(matches!(reaction, Reaction::GaveUp { crashes: 1, .. }));
}

#[test]
fn crash_after_window_restarts_count_from_one() {
    let mut p = process(DaemonKind::FileSync);
    let t0 = Instant::now();
    let attempt = p.start(path()).unwrap();
    p.on_event(attempt.epoch, exited(1), t0);
    let next = p.relaunch(attempt.epoch).unwrap();

    let reaction = p.on_event(next.epoch, exited(1), t0 + Duration::from_secs(61));

    assert!(matches!(reaction, Reaction::Restart { attempt: 1, .. }));
}

#[test]
fn operator_stop_swallows_the_exit() {
    let mut p = process(DaemonKind::FileSync);
    let attempt = p.start(path()).unwrap();

    assert!(p.stop());
    let reaction = p.on_event(attempt.epoch, exited(0), Instant::now());

    assert_eq!(reaction, Reaction::OperatorStopped);
    assert_eq!(p.status(), DaemonStatus::Stopped);
    assert!(!p.operator_stop());
    assert_eq!(p.restart_count(), 0);
}

#[test]
fn stop_invalidates_pending_relaunch() {
    let mut p = process(DaemonKind::FileSync);
    let attempt = p.start(path()).unwrap();
    p.on_event(attempt.epoch, exited(1), Instant::now());

    p.stop();

    assert!(p.pending_restart().is_none());
    assert!(p.relaunch(attempt.epoch).is_none());
    assert_eq!(p.status(), DaemonStatus::Stopped);
}

#[test]
fn stop_failure_is_recorded_but_status_stays_stopped() {
    let mut p = process(DaemonKind::FileSync);
    p.start(path()).unwrap();
    p.stop();

    p.stop_settled(&Err(AppError::Host("denied".into())));

    assert_eq!(p.status(), DaemonStatus::Stopped);
    assert_eq!(p.error(), Some("stop failed: host: denied"));
}

#[test]
fn not_running_stop_is_swallowed() {
    let mut p = process(DaemonKind::FileSync);
    p.stop();

    p.stop_settled(&Ok(StopOutcome::NotRunning));

    assert!(p.error().is_none());
    assert_eq!(p.status(), DaemonStatus::Stopped);
}

#[test]
fn missing_binary_makes_optional_daemon_unavailable() {
    let mut p = process(DaemonKind::RuntimeSync);
    let attempt = p.start(path()).unwrap();

    assert!(p.start_failed(attempt.epoch, &AppError::BinaryMissing("rbxsync".into())));

    assert_eq!(p.status(), DaemonStatus::Unavailable);
    assert!(p.instance().is_none());
    assert_eq!(p.restart_count(), 0);
}

#[test]
fn missing_binary_makes_required_daemon_error() {
    let mut p = process(DaemonKind::FileSync);
    let attempt = p.start(path()).unwrap();

    p.start_failed(attempt.epoch, &AppError::BinaryMissing("rojo".into()));

    assert_eq!(p.status(), DaemonStatus::Error);
    assert_eq!(p.error(), Some("binary missing: rojo"));
}

#[test]
fn stale_start_failure_is_ignored() {
    let mut p = process(DaemonKind::FileSync);
    let attempt = p.start(path()).unwrap();
    p.stop();

    assert!(!p.start_failed(attempt.epoch, &AppError::Host("late".into())));
    assert_eq!(p.status(), DaemonStatus::Stopped);
}

#[test]
fn channel_is_refused_after_stop() {
    let mut p = process(DaemonKind::FileSync);
    let attempt = p.start(path()).unwrap();
    assert!(p.accepts_channel(attempt.epoch));

    p.stop();

    assert!(!p.accepts_channel(attempt.epoch));
}

#[test]
fn runtime_error_event_sets_error_status() {
    let mut p = process(DaemonKind::FileSync);
    let attempt = p.start(path()).unwrap();

    let reaction = p.on_event(
        attempt.epoch,
        DaemonEvent::Error {
            message: "lost pipe".into(),
        },
        Instant::now(),
    );

    assert_eq!(
        reaction,
        Reaction::Failed {
            message: "lost pipe".into()
        }
    );
    assert_eq!(p.status(), DaemonStatus::Error);
    assert!(p.instance().is_none());
}

#[test]
fn stability_reset_only_applies_to_running_epoch() {
    let mut p = process(DaemonKind::FileSync);
    let t0 = Instant::now();
    let first = p.start(path()).unwrap();
    p.on_event(first.epoch, DaemonEvent::Started { port: None }, t0);
    p.on_event(first.epoch, exited(1), t0 + Duration::from_secs(5));
    let second = p.relaunch(first.epoch).unwrap();

    assert!(!p.stability_elapsed(first.epoch));
    assert_eq!(p.restart_count(), 1);

    p.on_event(second.epoch, DaemonEvent::Started { port: None }, t0);
    assert!(p.stability_elapsed(second.epoch));
    assert_eq!(p.restart_count(), 0);
}

#[test]
fn started_after_stop_is_ignored() {
    let mut p = process(DaemonKind::FileSync);
    let attempt = p.start(path()).unwrap();
    p.stop();

    let reaction = p.on_event(
        attempt.epoch,
        DaemonEvent::Started { port: Some(34872) },
        Instant::now(),
    );

    assert_eq!(reaction, Reaction::Ignored);
    assert_eq!(p.status(), DaemonStatus::Stopped);
}
