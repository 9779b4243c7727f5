//! Feed session lifecycle tests against a scripted upstream.

mod common;

use changelist_relay::{
    BroadcastRegistry, ChangeBatch, ChangeNumber, ChannelConnection, Checkpoint,
    ConnectionHandle, Enricher, FeedSession, RelayError, SessionConfig, SessionEpoch,
    SessionState,
};
use common::{drain, init_tracing, next_of_type, quick_session, wait_until, FakeUpstream};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    session: FeedSession,
    upstream: Arc<FakeUpstream>,
    handle: ConnectionHandle,
    checkpoint_path: std::path::PathBuf,
    _dir: TempDir,
}

fn harness(config: SessionConfig, checkpoint: Option<&str>) -> Harness {
    init_tracing();

    let dir = TempDir::new().unwrap();
    let checkpoint_path = dir.path().join("last-changenumber.txt");
    if let Some(text) = checkpoint {
        fs::write(&checkpoint_path, text).unwrap();
    }

    let upstream = Arc::new(FakeUpstream::new());
    let registry = Arc::new(BroadcastRegistry::new());
    let (connection, handle) = ChannelConnection::pair(256);
    registry.add(connection);

    let session = FeedSession::new(
        config,
        upstream.clone(),
        registry,
        Enricher::placeholders(),
        Checkpoint::new(&checkpoint_path),
    )
    .unwrap();

    Harness {
        session,
        upstream,
        handle,
        checkpoint_path,
        _dir: dir,
    }
}

// --- Login and polling ---

#[test]
fn test_login_announces_and_polls() {
    let h = harness(quick_session(), None);

    h.session.start().unwrap();

    assert!(next_of_type(&h.handle, "LogOn").is_some());
    assert!(wait_until(WAIT, || FakeUpstream::count(&h.upstream.polls) >= 2));
    assert_eq!(h.session.state(), SessionState::LoggedIn);
    assert!(h.session.is_logged_on());

    h.session.shutdown().unwrap();
    assert_eq!(h.session.state(), SessionState::Disconnected);
}

#[test]
fn test_cold_start_skips_backlog_then_emits() {
    let h = harness(quick_session(), None);
    h.upstream.queue_batch(ChangeBatch::new(100).with_app(1, 99));
    h.upstream.queue_batch(
        ChangeBatch::new(102)
            .with_app(3, 102)
            .with_app(2, 101)
            .with_package(5, 101),
    );

    h.session.start().unwrap();

    let first = next_of_type(&h.handle, "Changelist").unwrap();
    let second = next_of_type(&h.handle, "Changelist").unwrap();
    assert_eq!(first["ChangeNumber"], 101);
    assert_eq!(first["Apps"]["2"], "Unknown App 2");
    assert_eq!(first["Packages"]["5"], "Unknown Package 5");
    assert_eq!(second["ChangeNumber"], 102);
    assert_eq!(second["Apps"]["3"], "Unknown App 3");

    assert!(wait_until(WAIT, || h.session.change_number() == ChangeNumber(102)));

    h.session.shutdown().unwrap();
    assert_eq!(fs::read_to_string(&h.checkpoint_path).unwrap(), "102");
}

#[test]
fn test_unchanged_ceiling_emits_nothing() {
    let h = harness(quick_session(), Some("500"));
    h.upstream.queue_batch(ChangeBatch::new(500).with_app(1, 500));

    h.session.start().unwrap();
    assert!(wait_until(WAIT, || FakeUpstream::count(&h.upstream.polls) >= 3));
    h.session.shutdown().unwrap();

    let kinds: Vec<String> = drain(&h.handle)
        .iter()
        .map(|event| event["Type"].as_str().unwrap_or_default().to_string())
        .collect();
    assert!(!kinds.iter().any(|kind| kind == "Changelist"));
    assert_eq!(h.session.change_number(), ChangeNumber(500));
}

#[test]
fn test_poll_errors_are_survived() {
    let h = harness(quick_session(), Some("10"));
    h.upstream.fail_next_polls(3);
    h.upstream.queue_batch(ChangeBatch::new(11).with_app(7, 11));

    h.session.start().unwrap();

    let event = next_of_type(&h.handle, "Changelist").unwrap();
    assert_eq!(event["ChangeNumber"], 11);
    assert_eq!(h.session.state(), SessionState::LoggedIn);

    h.session.shutdown().unwrap();
}

// --- Connection loss ---

#[test]
fn test_disconnect_announces_log_off_and_retires_poll_loop() {
    let config = SessionConfig {
        reconnect_delay: Duration::from_secs(30),
        ..quick_session()
    };
    let h = harness(config, Some("10"));

    h.session.start().unwrap();
    assert!(next_of_type(&h.handle, "LogOn").is_some());
    assert!(wait_until(WAIT, || FakeUpstream::count(&h.upstream.polls) >= 1));
    let epoch_before = h.session.epoch();

    h.upstream.drop_connection();

    assert!(next_of_type(&h.handle, "LogOff").is_some());
    assert!(wait_until(WAIT, || h.session.state() == SessionState::Backoff));
    assert_eq!(h.session.epoch(), SessionEpoch(epoch_before.0 + 1));
    assert!(!h.session.is_logged_on());

    // Let any request already in flight finish, then expect silence
    std::thread::sleep(Duration::from_millis(50));
    let polls = FakeUpstream::count(&h.upstream.polls);
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(FakeUpstream::count(&h.upstream.polls), polls);

    h.session.shutdown().unwrap();
}

#[test]
fn test_reconnects_after_drop() {
    let h = harness(quick_session(), Some("10"));

    h.session.start().unwrap();
    assert!(next_of_type(&h.handle, "LogOn").is_some());

    h.upstream.drop_connection();
    assert!(next_of_type(&h.handle, "LogOff").is_some());

    // Comes back on its own after the reconnect delay
    assert!(next_of_type(&h.handle, "LogOn").is_some());
    assert_eq!(FakeUpstream::count(&h.upstream.connects), 2);
    assert!(wait_until(WAIT, || h.session.state() == SessionState::LoggedIn));

    h.session.shutdown().unwrap();
}

#[test]
fn test_connect_failure_backs_off_and_retries() {
    let h = harness(quick_session(), Some("10"));
    h.upstream.queue_connect(Err("service unavailable".into()));
    h.upstream.queue_connect(Err("service unavailable".into()));

    h.session.start().unwrap();

    assert!(next_of_type(&h.handle, "LogOn").is_some());
    assert_eq!(FakeUpstream::count(&h.upstream.connects), 3);

    h.session.shutdown().unwrap();
}

#[test]
fn test_login_failure_retries_without_disconnect() {
    let h = harness(quick_session(), Some("10"));
    h.upstream.queue_login(Err("try another CM".into()));

    h.session.start().unwrap();

    assert!(next_of_type(&h.handle, "LogOn").is_some());
    assert_eq!(FakeUpstream::count(&h.upstream.logons), 2);
    assert_eq!(FakeUpstream::count(&h.upstream.connects), 1);

    h.session.shutdown().unwrap();
}

#[test]
fn test_logged_off_announces_and_logs_back_in() {
    let h = harness(quick_session(), Some("10"));

    h.session.start().unwrap();
    assert!(next_of_type(&h.handle, "LogOn").is_some());
    let epoch_before = h.session.epoch();

    h.upstream.log_off("service maintenance");

    assert!(next_of_type(&h.handle, "LogOff").is_some());
    assert!(next_of_type(&h.handle, "LogOn").is_some());
    assert!(h.session.epoch() > epoch_before);

    h.session.shutdown().unwrap();
}

#[test]
fn test_reconnect_during_warmup_keeps_first_poll_deadline() {
    let warmup = Duration::from_millis(600);
    let config = SessionConfig {
        warmup_delay: warmup,
        ..quick_session()
    };
    let h = harness(config, None);
    let started = std::time::Instant::now();

    h.session.start().unwrap();
    assert!(next_of_type(&h.handle, "LogOn").is_some());

    h.upstream.drop_connection();
    assert!(next_of_type(&h.handle, "LogOff").is_some());
    assert!(next_of_type(&h.handle, "LogOn").is_some());

    // The new poll loop still waits out the warm-up started at first login
    if started.elapsed() < warmup {
        assert_eq!(FakeUpstream::count(&h.upstream.polls), 0);
    }
    assert!(wait_until(WAIT, || FakeUpstream::count(&h.upstream.polls) >= 1));
    assert!(started.elapsed() >= warmup);

    h.session.shutdown().unwrap();
}

// --- Shutdown ---

#[test]
fn test_shutdown_saves_checkpoint_and_releases_connection() {
    let h = harness(quick_session(), Some("500"));
    h.upstream.queue_batch(ChangeBatch::new(510).with_package(3, 510));

    h.session.start().unwrap();
    assert!(next_of_type(&h.handle, "Changelist").is_some());

    h.session.shutdown().unwrap();

    assert_eq!(fs::read_to_string(&h.checkpoint_path).unwrap(), "510");
    assert_eq!(FakeUpstream::count(&h.upstream.disconnects), 1);
    assert_eq!(h.session.state(), SessionState::Disconnected);

    // No further polling after shutdown
    let polls = FakeUpstream::count(&h.upstream.polls);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(FakeUpstream::count(&h.upstream.polls), polls);
}

#[test]
fn test_shutdown_interrupts_warmup() {
    let config = SessionConfig {
        warmup_delay: Duration::from_secs(60),
        ..quick_session()
    };
    let h = harness(config, None);

    h.session.start().unwrap();
    assert!(next_of_type(&h.handle, "LogOn").is_some());

    // Still warming up: no requests yet
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(FakeUpstream::count(&h.upstream.polls), 0);

    h.session.shutdown().unwrap();
    assert_eq!(FakeUpstream::count(&h.upstream.polls), 0);
    assert_eq!(fs::read_to_string(&h.checkpoint_path).unwrap(), "0");
}

#[test]
fn test_start_rules() {
    let h = harness(quick_session(), None);

    h.session.start().unwrap();
    assert!(matches!(h.session.start(), Err(RelayError::AlreadyStarted)));

    h.session.shutdown().unwrap();
    // Second shutdown is a no-op
    h.session.shutdown().unwrap();
    assert!(matches!(h.session.start(), Err(RelayError::ShutDown)));
}

#[test]
fn test_corrupt_checkpoint_is_rejected() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("last-changenumber.txt");
    fs::write(&path, "garbage").unwrap();

    let result = FeedSession::new(
        quick_session(),
        Arc::new(FakeUpstream::new()),
        Arc::new(BroadcastRegistry::new()),
        Enricher::placeholders(),
        Checkpoint::new(&path),
    );

    assert!(matches!(result, Err(RelayError::InvalidFormat(_))));
}
