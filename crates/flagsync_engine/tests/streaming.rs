//! End-to-end tests of a streaming context driven through the fake transport.

use flagsync_engine::{PushState, SyncError};
use flagsync_protocol::{ChangeCursor, StreamNotification};
use flagsync_testkit::prelude::*;
use std::time::Duration;

async fn connected() -> TestHarness {
    let harness = TestHarness::streaming();
    harness.remote.flags.push_batch(batch(-1, 100, [flag("a")]));
    harness.context.start().unwrap();
    settle().await;
    harness.client.open();
    settle().await;
    harness
}

#[tokio::test(start_paused = true)]
async fn streaming_replaces_polling_once_open() {
    init_tracing();
    let harness = TestHarness::streaming();
    harness.remote.flags.push_batch(batch(-1, 100, [flag("a")]));

    harness.context.start().unwrap();
    settle().await;

    assert_eq!(harness.remote.auth.call_count(), 1);
    assert_eq!(harness.client.connect_count(), 1);
    assert_eq!(harness.client.tokens(), vec!["token".to_string()]);
    assert_eq!(harness.context.push_state(), Some(PushState::Authenticating));
    assert!(!harness.context.is_polling());
    assert!(harness.context.readiness().is_ready());

    let calls = harness.remote.flags.call_count();
    harness.client.open();
    settle().await;

    assert_eq!(harness.context.push_state(), Some(PushState::Connected));
    assert!(!harness.context.is_polling());
    // Connecting triggers a catch-up sync.
    assert_eq!(harness.remote.flags.call_count(), calls + 1);

    harness.context.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn flags_update_notification_fetches_newer_changes() {
    let harness = connected().await;
    harness.remote.flags.push_batch(batch(100, 200, [flag("b")]));

    harness.client.send(StreamNotification::FlagsUpdate { change_number: 200 });
    settle().await;

    assert_eq!(harness.context.flags().till(), ChangeCursor::new(200));
    assert!(harness.context.flags().get("b").is_some());

    // A notification the store already covers does not fetch.
    let calls = harness.remote.flags.call_count();
    harness.client.send(StreamNotification::FlagsUpdate { change_number: 150 });
    settle().await;
    assert_eq!(harness.remote.flags.call_count(), calls);

    harness.context.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn flag_kill_applies_locally() {
    let harness = connected().await;

    harness.client.send(StreamNotification::FlagKill {
        split_name: "a".into(),
        default_treatment: "off".into(),
        change_number: 300,
    });
    settle().await;

    let killed = harness.context.flags().get("a").unwrap();
    assert!(killed.killed);
    assert_eq!(killed.default_treatment, "off");
    assert_eq!(killed.change_number, 300);
    // Kills do not move the cursor; the follow-up fetch found nothing newer.
    assert_eq!(harness.context.flags().till(), ChangeCursor::new(100));
    assert_eq!(
        harness.remote.flags.calls().last(),
        Some(&ChangeCursor::new(100))
    );

    harness.context.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn segments_update_notification_refetches_membership() {
    let harness = connected().await;
    harness.remote.segments.push_segments(["beta"]);

    harness.client.send(StreamNotification::SegmentsUpdate);
    settle().await;

    assert!(harness.context.segments().contains("beta"));

    harness.context.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn stream_failure_falls_back_to_polling_then_reconnects() {
    let harness = connected().await;

    harness.client.fail(true);
    settle().await;
    assert!(harness.context.is_polling());
    assert_eq!(harness.context.push_state(), Some(PushState::Disconnected));

    // Enabling polling twice keeps one schedule.
    harness.client.fail(true);
    settle().await;
    assert!(harness.context.is_polling());

    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(harness.client.connect_count(), 2);

    harness.client.open();
    settle().await;
    assert_eq!(harness.context.push_state(), Some(PushState::Connected));
    assert!(!harness.context.is_polling());

    harness.context.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn disabled_push_polls_until_streaming_is_granted() {
    let harness = TestHarness::streaming();
    harness.remote.auth.push_disabled();

    harness.context.start().unwrap();
    settle().await;

    assert_eq!(harness.client.connect_count(), 0);
    assert!(harness.context.is_polling());

    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(harness.remote.auth.call_count(), 2);
    assert_eq!(harness.client.connect_count(), 1);

    harness.client.open();
    settle().await;
    assert!(!harness.context.is_polling());

    harness.context.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_credentials_retry_with_backoff() {
    let harness = TestHarness::streaming();
    for _ in 0..2 {
        harness
            .remote
            .auth
            .push_outcome(Err(SyncError::Auth("invalid sdk key".into())));
    }

    harness.context.start().unwrap();
    settle().await;
    assert!(harness.context.is_polling());
    assert_eq!(harness.remote.auth.call_count(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(harness.remote.auth.call_count(), 2);
    assert_eq!(harness.client.connect_count(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(harness.remote.auth.call_count(), 3);
    assert_eq!(harness.client.connect_count(), 1);

    harness.context.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn background_closes_the_stream_and_foreground_reconnects() {
    let harness = connected().await;

    harness.context.on_background();
    settle().await;
    assert_eq!(harness.client.disconnect_count(), 1);

    harness.context.on_foreground();
    settle().await;
    assert_eq!(harness.client.connect_count(), 2);

    harness.context.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn destroy_closes_the_stream() {
    let harness = connected().await;

    harness.context.destroy().await;

    assert!(harness.client.disconnect_count() >= 1);
    assert_eq!(harness.context.push_state(), None);
    assert_eq!(harness.registry.total(), 0);
}
