//! Channel behavior against scripted workers.

mod common;

use std::time::Duration;

use common::{
    EXITING_WORKER, METHOD_ECHO_WORKER, NOISY_WORKER, REVERSING_WORKER, SILENT_WORKER, channel,
    project_with_worker, wait_until,
};
use mcp::{ChannelState, Error};
use serde_json::json;

#[tokio::test]
async fn responses_reach_their_own_callers_out_of_order() {
    let project = project_with_worker(REVERSING_WORKER);
    let channel = channel(&project, Duration::from_secs(10));

    let (alpha, beta) = tokio::join!(
        channel.send("alpha", json!({})),
        channel.send("beta", json!({})),
    );

    assert_eq!(alpha.unwrap(), json!("alpha"));
    assert_eq!(beta.unwrap(), json!("beta"));
    assert_eq!(channel.pending_len(), 0);
    channel.stop().await;
}

#[tokio::test]
async fn timed_out_requests_leave_no_pending_entries() {
    let project = project_with_worker(SILENT_WORKER);
    let channel = channel(&project, Duration::from_millis(150));

    let (a, b, c) = tokio::join!(
        channel.send("one", json!({})),
        channel.send("two", json!({})),
        channel.send("three", json!({})),
    );

    for (result, method) in [(a, "one"), (b, "two"), (c, "three")] {
        match result {
            Err(Error::RequestTimeout { method: m, .. }) => assert_eq!(m, method),
            other => panic!("expected timeout for {method}, got {other:?}"),
        }
    }
    assert_eq!(channel.pending_len(), 0);
    assert_eq!(channel.state(), ChannelState::Ready);
    channel.stop().await;
}

#[tokio::test]
async fn non_protocol_output_is_ignored() {
    let project = project_with_worker(NOISY_WORKER);
    let channel = channel(&project, Duration::from_secs(10));

    assert_eq!(channel.send("ping", json!({})).await.unwrap(), json!("ok"));
    assert_eq!(channel.send("ping", json!({})).await.unwrap(), json!("ok"));
    assert_eq!(channel.pending_len(), 0);
    channel.stop().await;
}

#[tokio::test]
async fn send_starts_the_worker_lazily() {
    let project = project_with_worker(METHOD_ECHO_WORKER);
    let channel = channel(&project, Duration::from_secs(10));
    assert_eq!(channel.state(), ChannelState::NotStarted);

    assert_eq!(channel.send("ping", json!({})).await.unwrap(), json!("ping"));
    assert_eq!(channel.state(), ChannelState::Ready);
    channel.stop().await;
    assert_eq!(channel.state(), ChannelState::Stopped);
}

#[tokio::test]
async fn stop_rejects_pending_and_restart_works() {
    let project = project_with_worker(METHOD_ECHO_WORKER);
    let channel = channel(&project, Duration::from_secs(30));
    channel.start().await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let channel = channel.clone();
        tasks.push(tokio::spawn(async move { channel.send("hang", json!({})).await }));
    }
    assert!(wait_until(|| channel.pending_len() == 3).await);

    channel.stop().await;
    for task in tasks {
        let result = task.await.unwrap();
        assert!(
            matches!(result, Err(Error::Stopped) | Err(Error::ProcessExited(_))),
            "unexpected outcome: {result:?}"
        );
    }
    assert_eq!(channel.pending_len(), 0);

    channel.start().await.unwrap();
    assert_eq!(channel.send("ping", json!({})).await.unwrap(), json!("ping"));
    channel.stop().await;
}

#[tokio::test]
async fn unexpected_exit_requires_explicit_restart() {
    let project = project_with_worker(METHOD_ECHO_WORKER);
    let channel = channel(&project, Duration::from_secs(10));

    match channel.send("exit", json!({})).await {
        Err(Error::ProcessExited(info)) => assert_eq!(info.code, Some(7)),
        other => panic!("expected ProcessExited, got {other:?}"),
    }
    assert!(matches!(channel.state(), ChannelState::Errored(_)));
    assert!(matches!(
        channel.send("ping", json!({})).await,
        Err(Error::ProcessExited(_))
    ));

    channel.start().await.unwrap();
    assert_eq!(channel.state(), ChannelState::Ready);
    assert_eq!(channel.send("ping", json!({})).await.unwrap(), json!("ping"));
    channel.stop().await;
}

#[tokio::test]
async fn missing_config_is_fatal() {
    let project = tempfile::tempdir().unwrap();
    let channel = mcp::Channel::new(mcp::Supervisor::new(project.path()));

    let err = channel.send("ping", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::ProcessUnavailable(_)));
    assert!(err.is_fatal());
    assert_eq!(channel.state(), ChannelState::NotStarted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn old_worker_exit_does_not_affect_its_replacement() {
    let project = project_with_worker(METHOD_ECHO_WORKER);
    let channel = channel(&project, Duration::from_secs(10));

    for round in 0..25 {
        channel.start().await.unwrap();
        channel.stop().await;
        channel.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;

        let reply = channel.send("ping", json!({})).await;
        assert_eq!(reply.unwrap(), json!("ping"), "round {round}");
        assert_eq!(channel.state(), ChannelState::Ready, "round {round}");
    }
    channel.stop().await;
}

#[tokio::test]
async fn stop_after_unexpected_exit() {
    let project = project_with_worker(METHOD_ECHO_WORKER);
    let channel = channel(&project, Duration::from_secs(10));

    assert!(matches!(
        channel.send("exit", json!({})).await,
        Err(Error::ProcessExited(_))
    ));
    assert!(wait_until(|| matches!(channel.state(), ChannelState::Errored(_))).await);

    let started = std::time::Instant::now();
    channel.stop().await;
    assert!(started.elapsed() < mcp::STOP_GRACE_PERIOD);
    assert_eq!(channel.state(), ChannelState::Stopped);

    assert_eq!(channel.send("ping", json!({})).await.unwrap(), json!("ping"));
    channel.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn writes_to_a_dead_worker_report_its_exit() {
    let project = project_with_worker(EXITING_WORKER);
    let channel = channel(&project, Duration::from_secs(10));

    for round in 0..20 {
        channel.start().await.unwrap();
        match channel.send("ping", json!({})).await {
            Err(Error::ProcessExited(info)) => assert_eq!(info.code, Some(5), "round {round}"),
            other => panic!("round {round}: expected ProcessExited, got {other:?}"),
        }
    }
    channel.stop().await;
}
