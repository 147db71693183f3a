//! Handshake, discovery and facade calls against a scripted tool worker.

mod common;

use std::time::Duration;

use common::{TOOL_WORKER, channel, project_with_worker};
use mcp::Error;
use serde_json::json;

#[tokio::test]
async fn handshake_and_listing() {
    let project = project_with_worker(TOOL_WORKER);
    let channel = channel(&project, Duration::from_secs(10));

    let init = mcp::initialize(&channel).await.unwrap();
    assert_eq!(init.server_info.unwrap().name, "fake-worker");

    let first = mcp::list_tools(&channel).await.unwrap();
    let second = mcp::list_tools(&channel).await.unwrap();
    assert_eq!(first, second);

    let names: Vec<_> = first.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "fail", "flagged"]);
    assert_eq!(first[0].description.as_deref(), Some("Echo arguments"));
    channel.stop().await;
}

#[tokio::test]
async fn facade_calls_tools_by_name() {
    let project = project_with_worker(TOOL_WORKER);
    let channel = channel(&project, Duration::from_secs(10));
    mcp::initialize(&channel).await.unwrap();
    let facade = mcp::build_facade(&channel, mcp::list_tools(&channel).await.unwrap());

    let echoed = facade.invoke("echo", json!({"text": "hi"})).await.unwrap();
    assert_eq!(echoed, json!({"text": "hi"}));

    let err = facade.invoke("fail", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Remote(_)));
    assert_eq!(err.to_string(), "tool exploded");

    let err = facade.invoke("flagged", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::ToolCallFailed(ref text) if text == "flagged failure"));

    let err = facade.invoke("nope", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::ToolNotFound(_)));
    channel.stop().await;
}

#[tokio::test]
async fn handshake_failure_propagates() {
    let project = project_with_worker(common::METHOD_ECHO_WORKER);
    let channel = channel(&project, Duration::from_secs(10));

    // The echo worker answers `initialize` with a bare string.
    let err = mcp::initialize(&channel).await.unwrap_err();
    assert!(matches!(err, Error::InvalidResponse(_)));
    channel.stop().await;
}
