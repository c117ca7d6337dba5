//! Client ↔ agent protocol integration tests

use std::time::Duration;

use deploy_runner::client::{DESC_MARKER, RUN_MARKER};
use deploy_runner::{AgentClient, HostEndpoint};

mod common;

#[tokio::test]
async fn request_sanitizes_and_mints_distinct_slots() {
    let agent = common::spawn_agent().await;
    let mut client = AgentClient::new(agent.endpoint.clone()).expect("client");

    let first = client.request_slot("My Build!").await.expect("request");
    assert!(first.starts_with("My_Build!-"), "got {first}");
    assert_eq!(client.last_slot(), first);
    assert!(agent.data.path().join(&first).is_dir());

    let second = client.request_slot("My Build!").await.expect("request");
    assert_ne!(first, second);
    assert_eq!(client.last_slot(), second);
}

#[tokio::test]
async fn failed_request_keeps_last_slot() {
    let agent = common::spawn_agent().await;
    let mut client = AgentClient::new(agent.endpoint.clone()).expect("client");

    let slot = client.request_slot("game").await.expect("request");
    // Sanitizes to underscores only, which the agent refuses.
    assert!(client.request_slot("///").await.is_err());
    assert_eq!(client.last_slot(), slot);
}

#[tokio::test]
async fn list_reflects_reserved_slots() {
    let agent = common::spawn_agent().await;
    let mut client = AgentClient::new(agent.endpoint.clone()).expect("client");

    assert!(client.list_slots().await.expect("list").is_empty());

    let a = client.request_slot("alpha").await.expect("request");
    let b = client.request_slot("bravo").await.expect("request");

    let slots = client.list_slots().await.expect("list");
    assert_eq!(slots, vec![a, b]);
}

#[tokio::test]
async fn description_is_empty_until_marker_exists() {
    let agent = common::spawn_agent().await;
    let mut client = AgentClient::new(agent.endpoint.clone()).expect("client");
    let slot = client.request_slot("game").await.expect("request");

    assert_eq!(client.slot_description(&slot).await.expect("desc"), "");

    std::fs::write(agent.data.path().join(&slot).join(DESC_MARKER), "nightly\n")
        .expect("write marker");
    assert_eq!(client.slot_description(&slot).await.expect("desc"), "nightly");
}

#[tokio::test]
async fn delete_succeeds_once_then_fails() {
    let agent = common::spawn_agent().await;
    let mut client = AgentClient::new(agent.endpoint.clone()).expect("client");
    let slot = client.request_slot("game").await.expect("request");

    client.delete_slot(&slot).await.expect("delete");
    assert!(!agent.data.path().join(&slot).exists());
    assert!(client.delete_slot(&slot).await.is_err());
}

#[tokio::test]
async fn traversal_slot_ids_are_refused() {
    let agent = common::spawn_agent().await;
    let client = AgentClient::new(agent.endpoint.clone()).expect("client");

    assert!(client.delete_slot("../outside").await.is_err());
    assert!(client.run_slot(Some("../outside")).await.is_err());
}

#[tokio::test]
async fn run_without_marker_is_an_error() {
    let agent = common::spawn_agent().await;
    let mut client = AgentClient::new(agent.endpoint.clone()).expect("client");
    let slot = client.request_slot("game").await.expect("request");

    assert!(client.run_slot(Some(&slot)).await.is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn run_poll_kill_lifecycle() {
    let agent = common::spawn_agent().await;
    let mut client = AgentClient::new(agent.endpoint.clone()).expect("client");
    let slot = client.request_slot("lifecycle").await.expect("request");

    let slot_dir = agent.data.path().join(&slot);
    std::fs::write(slot_dir.join("loop.sh"), "#!/bin/sh\nsleep 30\n").expect("write script");
    std::fs::write(slot_dir.join(RUN_MARKER), "loop.sh\n").expect("write marker");

    client.run_slot(Some(&slot)).await.expect("run");

    let running = client.refresh_running_state().await.expect("poll");
    assert!(running.running);
    assert_eq!(running.executable, "loop.sh");
    assert!(running.pid > 0);

    // The tracked process is a singleton; a second run is refused.
    assert!(client.run_slot(Some(&slot)).await.is_err());

    client.kill_running_process().await.expect("kill");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let idle = client.refresh_running_state().await.expect("poll");
    assert!(!idle.running);
    assert_eq!(idle.executable, "");
    assert_eq!(idle.pid, -1);
}

#[tokio::test]
async fn info_marks_host_reachable() {
    let agent = common::spawn_agent().await;
    let mut client = AgentClient::new(agent.endpoint.clone()).expect("client");
    assert!(!client.host_status().reachable);

    let status = client.refresh_host_status().await.expect("info");
    assert!(status.reachable);
    assert_eq!(status.host_name, status.host_name.to_uppercase());
    assert_eq!(status.os, std::env::consts::OS);
}

#[tokio::test]
async fn unreachable_host_fails_with_transport_error() {
    // Reserved TEST-NET-1 address; nothing listens there.
    let mut endpoint = HostEndpoint::new("192.0.2.1");
    endpoint.http_port = 9;
    let mut client = AgentClient::new(endpoint).expect("client");
    client.default_timeout = Duration::from_millis(200);

    let error = client.refresh_host_status().await.expect_err("must fail");
    assert!(error.is_transport(), "got {error}");
    assert!(!client.host_status().reachable);

    let error = client.run_slot(Some("anything")).await.expect_err("must fail");
    assert!(error.is_transport(), "got {error}");
}

#[tokio::test]
async fn run_accepts_only_exact_ok_bang() {
    for body in ["OK", "", "ERROR: busy"] {
        let scripted = common::spawn_scripted(body).await;
        let client = AgentClient::new(scripted.endpoint.clone()).expect("client");
        assert!(
            client.run_slot(Some("slot")).await.is_err(),
            "body {body:?} must not count as success"
        );
    }

    let scripted = common::spawn_scripted("OK!").await;
    let client = AgentClient::new(scripted.endpoint.clone()).expect("client");
    client.run_slot(Some("slot")).await.expect("exact OK!");
}

#[tokio::test]
async fn delete_accepts_only_exact_ok() {
    for body in ["OK!", "", "ERROR"] {
        let scripted = common::spawn_scripted(body).await;
        let client = AgentClient::new(scripted.endpoint.clone()).expect("client");
        assert!(
            client.delete_slot("slot").await.is_err(),
            "body {body:?} must not count as success"
        );
    }

    let scripted = common::spawn_scripted("OK").await;
    let client = AgentClient::new(scripted.endpoint.clone()).expect("client");
    client.delete_slot("slot").await.expect("exact OK");
}

#[tokio::test]
async fn list_drops_empty_entries_and_preserves_order() {
    let scripted = common::spawn_scripted("a\n\nb\n").await;
    let client = AgentClient::new(scripted.endpoint.clone()).expect("client");
    assert_eq!(client.list_slots().await.expect("list"), vec!["a", "b"]);
}

#[tokio::test]
async fn running_state_parses_scripted_bodies() {
    let scripted = common::spawn_scripted("app.exe\n4821").await;
    let mut client = AgentClient::new(scripted.endpoint.clone()).expect("client");
    let info = client.refresh_running_state().await.expect("poll");
    assert!(info.running);
    assert_eq!(info.executable, "app.exe");
    assert_eq!(info.pid, 4821);

    let scripted = common::spawn_scripted("No running process").await;
    let mut client = AgentClient::new(scripted.endpoint.clone()).expect("client");
    let info = client.refresh_running_state().await.expect("poll");
    assert!(!info.running);
    assert_eq!(info.pid, -1);
}

#[tokio::test]
async fn running_state_parse_failure_resets_sentinels() {
    let scripted = common::spawn_scripted("app.exe\nnot-a-pid").await;
    let mut client = AgentClient::new(scripted.endpoint.clone()).expect("client");

    assert!(client.refresh_running_state().await.is_err());
    let cached = client.running_info();
    assert!(!cached.running);
    assert_eq!(cached.executable, "");
    assert_eq!(cached.pid, -1);
}

#[tokio::test]
async fn malformed_info_body_resets_reachable() {
    let agent = common::spawn_agent().await;
    let mut client = AgentClient::new(agent.endpoint.clone()).expect("client");
    client.refresh_host_status().await.expect("info");
    assert!(client.host_status().reachable);
    drop(agent);

    let scripted = common::spawn_scripted("only\ntwo-lines").await;
    let mut client2 = AgentClient::new(scripted.endpoint.clone()).expect("client");
    assert!(client2.refresh_host_status().await.is_err());
    assert!(!client2.host_status().reachable);
}
