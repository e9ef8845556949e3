//! End-to-end tests: daemon dispatch over a real Unix socket.

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use telegram_mcp::daemon::launcher::{ensure_daemon, is_daemon_running};
use telegram_mcp::error::TelegramMcpError;
use telegram_mcp::ipc::client::IpcClient;
use telegram_mcp::storage::queue::SessionStore;

async fn start_daemon(project_root: &Path, socket_path: &Path) -> tokio::task::JoinHandle<()> {
    let project_root = project_root.to_path_buf();
    let socket_path = socket_path.to_path_buf();
    let wait_path = socket_path.clone();
    let handle = tokio::spawn(async move {
        let _ = telegram_mcp::daemon::run(&project_root, &socket_path).await;
    });

    // Wait for the socket to appear, as the launcher does.
    for _ in 0..50 {
        if wait_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    handle
}

// ---------------------------------------------------------------------------
// Full relay flow over the socket
// ---------------------------------------------------------------------------

#[tokio::test]
async fn register_ask_answer_check_mark_flow() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("daemon.sock");
    let daemon = start_daemon(tmp.path(), &socket_path).await;

    let client = IpcClient::connect(&socket_path).await.unwrap();

    // Register a session for this connection.
    let session = client
        .request(
            "register_session",
            json!({ "project_root": tmp.path().display().to_string() }),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    let session_id = session["id"].as_str().unwrap().to_string();
    assert!(!session["label"].as_str().unwrap().is_empty());

    // Ask a blocking question.
    let asked = client
        .request(
            "ask_blocking_question",
            json!({ "question": "Proceed with migration?" }),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(asked["status"], "pending");
    let question_id = asked["question_id"].as_str().unwrap().to_string();

    // No answer yet: immediate check comes back empty.
    let unanswered = client
        .request(
            "check_question_answers",
            json!({ "wait_seconds": 0 }),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(unanswered["answers"].as_array().unwrap().len(), 0);
    assert_eq!(unanswered["pending_count"], 1);

    // The out-of-band answer-writer updates the same log the daemon reads.
    let store = SessionStore::new(tmp.path());
    store
        .record_answer(&session_id, &question_id, "yes")
        .await
        .unwrap();

    let answered = client
        .request(
            "check_question_answers",
            json!({ "question_ids": [question_id], "wait_seconds": 10 }),
            Duration::from_secs(15),
        )
        .await
        .unwrap();
    let answers = answered["answers"].as_array().unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["question"], "Proceed with migration?");
    assert_eq!(answers[0]["answer"], "yes");
    assert_eq!(answered["pending_count"], 0);

    // Confirm receipt.
    let marked = client
        .request(
            "mark_question_answered",
            json!({ "question_id": answers[0]["question_id"] }),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(marked["success"], true);
    assert!(marked["archived_to"]
        .as_str()
        .unwrap()
        .ends_with(&format!("{session_id}.jsonl")));

    let unregistered = client
        .request("unregister_session", Value::Null, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(unregistered["success"], true);

    daemon.abort();
}

#[tokio::test]
async fn relay_methods_require_a_registered_session() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("daemon.sock");
    let daemon = start_daemon(tmp.path(), &socket_path).await;

    let client = IpcClient::connect(&socket_path).await.unwrap();
    let result = client
        .request(
            "ask_blocking_question",
            json!({ "question": "who am I?" }),
            Duration::from_secs(5),
        )
        .await;

    match result {
        Err(TelegramMcpError::Daemon { code, .. }) => {
            assert_eq!(code.as_deref(), Some("NO_SESSION"));
        }
        other => panic!("expected daemon error, got {:?}", other.map(|_| ())),
    }

    daemon.abort();
}

#[tokio::test]
async fn validation_errors_carry_their_code() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("daemon.sock");
    let daemon = start_daemon(tmp.path(), &socket_path).await;

    let client = IpcClient::connect(&socket_path).await.unwrap();
    client
        .request(
            "register_session",
            json!({ "project_root": tmp.path().display().to_string() }),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    let empty_question = client
        .request(
            "ask_blocking_question",
            json!({ "question": "   " }),
            Duration::from_secs(5),
        )
        .await;
    match empty_question {
        Err(TelegramMcpError::Daemon { message, code }) => {
            assert_eq!(code.as_deref(), Some("INVALID_INPUT"));
            assert!(message.contains("question"));
        }
        other => panic!("expected daemon error, got {:?}", other.map(|_| ())),
    }

    let unknown = client
        .request("frobnicate", Value::Null, Duration::from_secs(5))
        .await;
    match unknown {
        Err(TelegramMcpError::Daemon { code, .. }) => {
            assert_eq!(code.as_deref(), Some("METHOD_NOT_FOUND"));
        }
        other => panic!("expected daemon error, got {:?}", other.map(|_| ())),
    }

    daemon.abort();
}

// ---------------------------------------------------------------------------
// Launcher probes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn is_daemon_running_reflects_socket_state() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("probe.sock");

    assert!(!is_daemon_running(&socket_path).await);

    let daemon = start_daemon(tmp.path(), &socket_path).await;
    assert!(is_daemon_running(&socket_path).await);

    daemon.abort();
}

#[tokio::test]
async fn ensure_daemon_is_idempotent_when_warm() {
    let tmp = TempDir::new().unwrap();
    let socket_path = tmp.path().join("warm.sock");
    let daemon = start_daemon(tmp.path(), &socket_path).await;

    // With a daemon already listening, ensure must probe and return without
    // spawning anything; twice in a row.
    ensure_daemon(&socket_path, tmp.path()).await.unwrap();
    ensure_daemon(&socket_path, tmp.path()).await.unwrap();
    assert!(is_daemon_running(&socket_path).await);

    daemon.abort();
}
