use chrono::{Duration, Utc};
use phisherman::audit::{AuditLog, rotated_path};
use phisherman::bank::QuestionBank;
use phisherman::config::PhishermanConfig;
use phisherman::gateway::protocol::{Connection, ServerEvent, handle_frame};
use phisherman::gateway::server::AppState;
use phisherman::store::{ManualClock, SessionStore, StoreSettings};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

fn read_records(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn events(records: &[Value]) -> Vec<&str> {
    records
        .iter()
        .map(|r| r["event"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn records_are_ndjson_with_pii_removed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("sessions.log");
    let (log, writer) = AuditLog::spawn(&path, 1024 * 1024);

    log.record(
        "s1",
        "session_created",
        json!({"topic": "suspicious_link", "userId": "alice", "email": "a@example.com"}),
    );
    log.record("s1", "answer", json!({"qid": "q0", "correct": true, "delta": 10}));
    drop(log);
    writer.await.unwrap();

    let records = read_records(&path);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["session_id"], "s1");
    assert_eq!(records[0]["event"], "session_created");
    assert_eq!(records[0]["data"], json!({"topic": "suspicious_link"}));
    assert!(
        chrono::DateTime::parse_from_rfc3339(records[0]["timestamp"].as_str().unwrap()).is_ok()
    );
    assert_eq!(records[1]["data"]["delta"], 10);
}

#[tokio::test]
async fn oversized_log_rotates_to_single_old_generation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.log");
    let (log, writer) = AuditLog::spawn(&path, 200);

    for i in 0..20 {
        log.record(&format!("s{i}"), "join", json!({"topic": "abnormal_email"}));
    }
    drop(log);
    writer.await.unwrap();

    let old = rotated_path(&path);
    assert!(old.exists());
    assert!(std::fs::metadata(&path).unwrap().len() <= 400);
    assert!(!dir.path().join("sessions.log.old.old").exists());

    let last = read_records(&path);
    assert_eq!(last.last().unwrap()["session_id"], "s19");
}

#[tokio::test]
async fn clones_share_one_writer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.log");
    let (log, writer) = AuditLog::spawn(&path, 1024 * 1024);
    let other = log.clone();

    log.record("a", "join", json!({}));
    other.record("b", "join", json!({}));
    drop(log);
    drop(other);
    writer.await.unwrap();

    assert_eq!(read_records(&path).len(), 2);
}

#[tokio::test]
async fn record_returns_before_anything_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slow").join("sessions.log");
    let (log, writer) = AuditLog::spawn(&path, 1024 * 1024);

    // Enqueueing never touches the filesystem on the calling task.
    for i in 0..500 {
        log.record(&format!("s{i}"), "join", json!({}));
    }
    drop(log);
    writer.await.unwrap();

    assert_eq!(read_records(&path).len(), 500);
}

fn state_with_audit(log: AuditLog, clock: Arc<ManualClock>) -> Arc<AppState> {
    let config = PhishermanConfig::default();
    let bank = Arc::new(QuestionBank::builtin());
    let store = SessionStore::with_clock(
        Arc::clone(&bank),
        StoreSettings::from(&config.quiz),
        clock,
    );
    Arc::new(AppState::with_parts(config, None, bank, store, log))
}

async fn join_session(
    state: &Arc<AppState>,
    conn: &Connection,
    rx: &mut mpsc::Receiver<ServerEvent>,
) -> String {
    handle_frame(
        r#"{"event":"quiz:join","data":{"userId":"alice","topic":"suspicious_link"}}"#,
        conn,
        state,
    )
    .await;
    match rx.recv().await.unwrap() {
        ServerEvent::Init { session_id, .. } => session_id,
        other => panic!("expected init, got {other:?}"),
    }
}

#[tokio::test]
async fn quiz_flow_writes_lifecycle_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.log");
    let (log, writer) = AuditLog::spawn(&path, 1024 * 1024);
    let state = state_with_audit(log, Arc::new(ManualClock::new(Utc::now())));

    let (tx, mut rx) = mpsc::channel(64);
    let conn = Connection::new("c1", tx);

    let session_id = join_session(&state, &conn, &mut rx).await;
    handle_frame(
        &json!({"event": "quiz:answer", "data": {"sessionId": session_id, "qid": "q0", "choiceIndex": 0}})
            .to_string(),
        &conn,
        &state,
    )
    .await;

    drop(state);
    writer.await.unwrap();

    let records = read_records(&path);
    assert_eq!(
        events(&records),
        vec!["session_created", "join", "question_sent", "answer"]
    );
    assert!(records.iter().all(|r| r["session_id"] == session_id.as_str()));

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("alice"));
}

#[tokio::test]
async fn expiry_noticed_by_an_answer_is_audited_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.log");
    let (log, writer) = AuditLog::spawn(&path, 1024 * 1024);
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let state = state_with_audit(log, Arc::clone(&clock));

    let (tx, mut rx) = mpsc::channel(64);
    let conn = Connection::new("c1", tx);
    let session_id = join_session(&state, &conn, &mut rx).await;

    clock.advance(Duration::hours(3));
    handle_frame(
        &json!({"event": "quiz:answer", "data": {"sessionId": session_id, "qid": "q0", "choiceIndex": 0}})
            .to_string(),
        &conn,
        &state,
    )
    .await;
    assert!(state.store.lock().await.drain_evicted().is_empty());

    drop(state);
    writer.await.unwrap();

    let records = read_records(&path);
    let expired = records.last().unwrap();
    assert_eq!(expired["event"], "session_expired");
    assert_eq!(expired["session_id"], session_id.as_str());
}

#[tokio::test]
async fn expiry_noticed_by_a_lesson_request_is_audited() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.log");
    let (log, writer) = AuditLog::spawn(&path, 1024 * 1024);
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let state = state_with_audit(log, Arc::clone(&clock));

    let (tx, mut rx) = mpsc::channel(64);
    let conn = Connection::new("c1", tx);
    let session_id = join_session(&state, &conn, &mut rx).await;

    clock.advance(Duration::hours(3));
    handle_frame(
        &json!({"event": "quiz:lesson", "data": {"topic": "suspicious_link", "sessionId": session_id}})
            .to_string(),
        &conn,
        &state,
    )
    .await;
    assert!(state.store.lock().await.drain_evicted().is_empty());

    drop(state);
    writer.await.unwrap();

    assert!(events(&read_records(&path)).contains(&"session_expired"));
}
