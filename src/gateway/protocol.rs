use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use super::lesson;
use super::rooms::Outbox;
use super::server::AppState;
use crate::store::{Advance, CompletionSummary, JoinOutcome, StoreError};

/// Inbound frame envelope: `{"event": "quiz:join", "data": {...}}`.
#[derive(Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Missing or null `userId` joins as `anonymous`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinParams {
    pub user_id: Option<String>,
    pub topic: Option<String>,
    pub session_id: Option<String>,
}

/// `qid` may be omitted by older clients; the last sent question is used then.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerParams {
    pub session_id: String,
    pub qid: Option<String>,
    pub choice_index: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonParams {
    pub topic: String,
    pub session_id: Option<String>,
}

/// A validated client event.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Join(JoinParams),
    Answer(AnswerParams),
    Next(SessionRef),
    Leave(SessionRef),
    Lesson(LessonParams),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(serde_json::Error),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("invalid {event} payload: {source}")]
    InvalidPayload {
        event: &'static str,
        source: serde_json::Error,
    },
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: InboundFrame = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        let data = match frame.data {
            serde_json::Value::Null => json!({}),
            other => other,
        };

        match frame.event.as_str() {
            "quiz:join" => payload("quiz:join", data).map(Self::Join),
            "quiz:answer" => payload("quiz:answer", data).map(Self::Answer),
            "quiz:next" => payload("quiz:next", data).map(Self::Next),
            "quiz:leave" => payload("quiz:leave", data).map(Self::Leave),
            "quiz:lesson" => payload("quiz:lesson", data).map(Self::Lesson),
            _ => Err(ProtocolError::UnknownEvent(frame.event)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "quiz:join",
            Self::Answer(_) => "quiz:answer",
            Self::Next(_) => "quiz:next",
            Self::Leave(_) => "quiz:leave",
            Self::Lesson(_) => "quiz:lesson",
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    event: &'static str,
    data: serde_json::Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidPayload { event, source })
}

/// Outbound event. Wire format: `{"event": "quiz:question", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connected")]
    Connected { namespace: String, sid: String },

    #[serde(rename = "quiz:init", rename_all = "camelCase")]
    Init {
        session_id: String,
        user_id: String,
        topic: String,
        total_questions: usize,
    },

    /// `answer_index` is disclosed for instant client-side feedback; the
    /// score the server reports is always computed server-side.
    #[serde(rename = "quiz:question")]
    Question {
        qid: String,
        index: usize,
        text: String,
        options: Vec<String>,
        answer_index: usize,
        seconds: Option<u32>,
    },

    #[serde(rename = "quiz:score:update")]
    ScoreUpdate {
        qid: String,
        correct: bool,
        delta: i64,
        total: i64,
    },

    #[serde(rename = "quiz:complete")]
    Complete(CompletionSummary),

    #[serde(rename = "quiz:lesson", rename_all = "camelCase")]
    Lesson {
        topic: String,
        title: String,
        total_bullets: usize,
    },

    #[serde(rename = "quiz:lesson:bullet")]
    LessonBullet {
        topic: String,
        index: usize,
        text: String,
    },

    #[serde(rename = "quiz:lesson:done")]
    LessonDone { topic: String },

    #[serde(rename = "quiz:error")]
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// The caller side of one client connection.
pub struct Connection {
    pub id: String,
    pub outbox: Outbox,
}

impl Connection {
    pub fn new(id: impl Into<String>, outbox: Outbox) -> Self {
        Self {
            id: id.into(),
            outbox,
        }
    }

    async fn emit(&self, event: ServerEvent) {
        if self.outbox.send(event).await.is_err() {
            debug!(conn = %self.id, "outbox closed, dropping event");
        }
    }
}

/// Handle one inbound text frame.
///
/// Never fails: bad input, business rejections and internal faults all
/// become a `quiz:error` for the calling connection only.
pub async fn handle_frame(text: &str, conn: &Connection, state: &Arc<AppState>) {
    let event = match ClientEvent::parse(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(conn = %conn.id, "rejected frame: {e}");
            conn.emit(ServerEvent::error(e.to_string())).await;
            return;
        }
    };

    let name = event.name();
    let outcome = AssertUnwindSafe(dispatch(event, conn, state))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(conn = %conn.id, event = name, "handler failed: {e:#}");
            conn.emit(ServerEvent::error("Internal error")).await;
        }
        Err(_) => {
            error!(conn = %conn.id, event = name, "handler panicked");
            conn.emit(ServerEvent::error("Internal error")).await;
        }
    }
}

/// Route a validated event to its handler.
pub async fn dispatch(
    event: ClientEvent,
    conn: &Connection,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    match event {
        ClientEvent::Join(params) => on_join(params, conn, state).await,
        ClientEvent::Answer(params) => on_answer(params, conn, state).await,
        ClientEvent::Next(params) => on_next(&params.session_id, conn, state).await,
        ClientEvent::Leave(params) => on_leave(&params.session_id, conn, state).await,
        ClientEvent::Lesson(params) => on_lesson(params, conn, state).await,
    }
}

async fn on_join(params: JoinParams, conn: &Connection, state: &Arc<AppState>) -> anyhow::Result<()> {
    let user_id = params.user_id.unwrap_or_else(|| "anonymous".into());
    let topic = params
        .topic
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| state.config.quiz.default_topic.clone());

    let (outcome, session_id, total_questions, has_remaining, evicted) = {
        let mut store = state.store.lock().await;
        let (outcome, session) =
            store.create_or_resume(&user_id, &topic, params.session_id.as_deref());
        let (session_id, total, remaining) = (
            session.session_id.clone(),
            session.total_questions(),
            session.has_remaining(),
        );
        (outcome, session_id, total, remaining, store.drain_evicted())
    };
    audit_evicted(state, &evicted);

    if outcome == JoinOutcome::Created {
        state.audit.record(
            &session_id,
            "session_created",
            json!({ "topic": topic, "question_count": total_questions }),
        );
    }

    state
        .rooms
        .write()
        .await
        .join(&session_id, &conn.id, conn.outbox.clone());

    conn.emit(ServerEvent::Init {
        session_id: session_id.clone(),
        user_id,
        topic: topic.clone(),
        total_questions,
    })
    .await;

    info!(session_id = %session_id, conn = %conn.id, ?outcome, "client joined quiz");
    state
        .audit
        .record(&session_id, "join", json!({ "topic": topic }));

    if has_remaining {
        on_next(&session_id, conn, state).await?;
    }
    Ok(())
}

async fn on_answer(
    params: AnswerParams,
    conn: &Connection,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    let (result, evicted) = {
        let mut store = state.store.lock().await;
        let result =
            store.record_answer(&params.session_id, params.qid.as_deref(), params.choice_index);
        (result, store.drain_evicted())
    };
    audit_evicted(state, &evicted);

    let scored = match result {
        Ok(scored) => scored,
        Err(StoreError::DuplicateAnswer(qid)) => {
            warn!(session_id = %params.session_id, qid = %qid, "duplicate answer ignored");
            return Ok(());
        }
        Err(e) => {
            warn!(session_id = %params.session_id, "quiz:answer rejected: {e}");
            conn.emit(ServerEvent::error(e.to_string())).await;
            return Ok(());
        }
    };

    info!(
        session_id = %params.session_id,
        qid = %scored.qid,
        correct = scored.correct,
        total = scored.running_total,
        "answer scored"
    );

    broadcast(
        state,
        &params.session_id,
        conn,
        ServerEvent::ScoreUpdate {
            qid: scored.qid.clone(),
            correct: scored.correct,
            delta: scored.delta,
            total: scored.running_total,
        },
    )
    .await;

    state.audit.record(
        &params.session_id,
        "answer",
        json!({ "qid": scored.qid, "correct": scored.correct, "delta": scored.delta }),
    );
    Ok(())
}

enum NextStep {
    Question(crate::store::SessionQuestion),
    Complete {
        summary: CompletionSummary,
        first_time: bool,
    },
    Rejected(StoreError),
}

async fn on_next(session_id: &str, conn: &Connection, state: &Arc<AppState>) -> anyhow::Result<()> {
    let (step, evicted) = {
        let mut store = state.store.lock().await;
        let step = match store.advance(session_id) {
            Ok(Advance::Question(question)) => NextStep::Question(question),
            Ok(Advance::Exhausted { first_time }) => {
                let summary = store
                    .get(session_id)
                    .map(|s| s.summary())
                    .ok_or_else(|| anyhow::anyhow!("session {session_id} vanished after advance"))?;
                NextStep::Complete {
                    summary,
                    first_time,
                }
            }
            Err(e) => NextStep::Rejected(e),
        };
        (step, store.drain_evicted())
    };
    audit_evicted(state, &evicted);

    match step {
        NextStep::Question(q) => {
            debug!(session_id, qid = %q.qid, index = q.index, "sending question");
            let (qid, index) = (q.qid.clone(), q.index);
            broadcast(
                state,
                session_id,
                conn,
                ServerEvent::Question {
                    qid: q.qid,
                    index: q.index,
                    text: q.question.text,
                    options: q.question.options,
                    answer_index: q.question.answer_index,
                    seconds: None,
                },
            )
            .await;
            state
                .audit
                .record(session_id, "question_sent", json!({ "qid": qid, "index": index }));
        }
        NextStep::Complete {
            summary,
            first_time,
        } => {
            if first_time {
                info!(session_id, total = summary.total, "quiz complete");
                state.audit.record(
                    session_id,
                    "complete",
                    json!({
                        "total": summary.total,
                        "correct_count": summary.correct_count,
                        "wrong_count": summary.wrong_count,
                    }),
                );
            }
            conn.emit(ServerEvent::Complete(summary)).await;
        }
        NextStep::Rejected(e) => {
            warn!(session_id, "quiz:next rejected: {e}");
            conn.emit(ServerEvent::error(e.to_string())).await;
        }
    }
    Ok(())
}

async fn on_leave(session_id: &str, conn: &Connection, state: &Arc<AppState>) -> anyhow::Result<()> {
    let left = state.rooms.write().await.leave(session_id, &conn.id);
    info!(session_id, conn = %conn.id, left, "client left quiz");
    Ok(())
}

async fn on_lesson(
    params: LessonParams,
    conn: &Connection,
    state: &Arc<AppState>,
) -> anyhow::Result<()> {
    let Some(topic) = state.bank.get_topic(&params.topic) else {
        conn.emit(ServerEvent::error("Unknown topic")).await;
        return Ok(());
    };

    let live_session = match params.session_id.as_deref() {
        Some(id) => {
            let (live, evicted) = {
                let mut store = state.store.lock().await;
                let live = store.get(id).is_some();
                (live, store.drain_evicted())
            };
            audit_evicted(state, &evicted);
            live.then_some(id)
        }
        None => None,
    };

    let recipients = match live_session {
        Some(id) => {
            let mut members: Vec<Outbox> = state
                .rooms
                .read()
                .await
                .members(id)
                .into_iter()
                .map(|(_, outbox)| outbox)
                .collect();
            if members.is_empty() {
                members.push(conn.outbox.clone());
            }
            members
        }
        None => vec![conn.outbox.clone()],
    };

    info!(topic = %topic.id, recipients = recipients.len(), "starting paced lesson");
    lesson::spawn_lesson(
        topic,
        recipients,
        Duration::from_millis(state.config.quiz.lesson_pace_ms),
    );
    Ok(())
}

/// Deliver to the session group, and to the caller even when it never joined.
///
/// Only the caller's own outbox is awaited. Other members get `try_send`; a
/// member whose outbox is full or closed is dropped from the group so one
/// stalled client cannot hold up the rest.
async fn broadcast(state: &Arc<AppState>, room: &str, conn: &Connection, event: ServerEvent) {
    let members = state.rooms.read().await.members(room);
    let mut stalled = Vec::new();

    for (member_id, outbox) in members {
        if member_id == conn.id {
            continue;
        }
        match outbox.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(session_id = room, conn = %member_id, "outbox full, dropping member from group");
                stalled.push(member_id);
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session_id = room, conn = %member_id, "outbox closed, dropping member from group");
                stalled.push(member_id);
            }
        }
    }

    if !stalled.is_empty() {
        let mut rooms = state.rooms.write().await;
        for member_id in &stalled {
            rooms.leave(room, member_id);
        }
    }

    conn.emit(event).await;
}

fn audit_evicted(state: &AppState, evicted: &[String]) {
    for id in evicted {
        state.audit.record(id, "session_expired", json!({}));
    }
}
