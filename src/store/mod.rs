mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bank::{Question, QuestionBank, TaggedQuestion};
use crate::config::QuizConfig;
use crate::scoring;

/// Topic id that explicitly asks for mixed-mode questions.
pub const MIXED_TOPIC: &str = "mixed";

/// In-memory quiz session store. Sessions live until `ttl` after creation
/// and are evicted lazily on the next store access. Nothing is persisted.
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    bank: Arc<QuestionBank>,
    settings: StoreSettings,
    clock: Arc<dyn Clock>,
    evicted: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreSettings {
    pub max_questions: usize,
    pub ttl: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_questions: 10,
            ttl: Duration::hours(2),
        }
    }
}

impl From<&QuizConfig> for StoreSettings {
    fn from(config: &QuizConfig) -> Self {
        Self {
            max_questions: config.max_questions,
            ttl: i64::try_from(config.session_ttl_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
        }
    }
}

/// Where a session's questions came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizMode {
    Topic(String),
    Mixed,
}

/// A question as fixed into a session, with its session-local id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionQuestion {
    pub qid: String,
    pub index: usize,
    pub topic: String,
    pub question: Question,
}

/// One answered question in a session transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerRecord {
    pub qid: String,
    pub choice_index: i64,
    pub correct: bool,
    pub delta: i64,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    /// Topic as requested by the client, even when it fell back to mixed mode.
    pub topic: String,
    pub mode: QuizMode,
    pub questions: Vec<SessionQuestion>,
    pub cursor: usize,
    pub running_total: i64,
    pub correct_count: u32,
    pub wrong_count: u32,
    pub history: Vec<AnswerRecord>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Set the first time `advance` runs past the last question.
    pub completed: bool,
}

/// Final tally sent when a session runs out of questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSummary {
    pub total: i64,
    pub correct_count: u32,
    pub wrong_count: u32,
    pub history: Vec<AnswerRecord>,
}

impl Session {
    pub fn total_questions(&self) -> usize {
        self.questions.len()
    }

    pub fn has_remaining(&self) -> bool {
        self.cursor < self.questions.len()
    }

    pub fn summary(&self) -> CompletionSummary {
        CompletionSummary {
            total: self.running_total,
            correct_count: self.correct_count,
            wrong_count: self.wrong_count,
            history: self.history.clone(),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at > ttl
    }

    /// Resolve an already-sent question by id, or the last sent one when no id is given.
    fn sent_question(&self, qid: Option<&str>) -> Option<&SessionQuestion> {
        let sent = &self.questions[..self.cursor.min(self.questions.len())];
        match qid {
            Some(qid) => sent.iter().find(|q| q.qid == qid),
            None => sent.last(),
        }
    }
}

/// An accepted answer as applied to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredAnswer {
    pub qid: String,
    pub delta: i64,
    pub correct: bool,
    pub running_total: i64,
}

/// Whether `create_or_resume` found the requested session or built a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Created,
    Resumed,
}

/// Result of asking a session for its next question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Question(SessionQuestion),
    /// No questions left. `first_time` is true only on the transition to complete.
    Exhausted { first_time: bool },
}

/// Expected, non-fatal outcomes of store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Invalid session")]
    SessionNotFound,
    #[error("Duplicate answer for question {0}")]
    DuplicateAnswer(String),
    #[error("Question not found")]
    QuestionNotFound,
    #[error("Invalid choice index {choice} (expected -1..{option_count})")]
    InvalidChoice { choice: i64, option_count: usize },
}

impl SessionStore {
    pub fn new(bank: Arc<QuestionBank>, settings: StoreSettings) -> Self {
        Self::with_clock(bank, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        bank: Arc<QuestionBank>,
        settings: StoreSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            bank,
            settings,
            clock,
            evicted: Vec::new(),
        }
    }

    pub fn settings(&self) -> StoreSettings {
        self.settings
    }

    /// Resume `requested_session_id` if it is live, otherwise create a fresh
    /// session. An unknown topic falls back to mixed-mode questions.
    pub fn create_or_resume(
        &mut self,
        user_id: &str,
        topic_id: &str,
        requested_session_id: Option<&str>,
    ) -> (JoinOutcome, &Session) {
        let now = self.clock.now();
        self.sweep(now);

        if let Some(id) = requested_session_id {
            if let Some(session) = self.sessions.get_mut(id) {
                session.last_activity_at = now;
                info!(session_id = %id, "resuming session");
                return (JoinOutcome::Resumed, &self.sessions[id]);
            }
            debug!(session_id = %id, "resume hint not found, creating new session");
        }

        let limit = self.settings.max_questions;
        let (mode, picked) = match self.bank.topic_questions(topic_id, limit) {
            Some(questions) => (QuizMode::Topic(topic_id.to_string()), questions),
            None => {
                if topic_id != MIXED_TOPIC {
                    warn!(topic = %topic_id, "unknown topic, using mixed questions");
                }
                (QuizMode::Mixed, self.bank.mixed_questions(limit))
            }
        };

        let questions = picked
            .into_iter()
            .enumerate()
            .map(|(index, TaggedQuestion { topic, question })| SessionQuestion {
                qid: format!("q{index}"),
                index,
                topic,
                question,
            })
            .collect::<Vec<_>>();

        let session_id = uuid::Uuid::new_v4().to_string();
        info!(
            session_id = %session_id,
            topic = %topic_id,
            questions = questions.len(),
            "created quiz session"
        );

        let session = Session {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            topic: topic_id.to_string(),
            mode,
            questions,
            cursor: 0,
            running_total: 0,
            correct_count: 0,
            wrong_count: 0,
            history: Vec::new(),
            created_at: now,
            last_activity_at: now,
            completed: false,
        };

        let session = self.sessions.entry(session_id).or_insert(session);
        (JoinOutcome::Created, &*session)
    }

    /// Expiry-checked lookup.
    pub fn get(&mut self, session_id: &str) -> Option<&Session> {
        let now = self.clock.now();
        self.sweep(now);
        self.sessions.get(session_id)
    }

    /// Score an answer and append it to the session transcript.
    ///
    /// A question already in the transcript yields `DuplicateAnswer` and
    /// leaves the session untouched.
    pub fn record_answer(
        &mut self,
        session_id: &str,
        qid: Option<&str>,
        choice_index: i64,
    ) -> Result<ScoredAnswer, StoreError> {
        let now = self.clock.now();
        self.sweep(now);

        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or(StoreError::SessionNotFound)?;

        if let Some(qid) = qid {
            if session.history.iter().any(|h| h.qid == qid) {
                return Err(StoreError::DuplicateAnswer(qid.to_string()));
            }
        }

        let question = session
            .sent_question(qid)
            .ok_or(StoreError::QuestionNotFound)?;
        let resolved_qid = question.qid.clone();
        let option_count = question.question.option_count();
        let answer_index = question.question.answer_index;

        if qid.is_none() && session.history.iter().any(|h| h.qid == resolved_qid) {
            return Err(StoreError::DuplicateAnswer(resolved_qid));
        }

        if !scoring::is_valid_choice(choice_index, option_count) {
            return Err(StoreError::InvalidChoice {
                choice: choice_index,
                option_count,
            });
        }

        let score = scoring::score(choice_index, answer_index);
        session.running_total += score.delta;
        if score.correct {
            session.correct_count += 1;
        } else {
            session.wrong_count += 1;
        }
        session.history.push(AnswerRecord {
            qid: resolved_qid.clone(),
            choice_index,
            correct: score.correct,
            delta: score.delta,
        });
        session.last_activity_at = now;

        Ok(ScoredAnswer {
            qid: resolved_qid,
            delta: score.delta,
            correct: score.correct,
            running_total: session.running_total,
        })
    }

    /// Hand out the question at the cursor and move the cursor past it.
    pub fn advance(&mut self, session_id: &str) -> Result<Advance, StoreError> {
        let now = self.clock.now();
        self.sweep(now);

        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or(StoreError::SessionNotFound)?;

        if let Some(question) = session.questions.get(session.cursor).cloned() {
            session.cursor += 1;
            session.last_activity_at = now;
            return Ok(Advance::Question(question));
        }

        let first_time = !session.completed;
        session.completed = true;
        session.last_activity_at = now;
        Ok(Advance::Exhausted { first_time })
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Ids evicted for expiry since the last call.
    pub fn drain_evicted(&mut self) -> Vec<String> {
        std::mem::take(&mut self.evicted)
    }

    fn sweep(&mut self, now: DateTime<Utc>) {
        let ttl = self.settings.ttl;
        let evicted = &mut self.evicted;
        self.sessions.retain(|id, session| {
            if session.is_expired(now, ttl) {
                info!(session_id = %id, "evicted expired session");
                evicted.push(id.clone());
                false
            } else {
                true
            }
        });
    }
}
