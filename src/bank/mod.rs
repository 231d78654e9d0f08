pub mod catalogue;
pub mod safety;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;
use thiserror::Error;

/// Every question offers exactly this many options.
pub const OPTION_COUNT: usize = 3;

/// A multiple-choice question. `answer_index` is always a valid index into `options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
    pub answer_index: usize,
}

impl Question {
    pub fn new(text: impl Into<String>, options: &[&str], answer_index: usize) -> Self {
        Self {
            text: text.into(),
            options: options.iter().map(|o| o.to_string()).collect(),
            answer_index,
        }
    }

    pub fn option_count(&self) -> usize {
        self.options.len()
    }
}

/// A lesson topic: title, bullet-point facts and its question pool.
#[derive(Debug, Clone, Serialize)]
pub struct Topic {
    pub id: String,
    pub lesson_id: String,
    pub title: String,
    pub bullets: Vec<String>,
    pub questions: Vec<Question>,
}

/// A question paired with the topic it was drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedQuestion {
    pub topic: String,
    pub question: Question,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BankError {
    #[error("topic {topic}: question {index} has {count} options, expected {OPTION_COUNT}")]
    OptionCount {
        topic: String,
        index: usize,
        count: usize,
    },
    #[error("topic {topic}: question {index} answer index {answer_index} is out of range")]
    AnswerOutOfRange {
        topic: String,
        index: usize,
        answer_index: usize,
    },
    #[error("duplicate topic id: {0}")]
    DuplicateTopic(String),
}

/// Static, read-only catalogue of topics. Built once at startup and shared.
pub struct QuestionBank {
    topics: Vec<Topic>,
}

impl QuestionBank {
    /// Build a bank, rejecting any question that breaks the option invariants.
    pub fn new(topics: Vec<Topic>) -> Result<Self, BankError> {
        for (i, topic) in topics.iter().enumerate() {
            if topics[..i].iter().any(|t| t.id == topic.id) {
                return Err(BankError::DuplicateTopic(topic.id.clone()));
            }
            for (index, q) in topic.questions.iter().enumerate() {
                if q.options.len() != OPTION_COUNT {
                    return Err(BankError::OptionCount {
                        topic: topic.id.clone(),
                        index,
                        count: q.options.len(),
                    });
                }
                if q.answer_index >= q.options.len() {
                    return Err(BankError::AnswerOutOfRange {
                        topic: topic.id.clone(),
                        index,
                        answer_index: q.answer_index,
                    });
                }
            }
        }
        Ok(Self { topics })
    }

    /// The built-in phishing-awareness catalogue. Its tables are checked
    /// against the same invariants as [`QuestionBank::new`] in this module's tests.
    pub fn builtin() -> Self {
        Self {
            topics: catalogue::topics(),
        }
    }

    /// Topic ids in catalogue order.
    pub fn list_topics(&self) -> Vec<&str> {
        self.topics.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn get_topic(&self, topic_id: &str) -> Option<&Topic> {
        self.topics.iter().find(|t| t.id == topic_id)
    }

    /// First `limit` questions of a topic, tagged with the topic id.
    pub fn topic_questions(&self, topic_id: &str, limit: usize) -> Option<Vec<TaggedQuestion>> {
        self.get_topic(topic_id).map(|topic| {
            topic
                .questions
                .iter()
                .take(limit)
                .map(|q| TaggedQuestion {
                    topic: topic.id.clone(),
                    question: q.clone(),
                })
                .collect()
        })
    }

    /// Uniformly shuffled union of every topic's questions, truncated to `limit`.
    /// Each call yields a fresh order.
    pub fn mixed_questions(&self, limit: usize) -> Vec<TaggedQuestion> {
        self.mixed_questions_with(&mut rand::thread_rng(), limit)
    }

    pub fn mixed_questions_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        limit: usize,
    ) -> Vec<TaggedQuestion> {
        let mut all: Vec<TaggedQuestion> = self
            .topics
            .iter()
            .flat_map(|topic| {
                topic.questions.iter().map(move |q| TaggedQuestion {
                    topic: topic.id.clone(),
                    question: q.clone(),
                })
            })
            .collect();
        all.shuffle(rng);
        all.truncate(limit);
        all
    }
}

impl Default for QuestionBank {
    fn default() -> Self {
        Self::builtin()
    }
}
