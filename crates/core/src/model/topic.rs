use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

//
// ─── THRESHOLDS ───────────────────────────────────────────────────────────────
//

/// Accuracy (percent) at or above which a topic is recommended at `Hard`.
pub const HARD_DIFFICULTY_ACCURACY: f64 = 80.0;

/// Accuracy (percent) at or above which a topic is recommended at `Medium`.
pub const MEDIUM_DIFFICULTY_ACCURACY: f64 = 50.0;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TopicError {
    #[error("topic cannot be empty")]
    Empty,

    #[error("correct answers ({correct}) exceed questions answered ({answered}) for topic {topic}")]
    CorrectExceedsAnswered {
        topic: String,
        correct: u32,
        answered: u32,
    },

    #[error("invalid difficulty: {0}")]
    InvalidDifficulty(String),
}

//
// ─── TOPIC NAME ───────────────────────────────────────────────────────────────
//

/// Free-text subject label, compared by exact match after trimming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicName(String);

impl TopicName {
    /// # Errors
    ///
    /// Returns `TopicError::Empty` if the label is blank.
    pub fn new(raw: impl Into<String>) -> Result<Self, TopicError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TopicError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TopicName {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TopicName> for String {
    fn from(value: TopicName) -> Self {
        value.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//
// ─── DIFFICULTY ───────────────────────────────────────────────────────────────
//

/// Difficulty band used both for quizzes and for per-topic recommendations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    /// Maps an accuracy percentage onto a recommended band.
    ///
    /// Boundaries belong to the higher band: exactly 80 is `Hard`, exactly 50
    /// is `Medium`.
    #[must_use]
    pub fn from_accuracy(accuracy: f64) -> Self {
        if accuracy >= HARD_DIFFICULTY_ACCURACY {
            Self::Hard
        } else if accuracy >= MEDIUM_DIFFICULTY_ACCURACY {
            Self::Medium
        } else {
            Self::Easy
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            _ => Err(TopicError::InvalidDifficulty(s.to_owned())),
        }
    }
}

//
// ─── ACCURACY ─────────────────────────────────────────────────────────────────
//

/// `100 * correct / answered`, or `0.0` when nothing was answered.
#[must_use]
pub fn accuracy_percent(correct: u64, answered: u64) -> f64 {
    if answered == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = correct as f64 / answered as f64;
    ratio * 100.0
}

//
// ─── TOPIC RECORD ─────────────────────────────────────────────────────────────
//

/// Running mastery statistics for one topic of one user.
///
/// Fields are private; `accuracy` and `recommended_difficulty` are always
/// derived from the counters so they can never drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "TopicRecordView", try_from = "TopicRecordView")]
pub struct TopicRecord {
    topic: TopicName,
    questions_answered: u32,
    correct_answers: u32,
    accuracy: f64,
    last_practiced: Option<DateTime<Utc>>,
    recommended_difficulty: Difficulty,
}

impl TopicRecord {
    /// Creates the record for a topic's first answer.
    #[must_use]
    pub fn first_answer(topic: TopicName, is_correct: bool, now: DateTime<Utc>) -> Self {
        let mut record = Self {
            topic,
            questions_answered: 1,
            correct_answers: u32::from(is_correct),
            accuracy: 0.0,
            last_practiced: Some(now),
            recommended_difficulty: Difficulty::default(),
        };
        record.refresh();
        record
    }

    /// Rehydrate a record from persisted counters.
    ///
    /// # Errors
    ///
    /// Returns `TopicError::CorrectExceedsAnswered` for inconsistent counters.
    pub fn from_persisted(
        topic: TopicName,
        questions_answered: u32,
        correct_answers: u32,
        last_practiced: Option<DateTime<Utc>>,
    ) -> Result<Self, TopicError> {
        if correct_answers > questions_answered {
            return Err(TopicError::CorrectExceedsAnswered {
                topic: topic.0,
                correct: correct_answers,
                answered: questions_answered,
            });
        }
        let mut record = Self {
            topic,
            questions_answered,
            correct_answers,
            accuracy: 0.0,
            last_practiced,
            recommended_difficulty: Difficulty::default(),
        };
        record.refresh();
        Ok(record)
    }

    /// Applies one more answer to an existing record.
    pub fn record(&mut self, is_correct: bool, now: DateTime<Utc>) {
        self.questions_answered = self.questions_answered.saturating_add(1);
        if is_correct {
            self.correct_answers = self.correct_answers.saturating_add(1);
        }
        self.last_practiced = Some(now);
        self.refresh();
    }

    fn refresh(&mut self) {
        self.accuracy = accuracy_percent(
            u64::from(self.correct_answers),
            u64::from(self.questions_answered),
        );
        self.recommended_difficulty = Difficulty::from_accuracy(self.accuracy);
    }

    #[must_use]
    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    #[must_use]
    pub fn questions_answered(&self) -> u32 {
        self.questions_answered
    }

    #[must_use]
    pub fn correct_answers(&self) -> u32 {
        self.correct_answers
    }

    #[must_use]
    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    #[must_use]
    pub fn last_practiced(&self) -> Option<DateTime<Utc>> {
        self.last_practiced
    }

    #[must_use]
    pub fn recommended_difficulty(&self) -> Difficulty {
        self.recommended_difficulty
    }
}

/// Serialized shape of a `TopicRecord` (derived fields included for readers).
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopicRecordView {
    topic: TopicName,
    questions_answered: u32,
    correct_answers: u32,
    #[serde(default)]
    accuracy: f64,
    last_practiced: Option<DateTime<Utc>>,
    #[serde(default)]
    recommended_difficulty: Difficulty,
}

impl From<TopicRecord> for TopicRecordView {
    fn from(r: TopicRecord) -> Self {
        Self {
            topic: r.topic,
            questions_answered: r.questions_answered,
            correct_answers: r.correct_answers,
            accuracy: r.accuracy,
            last_practiced: r.last_practiced,
            recommended_difficulty: r.recommended_difficulty,
        }
    }
}

impl TryFrom<TopicRecordView> for TopicRecord {
    type Error = TopicError;

    fn try_from(v: TopicRecordView) -> Result<Self, Self::Error> {
        Self::from_persisted(
            v.topic,
            v.questions_answered,
            v.correct_answers,
            v.last_practiced,
        )
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
