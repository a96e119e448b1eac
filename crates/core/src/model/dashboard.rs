use chrono::NaiveDate;
use serde::Serialize;

use crate::model::progress::UserProgress;
use crate::model::quiz::QuizSummary;
use crate::model::topic::{TopicName, TopicRecord};

/// Default number of recent quizzes shown on the dashboard.
pub const DEFAULT_RECENT_QUIZ_LIMIT: u32 = 5;

/// Read view combining a user's progress with their latest completed quizzes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub total_quizzes_taken: u32,
    pub total_questions_answered: u32,
    /// Display value, rounded to one decimal place.
    pub overall_accuracy: f64,
    pub strong_topics: Vec<TopicName>,
    pub weak_topics: Vec<TopicName>,
    pub study_streak: u32,
    pub last_study_date: Option<NaiveDate>,
    pub topic_progress: Vec<TopicRecord>,
    /// Newest first.
    pub recent_quizzes: Vec<QuizSummary>,
}

impl DashboardSnapshot {
    /// Snapshot of a user without any stored progress.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            total_quizzes_taken: 0,
            total_questions_answered: 0,
            overall_accuracy: 0.0,
            strong_topics: Vec::new(),
            weak_topics: Vec::new(),
            study_streak: 0,
            last_study_date: None,
            topic_progress: Vec::new(),
            recent_quizzes: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_progress(progress: &UserProgress, mut recent_quizzes: Vec<QuizSummary>) -> Self {
        recent_quizzes.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Self {
            total_quizzes_taken: progress.total_quizzes_taken(),
            total_questions_answered: progress.total_questions_answered(),
            overall_accuracy: round_one_decimal(progress.overall_accuracy()),
            strong_topics: progress.strong_topics().to_vec(),
            weak_topics: progress.weak_topics().to_vec(),
            study_streak: progress.study_streak(),
            last_study_date: progress.last_study_date(),
            topic_progress: progress.topics().to_vec(),
            recent_quizzes,
        }
    }
}

/// Rounds a percentage to one decimal place for display.
#[must_use]
pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
