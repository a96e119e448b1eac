use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{QuizId, UserId};
use crate::model::topic::{Difficulty, TopicName, accuracy_percent};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizError {
    #[error("quiz must contain at least one question")]
    NoQuestions,

    #[error("question {index} has empty text")]
    EmptyQuestion { index: usize },

    #[error("question {index} has an empty correct answer")]
    EmptyCorrectAnswer { index: usize },

    #[error("received {answers} answers for {questions} questions")]
    TooManyAnswers { answers: usize, questions: usize },

    #[error("quiz already completed")]
    AlreadyCompleted,

    #[error("completed quiz is missing its completion time")]
    MissingCompletion,

    #[error("invalid quiz status: {0}")]
    InvalidStatus(String),
}

//
// ─── STATUS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuizStatus {
    InProgress,
    Completed,
}

impl QuizStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for QuizStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuizStatus {
    type Err = QuizError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(QuizError::InvalidStatus(other.to_owned())),
        }
    }
}

//
// ─── QUESTIONS ────────────────────────────────────────────────────────────────
//

/// Multiple-choice question as produced by the question generator.
///
/// `options` maps option labels (`"A"`, `"B"`, ...) to their text;
/// `correct_answer` holds the label of the right option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    pub correct_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

impl QuizQuestion {
    #[must_use]
    pub fn new(
        question: impl Into<String>,
        options: BTreeMap<String, String>,
        correct_answer: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            options,
            correct_answer: correct_answer.into(),
            explanation: None,
            user_answer: None,
            is_correct: None,
        }
    }

    #[must_use]
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    fn grade(&mut self, answer: Option<&str>) -> bool {
        let correct = answer == Some(self.correct_answer.as_str());
        self.user_answer = answer.map(str::to_owned);
        self.is_correct = Some(correct);
        correct
    }
}

//
// ─── DRAFT ────────────────────────────────────────────────────────────────────
//

/// Unsaved quiz as received from the quiz generator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizDraft {
    pub user_id: UserId,
    pub topic: TopicName,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub questions: Vec<QuizQuestion>,
}

impl QuizDraft {
    /// # Errors
    ///
    /// Returns `QuizError` if the quiz is empty or a question is blank.
    pub fn validate(self, now: DateTime<Utc>) -> Result<ValidatedQuiz, QuizError> {
        validate_questions(&self.questions)?;
        let questions = self
            .questions
            .into_iter()
            .map(|mut q| {
                q.user_answer = None;
                q.is_correct = None;
                q
            })
            .collect();
        Ok(ValidatedQuiz {
            user_id: self.user_id,
            topic: self.topic,
            difficulty: self.difficulty,
            questions,
            created_at: now,
        })
    }
}

fn validate_questions(questions: &[QuizQuestion]) -> Result<(), QuizError> {
    if questions.is_empty() {
        return Err(QuizError::NoQuestions);
    }
    for (index, q) in questions.iter().enumerate() {
        if q.question.trim().is_empty() {
            return Err(QuizError::EmptyQuestion { index });
        }
        if q.correct_answer.trim().is_empty() {
            return Err(QuizError::EmptyCorrectAnswer { index });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuiz {
    pub user_id: UserId,
    pub topic: TopicName,
    pub difficulty: Difficulty,
    pub questions: Vec<QuizQuestion>,
    pub created_at: DateTime<Utc>,
}

impl ValidatedQuiz {
    #[must_use]
    pub fn assign_id(self, id: QuizId) -> Quiz {
        Quiz {
            id,
            user_id: self.user_id,
            topic: self.topic,
            difficulty: self.difficulty,
            questions: self.questions,
            score: 0.0,
            status: QuizStatus::InProgress,
            created_at: self.created_at,
            completed_at: None,
        }
    }
}

//
// ─── QUIZ ─────────────────────────────────────────────────────────────────────
//

/// Grading result of a submitted quiz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuizGrade {
    pub correct_count: u32,
    pub total_questions: u32,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quiz {
    id: QuizId,
    user_id: UserId,
    topic: TopicName,
    difficulty: Difficulty,
    questions: Vec<QuizQuestion>,
    score: f64,
    status: QuizStatus,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Quiz {
    /// Rehydrate a quiz from storage.
    ///
    /// # Errors
    ///
    /// Returns `QuizError` if questions are invalid or a completed quiz has no
    /// completion time.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: QuizId,
        user_id: UserId,
        topic: TopicName,
        difficulty: Difficulty,
        questions: Vec<QuizQuestion>,
        score: f64,
        status: QuizStatus,
        created_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Self, QuizError> {
        validate_questions(&questions)?;
        if status == QuizStatus::Completed && completed_at.is_none() {
            return Err(QuizError::MissingCompletion);
        }
        Ok(Self {
            id,
            user_id,
            topic,
            difficulty,
            questions,
            score,
            status,
            created_at,
            completed_at,
        })
    }

    /// Grades `answers` positionally and marks the quiz completed.
    ///
    /// Answers must match the correct answer exactly; missing trailing answers
    /// count as incorrect.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::AlreadyCompleted` on a second submission and
    /// `QuizError::TooManyAnswers` if more answers than questions are given.
    pub fn submit<S: AsRef<str>>(
        &mut self,
        answers: &[S],
        now: DateTime<Utc>,
    ) -> Result<QuizGrade, QuizError> {
        if self.status == QuizStatus::Completed {
            return Err(QuizError::AlreadyCompleted);
        }
        if answers.len() > self.questions.len() {
            return Err(QuizError::TooManyAnswers {
                answers: answers.len(),
                questions: self.questions.len(),
            });
        }

        let mut correct_count = 0_u32;
        for (index, question) in self.questions.iter_mut().enumerate() {
            if question.grade(answers.get(index).map(AsRef::as_ref)) {
                correct_count = correct_count.saturating_add(1);
            }
        }

        let total_questions = u32::try_from(self.questions.len()).unwrap_or(u32::MAX);
        self.score = accuracy_percent(u64::from(correct_count), u64::from(total_questions));
        self.status = QuizStatus::Completed;
        self.completed_at = Some(now);

        Ok(QuizGrade {
            correct_count,
            total_questions,
            score: self.score,
        })
    }

    /// Per-question correctness in question order; ungraded questions are `false`.
    pub fn outcomes(&self) -> impl Iterator<Item = bool> + '_ {
        self.questions.iter().map(|q| q.is_correct.unwrap_or(false))
    }

    /// Compact view used by the dashboard's recent-quiz list.
    #[must_use]
    pub fn summary(&self) -> Option<QuizSummary> {
        Some(QuizSummary {
            id: self.id,
            topic: self.topic.clone(),
            score: self.score,
            difficulty: self.difficulty,
            completed_at: self.completed_at?,
        })
    }

    #[must_use]
    pub fn id(&self) -> QuizId {
        self.id
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    #[must_use]
    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    #[must_use]
    pub fn score(&self) -> f64 {
        self.score
    }

    #[must_use]
    pub fn status(&self) -> QuizStatus {
        self.status
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuizView<'a> {
    id: QuizId,
    user_id: &'a UserId,
    topic: &'a TopicName,
    difficulty: Difficulty,
    questions: &'a [QuizQuestion],
    total_questions: usize,
    score: f64,
    status: QuizStatus,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Serialize for Quiz {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        QuizView {
            id: self.id,
            user_id: &self.user_id,
            topic: &self.topic,
            difficulty: self.difficulty,
            questions: &self.questions,
            total_questions: self.questions.len(),
            score: self.score,
            status: self.status,
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
        .serialize(serializer)
    }
}

/// Completed quizzes listed in a user's history by default.
pub const DEFAULT_QUIZ_HISTORY_LIMIT: u32 = 20;

/// Summary of a completed quiz.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSummary {
    pub id: QuizId,
    pub topic: TopicName,
    pub score: f64,
    pub difficulty: Difficulty,
    pub completed_at: DateTime<Utc>,
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn question(text: &str, correct: &str) -> QuizQuestion {
        let options = ["A", "B", "C", "D"]
            .into_iter()
            .map(|k| (k.to_owned(), format!("option {k}")))
            .collect();
        QuizQuestion::new(text, options, correct)
    }

    fn draft(questions: Vec<QuizQuestion>) -> QuizDraft {
        QuizDraft {
            user_id: UserId::new("u1").unwrap(),
            topic: TopicName::new("Algebra").unwrap(),
            difficulty: Difficulty::Medium,
            questions,
        }
    }

    fn quiz(n: usize) -> Quiz {
        let questions = (0..n).map(|i| question(&format!("Q{i}"), "A")).collect();
        draft(questions)
            .validate(fixed_now())
            .unwrap()
            .assign_id(QuizId::new(1))
    }

    #[test]
    fn empty_quiz_is_rejected() {
        assert_eq!(
            draft(Vec::new()).validate(fixed_now()).unwrap_err(),
            QuizError::NoQuestions
        );
    }

    #[test]
    fn blank_question_is_rejected() {
        let err = draft(vec![question("Q", "A"), question(" ", "B")])
            .validate(fixed_now())
            .unwrap_err();
        assert_eq!(err, QuizError::EmptyQuestion { index: 1 });
    }

    #[test]
    fn validation_clears_prefilled_answers() {
        let mut q = question("Q", "A");
        q.user_answer = Some("A".into());
        q.is_correct = Some(true);
        let v = draft(vec![q]).validate(fixed_now()).unwrap();
        assert_eq!(v.questions[0].user_answer, None);
        assert_eq!(v.questions[0].is_correct, None);
    }

    #[test]
    fn submit_grades_and_completes() {
        let mut quiz = quiz(4);
        let grade = quiz.submit(&["A", "B", "A", ""], fixed_now()).unwrap();
        assert_eq!(grade.correct_count, 2);
        assert_eq!(grade.total_questions, 4);
        assert_eq!(grade.score, 50.0);
        assert_eq!(quiz.status(), QuizStatus::Completed);
        assert_eq!(quiz.completed_at(), Some(fixed_now()));
        assert_eq!(quiz.outcomes().collect::<Vec<_>>(), [true, false, true, false]);
        assert_eq!(quiz.questions()[3].user_answer.as_deref(), Some(""));
    }

    #[test]
    fn answers_must_match_exactly() {
        let mut quiz = quiz(3);
        let grade = quiz.submit(&[" A", "a", "A"], fixed_now()).unwrap();
        assert_eq!(grade.correct_count, 1);
        assert_eq!(quiz.outcomes().collect::<Vec<_>>(), [false, false, true]);
        assert_eq!(quiz.questions()[0].user_answer.as_deref(), Some(" A"));
    }

    #[test]
    fn missing_answers_count_as_incorrect() {
        let mut quiz = quiz(3);
        let grade = quiz.submit(&["A"], fixed_now()).unwrap();
        assert_eq!(grade.correct_count, 1);
        assert_eq!(quiz.outcomes().filter(|c| !c).count(), 2);
    }

    #[test]
    fn extra_answers_are_rejected() {
        let mut quiz = quiz(1);
        let err = quiz.submit(&["A", "B"], fixed_now()).unwrap_err();
        assert_eq!(
            err,
            QuizError::TooManyAnswers {
                answers: 2,
                questions: 1
            }
        );
        assert_eq!(quiz.status(), QuizStatus::InProgress);
    }

    #[test]
    fn second_submission_is_rejected() {
        let mut quiz = quiz(1);
        quiz.submit(&["A"], fixed_now()).unwrap();
        assert_eq!(
            quiz.submit(&["A"], fixed_now()).unwrap_err(),
            QuizError::AlreadyCompleted
        );
    }

    #[test]
    fn summary_requires_completion() {
        let mut quiz = quiz(2);
        assert!(quiz.summary().is_none());
        quiz.submit(&["A", "A"], fixed_now()).unwrap();
        let summary = quiz.summary().unwrap();
        assert_eq!(summary.score, 100.0);
        assert_eq!(summary.topic.as_str(), "Algebra");
    }

    #[test]
    fn completed_without_timestamp_fails_to_load() {
        let q = quiz(1);
        let err = Quiz::from_persisted(
            q.id(),
            q.user_id().clone(),
            q.topic().clone(),
            q.difficulty(),
            q.questions().to_vec(),
            100.0,
            QuizStatus::Completed,
            q.created_at(),
            None,
        )
        .unwrap_err();
        assert_eq!(err, QuizError::MissingCompletion);
    }

    #[test]
    fn question_json_uses_camel_case() {
        let json = r#"{"question":"2+2?","options":{"A":"4","B":"5"},"correctAnswer":"A"}"#;
        let q: QuizQuestion = serde_json::from_str(json).unwrap();
        assert_eq!(q.correct_answer, "A");
        assert_eq!(q.options.len(), 2);
        assert!(q.explanation.is_none());
    }
}
