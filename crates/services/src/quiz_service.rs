use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use storage::repository::{QuizRepository, StorageError};
use tutor_core::model::{Quiz, QuizDraft, QuizError, QuizId, UserProgress};

use crate::Clock;
use crate::error::QuizServiceError;
use crate::progress_service::ProgressService;

/// Outcome of grading a quiz: the completed quiz plus the updated progress.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSubmission {
    pub quiz: Quiz,
    pub correct_count: u32,
    pub total_questions: u32,
    pub score: f64,
    pub progress: UserProgress,
}

/// Creates quizzes and grades submissions, feeding results into progress.
#[derive(Clone)]
pub struct QuizService {
    clock: Clock,
    quizzes: Arc<dyn QuizRepository>,
    progress: Arc<ProgressService>,
}

impl QuizService {
    #[must_use]
    pub fn new(
        clock: Clock,
        quizzes: Arc<dyn QuizRepository>,
        progress: Arc<ProgressService>,
    ) -> Self {
        Self {
            clock,
            quizzes,
            progress,
        }
    }

    /// Validate and store a new in-progress quiz.
    ///
    /// # Errors
    ///
    /// Returns `QuizServiceError::Quiz` for invalid drafts and
    /// `QuizServiceError::Storage` if the insert fails.
    pub async fn create_quiz(&self, draft: QuizDraft) -> Result<Quiz, QuizServiceError> {
        let validated = draft.validate(self.clock.now())?;
        let id = self.quizzes.insert_quiz(&validated).await?;
        let quiz = validated.assign_id(id);
        info!(
            quiz = %id,
            user = %quiz.user_id(),
            topic = %quiz.topic(),
            questions = quiz.questions().len(),
            "created quiz"
        );
        Ok(quiz)
    }

    /// # Errors
    ///
    /// Returns `QuizServiceError::Storage` if the read fails.
    pub async fn get_quiz(&self, id: QuizId) -> Result<Option<Quiz>, QuizServiceError> {
        Ok(self.quizzes.get_quiz(id).await?)
    }

    /// Grade `answers` against quiz `id` and apply the results to the owner's
    /// progress: one quiz taken plus one answer per question.
    ///
    /// The quiz is marked completed before progress changes, so a second
    /// submission is rejected and never counted twice.
    ///
    /// # Errors
    ///
    /// Returns `QuizServiceError::NotFound` for unknown quizzes,
    /// `QuizServiceError::Quiz` for already-completed quizzes or surplus
    /// answers, and storage or progress errors otherwise.
    pub async fn submit_quiz<S: AsRef<str> + Sync>(
        &self,
        id: QuizId,
        answers: &[S],
    ) -> Result<QuizSubmission, QuizServiceError> {
        let mut quiz = self
            .quizzes
            .get_quiz(id)
            .await?
            .ok_or(QuizServiceError::NotFound(id))?;

        let grade = quiz.submit(answers, self.clock.now())?;
        match self.quizzes.complete_quiz(&quiz).await {
            Ok(()) => {}
            Err(StorageError::Conflict) => return Err(QuizError::AlreadyCompleted.into()),
            Err(StorageError::NotFound) => return Err(QuizServiceError::NotFound(id)),
            Err(e) => return Err(e.into()),
        }

        let outcomes: Vec<bool> = quiz.outcomes().collect();
        let progress = self
            .progress
            .record_quiz(quiz.user_id(), quiz.topic(), &outcomes)
            .await?;

        info!(
            quiz = %id,
            user = %quiz.user_id(),
            correct = grade.correct_count,
            total = grade.total_questions,
            score = grade.score,
            "graded quiz"
        );

        Ok(QuizSubmission {
            quiz,
            correct_count: grade.correct_count,
            total_questions: grade.total_questions,
            score: grade.score,
            progress,
        })
    }
}
