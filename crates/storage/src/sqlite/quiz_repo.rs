use tutor_core::model::{Quiz, QuizId, QuizStatus, QuizSummary, UserId, ValidatedQuiz};

use super::SqliteRepository;
use super::mapping::{
    conn, i64_from_u64, map_quiz_row, map_summary_row, quiz_id_from_i64, questions_to_json,
};
use crate::repository::{QuizRepository, StorageError};

#[async_trait::async_trait]
impl QuizRepository for SqliteRepository {
    async fn insert_quiz(&self, quiz: &ValidatedQuiz) -> Result<QuizId, StorageError> {
        let res = sqlx::query(
            r"
                INSERT INTO quizzes (
                    user_id, topic, difficulty, questions, score, status, created_at, completed_at
                )
                VALUES (?1, ?2, ?3, ?4, 0.0, ?5, ?6, NULL)
            ",
        )
        .bind(quiz.user_id.as_str())
        .bind(quiz.topic.as_str())
        .bind(quiz.difficulty.as_str())
        .bind(questions_to_json(&quiz.questions)?)
        .bind(QuizStatus::InProgress.as_str())
        .bind(quiz.created_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        quiz_id_from_i64(res.last_insert_rowid())
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Option<Quiz>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT
                    id, user_id, topic, difficulty, questions, score, status,
                    created_at, completed_at
                FROM quizzes
                WHERE id = ?1
            ",
        )
        .bind(i64_from_u64("quiz_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_quiz_row).transpose()
    }

    async fn complete_quiz(&self, quiz: &Quiz) -> Result<(), StorageError> {
        let id = i64_from_u64("quiz_id", quiz.id().value())?;
        let res = sqlx::query(
            r"
                UPDATE quizzes SET
                    questions = ?2,
                    score = ?3,
                    status = ?4,
                    completed_at = ?5
                WHERE id = ?1 AND status = ?6
            ",
        )
        .bind(id)
        .bind(questions_to_json(quiz.questions())?)
        .bind(quiz.score())
        .bind(QuizStatus::Completed.as_str())
        .bind(quiz.completed_at())
        .bind(QuizStatus::InProgress.as_str())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() > 0 {
            return Ok(());
        }

        let exists = sqlx::query("SELECT 1 FROM quizzes WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        Err(if exists.is_some() {
            StorageError::Conflict
        } else {
            StorageError::NotFound
        })
    }

    async fn list_recent_completed(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<QuizSummary>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT id, topic, score, difficulty, completed_at
                FROM quizzes
                WHERE user_id = ?1 AND status = ?2
                ORDER BY completed_at DESC, id DESC
                LIMIT ?3
            ",
        )
        .bind(user_id.as_str())
        .bind(QuizStatus::Completed.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(map_summary_row(row)?);
        }
        Ok(out)
    }

    async fn delete_quizzes_for_user(&self, user_id: &UserId) -> Result<u64, StorageError> {
        let res = sqlx::query("DELETE FROM quizzes WHERE user_id = ?1")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(res.rows_affected())
    }
}
