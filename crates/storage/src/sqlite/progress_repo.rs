use tutor_core::model::{UserId, UserProgress};

use super::SqliteRepository;
use super::mapping::{conn, i64_from_u64, map_progress, map_topic_row};
use crate::repository::{ProgressRepository, StorageError};

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(&self, user_id: &UserId) -> Result<Option<UserProgress>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let Some(row) = sqlx::query(
            r"
                SELECT
                    user_id, revision, total_quizzes_taken, total_questions_answered,
                    study_streak, last_study_date, created_at, updated_at
                FROM user_progress
                WHERE user_id = ?1
            ",
        )
        .bind(user_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(conn)?
        else {
            return Ok(None);
        };

        let topic_rows = sqlx::query(
            r"
                SELECT topic, questions_answered, correct_answers, last_practiced
                FROM topic_progress
                WHERE user_id = ?1
                ORDER BY position ASC
            ",
        )
        .bind(user_id.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;

        let mut topics = Vec::with_capacity(topic_rows.len());
        for row in &topic_rows {
            topics.push(map_topic_row(row)?);
        }

        map_progress(&row, topics).map(Some)
    }

    async fn save_progress(&self, progress: &UserProgress) -> Result<u64, StorageError> {
        let expected = progress.revision();
        let revision = expected + 1;
        let user_id = progress.user_id().as_str();

        let mut tx = self.pool.begin().await.map_err(conn)?;

        let res = if expected == 0 {
            sqlx::query(
                r"
                    INSERT INTO user_progress (
                        user_id, revision, total_quizzes_taken, total_questions_answered,
                        study_streak, last_study_date, created_at, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(user_id) DO NOTHING
                ",
            )
            .bind(user_id)
            .bind(i64_from_u64("revision", revision)?)
            .bind(i64::from(progress.total_quizzes_taken()))
            .bind(i64::from(progress.total_questions_answered()))
            .bind(i64::from(progress.study_streak()))
            .bind(progress.last_study_date())
            .bind(progress.created_at())
            .bind(progress.updated_at())
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query(
                r"
                    UPDATE user_progress SET
                        revision = ?2,
                        total_quizzes_taken = ?3,
                        total_questions_answered = ?4,
                        study_streak = ?5,
                        last_study_date = ?6,
                        updated_at = ?7
                    WHERE user_id = ?1 AND revision = ?8
                ",
            )
            .bind(user_id)
            .bind(i64_from_u64("revision", revision)?)
            .bind(i64::from(progress.total_quizzes_taken()))
            .bind(i64::from(progress.total_questions_answered()))
            .bind(i64::from(progress.study_streak()))
            .bind(progress.last_study_date())
            .bind(progress.updated_at())
            .bind(i64_from_u64("revision", expected)?)
            .execute(&mut *tx)
            .await
        };
        let res = res.map_err(conn)?;

        if res.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            return Err(StorageError::Conflict);
        }

        sqlx::query("DELETE FROM topic_progress WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for (position, record) in progress.topics().iter().enumerate() {
            sqlx::query(
                r"
                    INSERT INTO topic_progress (
                        user_id, topic, position, questions_answered, correct_answers, last_practiced
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )
            .bind(user_id)
            .bind(record.topic().as_str())
            .bind(i64::try_from(position).map_err(|_| {
                StorageError::Serialization("topic position overflow".into())
            })?)
            .bind(i64::from(record.questions_answered()))
            .bind(i64::from(record.correct_answers()))
            .bind(record.last_practiced())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(revision)
    }

    async fn delete_progress(&self, user_id: &UserId) -> Result<bool, StorageError> {
        let res = sqlx::query("DELETE FROM user_progress WHERE user_id = ?1")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(res.rows_affected() > 0)
    }
}
