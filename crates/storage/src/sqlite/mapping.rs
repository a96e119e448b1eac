use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tutor_core::model::{
    Difficulty, ProgressParts, Quiz, QuizId, QuizQuestion, QuizStatus, QuizSummary, TopicName,
    TopicRecord, UserId, UserProgress,
};

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn u64_from_i64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn i64_from_u64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn quiz_id_from_i64(v: i64) -> Result<QuizId, StorageError> {
    Ok(QuizId::new(u64_from_i64("quiz_id", v)?))
}

fn user_id_from_row(row: &SqliteRow) -> Result<UserId, StorageError> {
    UserId::new(row.try_get::<String, _>("user_id").map_err(ser)?).map_err(ser)
}

fn topic_from_row(row: &SqliteRow) -> Result<TopicName, StorageError> {
    TopicName::new(row.try_get::<String, _>("topic").map_err(ser)?).map_err(ser)
}

pub(crate) fn map_topic_row(row: &SqliteRow) -> Result<TopicRecord, StorageError> {
    let questions_answered = u32_from_i64(
        "questions_answered",
        row.try_get::<i64, _>("questions_answered").map_err(ser)?,
    )?;
    let correct_answers = u32_from_i64(
        "correct_answers",
        row.try_get::<i64, _>("correct_answers").map_err(ser)?,
    )?;
    let last_practiced: Option<DateTime<Utc>> = row.try_get("last_practiced").map_err(ser)?;

    TopicRecord::from_persisted(
        topic_from_row(row)?,
        questions_answered,
        correct_answers,
        last_practiced,
    )
    .map_err(ser)
}

/// Builds the aggregate from its `user_progress` row and ordered topic rows.
pub(crate) fn map_progress(
    row: &SqliteRow,
    topics: Vec<TopicRecord>,
) -> Result<UserProgress, StorageError> {
    let last_study_date: Option<NaiveDate> = row.try_get("last_study_date").map_err(ser)?;
    let parts = ProgressParts {
        user_id: user_id_from_row(row)?,
        topics,
        total_quizzes_taken: u32_from_i64(
            "total_quizzes_taken",
            row.try_get::<i64, _>("total_quizzes_taken").map_err(ser)?,
        )?,
        total_questions_answered: u32_from_i64(
            "total_questions_answered",
            row.try_get::<i64, _>("total_questions_answered")
                .map_err(ser)?,
        )?,
        study_streak: u32_from_i64(
            "study_streak",
            row.try_get::<i64, _>("study_streak").map_err(ser)?,
        )?,
        last_study_date,
        revision: u64_from_i64("revision", row.try_get::<i64, _>("revision").map_err(ser)?)?,
        created_at: row.try_get("created_at").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    };
    UserProgress::from_persisted(parts).map_err(ser)
}

pub(crate) fn parse_difficulty(s: &str) -> Result<Difficulty, StorageError> {
    s.parse().map_err(ser)
}

pub(crate) fn parse_status(s: &str) -> Result<QuizStatus, StorageError> {
    s.parse().map_err(ser)
}

pub(crate) fn questions_to_json(questions: &[QuizQuestion]) -> Result<String, StorageError> {
    serde_json::to_string(questions).map_err(ser)
}

pub(crate) fn map_quiz_row(row: &SqliteRow) -> Result<Quiz, StorageError> {
    let questions_json: String = row.try_get("questions").map_err(ser)?;
    let questions: Vec<QuizQuestion> = serde_json::from_str(&questions_json).map_err(ser)?;
    let difficulty: String = row.try_get("difficulty").map_err(ser)?;
    let status: String = row.try_get("status").map_err(ser)?;

    Quiz::from_persisted(
        quiz_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        user_id_from_row(row)?,
        topic_from_row(row)?,
        parse_difficulty(&difficulty)?,
        questions,
        row.try_get("score").map_err(ser)?,
        parse_status(&status)?,
        row.try_get("created_at").map_err(ser)?,
        row.try_get("completed_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_summary_row(row: &SqliteRow) -> Result<QuizSummary, StorageError> {
    let difficulty: String = row.try_get("difficulty").map_err(ser)?;
    Ok(QuizSummary {
        id: quiz_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        topic: topic_from_row(row)?,
        score: row.try_get("score").map_err(ser)?,
        difficulty: parse_difficulty(&difficulty)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_counters_are_rejected() {
        assert!(u32_from_i64("n", -1).is_err());
        assert_eq!(u32_from_i64("n", 7).unwrap(), 7);
        assert!(u64_from_i64("n", -5).is_err());
    }

    #[test]
    fn unknown_enum_strings_are_rejected() {
        assert!(matches!(
            parse_difficulty("extreme"),
            Err(StorageError::Serialization(_))
        ));
        assert!(matches!(
            parse_status("abandoned"),
            Err(StorageError::Serialization(_))
        ));
        assert_eq!(parse_status("in-progress").unwrap(), QuizStatus::InProgress);
    }
}
