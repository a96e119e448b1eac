use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tutor_core::model::{
    Quiz, QuizId, QuizStatus, QuizSummary, UserId, UserProgress, ValidatedQuiz,
};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// The stored record changed since it was read (revision mismatch), or a
    /// state transition was already applied by another writer.
    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Repository contract for per-user progress aggregates.
///
/// Writes use optimistic concurrency: `save_progress` only succeeds when the
/// stored revision still equals `progress.revision()`.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch the progress aggregate of a user.
    ///
    /// Returns `Ok(None)` when the user has no stored progress.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn get_progress(&self, user_id: &UserId) -> Result<Option<UserProgress>, StorageError>;

    /// Persist the aggregate and return its new revision.
    ///
    /// A revision of `0` inserts a new record and fails if one already exists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the stored revision differs from
    /// the one carried by `progress`.
    async fn save_progress(&self, progress: &UserProgress) -> Result<u64, StorageError>;

    /// Delete the aggregate; returns whether a record existed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the delete cannot be performed.
    async fn delete_progress(&self, user_id: &UserId) -> Result<bool, StorageError>;
}

/// Repository contract for quiz records.
#[async_trait]
pub trait QuizRepository: Send + Sync {
    /// Persist a new quiz and return its assigned ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the quiz cannot be stored.
    async fn insert_quiz(&self, quiz: &ValidatedQuiz) -> Result<QuizId, StorageError>;

    /// Fetch a quiz by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn get_quiz(&self, id: QuizId) -> Result<Option<Quiz>, StorageError>;

    /// Store a graded quiz, transitioning it from in-progress to completed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the quiz does not exist and
    /// `StorageError::Conflict` if it was already completed.
    async fn complete_quiz(&self, quiz: &Quiz) -> Result<(), StorageError>;

    /// List the user's completed quizzes, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on connection or decoding failures.
    async fn list_recent_completed(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<QuizSummary>, StorageError>;

    /// Delete every quiz of the user; returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the delete cannot be performed.
    async fn delete_quizzes_for_user(&self, user_id: &UserId) -> Result<u64, StorageError>;
}

#[derive(Default)]
struct QuizTable {
    next_id: u64,
    rows: BTreeMap<QuizId, Quiz>,
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    progress: Arc<Mutex<HashMap<UserId, UserProgress>>>,
    quizzes: Arc<Mutex<QuizTable>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(&self, user_id: &UserId) -> Result<Option<UserProgress>, StorageError> {
        let guard = self.progress.lock().map_err(poisoned)?;
        Ok(guard.get(user_id).cloned())
    }

    async fn save_progress(&self, progress: &UserProgress) -> Result<u64, StorageError> {
        let mut guard = self.progress.lock().map_err(poisoned)?;
        let stored = guard.get(progress.user_id()).map_or(0, UserProgress::revision);
        if stored != progress.revision() {
            return Err(StorageError::Conflict);
        }

        let revision = stored + 1;
        let mut row = progress.clone();
        row.mark_persisted(revision);
        guard.insert(progress.user_id().clone(), row);
        Ok(revision)
    }

    async fn delete_progress(&self, user_id: &UserId) -> Result<bool, StorageError> {
        let mut guard = self.progress.lock().map_err(poisoned)?;
        Ok(guard.remove(user_id).is_some())
    }
}

#[async_trait]
impl QuizRepository for InMemoryRepository {
    async fn insert_quiz(&self, quiz: &ValidatedQuiz) -> Result<QuizId, StorageError> {
        let mut guard = self.quizzes.lock().map_err(poisoned)?;
        guard.next_id += 1;
        let id = QuizId::new(guard.next_id);
        guard.rows.insert(id, quiz.clone().assign_id(id));
        Ok(id)
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Option<Quiz>, StorageError> {
        let guard = self.quizzes.lock().map_err(poisoned)?;
        Ok(guard.rows.get(&id).cloned())
    }

    async fn complete_quiz(&self, quiz: &Quiz) -> Result<(), StorageError> {
        let mut guard = self.quizzes.lock().map_err(poisoned)?;
        let row = guard.rows.get_mut(&quiz.id()).ok_or(StorageError::NotFound)?;
        if row.status() == QuizStatus::Completed {
            return Err(StorageError::Conflict);
        }
        *row = quiz.clone();
        Ok(())
    }

    async fn list_recent_completed(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<QuizSummary>, StorageError> {
        let guard = self.quizzes.lock().map_err(poisoned)?;
        let mut out: Vec<QuizSummary> = guard
            .rows
            .values()
            .filter(|q| q.user_id() == user_id)
            .filter_map(Quiz::summary)
            .collect();
        out.sort_by(|a, b| {
            b.completed_at
                .cmp(&a.completed_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        out.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(out)
    }

    async fn delete_quizzes_for_user(&self, user_id: &UserId) -> Result<u64, StorageError> {
        let mut guard = self.quizzes.lock().map_err(poisoned)?;
        let before = guard.rows.len();
        guard.rows.retain(|_, q| q.user_id() != user_id);
        Ok((before - guard.rows.len()) as u64)
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
    pub quizzes: Arc<dyn QuizRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let quizzes: Arc<dyn QuizRepository> = Arc::new(repo);
        Self { progress, quizzes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tutor_core::model::{Difficulty, QuizDraft, QuizQuestion, TopicName};
    use tutor_core::time::fixed_now;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn draft(user_id: &str) -> ValidatedQuiz {
        QuizDraft {
            user_id: user(user_id),
            topic: TopicName::new("Algebra").unwrap(),
            difficulty: Difficulty::Easy,
            questions: vec![QuizQuestion::new("1+1?", BTreeMap::new(), "A")],
        }
        .validate(fixed_now())
        .unwrap()
    }

    #[tokio::test]
    async fn save_assigns_increasing_revisions() {
        let repo = InMemoryRepository::new();
        let mut progress = UserProgress::new(user("u1"), fixed_now());

        let rev = repo.save_progress(&progress).await.unwrap();
        assert_eq!(rev, 1);
        progress.mark_persisted(rev);

        progress.record_answer(&TopicName::new("A").unwrap(), true, fixed_now());
        let rev = repo.save_progress(&progress).await.unwrap();
        assert_eq!(rev, 2);

        let fetched = repo.get_progress(&user("u1")).await.unwrap().unwrap();
        assert_eq!(fetched.revision(), 2);
        assert_eq!(fetched.total_questions_answered(), 1);
    }

    #[tokio::test]
    async fn stale_revision_conflicts() {
        let repo = InMemoryRepository::new();
        let progress = UserProgress::new(user("u1"), fixed_now());
        repo.save_progress(&progress).await.unwrap();

        // second insert with revision 0 loses
        let err = repo.save_progress(&progress).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let repo = InMemoryRepository::new();
        assert!(!repo.delete_progress(&user("u1")).await.unwrap());
        repo.save_progress(&UserProgress::new(user("u1"), fixed_now()))
            .await
            .unwrap();
        assert!(repo.delete_progress(&user("u1")).await.unwrap());
        assert!(repo.get_progress(&user("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn quizzes_complete_once_and_list_newest_first() {
        let repo = InMemoryRepository::new();
        let first = repo.insert_quiz(&draft("u1")).await.unwrap();
        let second = repo.insert_quiz(&draft("u1")).await.unwrap();
        let other = repo.insert_quiz(&draft("u2")).await.unwrap();
        assert_ne!(first, second);

        for (id, offset) in [(first, 1), (second, 2), (other, 3)] {
            let mut quiz = repo.get_quiz(id).await.unwrap().unwrap();
            quiz.submit(&["A"], fixed_now() + Duration::minutes(offset))
                .unwrap();
            repo.complete_quiz(&quiz).await.unwrap();
        }

        let done = repo.get_quiz(first).await.unwrap().unwrap();
        assert!(matches!(
            repo.complete_quiz(&done).await.unwrap_err(),
            StorageError::Conflict
        ));

        let recent = repo.list_recent_completed(&user("u1"), 5).await.unwrap();
        let ids: Vec<QuizId> = recent.iter().map(|q| q.id).collect();
        assert_eq!(ids, [second, first]);

        let limited = repo.list_recent_completed(&user("u1"), 1).await.unwrap();
        assert_eq!(limited.len(), 1);

        assert_eq!(repo.delete_quizzes_for_user(&user("u1")).await.unwrap(), 2);
        assert!(repo.get_quiz(other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn in_progress_quizzes_are_not_listed() {
        let repo = InMemoryRepository::new();
        repo.insert_quiz(&draft("u1")).await.unwrap();
        assert!(
            repo.list_recent_completed(&user("u1"), 5)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
