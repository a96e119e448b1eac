use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use storage::repository::{ProgressRepository, QuizRepository, StorageError};
use tutor_core::model::{
    DashboardSnapshot, QuizSummary, StreakChange, TopicName, TopicRecord, UserId, UserProgress,
};

use crate::Clock;
use crate::config::{StreakPolicy, TutorConfig};
use crate::error::ProgressServiceError;

/// Moment of a mutation, passed to every aggregate update.
#[derive(Debug, Clone, Copy)]
struct Now {
    at: DateTime<Utc>,
    today: NaiveDate,
}

/// Tracks per-user mastery: answers, quiz counts, and the study streak.
///
/// Every write is a read-modify-write of one user's aggregate guarded by the
/// repository's revision check; conflicting writers are retried, so
/// concurrent submissions for the same user never drop an update.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    config: TutorConfig,
    progress: Arc<dyn ProgressRepository>,
    quizzes: Arc<dyn QuizRepository>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        config: TutorConfig,
        progress: Arc<dyn ProgressRepository>,
        quizzes: Arc<dyn QuizRepository>,
    ) -> Self {
        Self {
            clock,
            config,
            progress,
            quizzes,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TutorConfig {
        &self.config
    }

    fn now(&self) -> Now {
        Now {
            at: self.clock.now(),
            today: self.clock.today(self.config.utc_offset),
        }
    }

    /// Apply one graded answer for `topic`; invoke once per answered question.
    ///
    /// With `StreakPolicy::StudyActivity` the answer also counts as a study day.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if persistence fails and
    /// `ProgressServiceError::Contended` if retries are exhausted.
    pub async fn record_answer(
        &self,
        user_id: &UserId,
        topic: &TopicName,
        is_correct: bool,
    ) -> Result<UserProgress, ProgressServiceError> {
        let policy = self.config.streak_policy;
        let (progress, change) = self
            .mutate(user_id, |progress, now| {
                progress.record_answer(topic, is_correct, now.at);
                let change = (policy == StreakPolicy::StudyActivity)
                    .then(|| progress.touch_study_day(now.today, now.at));
                (change, true)
            })
            .await?;
        if let Some(change) = change {
            log_streak(user_id, change);
        }

        debug!(
            user = %user_id,
            topic = %topic,
            is_correct,
            overall_accuracy = progress.overall_accuracy(),
            "recorded answer"
        );
        Ok(progress)
    }

    /// Apply a completed quiz in a single write: counts the quiz once and
    /// records every question outcome under `topic`.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if persistence fails and
    /// `ProgressServiceError::Contended` if retries are exhausted.
    pub async fn record_quiz(
        &self,
        user_id: &UserId,
        topic: &TopicName,
        outcomes: &[bool],
    ) -> Result<UserProgress, ProgressServiceError> {
        let policy = self.config.streak_policy;
        let (progress, change) = self
            .mutate(user_id, |progress, now| {
                progress.increment_quizzes_taken(now.at);
                for &is_correct in outcomes {
                    progress.record_answer(topic, is_correct, now.at);
                }
                let change = (policy == StreakPolicy::StudyActivity)
                    .then(|| progress.touch_study_day(now.today, now.at));
                (change, true)
            })
            .await?;
        if let Some(change) = change {
            log_streak(user_id, change);
        }

        debug!(
            user = %user_id,
            topic = %topic,
            questions = outcomes.len(),
            total_quizzes = progress.total_quizzes_taken(),
            "recorded quiz"
        );
        Ok(progress)
    }

    /// Count one completed quiz, independent of its question count.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` if persistence fails.
    pub async fn increment_quizzes_taken(
        &self,
        user_id: &UserId,
    ) -> Result<UserProgress, ProgressServiceError> {
        let (progress, ()) = self
            .mutate(user_id, |progress, now| {
                progress.increment_quizzes_taken(now.at);
                ((), true)
            })
            .await?;
        Ok(progress)
    }

    /// Register study activity today. Repeated calls on the same calendar day
    /// leave the streak unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` if persistence fails.
    pub async fn touch_study_day(
        &self,
        user_id: &UserId,
    ) -> Result<UserProgress, ProgressServiceError> {
        let progress = self
            .touch(user_id, true)
            .await?
            .ok_or(StorageError::NotFound)?;
        Ok(progress)
    }

    /// Touches the streak; `None` when the user has no progress and
    /// `create_missing` is off.
    async fn touch(
        &self,
        user_id: &UserId,
        create_missing: bool,
    ) -> Result<Option<UserProgress>, ProgressServiceError> {
        let updated = self
            .update(user_id, create_missing, |progress, now| {
                let change = progress.touch_study_day(now.today, now.at);
                let dirty = !matches!(
                    change,
                    StreakChange::SameDay | StreakChange::ClockSkew { .. }
                );
                (change, dirty)
            })
            .await?;
        Ok(updated.map(|(progress, change)| {
            log_streak(user_id, change);
            progress
        }))
    }

    /// Fetch a user's progress, creating a zeroed record on first access.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` if persistence fails.
    pub async fn progress(&self, user_id: &UserId) -> Result<UserProgress, ProgressServiceError> {
        let (progress, ()) = self.mutate(user_id, |_, _| ((), false)).await?;
        Ok(progress)
    }

    /// Exact-match lookup of one topic; `None` for unknown users or topics.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the read fails.
    pub async fn topic_progress(
        &self,
        user_id: &UserId,
        topic: &TopicName,
    ) -> Result<Option<TopicRecord>, ProgressServiceError> {
        let progress = self.progress.get_progress(user_id).await?;
        Ok(progress.and_then(|p| p.topic(topic).cloned()))
    }

    /// Dashboard view of a user's progress and latest completed quizzes.
    ///
    /// Under `StreakPolicy::DashboardView` the view counts as a study day for
    /// users that already have progress. Unknown users get a zeroed snapshot
    /// and no record is created.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` if storage access fails.
    pub async fn dashboard_snapshot(
        &self,
        user_id: &UserId,
    ) -> Result<DashboardSnapshot, ProgressServiceError> {
        let progress = match self.config.streak_policy {
            StreakPolicy::DashboardView => self.touch(user_id, false).await?,
            StreakPolicy::StudyActivity => self.progress.get_progress(user_id).await?,
        };
        let Some(progress) = progress else {
            return Ok(DashboardSnapshot::empty());
        };

        let recent = self
            .quizzes
            .list_recent_completed(user_id, self.config.recent_quiz_limit)
            .await?;
        Ok(DashboardSnapshot::from_progress(&progress, recent))
    }

    /// Delete the user's progress and all of their quizzes. Irreversible.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if a delete fails.
    pub async fn reset_progress(&self, user_id: &UserId) -> Result<(), ProgressServiceError> {
        let quizzes = self.quizzes.delete_quizzes_for_user(user_id).await?;
        let existed = self.progress.delete_progress(user_id).await?;
        info!(user = %user_id, quizzes, existed, "reset progress");
        Ok(())
    }

    /// Completed quizzes of a user, newest first, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Storage` if the read fails.
    pub async fn quiz_history(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<QuizSummary>, ProgressServiceError> {
        Ok(self.quizzes.list_recent_completed(user_id, limit).await?)
    }

    /// `update` that creates a missing aggregate.
    async fn mutate<T, F>(
        &self,
        user_id: &UserId,
        apply: F,
    ) -> Result<(UserProgress, T), ProgressServiceError>
    where
        F: FnMut(&mut UserProgress, Now) -> (T, bool) + Send,
        T: Send,
    {
        let updated = self.update(user_id, true, apply).await?;
        Ok(updated.ok_or(StorageError::NotFound)?)
    }

    /// Read-modify-write loop over one user's aggregate.
    ///
    /// `apply` returns its result plus whether the aggregate changed; unchanged
    /// aggregates that already exist are not written back. A missing aggregate
    /// is created and persisted when `create_missing` is set, otherwise the
    /// loop returns `None` without writing.
    async fn update<T, F>(
        &self,
        user_id: &UserId,
        create_missing: bool,
        mut apply: F,
    ) -> Result<Option<(UserProgress, T)>, ProgressServiceError>
    where
        F: FnMut(&mut UserProgress, Now) -> (T, bool) + Send,
        T: Send,
    {
        let max_attempts = self.config.max_write_attempts.max(1);
        let mut attempt = 1;
        loop {
            let now = self.now();
            let mut progress = match self.progress.get_progress(user_id).await? {
                Some(progress) => progress,
                None if create_missing => UserProgress::new(user_id.clone(), now.at),
                None => return Ok(None),
            };

            let (out, dirty) = apply(&mut progress, now);
            if !dirty && progress.is_persisted() {
                return Ok(Some((progress, out)));
            }

            match self.progress.save_progress(&progress).await {
                Ok(revision) => {
                    progress.mark_persisted(revision);
                    return Ok(Some((progress, out)));
                }
                Err(StorageError::Conflict) if attempt < max_attempts => {
                    debug!(user = %user_id, attempt, "progress write conflicted, retrying");
                    attempt += 1;
                }
                Err(StorageError::Conflict) => {
                    warn!(user = %user_id, attempts = attempt, "progress write kept conflicting");
                    return Err(ProgressServiceError::Contended {
                        user_id: user_id.to_string(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn log_streak(user_id: &UserId, change: StreakChange) {
    match change {
        StreakChange::ClockSkew { days } => {
            warn!(
                user = %user_id,
                days,
                "last study date lies in the future; streak left unchanged"
            );
        }
        StreakChange::SameDay => {}
        other => debug!(user = %user_id, change = ?other, "study streak updated"),
    }
}
