use std::sync::Arc;

use storage::repository::Storage;

use crate::Clock;
use crate::config::TutorConfig;
use crate::error::AppServicesError;
use crate::progress_service::ProgressService;
use crate::quiz_service::QuizService;

/// Assembles app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    progress: Arc<ProgressService>,
    quizzes: Arc<QuizService>,
}

impl AppServices {
    /// Wire services over an already-built `Storage`.
    #[must_use]
    pub fn new(storage: &Storage, clock: Clock, config: TutorConfig) -> Self {
        let progress = Arc::new(ProgressService::new(
            clock,
            config,
            Arc::clone(&storage.progress),
            Arc::clone(&storage.quizzes),
        ));
        let quizzes = Arc::new(QuizService::new(
            clock,
            Arc::clone(&storage.quizzes),
            Arc::clone(&progress),
        ));
        Self { progress, quizzes }
    }

    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: TutorConfig,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::new(&storage, clock, config))
    }

    /// Services over process-local memory; nothing survives a restart.
    #[must_use]
    pub fn in_memory(clock: Clock, config: TutorConfig) -> Self {
        Self::new(&Storage::in_memory(), clock, config)
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn quizzes(&self) -> Arc<QuizService> {
        Arc::clone(&self.quizzes)
    }
}
