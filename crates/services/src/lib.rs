#![forbid(unsafe_code)]

pub mod app_services;
pub mod config;
pub mod error;
pub mod progress_service;
pub mod quiz_service;

pub use tutor_core::Clock;

pub use app_services::AppServices;
pub use config::{StreakPolicy, TutorConfig};
pub use error::{AppServicesError, ConfigError, ProgressServiceError, QuizServiceError};
pub use progress_service::ProgressService;
pub use quiz_service::{QuizService, QuizSubmission};
