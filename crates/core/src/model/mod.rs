mod dashboard;
mod ids;
mod progress;
mod quiz;
mod streak;
mod topic;

pub use dashboard::{DEFAULT_RECENT_QUIZ_LIMIT, DashboardSnapshot, round_one_decimal};
pub use ids::{IdError, MAX_USER_ID_LEN, QuizId, UserId};
pub use progress::{
    ProgressError, ProgressParts, STRONG_TOPIC_ACCURACY, UserProgress, WEAK_TOPIC_ACCURACY,
    WEAK_TOPIC_MIN_ANSWERS,
};
pub use quiz::{
    DEFAULT_QUIZ_HISTORY_LIMIT, Quiz, QuizDraft, QuizError, QuizGrade, QuizQuestion, QuizStatus,
    QuizSummary, ValidatedQuiz,
};
pub use streak::{Streak, StreakChange};
pub use topic::{
    Difficulty, HARD_DIFFICULTY_ACCURACY, MEDIUM_DIFFICULTY_ACCURACY, TopicError, TopicName,
    TopicRecord, accuracy_percent,
};
