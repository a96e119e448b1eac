use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use thiserror::Error;

use crate::model::ids::UserId;
use crate::model::streak::{Streak, StreakChange};
use crate::model::topic::{TopicError, TopicName, TopicRecord, accuracy_percent};

//
// ─── THRESHOLDS ───────────────────────────────────────────────────────────────
//

/// Topics at or above this accuracy are reported as strong.
pub const STRONG_TOPIC_ACCURACY: f64 = 75.0;

/// Topics below this accuracy (with enough attempts) are reported as weak.
pub const WEAK_TOPIC_ACCURACY: f64 = 50.0;

/// Minimum attempts before a topic may be reported as weak.
pub const WEAK_TOPIC_MIN_ANSWERS: u32 = 3;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error(transparent)]
    Topic(#[from] TopicError),

    #[error("duplicate topic in progress record: {0}")]
    DuplicateTopic(String),

    #[error("total questions answered ({total}) does not match the per-topic sum ({answered})")]
    InconsistentTotals { total: u32, answered: u64 },
}

//
// ─── PERSISTED PARTS ──────────────────────────────────────────────────────────
//

/// Stored counters of a `UserProgress`; derived fields are recomputed on load.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressParts {
    pub user_id: UserId,
    pub topics: Vec<TopicRecord>,
    pub total_quizzes_taken: u32,
    pub total_questions_answered: u32,
    pub study_streak: u32,
    pub last_study_date: Option<NaiveDate>,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//
// ─── AGGREGATE ────────────────────────────────────────────────────────────────
//

/// Mastery record of one user: per-topic statistics plus global aggregates.
///
/// All mutation goes through `record_answer`, `increment_quizzes_taken` and
/// `touch_study_day`; each of them re-derives overall accuracy and the
/// strong/weak topic sets before returning.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProgress {
    user_id: UserId,
    topics: Vec<TopicRecord>,
    total_quizzes_taken: u32,
    total_questions_answered: u32,
    overall_accuracy: f64,
    strong_topics: Vec<TopicName>,
    weak_topics: Vec<TopicName>,
    streak: Streak,
    revision: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserProgress {
    /// Zeroed progress for a user that has no stored record yet.
    #[must_use]
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            topics: Vec::new(),
            total_quizzes_taken: 0,
            total_questions_answered: 0,
            overall_accuracy: 0.0,
            strong_topics: Vec::new(),
            weak_topics: Vec::new(),
            streak: Streak::default(),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rehydrate progress from persisted counters.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::DuplicateTopic` if a topic appears twice and
    /// `ProgressError::InconsistentTotals` if the question total differs from
    /// the sum of per-topic answers.
    pub fn from_persisted(parts: ProgressParts) -> Result<Self, ProgressError> {
        let mut seen = HashSet::with_capacity(parts.topics.len());
        for record in &parts.topics {
            if !seen.insert(record.topic().as_str()) {
                return Err(ProgressError::DuplicateTopic(record.topic().to_string()));
            }
        }

        let answered: u64 = parts
            .topics
            .iter()
            .map(|t| u64::from(t.questions_answered()))
            .sum();
        if u64::from(parts.total_questions_answered) != answered {
            return Err(ProgressError::InconsistentTotals {
                total: parts.total_questions_answered,
                answered,
            });
        }

        let mut progress = Self {
            user_id: parts.user_id,
            topics: parts.topics,
            total_quizzes_taken: parts.total_quizzes_taken,
            total_questions_answered: parts.total_questions_answered,
            overall_accuracy: 0.0,
            strong_topics: Vec::new(),
            weak_topics: Vec::new(),
            streak: Streak::new(parts.study_streak, parts.last_study_date),
            revision: parts.revision,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        };
        progress.refresh_aggregates();
        Ok(progress)
    }

    /// Applies one graded answer for `topic`.
    ///
    /// Must be called once per answered question. The topic record is created
    /// on its first answer.
    pub fn record_answer(
        &mut self,
        topic: &TopicName,
        is_correct: bool,
        now: DateTime<Utc>,
    ) -> &TopicRecord {
        let index = match self.topics.iter().position(|t| t.topic() == topic) {
            Some(index) => {
                self.topics[index].record(is_correct, now);
                index
            }
            None => {
                self.topics
                    .push(TopicRecord::first_answer(topic.clone(), is_correct, now));
                self.topics.len() - 1
            }
        };

        self.total_questions_answered = self.total_questions_answered.saturating_add(1);
        self.updated_at = now;
        self.refresh_aggregates();
        &self.topics[index]
    }

    /// Counts one completed quiz. Independent of its question count.
    pub fn increment_quizzes_taken(&mut self, now: DateTime<Utc>) {
        self.total_quizzes_taken = self.total_quizzes_taken.saturating_add(1);
        self.updated_at = now;
    }

    /// Registers study activity on the calendar day `today`.
    pub fn touch_study_day(&mut self, today: NaiveDate, now: DateTime<Utc>) -> StreakChange {
        let change = self.streak.touch(today);
        if !matches!(change, StreakChange::SameDay | StreakChange::ClockSkew { .. }) {
            self.updated_at = now;
        }
        change
    }

    /// Records the revision assigned by storage after a successful write.
    pub fn mark_persisted(&mut self, revision: u64) {
        self.revision = revision;
    }

    fn refresh_aggregates(&mut self) {
        self.overall_accuracy = accuracy_percent(
            total_correct(&self.topics),
            u64::from(self.total_questions_answered),
        );
        self.strong_topics = self
            .topics
            .iter()
            .filter(|t| t.accuracy() >= STRONG_TOPIC_ACCURACY)
            .map(|t| t.topic().clone())
            .collect();
        self.weak_topics = self
            .topics
            .iter()
            .filter(|t| {
                t.accuracy() < WEAK_TOPIC_ACCURACY
                    && t.questions_answered() >= WEAK_TOPIC_MIN_ANSWERS
            })
            .map(|t| t.topic().clone())
            .collect();
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn topics(&self) -> &[TopicRecord] {
        &self.topics
    }

    /// Exact-match lookup of a topic record.
    #[must_use]
    pub fn topic(&self, topic: &TopicName) -> Option<&TopicRecord> {
        self.topics.iter().find(|t| t.topic() == topic)
    }

    #[must_use]
    pub fn total_quizzes_taken(&self) -> u32 {
        self.total_quizzes_taken
    }

    #[must_use]
    pub fn total_questions_answered(&self) -> u32 {
        self.total_questions_answered
    }

    #[must_use]
    pub fn overall_accuracy(&self) -> f64 {
        self.overall_accuracy
    }

    #[must_use]
    pub fn strong_topics(&self) -> &[TopicName] {
        &self.strong_topics
    }

    #[must_use]
    pub fn weak_topics(&self) -> &[TopicName] {
        &self.weak_topics
    }

    #[must_use]
    pub fn study_streak(&self) -> u32 {
        self.streak.days
    }

    #[must_use]
    pub fn last_study_date(&self) -> Option<NaiveDate> {
        self.streak.last_study_date
    }

    /// Storage revision; `0` means the aggregate was never persisted.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.revision > 0
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Splits the aggregate into its stored counters.
    #[must_use]
    pub fn to_parts(&self) -> ProgressParts {
        ProgressParts {
            user_id: self.user_id.clone(),
            topics: self.topics.clone(),
            total_quizzes_taken: self.total_quizzes_taken,
            total_questions_answered: self.total_questions_answered,
            study_streak: self.streak.days,
            last_study_date: self.streak.last_study_date,
            revision: self.revision,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressView<'a> {
    user_id: &'a UserId,
    topic_progress: &'a [TopicRecord],
    total_quizzes_taken: u32,
    total_questions_answered: u32,
    overall_accuracy: f64,
    strong_topics: &'a [TopicName],
    weak_topics: &'a [TopicName],
    study_streak: u32,
    last_study_date: Option<NaiveDate>,
    revision: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Serialize for UserProgress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ProgressView {
            user_id: &self.user_id,
            topic_progress: &self.topics,
            total_quizzes_taken: self.total_quizzes_taken,
            total_questions_answered: self.total_questions_answered,
            overall_accuracy: self.overall_accuracy,
            strong_topics: &self.strong_topics,
            weak_topics: &self.weak_topics,
            study_streak: self.streak.days,
            last_study_date: self.streak.last_study_date,
            revision: self.revision,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .serialize(serializer)
    }
}

fn total_correct(topics: &[TopicRecord]) -> u64 {
    topics.iter().map(|t| u64::from(t.correct_answers())).sum()
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::topic::Difficulty;
    use crate::time::fixed_now;

    fn user() -> UserId {
        UserId::new("user-1").unwrap()
    }

    fn topic(name: &str) -> TopicName {
        TopicName::new(name).unwrap()
    }

    fn assert_invariants(p: &UserProgress) {
        let answered: u64 = p
            .topics()
            .iter()
            .map(|t| u64::from(t.questions_answered()))
            .sum();
        assert_eq!(answered, u64::from(p.total_questions_answered()));
        for t in p.topics() {
            assert!(t.correct_answers() <= t.questions_answered());
            let expected = accuracy_percent(
                u64::from(t.correct_answers()),
                u64::from(t.questions_answered()),
            );
            assert!((t.accuracy() - expected).abs() < f64::EPSILON);
        }
        for strong in p.strong_topics() {
            assert!(!p.weak_topics().contains(strong));
            assert!(p.topic(strong).is_some());
        }
        for weak in p.weak_topics() {
            assert!(p.topic(weak).is_some());
        }
        assert!((0.0..=100.0).contains(&p.overall_accuracy()));
    }

    #[test]
    fn new_progress_is_zeroed() {
        let p = UserProgress::new(user(), fixed_now());
        assert!(p.topics().is_empty());
        assert_eq!(p.total_quizzes_taken(), 0);
        assert_eq!(p.total_questions_answered(), 0);
        assert_eq!(p.overall_accuracy(), 0.0);
        assert_eq!(p.study_streak(), 0);
        assert_eq!(p.last_study_date(), None);
        assert!(!p.is_persisted());
    }

    #[test]
    fn first_correct_then_incorrect_answer() {
        let mut p = UserProgress::new(user(), fixed_now());

        let record = p.record_answer(&topic("Algebra"), true, fixed_now()).clone();
        assert_eq!(record.questions_answered(), 1);
        assert_eq!(record.correct_answers(), 1);
        assert_eq!(record.accuracy(), 100.0);
        assert_eq!(record.recommended_difficulty(), Difficulty::Hard);
        assert_eq!(p.overall_accuracy(), 100.0);
        assert_eq!(p.strong_topics(), &[topic("Algebra")]);

        let record = p.record_answer(&topic("Algebra"), false, fixed_now()).clone();
        assert_eq!(record.questions_answered(), 2);
        assert_eq!(record.correct_answers(), 1);
        assert_eq!(record.accuracy(), 50.0);
        assert_eq!(record.recommended_difficulty(), Difficulty::Medium);
        assert_eq!(p.overall_accuracy(), 50.0);
        assert!(p.strong_topics().is_empty());
        assert!(p.weak_topics().is_empty());
        assert_invariants(&p);
    }

    #[test]
    fn three_misses_make_a_weak_topic() {
        let mut p = UserProgress::new(user(), fixed_now());
        let geometry = topic("Geometry");

        p.record_answer(&geometry, false, fixed_now());
        p.record_answer(&geometry, false, fixed_now());
        assert!(p.weak_topics().is_empty());

        p.record_answer(&geometry, false, fixed_now());
        let record = p.topic(&geometry).unwrap();
        assert_eq!(record.accuracy(), 0.0);
        assert_eq!(record.questions_answered(), 3);
        assert_eq!(p.weak_topics(), &[geometry]);
        assert_invariants(&p);
    }

    #[test]
    fn aggregates_keep_collection_order() {
        let mut p = UserProgress::new(user(), fixed_now());
        for name in ["Physics", "Algebra", "Chemistry"] {
            p.record_answer(&topic(name), true, fixed_now());
        }
        let strong: Vec<&str> = p.strong_topics().iter().map(TopicName::as_str).collect();
        assert_eq!(strong, ["Physics", "Algebra", "Chemistry"]);
    }

    #[test]
    fn overall_accuracy_spans_topics() {
        let mut p = UserProgress::new(user(), fixed_now());
        p.record_answer(&topic("A"), true, fixed_now());
        p.record_answer(&topic("B"), false, fixed_now());
        p.record_answer(&topic("B"), false, fixed_now());
        p.record_answer(&topic("A"), true, fixed_now());
        assert_eq!(p.total_questions_answered(), 4);
        assert_eq!(p.overall_accuracy(), 50.0);
        assert_invariants(&p);
    }

    #[test]
    fn quiz_count_is_independent_of_answers() {
        let mut p = UserProgress::new(user(), fixed_now());
        p.increment_quizzes_taken(fixed_now());
        for _ in 0..5 {
            p.record_answer(&topic("A"), true, fixed_now());
        }
        assert_eq!(p.total_quizzes_taken(), 1);
        assert_eq!(p.total_questions_answered(), 5);
    }

    #[test]
    fn invariants_hold_over_mixed_sequence() {
        let mut p = UserProgress::new(user(), fixed_now());
        let names = ["Algebra", "Geometry", "Calculus"];
        for i in 0..60_u32 {
            let name = names[(i % 3) as usize];
            let correct = (i * 7) % 5 < 2 + (i % 3);
            p.record_answer(&topic(name), correct, fixed_now());
            assert_invariants(&p);
        }
    }

    #[test]
    fn round_trip_through_parts() {
        let mut p = UserProgress::new(user(), fixed_now());
        p.record_answer(&topic("A"), true, fixed_now());
        p.record_answer(&topic("B"), false, fixed_now());
        p.increment_quizzes_taken(fixed_now());
        p.touch_study_day(fixed_now().date_naive(), fixed_now());
        p.mark_persisted(3);

        let restored = UserProgress::from_persisted(p.to_parts()).unwrap();
        assert_eq!(restored, p);
    }

    #[test]
    fn serializes_camel_case_view() {
        let mut p = UserProgress::new(user(), fixed_now());
        p.record_answer(&topic("Algebra"), true, fixed_now());
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["userId"], "user-1");
        assert_eq!(json["totalQuestionsAnswered"], 1);
        assert_eq!(json["strongTopics"][0], "Algebra");
        assert_eq!(json["topicProgress"][0]["recommendedDifficulty"], "hard");
    }

    #[test]
    fn duplicate_topics_are_rejected_on_load() {
        let mut parts = UserProgress::new(user(), fixed_now()).to_parts();
        let record = TopicRecord::from_persisted(topic("A"), 1, 1, None).unwrap();
        parts.topics = vec![record.clone(), record];
        parts.total_questions_answered = 2;
        assert!(matches!(
            UserProgress::from_persisted(parts).unwrap_err(),
            ProgressError::DuplicateTopic(_)
        ));
    }

    #[test]
    fn inconsistent_totals_are_rejected_on_load() {
        let mut parts = UserProgress::new(user(), fixed_now()).to_parts();
        parts.topics = vec![TopicRecord::from_persisted(topic("A"), 4, 4, None).unwrap()];
        parts.total_questions_answered = 2;
        assert!(matches!(
            UserProgress::from_persisted(parts).unwrap_err(),
            ProgressError::InconsistentTotals { .. }
        ));
    }

    #[test]
    fn inflated_totals_are_rejected_on_load() {
        let mut parts = UserProgress::new(user(), fixed_now()).to_parts();
        parts.topics = vec![TopicRecord::from_persisted(topic("A"), 3, 1, None).unwrap()];
        parts.total_questions_answered = 100;
        assert!(matches!(
            UserProgress::from_persisted(parts).unwrap_err(),
            ProgressError::InconsistentTotals {
                total: 100,
                answered: 3
            }
        ));
    }

    #[test]
    fn touching_same_day_keeps_updated_at() {
        let now = fixed_now();
        let mut p = UserProgress::new(user(), now);
        let later = now + chrono::Duration::minutes(1);
        assert_eq!(p.touch_study_day(now.date_naive(), later), StreakChange::Started);
        assert_eq!(p.updated_at(), later);

        let even_later = later + chrono::Duration::minutes(1);
        assert_eq!(
            p.touch_study_day(now.date_naive(), even_later),
            StreakChange::SameDay
        );
        assert_eq!(p.updated_at(), later);
    }
}
