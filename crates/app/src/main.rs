use std::fmt;

use serde::Serialize;
use services::{AppServices, Clock, TutorConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tutor_core::model::{DEFAULT_QUIZ_HISTORY_LIMIT, QuizDraft, QuizId, TopicName, UserId};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidValue { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    ConfirmationRequired,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidValue { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::ConfirmationRequired => {
                write!(f, "reset deletes all progress and quizzes; pass --yes to confirm")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  tutor progress    --user <id>");
    eprintln!("  tutor answer      --user <id> --topic <name> (--correct | --incorrect)");
    eprintln!("  tutor quiz-taken  --user <id>");
    eprintln!("  tutor touch       --user <id>");
    eprintln!("  tutor dashboard   --user <id>");
    eprintln!("  tutor topic       --user <id> --topic <name>");
    eprintln!("  tutor history     --user <id> [--limit <n>]");
    eprintln!("  tutor reset       --user <id> --yes");
    eprintln!("  tutor create-quiz --file <draft.json>");
    eprintln!("  tutor quiz        --quiz <id>");
    eprintln!("  tutor submit-quiz --quiz <id> [--answer <value>]...");
    eprintln!();
    eprintln!("Every command accepts --db <sqlite_url> (default sqlite://tutor.sqlite3).");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  TUTOR_DB_URL, TUTOR_RECENT_QUIZ_LIMIT, TUTOR_UTC_OFFSET_MINUTES,");
    eprintln!("  TUTOR_STREAK_POLICY (dashboard|activity), TUTOR_MAX_WRITE_ATTEMPTS, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Progress,
    Answer,
    QuizTaken,
    Touch,
    Dashboard,
    Topic,
    History,
    Reset,
    CreateQuiz,
    Quiz,
    SubmitQuiz,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "progress" => Some(Self::Progress),
            "answer" => Some(Self::Answer),
            "quiz-taken" => Some(Self::QuizTaken),
            "touch" => Some(Self::Touch),
            "dashboard" => Some(Self::Dashboard),
            "topic" => Some(Self::Topic),
            "history" => Some(Self::History),
            "reset" => Some(Self::Reset),
            "create-quiz" => Some(Self::CreateQuiz),
            "quiz" => Some(Self::Quiz),
            "submit-quiz" => Some(Self::SubmitQuiz),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Args {
    db_url: String,
    user: Option<UserId>,
    topic: Option<TopicName>,
    correct: Option<bool>,
    quiz: Option<QuizId>,
    answers: Vec<String>,
    file: Option<String>,
    limit: Option<u32>,
    confirmed: bool,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_url: std::env::var("TUTOR_DB_URL")
                .ok()
                .map_or_else(|| "sqlite://tutor.sqlite3".into(), normalize_sqlite_url),
            ..Self::default()
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = normalize_sqlite_url(value);
                }
                "--user" => {
                    let value = require_value(args, "--user")?;
                    let user = UserId::new(&value).map_err(|_| ArgsError::InvalidValue {
                        flag: "--user",
                        raw: value.clone(),
                    })?;
                    parsed.user = Some(user);
                }
                "--topic" => {
                    let value = require_value(args, "--topic")?;
                    let topic = TopicName::new(&value).map_err(|_| ArgsError::InvalidValue {
                        flag: "--topic",
                        raw: value.clone(),
                    })?;
                    parsed.topic = Some(topic);
                }
                "--correct" => parsed.correct = Some(true),
                "--incorrect" => parsed.correct = Some(false),
                "--quiz" => {
                    let value = require_value(args, "--quiz")?;
                    let id = value.parse::<QuizId>().map_err(|_| ArgsError::InvalidValue {
                        flag: "--quiz",
                        raw: value.clone(),
                    })?;
                    parsed.quiz = Some(id);
                }
                "--answer" => parsed.answers.push(require_value(args, "--answer")?),
                "--file" => parsed.file = Some(require_value(args, "--file")?),
                "--limit" => {
                    let value = require_value(args, "--limit")?;
                    let limit = value
                        .parse::<u32>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| ArgsError::InvalidValue {
                            flag: "--limit",
                            raw: value.clone(),
                        })?;
                    parsed.limit = Some(limit);
                }
                "--yes" => parsed.confirmed = true,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }

    fn user(&self) -> Result<&UserId, ArgsError> {
        self.user
            .as_ref()
            .ok_or(ArgsError::MissingFlag { flag: "--user" })
    }

    fn topic(&self) -> Result<&TopicName, ArgsError> {
        self.topic
            .as_ref()
            .ok_or(ArgsError::MissingFlag { flag: "--topic" })
    }

    fn quiz(&self) -> Result<QuizId, ArgsError> {
        self.quiz.ok_or(ArgsError::MissingFlag { flag: "--quiz" })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);

    let cmd = match argv.next() {
        None => {
            print_usage();
            return Err(ArgsError::MissingFlag { flag: "<command>" }.into());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            ArgsError::UnknownArg(first.clone())
        })?,
    };

    let parsed = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    if cmd == Command::Reset && !parsed.confirmed {
        return Err(ArgsError::ConfirmationRequired.into());
    }

    let config = TutorConfig::from_env()?;
    debug!(db = %parsed.db_url, ?config, "starting");

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&parsed.db_url)?;
    let app = AppServices::new_sqlite(&parsed.db_url, Clock::default_clock(), config).await?;
    let progress = app.progress();
    let quizzes = app.quizzes();

    match cmd {
        Command::Progress => print_json(&progress.progress(parsed.user()?).await?),
        Command::Answer => {
            let correct = parsed
                .correct
                .ok_or(ArgsError::MissingFlag { flag: "--correct/--incorrect" })?;
            let updated = progress
                .record_answer(parsed.user()?, parsed.topic()?, correct)
                .await?;
            print_json(&updated)
        }
        Command::QuizTaken => print_json(&progress.increment_quizzes_taken(parsed.user()?).await?),
        Command::Touch => print_json(&progress.touch_study_day(parsed.user()?).await?),
        Command::Dashboard => print_json(&progress.dashboard_snapshot(parsed.user()?).await?),
        Command::Topic => {
            let record = progress
                .topic_progress(parsed.user()?, parsed.topic()?)
                .await?;
            print_json(&record)
        }
        Command::History => {
            let limit = parsed.limit.unwrap_or(DEFAULT_QUIZ_HISTORY_LIMIT);
            print_json(&progress.quiz_history(parsed.user()?, limit).await?)
        }
        Command::Reset => {
            let user = parsed.user()?;
            progress.reset_progress(user).await?;
            print_json(&serde_json::json!({ "reset": user }))
        }
        Command::CreateQuiz => {
            let path = parsed
                .file
                .as_deref()
                .ok_or(ArgsError::MissingFlag { flag: "--file" })?;
            let draft: QuizDraft = serde_json::from_str(&std::fs::read_to_string(path)?)?;
            print_json(&quizzes.create_quiz(draft).await?)
        }
        Command::Quiz => {
            let id = parsed.quiz()?;
            let quiz = quizzes
                .get_quiz(id)
                .await?
                .ok_or(services::QuizServiceError::NotFound(id))?;
            print_json(&quiz)
        }
        Command::SubmitQuiz => {
            let submission = quizzes
                .submit_quiz(parsed.quiz()?, parsed.answers.as_slice())
                .await?;
            print_json(&submission)
        }
    }
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, ArgsError> {
        let mut iter = args.iter().map(|s| (*s).to_owned());
        Args::parse(&mut iter)
    }

    #[test]
    fn parses_answer_flags() {
        let args = parse(&["--user", "ada", "--topic", " Algebra ", "--incorrect"]).unwrap();
        assert_eq!(args.user.unwrap().as_str(), "ada");
        assert_eq!(args.topic.unwrap().as_str(), "Algebra");
        assert_eq!(args.correct, Some(false));
    }

    #[test]
    fn collects_repeated_answers() {
        let args = parse(&["--quiz", "7", "--answer", "A", "--answer", "C"]).unwrap();
        assert_eq!(args.quiz, Some(QuizId::new(7)));
        assert_eq!(args.answers, vec!["A".to_owned(), "C".to_owned()]);
    }

    #[test]
    fn parses_history_limit() {
        let args = parse(&["--user", "ada", "--limit", "3"]).unwrap();
        assert_eq!(args.limit, Some(3));
        assert_eq!(Command::from_arg("history"), Some(Command::History));
        assert!(matches!(
            parse(&["--limit", "0"]),
            Err(ArgsError::InvalidValue { flag: "--limit", .. })
        ));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            parse(&["--quiz", "seven"]),
            Err(ArgsError::InvalidValue { flag: "--quiz", .. })
        ));
        assert!(matches!(
            parse(&["--user", "  "]),
            Err(ArgsError::InvalidValue { flag: "--user", .. })
        ));
        assert!(matches!(
            parse(&["--user"]),
            Err(ArgsError::MissingValue { flag: "--user" })
        ));
        assert!(matches!(parse(&["--bogus"]), Err(ArgsError::UnknownArg(_))));
    }

    #[test]
    fn memory_urls_are_left_alone() {
        assert_eq!(normalize_sqlite_url("sqlite::memory:".into()), "sqlite::memory:");
        assert_eq!(
            normalize_sqlite_url("sqlite:///tmp/t.db".into()),
            "sqlite:///tmp/t.db"
        );
        assert_eq!(normalize_sqlite_url("/tmp/t.db".into()), "sqlite:///tmp/t.db");
    }
}
