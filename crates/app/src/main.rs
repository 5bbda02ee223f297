use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use services::suites::sim::{SimBrowser, completion_payload, sub_suite_payload};
use services::suites::LogNotificationSink;
use services::{Clock, CompletionOutcome, SuiteDeps, SuiteOrchestrator};
use storage::list_file::JsonListRepository;
use storage::repository::{InMemoryRepository, PracticeRecordRepository, Storage};
use suite_core::model::{ExerciseId, ExerciseRef, SuiteSettings, SuiteSettingsDraft};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidRecordCap { raw: String },
    InvalidSubSuites { raw: String },
    InvalidDbUrl { raw: String },
    InvalidFallbackPath { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidRecordCap { raw } => write!(f, "invalid --record-cap value: {raw}"),
            ArgsError::InvalidSubSuites { raw } => write!(f, "invalid --multi value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidFallbackPath { raw } => write!(f, "invalid --fallback value: {raw}"),
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
    eprintln!(
        "  cargo run -p app -- simulate [--db <sqlite_url>] [--fallback <json_path>] [--record-cap <n>] [--multi <n>]"
    );
    eprintln!("  cargo run -p app -- history  [--db <sqlite_url>] [--fallback <json_path>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:suite.sqlite3");
    eprintln!("  --fallback next to the database file, as <name>.fallback.json");
    eprintln!("  --record-cap 1000");
    eprintln!();
    eprintln!("Environment:");
    eprintln!(
        "  SUITE_DB_URL, SUITE_FALLBACK_PATH, SUITE_RECORD_CAP, SUITE_OPEN_TIMEOUT_MS, RUST_LOG"
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Simulate,
    History,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "simulate" => Some(Self::Simulate),
            "history" => Some(Self::History),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    fallback_path: Option<String>,
    record_cap: Option<usize>,
    open_timeout: Option<Duration>,
    sub_suites: u32,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("SUITE_DB_URL")
            .ok()
            .map_or_else(|| normalize_sqlite_url("sqlite:suite.sqlite3".into()), normalize_sqlite_url);
        let mut fallback_path = std::env::var("SUITE_FALLBACK_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let mut record_cap = std::env::var("SUITE_RECORD_CAP")
            .ok()
            .and_then(|value| value.parse::<usize>().ok());
        let open_timeout = std::env::var("SUITE_OPEN_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_millis);
        let mut sub_suites = 0;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--fallback" => {
                    let value = require_value(args, "--fallback")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidFallbackPath { raw: value });
                    }
                    fallback_path = Some(value);
                }
                "--record-cap" => {
                    let value = require_value(args, "--record-cap")?;
                    let parsed: usize = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidRecordCap { raw: value.clone() })?;
                    record_cap = Some(parsed);
                }
                "--multi" => {
                    let value = require_value(args, "--multi")?;
                    sub_suites = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidSubSuites { raw: value.clone() })?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            fallback_path,
            record_cap,
            open_timeout,
            sub_suites,
        })
    }

    fn settings(&self) -> Result<SuiteSettings, suite_core::Error> {
        let settings = SuiteSettingsDraft {
            fallback_record_cap: self.record_cap,
            open_timeout: self.open_timeout,
            ..SuiteSettingsDraft::default()
        }
        .validate()?;
        Ok(settings)
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

/// The list store behind the primary recorder. It lives in a JSON file so records
/// written during a database outage outlast the process; an in-memory database gets
/// an in-memory list.
fn fallback_store(
    db_url: &str,
    explicit: Option<&str>,
    cap: usize,
) -> Arc<dyn PracticeRecordRepository> {
    let path = explicit
        .map(std::path::PathBuf::from)
        .or_else(|| default_fallback_path(db_url));
    match path {
        Some(path) => Arc::new(JsonListRepository::new(path, cap)),
        None => Arc::new(InMemoryRepository::capped(cap)),
    }
}

fn default_fallback_path(db_url: &str) -> Option<std::path::PathBuf> {
    let path = db_url.strip_prefix("sqlite://")?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return None;
    }
    Some(std::path::Path::new(path).with_extension("fallback.json"))
}

/// Catalog served to the simulated run.
fn demo_catalog() -> Vec<ExerciseRef> {
    vec![
        ExerciseRef::new("reading-p1-01", "The Tea Trade", "P1", "reading"),
        ExerciseRef::new("reading-p1-02", "Coral Reefs", "Part 1", "reading"),
        ExerciseRef::new("reading-p2-01", "Urban Farming", "P2", "reading"),
        ExerciseRef::new("reading-p2-02", "The Printing Press", "part2", "reading"),
        ExerciseRef::new("reading-p3-01", "Memory and Sleep", "P3", "reading"),
        ExerciseRef::new("reading-p3-02", "Language Acquisition", "passage 3", "reading"),
        ExerciseRef::new("listening-100-p1", "Listening 100 Part 1", "P1", "listening"),
    ]
}

async fn simulate(orchestrator: &mut SuiteOrchestrator, sub_suites: u32) {
    if orchestrator.start_suite().await.is_err() {
        return;
    }
    let mut score = 6;
    while let Some(exercise) = orchestrator
        .active_suite()
        .and_then(|session| session.current_exercise())
        .map(|exercise| exercise.id.clone())
    {
        score = (score + 1).min(10);
        let mut payload = completion_payload(score, 10, 900);
        payload["spellingErrors"] = json!([{ "word": "necessary", "userInput": "neccesary" }]);
        match orchestrator.handle_completion(&exercise, &payload).await {
            Ok(CompletionOutcome::Single(step)) => tracing::info!(?step, "simulated completion"),
            Ok(other) => tracing::warn!(?other, "unexpected routing"),
            Err(_) => break,
        }
    }

    if sub_suites == 0 {
        return;
    }
    let listening = ExerciseId::new("listening-100-p1");
    for suite_id in 1..=sub_suites {
        let total = (suite_id == 1).then_some(sub_suites);
        let payload = sub_suite_payload(suite_id, total, 5 + suite_id % 5, 10);
        if orchestrator.handle_completion(&listening, &payload).await.is_err() {
            break;
        }
    }
    if orchestrator.multi().session("listening-100-p1").is_some() {
        match orchestrator.finalize_multi_now("listening-100-p1").await {
            Ok(summary) => tracing::info!(?summary, "multi-suite finalized"),
            Err(err) => tracing::warn!(error = %err, "multi-suite finalize failed"),
        }
    }
}

async fn print_history(orchestrator: &SuiteOrchestrator) {
    let records = orchestrator.history().await;
    if records.is_empty() {
        println!("no practice records yet");
        return;
    }
    for record in records {
        println!(
            "{}  {:<45}  {:>3}/{:<3}  {:>3}%  {}",
            record.recorded_at.format("%Y-%m-%d %H:%M"),
            record.title,
            record.correct_answers(),
            record.total_questions(),
            record.percentage(),
            if record.is_aggregate() { "aggregate" } else { "single" },
        );
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None => Command::Simulate,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Simulate,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let mut iter = argv.into_iter();
    let parsed = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    let settings = parsed.settings()?;

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&parsed.db_url)?;
    let fallback = fallback_store(
        &parsed.db_url,
        parsed.fallback_path.as_deref(),
        settings.fallback_record_cap(),
    );
    let storage = Storage::sqlite(&parsed.db_url, fallback).await?;
    tracing::info!(db = %parsed.db_url, "storage ready");

    let mut orchestrator = SuiteOrchestrator::new(SuiteDeps {
        opener: SimBrowser::new(),
        exam_index: Arc::new(demo_catalog()),
        notifier: Arc::new(LogNotificationSink),
        storage,
        settings,
        clock: Clock::system(),
    });

    match cmd {
        Command::Simulate => {
            simulate(&mut orchestrator, parsed.sub_suites).await;
            orchestrator.shutdown();
            print_history(&orchestrator).await;
        }
        Command::History => print_history(&orchestrator).await,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_file_sits_next_to_the_database() {
        assert_eq!(
            default_fallback_path("sqlite:///var/lib/suite/suite.sqlite3?mode=rwc"),
            Some(std::path::PathBuf::from("/var/lib/suite/suite.fallback.json"))
        );
        assert_eq!(default_fallback_path("sqlite::memory:"), None);
    }

    #[test]
    fn relative_urls_become_absolute() {
        let url = normalize_sqlite_url("sqlite:data/suite.sqlite3".into());
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/suite.sqlite3"));
        assert_eq!(normalize_sqlite_url("sqlite::memory:".into()), "sqlite::memory:");
    }
}
