use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::SetupError;
use crate::remote::{MockServerConfig, RemoteConfig};

/// Query Loadgen - concurrent load against a conversational query API
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    pub log_json: bool,

    /// Print the report as JSON instead of a table
    #[arg(long, global = true)]
    pub json: bool,

    /// Write the tracking record (params, metrics, per-item records) to this file
    #[arg(short = 'o', long, env = "RUN_OUTPUT", global = true)]
    pub output: Option<String>,

    /// Include raw result payloads in the tracking record
    #[arg(long, global = true)]
    pub include_payloads: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a load test against a remote query service
    Run {
        /// Base URL of the query API
        #[arg(short = 'u', long, env = "QUERY_API_URL")]
        base_url: String,

        /// Bearer token for the query API
        #[arg(short = 't', long, env = "QUERY_API_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// HTTP connect timeout in seconds
        #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
        connect_timeout: u64,

        /// HTTP request timeout in seconds
        #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "60")]
        http_timeout: u64,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Start an in-process mock service and run the load test against it
    Standalone {
        #[command(flatten)]
        run: RunArgs,

        /// Polls answered as pending before a query completes
        #[arg(long, default_value = "2")]
        pending_polls: u32,

        /// Mock latency per call in milliseconds
        #[arg(long, default_value = "50")]
        latency_ms: u64,

        /// Fraction of calls throttled with 429 (0.0 to 1.0)
        #[arg(long, default_value = "0.0")]
        throttle_rate: f64,

        /// Retry-After seconds sent with 429 responses
        #[arg(long)]
        retry_after: Option<u64>,

        /// Fraction of submits failed with 500 (0.0 to 1.0)
        #[arg(long, default_value = "0.0")]
        error_rate: f64,
    },

    /// List the named scenarios
    Scenarios,
}

/// Run shape flags shared by `run` and `standalone`. Unset flags fall back to the scenario.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Named scenario (burst, spread, smoke)
    #[arg(short = 's', long, env = "SCENARIO")]
    pub scenario: Option<Scenario>,

    /// Number of questions to send
    #[arg(short = 'n', long = "questions", env = "QUESTION_COUNT")]
    pub question_count: Option<usize>,

    /// Spread dispatch evenly over this many seconds (0 = burst)
    #[arg(long, env = "SPREAD_SECS")]
    pub spread_secs: Option<f64>,

    /// Maximum requests in flight
    #[arg(short = 'w', long = "workers", env = "MAX_WORKERS")]
    pub max_workers: Option<usize>,

    /// Throttled attempts allowed per question
    #[arg(long, env = "MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Backoff base wait in milliseconds
    #[arg(long, env = "BASE_WAIT_MS")]
    pub base_wait_ms: Option<u64>,

    /// Backoff cap in milliseconds
    #[arg(long, env = "MAX_WAIT_MS")]
    pub max_wait_ms: Option<u64>,

    /// Maximum random jitter added to each backoff, in milliseconds
    #[arg(long, env = "JITTER_MS")]
    pub jitter_ms: Option<u64>,

    /// Per-question timeout in seconds
    #[arg(long, env = "ITEM_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Delay between polls of a pending query, in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// File with one question per line (# starts a comment)
    #[arg(long, env = "QUESTIONS_FILE")]
    pub questions_file: Option<String>,

    /// Question payload (repeatable)
    #[arg(short = 'q', long = "question")]
    pub questions: Vec<String>,

    /// Sample questions randomly instead of cycling through them
    #[arg(long)]
    pub sample: bool,
}

// ==================================================================================================
// Run configuration
// ==================================================================================================

/// Throttling retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Throttled attempts allowed before giving up
    pub max_retries: u32,
    pub base_wait: Duration,
    pub max_wait: Duration,
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
            jitter_max: Duration::from_secs(1),
        }
    }
}

/// How payloads are drawn when there are fewer payloads than questions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuestionSelection {
    #[default]
    Cycle,
    Sample,
}

/// Immutable description of one load test run
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub scenario: Option<Scenario>,
    pub question_count: usize,
    /// `None` = burst: every item is due at run start
    pub spread_window: Option<Duration>,
    pub max_workers: usize,
    pub retry: RetryPolicy,
    pub item_timeout: Duration,
    pub poll_interval: Duration,
    pub questions: Vec<String>,
    pub selection: QuestionSelection,
}

impl Default for RunConfig {
    fn default() -> Self {
        Scenario::Smoke.run_config()
    }
}

impl RunConfig {
    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> std::result::Result<(), SetupError> {
        let invalid = |msg: &str| Err(SetupError::InvalidConfig(msg.to_string()));

        if self.question_count == 0 {
            return invalid("question_count must be at least 1");
        }
        if self.max_workers == 0 {
            return invalid("max_workers must be at least 1");
        }
        if self.retry.max_retries == 0 {
            return invalid("max_retries must be at least 1");
        }
        if self.retry.base_wait > self.retry.max_wait {
            return invalid("base_wait must not exceed max_wait");
        }
        if self.item_timeout.is_zero() {
            return invalid("per-item timeout must be positive");
        }
        if self.spread_window.is_some_and(|w| w.is_zero()) {
            return invalid("spread window must be positive (omit it for burst mode)");
        }
        if self.questions.iter().all(|q| q.trim().is_empty()) {
            return Err(SetupError::NoQuestions);
        }
        if self.questions.iter().any(|q| q.trim().is_empty()) {
            return invalid("question payloads must not be blank");
        }
        Ok(())
    }
}

// ==================================================================================================
// Named scenarios
// ==================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// 50 questions at once, 20 workers
    Burst,
    /// 35 questions spread over 30 seconds, 10 workers
    Spread,
    /// 5 questions at once, 2 workers
    Smoke,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Scenario::Burst, Scenario::Spread, Scenario::Smoke];

    /// Preset run shape with default retry and timing settings and no questions
    pub fn run_config(self) -> RunConfig {
        let (question_count, spread_window, max_workers) = match self {
            Scenario::Burst => (50, None, 20),
            Scenario::Spread => (35, Some(Duration::from_secs(30)), 10),
            Scenario::Smoke => (5, None, 2),
        };
        RunConfig {
            scenario: Some(self),
            question_count,
            spread_window,
            max_workers,
            retry: RetryPolicy::default(),
            item_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            questions: Vec::new(),
            selection: QuestionSelection::Cycle,
        }
    }

    pub fn describe(self) -> String {
        let config = self.run_config();
        let spread = match config.spread_window {
            Some(window) => format!("spread over {}s", window.as_secs()),
            None => "burst".to_string(),
        };
        format!(
            "{:<8} {} questions, {}, {} workers",
            self, config.question_count, spread, config.max_workers
        )
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scenario::Burst => write!(f, "burst"),
            Scenario::Spread => write!(f, "spread"),
            Scenario::Smoke => write!(f, "smoke"),
        }
    }
}

impl std::str::FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "burst" => Ok(Scenario::Burst),
            "spread" => Ok(Scenario::Spread),
            "smoke" => Ok(Scenario::Smoke),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

impl RunArgs {
    /// Build the run configuration: explicit flags > scenario preset > defaults.
    /// `fallback_questions` is used when no question flag or file is given.
    pub fn resolve(&self, fallback_questions: &[String]) -> Result<RunConfig> {
        let mut config = match self.scenario {
            Some(scenario) => scenario.run_config(),
            None => RunConfig {
                scenario: None,
                ..RunConfig::default()
            },
        };

        if let Some(count) = self.question_count {
            config.question_count = count;
        }
        if let Some(secs) = self.spread_secs {
            config.spread_window = if secs == 0.0 {
                None
            } else {
                Some(
                    Duration::try_from_secs_f64(secs)
                        .with_context(|| format!("Invalid spread window: {}s", secs))?,
                )
            };
        }
        if let Some(workers) = self.max_workers {
            config.max_workers = workers;
        }
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = max_retries;
        }
        if let Some(ms) = self.base_wait_ms {
            config.retry.base_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_wait_ms {
            config.retry.max_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = self.jitter_ms {
            config.retry.jitter_max = Duration::from_millis(ms);
        }
        if let Some(secs) = self.timeout_secs {
            config.item_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if self.sample {
            config.selection = QuestionSelection::Sample;
        }

        let mut questions = Vec::new();
        if let Some(path) = &self.questions_file {
            questions.extend(load_questions(&expand_tilde(path))?);
        }
        questions.extend(
            self.questions
                .iter()
                .map(|q| q.trim())
                .filter(|q| !q.is_empty())
                .map(str::to_string),
        );
        if questions.is_empty() {
            questions.extend(fallback_questions.iter().cloned());
        }
        config.questions = questions;

        Ok(config)
    }
}

/// What the binary should do
#[derive(Debug, Clone)]
pub enum Mode {
    Remote { remote: RemoteConfig, run: RunConfig },
    Standalone { mock: MockServerConfig, run: RunConfig },
    ListScenarios,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,

    // Output
    pub json_output: bool,
    pub output: Option<PathBuf>,
    pub include_payloads: bool,

    // Logging
    pub log_level: String,
    pub log_json: bool,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > scenario > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let mode = match args.command {
            Command::Run {
                base_url,
                token,
                connect_timeout,
                http_timeout,
                run,
            } => {
                let run = run.resolve(&[])?;
                let remote = RemoteConfig {
                    base_url,
                    token,
                    max_connections: run.max_workers,
                    connect_timeout: Duration::from_secs(connect_timeout),
                    request_timeout: Duration::from_secs(http_timeout),
                };
                Mode::Remote { remote, run }
            }
            Command::Standalone {
                run,
                pending_polls,
                latency_ms,
                throttle_rate,
                retry_after,
                error_rate,
            } => {
                let mut resolved = run.resolve(&synthetic_questions())?;
                if run.poll_interval_ms.is_none() {
                    // Mock answers in milliseconds
                    resolved.poll_interval = Duration::from_millis(100);
                }
                let mock = MockServerConfig {
                    port: 0,
                    pending_polls,
                    latency_ms,
                    throttle_rate,
                    retry_after_secs: retry_after,
                    error_rate,
                    ..Default::default()
                };
                Mode::Standalone { mock, run: resolved }
            }
            Command::Scenarios => Mode::ListScenarios,
        };

        Ok(Config {
            mode,
            json_output: args.json,
            output: args.output.map(|s| expand_tilde(&s)),
            include_payloads: args.include_payloads,
            log_level: args.log_level,
            log_json: args.log_json,
        })
    }
}

/// Placeholder payloads for runs against the mock service
fn synthetic_questions() -> Vec<String> {
    [
        "How many orders were placed last week?",
        "What are the top 10 products by revenue?",
        "Show monthly active users for the last quarter",
        "Which region had the highest churn rate?",
        "What is the average order value by channel?",
    ]
    .iter()
    .map(|q| q.to_string())
    .collect()
}

/// Read questions, one per line; blank lines and `#` comments are skipped
pub fn load_questions(path: &std::path::Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read questions file: {}", path.display()))?;
    Ok(parse_questions(&content))
}

fn parse_questions(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["query-loadgen"];
        argv.extend_from_slice(args);
        Config::from_args(CliArgs::try_parse_from(argv).unwrap()).unwrap()
    }

    fn valid() -> RunConfig {
        RunConfig {
            questions: vec!["q".to_string()],
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));

        // Just "~" without slash should not expand
        assert_eq!(expand_tilde("~"), PathBuf::from("~"));
    }

    #[test]
    fn test_scenario_presets() {
        let burst = Scenario::Burst.run_config();
        assert_eq!(burst.question_count, 50);
        assert_eq!(burst.spread_window, None);
        assert_eq!(burst.max_workers, 20);

        let spread = Scenario::Spread.run_config();
        assert_eq!(spread.question_count, 35);
        assert_eq!(spread.spread_window, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_scenario_parsing_case_insensitive() {
        assert_eq!("BURST".parse::<Scenario>(), Ok(Scenario::Burst));
        assert_eq!("Spread".parse::<Scenario>(), Ok(Scenario::Spread));
        assert!("ramp".parse::<Scenario>().is_err());
        for scenario in Scenario::ALL {
            assert_eq!(scenario.to_string().parse::<Scenario>(), Ok(scenario));
        }
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let config = RunConfig {
            max_workers: 0,
            ..valid()
        };
        assert!(matches!(config.validate(), Err(SetupError::InvalidConfig(_))));

        let config = RunConfig {
            question_count: 0,
            ..valid()
        };
        assert!(matches!(config.validate(), Err(SetupError::InvalidConfig(_))));

        let mut config = valid();
        config.retry.base_wait = Duration::from_secs(60);
        assert!(matches!(config.validate(), Err(SetupError::InvalidConfig(_))));

        let config = RunConfig {
            questions: vec!["  ".to_string()],
            ..valid()
        };
        assert!(matches!(config.validate(), Err(SetupError::NoQuestions)));

        let config = RunConfig {
            questions: vec!["".to_string(), "real".to_string()],
            ..valid()
        };
        assert!(matches!(config.validate(), Err(SetupError::InvalidConfig(_))));
    }

    #[test]
    fn test_blank_question_flags_are_dropped() {
        let config = parse(&[
            "run", "-u", "http://localhost:9000", "-q", "", "-q", "real", "-q", "   ",
        ]);
        match config.mode {
            Mode::Remote { run, .. } => {
                assert_eq!(run.questions, vec!["real"]);
                assert!(run.validate().is_ok());
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_flags_override_scenario() {
        let config = parse(&[
            "run",
            "--base-url",
            "http://localhost:9000",
            "--scenario",
            "spread",
            "-w",
            "4",
            "--max-retries",
            "3",
            "-q",
            "first",
            "-q",
            "second",
        ]);

        match config.mode {
            Mode::Remote { remote, run } => {
                assert_eq!(remote.base_url, "http://localhost:9000");
                assert_eq!(remote.max_connections, 4);
                assert_eq!(run.scenario, Some(Scenario::Spread));
                assert_eq!(run.question_count, 35);
                assert_eq!(run.spread_window, Some(Duration::from_secs(30)));
                assert_eq!(run.max_workers, 4);
                assert_eq!(run.retry.max_retries, 3);
                assert_eq!(run.questions, vec!["first", "second"]);
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_zero_spread_forces_burst() {
        let config = parse(&[
            "run",
            "-u",
            "http://localhost:9000",
            "-s",
            "spread",
            "--spread-secs",
            "0",
            "-q",
            "q",
        ]);
        match config.mode {
            Mode::Remote { run, .. } => assert_eq!(run.spread_window, None),
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_negative_spread_rejected() {
        let args = CliArgs::try_parse_from([
            "query-loadgen",
            "run",
            "-u",
            "http://localhost:9000",
            "--spread-secs=-5",
        ])
        .unwrap();
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn test_standalone_uses_synthetic_questions() {
        let config = parse(&["standalone", "--throttle-rate", "0.2", "--json"]);
        assert!(config.json_output);
        match config.mode {
            Mode::Standalone { mock, run } => {
                assert_eq!(mock.throttle_rate, 0.2);
                assert_eq!(run.questions.len(), synthetic_questions().len());
                assert!(run.validate().is_ok());
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_parse_questions_skips_comments() {
        let questions = parse_questions("# header\nfirst question\n\n  second  \n#skip\n");
        assert_eq!(questions, vec!["first question", "second"]);
    }
}
