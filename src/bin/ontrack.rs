//! OnTrack CLI - Command-line interface for the OnTrack engine
//!
//! Commands:
//! - view: Evaluate a single reading and print one view
//! - run: Evaluate streaming readings from stdin (streaming mode)
//! - timeline: Print the projected track across one local day
//! - doctor: Diagnose settings and environment
//! - settings: Print a settings template

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ontrack::calendar::{self, parse_timezone};
use ontrack::{
    ComputeError, Incomplete, MetricEngine, MetricReading, MetricType, MetricView, Settings,
    ViewKind, ViewResponse, ENGINE_VERSION, PRODUCER_NAME,
};

/// OnTrack - On-device goal projection for wearable activity metrics
#[derive(Parser)]
#[command(name = "ontrack")]
#[command(author = "Gondwana Software")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Project daily activity goals and compare readings against them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a single reading
    View {
        /// Settings JSON file (defaults are used when omitted)
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Metric: energy, steps, distance or floors
        #[arg(short, long)]
        metric: MetricType,

        /// Cumulative value achieved so far today, in the metric's native unit
        #[arg(long)]
        value: f64,

        /// Reading time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<String>,

        /// User timezone (IANA format, e.g., "Australia/Sydney")
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// View to produce: card, complication, tile or detail
        #[arg(long, default_value = "card")]
        kind: ViewKind,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Evaluate readings streamed on stdin (one {"value", "timestamp"} per line)
    Run {
        /// Settings JSON file (defaults are used when omitted)
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Metric: energy, steps, distance or floors
        #[arg(short, long)]
        metric: MetricType,

        /// User timezone
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// View to produce for each reading
        #[arg(long, default_value = "card")]
        kind: ViewKind,

        /// Flush output after each record
        #[arg(long, default_value = "true")]
        flush: bool,
    },

    /// Print the projected track across one local day
    Timeline {
        /// Settings JSON file (defaults are used when omitted)
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Metric: energy, steps, distance or floors
        #[arg(short, long)]
        metric: MetricType,

        /// Local date (YYYY-MM-DD); defaults to today in the timezone
        #[arg(long)]
        date: Option<NaiveDate>,

        /// User timezone
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Minutes between samples
        #[arg(long, default_value = "60")]
        step_minutes: u32,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Diagnose settings and environment
    Doctor {
        /// Settings JSON file to check
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Timezone to check
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print default settings as a template
    Settings {
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr so stdout stays machine-readable
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ontrack=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), OnTrackCliError> {
    match cli.command {
        Commands::View {
            settings,
            metric,
            value,
            at,
            timezone,
            kind,
            output_format,
        } => cmd_view(
            settings.as_deref(),
            metric,
            value,
            at.as_deref(),
            &timezone,
            kind,
            output_format,
        ),

        Commands::Run {
            settings,
            metric,
            timezone,
            kind,
            flush,
        } => cmd_run(settings.as_deref(), metric, &timezone, kind, flush),

        Commands::Timeline {
            settings,
            metric,
            date,
            timezone,
            step_minutes,
            output_format,
        } => cmd_timeline(
            settings.as_deref(),
            metric,
            date,
            &timezone,
            step_minutes,
            output_format,
        ),

        Commands::Doctor {
            settings,
            timezone,
            json,
        } => cmd_doctor(settings.as_deref(), &timezone, json),

        Commands::Settings { pretty } => cmd_settings(pretty),
    }
}

fn cmd_view(
    settings: Option<&Path>,
    metric: MetricType,
    value: f64,
    at: Option<&str>,
    timezone: &str,
    kind: ViewKind,
    output_format: OutputFormat,
) -> Result<(), OnTrackCliError> {
    let tz = parse_timezone(timezone)?;
    let engine = MetricEngine::with_settings(metric, load_settings(settings)?);

    let instant = match at {
        Some(text) => DateTime::parse_from_rfc3339(text)
            .map_err(|e| OnTrackCliError::InvalidInstant(format!("{text}: {e}")))?
            .with_timezone(&tz),
        None => Utc::now().with_timezone(&tz),
    };

    let response = ViewResponse::from_result(metric, engine.render(kind, value, &instant));
    print!("{}", format_output(&[response], &output_format)?);
    Ok(())
}

/// One evaluated line of `run` output
#[derive(Serialize)]
struct RenderedReading {
    timestamp: DateTime<Utc>,
    value: f64,
    #[serde(flatten)]
    response: ViewResponse<MetricView>,
}

fn cmd_run(
    settings: Option<&Path>,
    metric: MetricType,
    timezone: &str,
    kind: ViewKind,
    flush: bool,
) -> Result<(), OnTrackCliError> {
    let tz = parse_timezone(timezone)?;
    let engine = MetricEngine::with_settings(metric, load_settings(settings)?);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut count = 0usize;

    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let reading: MetricReading = serde_json::from_str(trimmed).map_err(|e| {
            OnTrackCliError::ParseError(format!("Failed to parse reading: {}", e))
        })?;

        let instant = reading.timestamp.with_timezone(&tz);
        let record = RenderedReading {
            timestamp: reading.timestamp,
            value: reading.value,
            response: ViewResponse::from_result(metric, engine.render(kind, reading.value, &instant)),
        };

        writeln!(stdout, "{}", serde_json::to_string(&record)?)?;
        if flush {
            stdout.flush()?;
        }
        count += 1;
    }

    stdout.flush()?;
    tracing::info!(%metric, readings = count, "stream finished");
    Ok(())
}

/// One sample of the projected track
#[derive(Serialize)]
struct TimelinePoint {
    local_time: String,
    elapsed_today_ms: i64,
    track: f64,
    display: String,
}

fn cmd_timeline(
    settings: Option<&Path>,
    metric: MetricType,
    date: Option<NaiveDate>,
    timezone: &str,
    step_minutes: u32,
    output_format: OutputFormat,
) -> Result<(), OnTrackCliError> {
    let tz = parse_timezone(timezone)?;
    let engine = MetricEngine::with_settings(metric, load_settings(settings)?);
    let date = date.unwrap_or_else(|| Utc::now().with_timezone(&tz).date_naive());

    let day_start = calendar::start_of_day(&tz, date);
    let day_end = day_start + Duration::milliseconds(calendar::day_duration_ms(&tz, date));
    let step = Duration::minutes(i64::from(step_minutes.max(1)));

    let mut instants = Vec::new();
    let mut at = day_start;
    while at < day_end {
        instants.push(at);
        at = at + step;
    }
    // Last instant of the day, where the track meets the goal
    instants.push(day_end - Duration::milliseconds(1));

    let mut points = Vec::with_capacity(instants.len());
    for instant in instants {
        let local = instant.with_timezone(&tz);
        let projection = engine
            .projected_track(&local)
            .map_err(OnTrackCliError::Incomplete)?;
        points.push(TimelinePoint {
            local_time: local.to_rfc3339(),
            elapsed_today_ms: projection.elapsed_today_ms,
            track: projection.track,
            display: engine.format_number_with_unit(projection.track),
        });
    }

    print!("{}", format_output(&points, &output_format)?);
    Ok(())
}

fn cmd_doctor(settings: Option<&Path>, timezone: &str, json: bool) -> Result<(), OnTrackCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("OnTrack engine version {}", ENGINE_VERSION),
    });

    // Timezone
    let tz: Option<Tz> = match parse_timezone(timezone) {
        Ok(tz) => {
            let today = Utc::now().with_timezone(&tz).date_naive();
            let hours = calendar::day_duration_ms(&tz, today) as f64 / 3_600_000.0;
            checks.push(DoctorCheck {
                name: "timezone".to_string(),
                status: CheckStatus::Ok,
                message: format!("{} (today is {} hours long)", tz.name(), hours),
            });
            Some(tz)
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "timezone".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            });
            None
        }
    };

    // Settings
    let loaded = match settings {
        Some(path) if !path.exists() => {
            checks.push(DoctorCheck {
                name: "settings".to_string(),
                status: CheckStatus::Warning,
                message: "Settings file does not exist; using defaults".to_string(),
            });
            Some(Settings::default())
        }
        Some(path) => match load_settings(Some(path)) {
            Ok(settings) => {
                checks.push(DoctorCheck {
                    name: "settings".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Settings file valid (modified at {})", settings.timestamp),
                });
                Some(settings)
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "settings".to_string(),
                    status: CheckStatus::Error,
                    message: CliError::from(e).message,
                });
                None
            }
        },
        None => {
            checks.push(DoctorCheck {
                name: "settings".to_string(),
                status: CheckStatus::Ok,
                message: "No settings file given; using defaults".to_string(),
            });
            Some(Settings::default())
        }
    };

    // Per-metric completeness, evaluated for today so derived checks run too
    if let (Some(settings), Some(tz)) = (loaded, tz) {
        let now = Utc::now().with_timezone(&tz);
        for metric in MetricType::ALL {
            let engine = MetricEngine::with_settings(metric, settings.clone());
            let check = match engine.projected_track(&now) {
                Ok(_) => DoctorCheck {
                    name: metric.to_string(),
                    status: CheckStatus::Ok,
                    message: match engine.bmr_label() {
                        Some(label) => format!("Trackable {label}"),
                        None => "Trackable".to_string(),
                    },
                },
                Err(reason) => DoctorCheck {
                    name: metric.to_string(),
                    status: CheckStatus::Warning,
                    message: format!("Not trackable: {reason}"),
                },
            };
            checks.push(check);
        }
    }

    // Check stdin is available (for streaming mode)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (streaming mode ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("OnTrack Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(OnTrackCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_settings(pretty: bool) -> Result<(), OnTrackCliError> {
    let settings = Settings::default();
    if pretty {
        println!("{}", serde_json::to_string_pretty(&settings)?);
    } else {
        println!("{}", settings.to_json()?);
    }
    Ok(())
}

// Helper functions

fn load_settings(path: Option<&Path>) -> Result<Settings, OnTrackCliError> {
    match path {
        Some(path) => {
            let json = fs::read_to_string(path)?;
            Ok(Settings::from_json(&json)?)
        }
        None => Ok(Settings::default()),
    }
}

fn format_output<T: Serialize>(records: &[T], format: &OutputFormat) -> Result<String, OnTrackCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => match records {
            [single] => Ok(serde_json::to_string(single)? + "\n"),
            _ => Ok(serde_json::to_string(records)? + "\n"),
        },
        OutputFormat::JsonPretty => match records {
            [single] => Ok(serde_json::to_string_pretty(single)? + "\n"),
            _ => Ok(serde_json::to_string_pretty(records)? + "\n"),
        },
    }
}

// Error types

#[derive(Debug)]
enum OnTrackCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    Incomplete(Incomplete),
    InvalidInstant(String),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for OnTrackCliError {
    fn from(e: io::Error) -> Self {
        OnTrackCliError::Io(e)
    }
}

impl From<ComputeError> for OnTrackCliError {
    fn from(e: ComputeError) -> Self {
        OnTrackCliError::Compute(e)
    }
}

impl From<serde_json::Error> for OnTrackCliError {
    fn from(e: serde_json::Error) -> Self {
        OnTrackCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<OnTrackCliError> for CliError {
    fn from(e: OnTrackCliError) -> Self {
        match e {
            OnTrackCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            OnTrackCliError::Compute(e) => CliError {
                code: "INPUT_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'ontrack settings --pretty' for a valid settings template".to_string()),
            },
            OnTrackCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            OnTrackCliError::Incomplete(reason) => CliError {
                code: "INCOMPLETE_SETTINGS".to_string(),
                message: reason.to_string(),
                hint: Some("Run 'ontrack doctor' to see what is missing".to_string()),
            },
            OnTrackCliError::InvalidInstant(msg) => CliError {
                code: "INVALID_TIME".to_string(),
                message: msg,
                hint: Some("Use RFC 3339, e.g. 2024-01-15T09:30:00+11:00".to_string()),
            },
            OnTrackCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            OnTrackCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Each line must be {\"value\": <number>, \"timestamp\": <RFC 3339>}".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
