use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use csvscout::scan::LaneEvent;
use csvscout::{
    run, scan_file, EncodingMode, ExecutionMode, FieldPattern, MatchTally, RunOutcome, RunSummary,
    ScanConfig, ScanEvent,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Count field/pattern occurrences in a delimited text file.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Delimited file to scan
    file: PathBuf,

    /// Column name to match against
    #[arg(short = 'f', long)]
    field: String,

    /// Text to search for (literal unless --regex)
    #[arg(short = 'p', long)]
    pattern: String,

    /// Treat the pattern as a regular expression
    #[arg(short = 'r', long)]
    regex: bool,

    /// Number of shard workers
    #[arg(short = 'j', long)]
    threads: Option<NonZeroUsize>,

    /// Process the file on the main thread instead of sharding
    #[arg(long)]
    single_lane: bool,

    /// Field separator
    #[arg(short = 'd', long, default_value = ",")]
    delimiter: char,

    /// How to handle invalid UTF-8 sequences (failfast|lossy)
    #[arg(long, default_value = "failfast")]
    encoding: String,

    /// Emit events as JSON lines instead of human-readable output
    #[arg(long)]
    json: bool,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_config = ScanConfig::load_from(cli.config.as_deref())
        .context("failed to load configuration")?;

    let pattern = if cli.regex {
        FieldPattern::regex(&cli.field, &cli.pattern)
    } else {
        FieldPattern::literal(&cli.field, &cli.pattern)
    };
    let encoding_mode = match cli.encoding.to_lowercase().as_str() {
        "lossy" => EncodingMode::Lossy,
        _ => EncodingMode::FailFast,
    };
    let defaults = ScanConfig::default();
    let cli_config = ScanConfig {
        patterns: vec![pattern],
        file_path: cli.file,
        delimiter: cli.delimiter,
        single_lane: cli.single_lane,
        thread_count: cli.threads.unwrap_or(defaults.thread_count),
        encoding_mode,
        log_level: cli.log_level.unwrap_or(defaults.log_level),
    };
    let config = file_config.merge_with_cli(cli_config);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if !cli.json {
        if let Ok(metadata) = std::fs::metadata(&config.file_path) {
            println!(
                "{} {}",
                "File size".dimmed(),
                format_bytes(metadata.len()).dimmed()
            );
        }
    }

    match config.execution_mode() {
        ExecutionMode::SingleLane => {
            info!("executing on the caller's thread");
            run_single_lane(&config, cli.json)
        }
        ExecutionMode::Parallel(workers) => {
            info!("executing on {} worker thread(s)", workers);
            run_parallel(&config, cli.json)
        }
    }
}

/// Single-lane mode runs the pipeline on this thread; events arrive
/// through the sink as the file streams through.
fn run_single_lane(config: &ScanConfig, json: bool) -> Result<()> {
    let mut presenter = Presenter::new(json);
    let summary = scan_file(config, |event| match event {
        LaneEvent::Progress { percent } => presenter.progress(percent),
        LaneEvent::Occurrences {
            tally,
            records,
            elapsed,
        } => presenter.occurrences(&tally, records, elapsed),
    })
    .map_err(|e| report_failure(&mut presenter, e))?;
    presenter.done(&summary);
    Ok(())
}

/// Parallel mode consumes the run handle's merged event stream until the
/// terminal event arrives.
fn run_parallel(config: &ScanConfig, json: bool) -> Result<()> {
    let mut presenter = Presenter::new(json);
    let handle = run(config).map_err(|e| report_failure(&mut presenter, e))?;
    for event in handle.events().iter() {
        match event {
            ScanEvent::Progress { percent } => presenter.progress(percent),
            ScanEvent::Occurrences {
                tally,
                records,
                elapsed,
            } => presenter.occurrences(&tally, records, elapsed),
            ScanEvent::WorkerDone {
                index,
                tally,
                records,
                elapsed,
            } => presenter.worker_done(index, &tally, records, elapsed),
            ScanEvent::WorkerFailed { index, error } => presenter.worker_failed(index, &error),
            ScanEvent::Done(summary) => {
                presenter.done(&summary);
                break;
            }
        }
    }
    handle.join();
    Ok(())
}

fn report_failure(presenter: &mut Presenter, error: csvscout::ScanError) -> anyhow::Error {
    presenter.clear();
    eprintln!("{}", format!("❌ {}", error).red());
    anyhow::Error::new(error)
}

/// Renders the event stream: a progress bar plus log lines, or JSON lines.
struct Presenter {
    json: bool,
    bar: Option<ProgressBar>,
}

impl Presenter {
    fn new(json: bool) -> Self {
        let bar = if json {
            None
        } else {
            let bar = ProgressBar::new(100);
            bar.set_style(
                ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos:>3}%")
                    .expect("progress bar template"),
            );
            Some(bar)
        };
        Self { json, bar }
    }

    fn clear(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    fn progress(&mut self, percent: f64) {
        if let Some(bar) = &self.bar {
            bar.set_position(percent.round() as u64);
        }
        if self.json {
            println!(
                "{}",
                serde_json::json!({ "event": "progress", "percent": percent })
            );
        }
    }

    fn occurrences(&mut self, tally: &MatchTally, records: u64, elapsed: Duration) {
        if self.json {
            println!(
                "{}",
                serde_json::json!({
                    "event": "occurrences",
                    "counts": tally_json(tally),
                    "records": records,
                    "elapsed_ms": elapsed.as_millis() as u64,
                })
            );
            return;
        }
        println!(
            "Found {} | Over - {} records | Took {}",
            format_tally(tally),
            records,
            format_elapsed(elapsed)
        );
    }

    fn worker_done(&mut self, index: usize, tally: &MatchTally, records: u64, elapsed: Duration) {
        if self.json {
            println!(
                "{}",
                serde_json::json!({
                    "event": "worker_done",
                    "worker": index,
                    "counts": tally_json(tally),
                    "records": records,
                    "elapsed_ms": elapsed.as_millis() as u64,
                })
            );
            return;
        }
        println!(
            "  Worker {}: found {} in {} records | {}",
            index + 1,
            format_tally(tally),
            records,
            format_elapsed(elapsed)
        );
    }

    fn worker_failed(&mut self, index: usize, error: &csvscout::ScanError) {
        if self.json {
            println!(
                "{}",
                serde_json::json!({
                    "event": "worker_failed",
                    "worker": index,
                    "message": error.to_string(),
                })
            );
            return;
        }
        println!(
            "{}",
            format!("❌ Worker {} error: {}", index + 1, error).red()
        );
    }

    fn done(&mut self, summary: &RunSummary) {
        self.clear();
        if self.json {
            let failed = match &summary.outcome {
                RunOutcome::PartiallyFailed { failed } => failed.clone(),
                _ => Vec::new(),
            };
            println!(
                "{}",
                serde_json::json!({
                    "event": "done",
                    "outcome": outcome_name(&summary.outcome),
                    "counts": tally_json(&summary.tally),
                    "records": summary.records,
                    "failed_workers": failed,
                    "elapsed_ms": summary.elapsed.as_millis() as u64,
                })
            );
            return;
        }
        match &summary.outcome {
            RunOutcome::Completed => println!(
                "{}",
                format!(
                    "✅ Processing complete! Found {} total | {} records in {}",
                    summary.tally.total(),
                    summary.records,
                    format_elapsed(summary.elapsed)
                )
                .green()
            ),
            RunOutcome::NoData => {
                println!("{}", "⚠️ No data lines found in the file.".yellow())
            }
            RunOutcome::PartiallyFailed { failed } => {
                let indices: Vec<String> = failed.iter().map(|i| (i + 1).to_string()).collect();
                println!(
                    "{}",
                    format!(
                        "⚠️ Completed with failed workers ({}): found {} total | {} records in {}",
                        indices.join(", "),
                        summary.tally.total(),
                        summary.records,
                        format_elapsed(summary.elapsed)
                    )
                    .yellow()
                )
            }
        }
    }
}

fn outcome_name(outcome: &RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Completed => "completed",
        RunOutcome::NoData => "no_data",
        RunOutcome::PartiallyFailed { .. } => "partially_failed",
    }
}

fn tally_json(tally: &MatchTally) -> serde_json::Value {
    tally
        .iter()
        .map(|(label, count)| (label.to_string(), serde_json::Value::from(count)))
        .collect::<serde_json::Map<String, serde_json::Value>>()
        .into()
}

fn format_tally(tally: &MatchTally) -> String {
    if tally.is_empty() {
        return "0 occurrences".to_string();
    }
    tally
        .iter()
        .map(|(label, count)| format!("{} occurrences of {}", count, label))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_elapsed(elapsed: Duration) -> String {
    // Full precision reads as noise; millisecond granularity is plenty.
    humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64)).to_string()
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
