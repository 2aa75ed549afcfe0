use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressStyle};
use logscout::{
    AnalysisResponse, CancellationToken, EngineConfig, EngineOverrides, EventKind, FilterResult,
    FilterSpecConfig, Insight, InsightExecutor, InsightOutput, InsightRun, InsightStatus,
    ProgressEvent, ReadingMode,
};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
struct ScanArgs {
    /// Files or folders to scan
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Insight to run, as NAME=REGEX or a bare REGEX (can be specified multiple times)
    #[arg(short = 'p', long = "pattern", required = true)]
    patterns: Vec<String>,

    /// Match case-insensitively
    #[arg(short = 'i', long)]
    ignore_case: bool,

    /// How files are read (lines|chunks|ripgrep)
    #[arg(long, default_value = "lines")]
    mode: ReadingMode,

    /// Bytes per read in chunks mode
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Number of context lines before match
    #[arg(short = 'B', long, default_value = "0")]
    context_before: usize,

    /// Number of context lines after match
    #[arg(short = 'A', long, default_value = "0")]
    context_after: usize,

    /// Stop after this many matches per file
    #[arg(short = 'm', long)]
    max_count: Option<usize>,

    /// Only scan files whose path matches this regex (can be specified multiple times)
    #[arg(short = 'f', long = "file-pattern")]
    file_patterns: Vec<String>,

    /// Skip files matching this glob while walking folders
    #[arg(short = 'x', long)]
    exclude: Vec<String>,

    /// Show at most this many lines per insight
    #[arg(long)]
    max_lines: Option<usize>,

    /// Number of files scanned concurrently per insight
    #[arg(short = 'j', long)]
    threads: Option<NonZeroUsize>,

    /// Path to the ripgrep binary
    #[arg(long)]
    rg_path: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Stream progress events and the final result as JSON lines
    #[arg(long)]
    json: bool,

    /// Show only statistics, not matches
    #[arg(short, long)]
    stats: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one insight per pattern over files and folders
    Scan(Box<ScanArgs>),

    /// Print the effective configuration
    Config {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => scan(*args),
        Commands::Config { config } => {
            let config = EngineConfig::load_from(config.as_deref())
                .context("failed to load configuration")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn scan(args: ScanArgs) -> Result<()> {
    let config = EngineConfig::load_from(args.config.as_deref())
        .context("failed to load configuration")?
        .merge_with_cli(EngineOverrides {
            chunk_size: args.chunk_size,
            max_file_concurrency: args.threads,
            max_lines: args.max_lines,
            ripgrep_path: args.rg_path.clone(),
            exclude_patterns: args.exclude.clone(),
            log_level: args.log_level.clone(),
        });
    init_tracing(&config.log_level);
    debug!("Effective configuration: {:?}", config);

    let insights = build_insights(&args)?;
    let executor = InsightExecutor::new(config)?;
    let cancel = CancellationToken::new();
    ctrlc::set_handler(interrupt_handler(cancel.clone()))
        .context("failed to install Ctrl-C handler")?;

    let (tx, rx) = mpsc::channel::<ProgressEvent>();
    let json = args.json;
    let renderer = thread::spawn(move || render_events(rx, json));

    // The sender is dropped when analyze returns, which ends the renderer.
    let outcome = executor.analyze(
        &args.paths[..],
        &args.file_patterns,
        &insights,
        Arc::new(tx),
        &cancel,
    );
    if renderer.join().is_err() {
        warn!("Progress renderer stopped unexpectedly");
    }
    let response = outcome?;

    if !json {
        print_response(&response, args.stats);
    }
    check_response(&response)
}

/// Ctrl-C stops the scan; partial results are still printed.
fn interrupt_handler(cancel: CancellationToken) -> impl FnMut() + Send + 'static {
    move || {
        info!("Interrupted, cancelling scan");
        cancel.cancel();
    }
}

/// Exit status of a finished scan
fn check_response(response: &AnalysisResponse) -> Result<()> {
    if response.status == InsightStatus::Cancelled {
        bail!("scan cancelled before all insights finished");
    }
    let failed = response.count(InsightStatus::Failed);
    if failed > 0 {
        bail!("{} of {} insights failed", failed, response.insights.len());
    }
    Ok(())
}

/// Splits `NAME=REGEX`; a prefix that is not a plain identifier stays part of the regex.
fn split_pattern(raw: &str) -> Option<(&str, &str)> {
    let (name, pattern) = raw.split_once('=')?;
    let is_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    is_name.then_some((name, pattern))
}

fn build_insights(args: &ScanArgs) -> Result<Vec<Insight>> {
    if args.patterns.is_empty() {
        bail!("at least one --pattern is required");
    }

    let insights = args
        .patterns
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let (id, pattern) = match split_pattern(raw) {
                Some((name, pattern)) => (name.to_string(), pattern),
                None => (format!("pattern-{}", i + 1), raw.as_str()),
            };
            let mut spec = FilterSpecConfig::new(pattern)
                .case_insensitive(args.ignore_case)
                .reading_mode(args.mode)
                .context(args.context_before, args.context_after);
            if let Some(max) = args.max_count {
                spec = spec.max_count(max);
            }
            Insight::filter(id.clone(), id, spec)
                .with_description(format!("Lines matching /{}/", pattern))
        })
        .collect();
    Ok(insights)
}

fn render_events(rx: Receiver<ProgressEvent>, json: bool) {
    if json {
        for event in rx {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize {} event: {}", event.kind.name(), e),
            }
        }
        return;
    }

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));

    for event in rx {
        let insight = event.insight_id.as_deref().unwrap_or("-");
        match &event.kind {
            EventKind::InsightStart { total_files, .. } => {
                bar.set_message(format!("{}: starting on {} files", insight, total_files));
            }
            EventKind::InsightProgress {
                file_path,
                file_index,
                total_files,
                lines_processed,
            } => {
                bar.set_message(format!(
                    "{}: [{}/{}] {} ({} lines)",
                    insight,
                    file_index + 1,
                    total_files,
                    file_path.display(),
                    lines_processed
                ));
            }
            EventKind::InsightComplete {
                status,
                total_count,
                execution_time_ms,
            } => {
                let elapsed = Duration::from_millis(*execution_time_ms as u64);
                bar.println(format!(
                    "{} {} {} matches in {}",
                    status_label(*status),
                    insight,
                    total_count,
                    humantime::format_duration(elapsed)
                ));
            }
            EventKind::Error {
                message, file_path, ..
            } => {
                let location = file_path
                    .as_ref()
                    .map(|p| format!(" ({})", p.display()))
                    .unwrap_or_default();
                bar.println(format!("{}{}", message.red(), location));
            }
            _ => {}
        }
    }
    bar.finish_and_clear();
}

fn status_label(status: InsightStatus) -> ColoredString {
    match status {
        InsightStatus::Completed => "completed".green(),
        InsightStatus::Failed => "failed".red(),
        InsightStatus::Cancelled => "cancelled".yellow(),
        InsightStatus::Pending => "pending".normal(),
        InsightStatus::Running => "running".normal(),
    }
}

fn print_response(response: &AnalysisResponse, stats_only: bool) {
    for path in &response.invalid_paths {
        println!("{} {}", "Skipped missing path:".yellow(), path.display());
    }

    for run in &response.insights {
        print_insight(run, stats_only);
    }

    println!(
        "\nRan {} insights over {} files in {}",
        response.insights.len(),
        response.files.len(),
        humantime::format_duration(round_millis(response.execution_time))
    );
}

fn print_insight(run: &InsightRun, stats_only: bool) {
    println!(
        "\n{} [{}] {}",
        run.name.bold(),
        status_label(run.status),
        humantime::format_duration(round_millis(run.execution_time))
    );

    if let Some(error) = &run.error {
        println!("  {}: {}", error.kind.red(), error.message);
    }
    match &run.output {
        Some(InsightOutput::Filter(result)) => print_filter_result(result, stats_only),
        Some(InsightOutput::Custom(value)) => println!("{}", value),
        None => {}
    }
}

fn print_filter_result(result: &FilterResult, stats_only: bool) {
    if !stats_only {
        for (path, lines) in result.get_lines_by_file() {
            println!("{}", path.display().to_string().blue());
            for m in lines {
                // Print context before
                for (line_num, line) in &m.context_before {
                    println!("{}- {}", line_num.to_string().green(), line);
                }

                // Print match
                println!("{}: {}", m.line_number.to_string().green(), m.text);

                // Print context after
                for (line_num, line) in &m.context_after {
                    println!("{}- {}", line_num.to_string().green(), line);
                }
            }
        }
        if result.is_truncated() {
            println!(
                "{}",
                format!(
                    "... showing {} of {} matches",
                    result.get_lines().len(),
                    result.get_total_line_count()
                )
                .yellow()
            );
        }
    }

    for error in result.errors() {
        println!(
            "  {} {}: {}",
            "!".red(),
            error.file_path.display(),
            error.message
        );
    }
    println!(
        "Found {} matches in {} files ({} files, {} lines scanned)",
        result.get_total_line_count(),
        result.get_file_count(),
        result.files_scanned(),
        result.lines_processed()
    );
}

fn round_millis(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}
