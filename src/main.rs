//! CLI entry point for `invoice-relay`.

use std::path::PathBuf;
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use invoice_relay::config::{self, Config, SourceKind};
use invoice_relay::dispatch::{DispatchMode, DispatchRouter, SimulationWriter, SmtpRelay};
use invoice_relay::pipeline::{BatchReport, Outcome, Pipeline};
use invoice_relay::source;

/// Merge invoice PDFs in incoming mail and relay the result.
///
/// Meant to be run by cron or launchd. Every message the source returns is
/// consumed; failures are reported per message and do not stop the batch.
#[derive(Parser)]
#[command(name = "invoice-relay", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Write messages to the simulation folder instead of relaying them
    #[arg(long)]
    simulate: bool,

    /// Config file (default: $INVOICE_RELAY_CONFIG or the user config dir)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Mail source: a directory of .eml files or an mbox file
    #[arg(short, long, value_name = "PATH")]
    source: Option<PathBuf>,

    /// Base directory for simulation bundles
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// PDFs whose filename contains this string are merged first
    #[arg(long, value_name = "STRING")]
    invoice_string: Option<String>,

    /// Debug logging (same as DEBUG_EMAIL_RELAY=true)
    #[arg(long)]
    debug: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the batch report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Completions { shell }) => return cmd_completions(shell),
        Some(Commands::Manpage) => return cmd_manpage(),
        None => {}
    }

    let mut config = config::load_config(cli.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok());
    apply_cli(&cli, &mut config);

    let log_level = match cli.verbose {
        0 => config.log_level().to_string(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    setup_logging(&log_level, &config);

    let mode = if cli.simulate {
        DispatchMode::Simulate
    } else {
        DispatchMode::Relay
    };
    config.validate(mode)?;

    cmd_run(&config, mode, cli.json)
}

/// CLI flags win over the file and the environment.
fn apply_cli(cli: &Cli, config: &mut Config) {
    if let Some(ref path) = cli.source {
        config.source.kind = if path.is_file() {
            SourceKind::Mbox
        } else {
            SourceKind::Spool
        };
        config.source.path = Some(path.clone());
    }
    if let Some(ref dir) = cli.output {
        config.simulation.base_dir = Some(dir.clone());
    }
    if let Some(ref s) = cli.invoice_string {
        config.invoice.match_string = Some(s.clone());
    }
    if cli.debug {
        config.general.debug = true;
    }
}

fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_path = config::log_file_path(config);
    let log_dir = config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_name = log_path.file_name().unwrap_or_default();
        let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "invoice-relay", &mut std::io::stdout());
    Ok(())
}

fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

fn cmd_run(config: &Config, mode: DispatchMode, json: bool) -> anyhow::Result<()> {
    let router = match mode {
        DispatchMode::Relay => DispatchRouter::relay(Box::new(SmtpRelay::from_config(&config.relay)?)),
        DispatchMode::Simulate => {
            let dir = config.simulation_dir();
            tracing::info!(dir = %dir.display(), "Simulation mode");
            DispatchRouter::simulate(SimulationWriter::new(dir))
        }
    };
    let mut pipeline = Pipeline::from_config(config, router);

    let mut mail_source = source::from_config(config);
    let start = Instant::now();
    let messages = mail_source.fetch_unprocessed()?;
    tracing::info!(source = %mail_source.describe(), count = messages.len(), "Fetched messages");

    let pb = ProgressBar::new(messages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Processing [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );
    let report = pipeline.run_batch(&messages, &|done, _total| pb.set_position(done as u64));
    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report_table(&mail_source.describe(), &report, start.elapsed());
    }

    Ok(())
}

fn print_report_table(source: &str, report: &BatchReport, elapsed: std::time::Duration) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {:<20} {}", "Source", source);
    println!("  {:<20} {:?}", "Mode", report.mode);
    println!("  {:<20} {}", "Messages", report.messages.len());
    println!("  {:<20} {}", "Merged", report.merged());
    println!("  {:<20} {}", "Failed", report.failed());
    println!("  {:<20} {:.2?}", "Elapsed", elapsed);

    if !report.messages.is_empty() {
        println!();
    }
    for msg in &report.messages {
        let subject: String = msg.subject.chars().take(40).collect();
        let detail = match &msg.outcome {
            Outcome::Relayed { bytes } => format!("relayed {}", format_size(*bytes, BINARY)),
            Outcome::Simulated { folder } => format!("saved {}", folder.display()),
            Outcome::Failed { kind, error } => format!("{kind}: {error}"),
        };
        let merged = match msg.merged_pages {
            Some(pages) => format!("{} PDFs → {pages} pages", msg.merged_sources.len()),
            None => format!("{} attachments", msg.attachments_out),
        };
        let status = if msg.is_success() { "ok" } else { "FAIL" };
        println!("  {status:<5} {subject:<40}  {merged:<22}  {detail}");
    }
    println!();
}
