//! Typeprobe - parameter-type profiler for recorded executions
//!
//! A CLI client that opens a recording on a replay analysis service,
//! discovers its scripts, runs a map/reduce analysis sampling argument
//! types at every function entry of one script, and renders the script's
//! source annotated line by line.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (missing recording id, connection, analysis failure)

mod analysis;
mod channel;
mod cli;
mod client;
mod config;
mod error;
mod models;
mod protocol;
mod report;
mod session;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use indicatif::ProgressBar;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use channel::{Channel, SocketChannel};
use cli::{Args, OutputFormat};
use client::{Phase, ProbeClient};
use config::Config;
use models::{ProbeReport, ReportMetadata, Script};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("Typeprobe v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    // Run the probe
    match run_probe(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Probe failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .typeprobe.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(".typeprobe.toml");

    if path.exists() {
        eprintln!("⚠️  .typeprobe.toml already exists. Remove it first or edit it manually.");
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).context("Failed to write .typeprobe.toml")?;

    println!("✅ Created .typeprobe.toml with default settings.");
    println!("   Edit it to customize the server endpoint and analysis programs.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete probe workflow.
async fn run_probe(args: Args) -> Result<()> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    // Step 1: Connect to the analysis service
    println!("🔌 Connecting to {}", config.server.url);
    let channel: Arc<dyn Channel> = Arc::new(
        SocketChannel::connect(
            &config.server.url,
            Duration::from_secs(config.server.timeout_seconds),
        )
        .await?,
    );

    // Step 2: Open a session for the recording
    let request = config.analysis_request()?;
    let client = ProbeClient::connect(channel, args.recording.as_deref(), request).await?;
    println!("🎬 Session {}", client.session_id().await);

    let spinner = start_spinner(&args, &client);

    // Step 3: Discover the scripts in the recording
    let total = client.find_scripts().await?;
    let scripts = client.list_scripts().await;
    info!("{total} scripts discovered, {} listed", scripts.len());

    // List mode: print the catalog and stop
    if args.list {
        spinner.finish_and_clear();
        print_script_list(&scripts, total);
        return Ok(());
    }

    // Step 4: Select and analyze the requested script
    let selector = args.script.as_deref().unwrap_or_default();
    let script = resolve_script(&client, selector).await?;
    println!("🔎 Analyzing {} ({})", script.url, script.script_id);

    let script_analysis = client.analyze_script(&script.script_id).await?;
    spinner.finish_and_clear();

    // Step 5: Build the annotated view and the report around it
    let lines = script_analysis.annotated_view();
    let annotated_lines = lines
        .iter()
        .filter(|line| !line.result_groups.is_empty())
        .count();
    let duration = start_time.elapsed().as_secs_f64();

    let metadata = ReportMetadata {
        recording_id: args.recording.clone().unwrap_or_default(),
        session_id: client.session_id().await,
        script_id: script.script_id.clone(),
        script_url: script.url.clone(),
        analysis_id: script_analysis.completed.analysis_id().to_string(),
        analysis_date: Utc::now(),
        entry_count: script_analysis.completed.accumulator().len(),
        annotated_lines,
        duration_seconds: duration,
    };
    let report = ProbeReport { metadata, lines };

    // Step 6: Render and deliver the report
    let output = match args.format {
        OutputFormat::Markdown => report::generate_markdown_report(&report),
        OutputFormat::Json => report::generate_json_report(&report)?,
    };

    match config.general.output {
        Some(ref path) => {
            std::fs::write(path, &output)
                .with_context(|| format!("Failed to write report to {}", path))?;
            println!("\n📊 Probe Summary:");
            println!("   Result entries: {}", report.metadata.entry_count);
            println!("   Annotated lines: {}", report.metadata.annotated_lines);
            println!("   Duration: {:.1}s", duration);
            println!("\n✅ Probe complete! Report saved to: {}", path);
        }
        None => println!("{}", output),
    }

    Ok(())
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from .typeprobe.toml");
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

/// Spin up the progress indicator and keep it in step with the client's
/// lifecycle phase.
fn start_spinner(args: &Args, client: &ProbeClient) -> ProgressBar {
    let spinner = if args.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message("Initializing…");

    let mut phase = client.phase();
    let ticker = spinner.clone();
    tokio::spawn(async move {
        loop {
            match *phase.borrow_and_update() {
                Phase::Initializing => ticker.set_message("Initializing…"),
                Phase::Analyzing => ticker.set_message("Analyzing…"),
                Phase::Ready => ticker.set_message("Ready"),
            }
            if phase.changed().await.is_err() {
                break;
            }
        }
    });

    spinner
}

/// Print the user-facing script listing.
fn print_script_list(scripts: &[Script], total: usize) {
    if scripts.is_empty() {
        println!("No scripts with a url were discovered ({total} total).");
        return;
    }
    println!("\n📜 Scripts in recording:");
    for script in scripts {
        println!("   {}  {}", script.script_id, script.url);
    }
    println!("\n   Total: {} listed, {} discovered", scripts.len(), total);
}

/// Resolve a user-supplied selector to exactly one script: an exact id
/// match first, then a unique case-insensitive url substring.
async fn resolve_script(client: &ProbeClient, selector: &str) -> Result<Script> {
    if let Some(script) = client.script(selector).await {
        return Ok(script);
    }

    let needle = selector.to_lowercase();
    let matches: Vec<Script> = client
        .list_scripts()
        .await
        .into_iter()
        .filter(|script| script.url.to_lowercase().contains(&needle))
        .collect();

    match matches.as_slice() {
        [] => bail!("no discovered script matches '{}'", selector),
        [script] => Ok(script.clone()),
        candidates => {
            warn!("{} scripts match '{}'", candidates.len(), selector);
            let urls = candidates
                .iter()
                .map(|script| format!("{}  {}", script.script_id, script.url))
                .collect::<Vec<_>>()
                .join("\n   ");
            bail!("'{}' is ambiguous; it matches:\n   {}", selector, urls)
        }
    }
}
