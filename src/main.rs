use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trial_harvest::config::{find_config_file, load_config, to_toml, Config};
use trial_harvest::pipeline::{cancel_after, Harvester, DEFAULT_MAX_PAGES};
use trial_harvest::sources::{ClinicalTrialsGovSource, TrialSource};
use trial_harvest::ui::{self, HarvestProgress};
use trial_harvest::utils::{CacheStore, FileCacheStore, NoopCacheStore};
use trial_harvest::workbook::{build_sheet, load_workbook, write_export, ExportOptions, InputOptions};

/// Trial Harvest - Collect clinical trials for a product list from ClinicalTrials.gov
#[derive(Parser, Debug)]
#[command(name = "trial-harvest")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Collect clinical trials for a product list from ClinicalTrials.gov", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v, -vv)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Bypass the response cache for this command
    #[arg(long, global = true, default_value_t = false)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Harvest trials for every product in a workbook and write an export
    Run {
        /// Product workbook (JSON)
        input: PathBuf,

        /// Directory for the export file
        #[arg(long, short = 'o', default_value = ".")]
        output_dir: PathBuf,

        /// Cancel the run after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Products processed in parallel (overrides config)
        #[arg(long, short = 'j')]
        concurrency: Option<usize>,

        /// Keep only the first row per NCT number within each group
        #[arg(long)]
        dedup_across_products: bool,

        /// Product id column header (detected per group when omitted)
        #[arg(long)]
        id_column: Option<String>,

        /// Only process these groups (comma-separated)
        #[arg(long, value_delimiter = ',')]
        groups: Vec<String>,
    },

    /// Resolve a single query text and print the trials found
    Resolve {
        /// Intervention name to search
        query: String,

        /// Page cap for this query
        #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
        max_pages: usize,

        /// Show trials outside the configured regions too
        #[arg(long)]
        all: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Manage the response cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Show cache location, entry count and size
    Stats,
    /// Delete every cached response
    Clear,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the default configuration as TOML
    Init,
}

/// Install stderr logging plus the optional log file; the guard flushes the file on drop
fn init_tracing(cli: &Cli, config: &Config) -> Result<Option<WorkerGuard>> {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("trial_harvest={}", level)),
    );

    let appender = config
        .logging
        .file_appender()
        .context("failed to open log file")?;
    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if config.logging.is_json() {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(guard)
}

fn open_cache(config: &Config, no_cache: bool) -> Arc<dyn CacheStore> {
    if no_cache || !config.cache.enabled {
        tracing::debug!("Response cache disabled");
        return Arc::new(NoopCacheStore);
    }

    let store = FileCacheStore::from_config(&config.cache);
    match store.initialize() {
        Ok(()) => Arc::new(store),
        Err(e) => {
            tracing::warn!(
                "Cache directory {} unavailable, continuing without cache: {}",
                store.cache_dir().display(),
                e
            );
            Arc::new(NoopCacheStore)
        }
    }
}

/// Cancel on Ctrl-C
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            cancel.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(find_config_file);
    let mut config = load_config(config_path.as_deref()).context("failed to load configuration")?;

    let _log_guard = init_tracing(&cli, &config)?;
    if let Some(path) = &config_path {
        tracing::info!("Using config file: {}", path.display());
    }

    match cli.command {
        Commands::Run {
            ref input,
            ref output_dir,
            timeout,
            concurrency,
            dedup_across_products,
            ref id_column,
            groups: ref selected_groups,
        } => {
            if let Some(concurrency) = concurrency {
                config.pipeline.concurrency = concurrency;
            }

            let input_options = InputOptions {
                id_column: id_column.clone().or_else(|| config.input.id_column.clone()),
                groups: selected_groups.clone(),
            };
            let workbook = load_workbook(input, &input_options)
                .with_context(|| format!("failed to load workbook {}", input.display()))?;
            if !cli.quiet {
                for invalid in &workbook.invalid {
                    eprintln!(
                        "{} Skipping group {}: {}",
                        ui::status_icon(ui::Status::Warning),
                        invalid.name,
                        invalid.reason
                    );
                }
            }
            if workbook.groups.is_empty() {
                anyhow::bail!("no valid product groups in {}", input.display());
            }
            let groups = &workbook.groups;
            let total = workbook.product_count();

            let source: Arc<dyn TrialSource> = Arc::new(ClinicalTrialsGovSource::new(&config.api)?);
            let cache = open_cache(&config, cli.no_cache);
            let harvester = Harvester::from_config(&config, source, cache);
            tracing::info!(
                "Harvesting {} products in {} groups across {} countries",
                total,
                groups.len(),
                harvester.aggregator().filter().regions().len()
            );

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());
            if let Some(secs) = timeout {
                let _timer = cancel_after(cancel.clone(), Duration::from_secs(secs));
            }

            let started = chrono::Local::now();
            let progress = HarvestProgress::new(total, cli.quiet);
            let options = ExportOptions {
                dedup_across_products,
            };
            let mut sheets = Vec::with_capacity(groups.len());
            let mut summaries = Vec::with_capacity(groups.len());

            for group in groups {
                progress.set_group(&group.name);
                let report = harvester
                    .run_with_progress(&group.products, &cancel, |p| progress.update(p))
                    .await;
                sheets.push(build_sheet(
                    group,
                    &report,
                    harvester.aggregator().filter(),
                    options,
                ));
                summaries.push((group.name.clone(), report));
            }
            progress.finish("Harvest complete");

            let path = write_export(output_dir, &sheets, started)?;

            if !cli.quiet {
                for (name, report) in &summaries {
                    println!("\n{}", name);
                    println!("{}", ui::summary_table(report));
                }
                let rows: usize = sheets.iter().map(|s| s.rows.len()).sum();
                println!(
                    "\n{} Wrote {} rows to {}",
                    ui::status_icon(ui::Status::Success),
                    ui::format_number(rows),
                    path.display()
                );
            }

            if cancel.is_cancelled() {
                anyhow::bail!("run cancelled before all products finished");
            }
        }

        Commands::Resolve {
            ref query,
            max_pages,
            all,
            json,
        } => {
            config.pipeline.max_pages = max_pages;
            let source: Arc<dyn TrialSource> = Arc::new(ClinicalTrialsGovSource::new(&config.api)?);
            let cache = open_cache(&config, cli.no_cache);
            let harvester = Harvester::from_config(&config, source, cache);
            let aggregator = harvester.aggregator();

            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            let resolution = aggregator.resolver().resolve(query, &cancel).await?;
            let fetcher = aggregator.resolver().fetcher();
            tracing::debug!(
                "{} cached pages, {} remote calls",
                fetcher.cache_hits(),
                fetcher.remote_calls()
            );
            let trials: Vec<_> = resolution
                .records
                .into_iter()
                .filter(|t| all || aggregator.filter().in_scope(t))
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&trials)?);
            } else {
                println!("{}", ui::trials_table(&trials));
                println!(
                    "{} trials over {} pages{}",
                    ui::format_number(trials.len()),
                    resolution.pages,
                    if resolution.truncated { " (truncated)" } else { "" }
                );
            }
        }

        Commands::Cache { command } => {
            let store = FileCacheStore::from_config(&config.cache);
            match command {
                CacheCommands::Stats => {
                    let stats = store.stats();
                    println!("Cache directory: {}", stats.cache_dir.display());
                    println!("Entries: {}", ui::format_number(stats.entries));
                    println!("Size: {} KB", ui::format_number(stats.size_kb as usize));
                }
                CacheCommands::Clear => {
                    store.clear().context("failed to clear cache")?;
                    println!(
                        "{} Cleared cache at {}",
                        ui::status_icon(ui::Status::Success),
                        store.cache_dir().display()
                    );
                }
            }
        }

        Commands::Config { command } => match command {
            ConfigCommands::Show => print!("{}", to_toml(&config)?),
            ConfigCommands::Init => print!("{}", to_toml(&Config::default())?),
        },
    }

    Ok(())
}
