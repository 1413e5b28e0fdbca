use clap::{Parser, Subcommand, builder::styling};
use eyre::Result;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;
use zillow_etl::cli;
use zillow_etl::handlers::TransformOutcome;

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// Zillow ETL: pull listings, stage raw JSON, transform to CSV and load the warehouse
#[derive(Parser)]
#[command(name = "zetl", version, styles = STYLES)]
struct Cli {
    /// The dotenv file to source credentials and overrides from
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// Pipeline configuration file
    #[arg(short, long, global = true, default_value = "pipeline.yml")]
    config: String,

    /// More verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the main chain once: extract, stage, wait for the CSV, load
    Run {
        /// Also watch the ingest bucket and run the handlers (for stores without events)
        #[arg(short, long)]
        watch: bool,
    },

    /// Extract from the search API and stage the raw response
    Extract,

    /// Transform one raw JSON artifact into CSV
    Transform {
        /// Bucket holding the raw artifact
        bucket: String,

        /// Key of the raw artifact
        key: String,
    },

    /// Copy one raw artifact into the archive bucket
    Replicate {
        /// Bucket holding the raw artifact
        bucket: String,

        /// Key of the raw artifact
        key: String,
    },

    /// Handle an S3 event notification
    Handle {
        /// Event JSON file, or "-" for stdin
        #[arg(default_value = "-")]
        event: String,
    },

    /// Watch the ingest bucket and run the handlers for new objects
    Watch,

    /// Run the main chain on the configured schedule
    Schedule {
        /// Also watch the ingest bucket and run the handlers
        #[arg(short, long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(e) = dotenvy::from_filename(&cli.env)
        && !e.not_found()
    {
        return Err(e.into());
    }

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    log::info!("Zillow ETL");
    let config = cli::load_config(&cli.config)?;
    log::debug!("Configuration: {:?}", config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, stopping");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Run { watch } => {
            log::info!(
                "Running pipeline for {}",
                config.api.location.bright_black()
            );
            let report = cli::run_pipeline(&config, watch, &cancel).await?;
            log::info!(
                "✓ Run {} loaded {} row(s) into {}.{}",
                report.context.cyan(),
                report.rows_loaded.unwrap_or_default(),
                config.warehouse.schema,
                config.warehouse.table
            );
        }
        Commands::Extract => {
            let location = cli::extract_and_stage(&config).await?;
            log::info!("✓ Staged {}", location.bright_black());
        }
        Commands::Transform { bucket, key } => {
            match cli::transform_object(&config, &bucket, &key, &cancel).await? {
                TransformOutcome::Written { location, rows } => {
                    log::info!("✓ Wrote {} row(s) to {}", rows, location.bright_black())
                }
                TransformOutcome::Skipped => log::info!("Nothing to do for {}", key.bright_black()),
            }
        }
        Commands::Replicate { bucket, key } => {
            let location = cli::replicate_object(&config, &bucket, &key, &cancel).await?;
            log::info!("✓ Archived to {}", location.bright_black());
        }
        Commands::Handle { event } => {
            let dispatches = cli::handle_event(&config, &event, &cancel).await?;
            log::info!("✓ Handled {} object(s)", dispatches.len());
        }
        Commands::Watch => {
            log::info!(
                "Watching {} (Ctrl-C to stop)",
                config.buckets.ingest.bright_black()
            );
            cli::watch(&config, &cancel).await?;
        }
        Commands::Schedule { watch } => {
            let runs = cli::schedule(&config, watch, &cancel).await?;
            log::info!("Scheduler finished after {} run(s)", runs.cyan());
        }
    }

    Ok(())
}
