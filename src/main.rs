use clap::Parser;
use clap::builder::TypedValueParser;
use dataset_resync::runner::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_WORKERS, JobState, RunArgs, Settings, run,
};
use std::path::PathBuf;

/// Resync partitioned CSV extracts into PostgreSQL tables
///
/// Source and sink are configured through SRC_BASE_DIR, DB_HOST, DB_PORT,
/// DB_NAME, DB_USER and DB_PASS.
#[derive(Parser, Clone, Debug)]
#[command(version)]
struct Args {
    /// JSON list of datasets to load, e.g. '["orders","customers"]'.
    /// Loads every dataset in the schema registry when omitted.
    datasets: Option<String>,

    /// Maximum number of datasets loaded concurrently
    #[arg(short, long, default_value_t = DEFAULT_MAX_WORKERS, value_parser = clap::value_parser!(u64).range(1..).map(|v| v as usize))]
    workers: usize,

    /// Rows per append
    #[arg(short, long, default_value_t = DEFAULT_BATCH_SIZE, value_parser = clap::value_parser!(u64).range(1..).map(|v| v as usize))]
    batch_size: usize,

    /// Schema registry file (default: $SRC_BASE_DIR/schemas.json)
    #[arg(long)]
    schema_registry: Option<PathBuf>,

    /// Quiet mode - minimal output, only show summary
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing based on quiet mode
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = if args.quiet {
        EnvFilter::new("dataset_resync=warn,sqlx=off")
    } else {
        EnvFilter::new("dataset_resync=info,sqlx=warn")
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let datasets = match &args.datasets {
        Some(raw) => cli::parse_dataset_list(raw)?,
        None => Vec::new(),
    };
    let settings = Settings::from_env()?;

    if !args.quiet {
        println!("Dataset Resync");
        println!("==============");
        println!("Source: {}", settings.source_dir.display());
        println!(
            "Sink: {}:{}/{}",
            settings.sink.host, settings.sink.port, settings.sink.database
        );
        println!("Workers: {}", args.workers);
        println!();
    }

    let run_args = RunArgs {
        settings,
        schema_registry: args.schema_registry,
        datasets,
        worker_count: args.workers,
        batch_size: args.batch_size,
        quiet: args.quiet,
    };

    let report = run(run_args).await?;

    println!();
    println!("Load Summary");
    println!("============");
    println!("Run ID: {}", report.run_id);
    println!("Started: {}", report.started_at.to_rfc3339());
    for dataset in &report.reports {
        println!("  {}", dataset.summary());
    }
    println!(
        "Datasets: {} succeeded, {} skipped, {} failed",
        report.count(JobState::Succeeded),
        report.count(JobState::Skipped),
        report.count(JobState::Failed)
    );
    println!("Rows appended: {}", report.rows_appended());
    println!("Duration: {:.2}s", report.duration.as_secs_f64());

    Ok(())
}

/// CLI utility functions for parsing command-line arguments
mod cli {
    /// Parse a JSON array of dataset names such as `["orders","customers"]`
    pub fn parse_dataset_list(raw: &str) -> anyhow::Result<Vec<String>> {
        let names: Vec<String> = serde_json::from_str(raw).map_err(|e| {
            anyhow::anyhow!(
                "Invalid dataset list '{}': {}\n\
                 Expected a JSON list, e.g. '[\"orders\",\"customers\"]'",
                raw,
                e
            )
        })?;

        if let Some(blank) = names.iter().find(|name| name.trim().is_empty()) {
            return Err(anyhow::anyhow!(
                "Dataset names cannot be empty (got {:?})",
                blank
            ));
        }

        Ok(names)
    }
}
