//! tripdata-ingest - incremental monthly trip-data loader

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tripdata_common::logging::{init_logging, LogConfig, LogLevel};
use tripdata_ingest::config::PipelineConfig;
use tripdata_ingest::key::Category;
use tripdata_ingest::reconcile::Reconciler;
use tripdata_ingest::runner::BatchRunner;
use tripdata_ingest::source::HttpSource;
use tripdata_ingest::store::PostgresTableStore;

#[derive(Parser, Debug)]
#[command(name = "tripdata-ingest")]
#[command(author, version, about = "Incremental monthly trip-data loader")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Download, clean and load the requested months
    Run {
        /// Dataset categories to ingest
        #[arg(long, value_delimiter = ',', default_value = "green,yellow")]
        categories: Vec<Category>,

        /// Years to ingest
        #[arg(long, value_delimiter = ',', required = true)]
        years: Vec<i32>,

        /// Calendar months to ingest (1-12)
        #[arg(long, value_delimiter = ',', default_value = "1,2,3,4,5,6,7,8,9,10,11,12")]
        months: Vec<u32>,

        /// Print the machine-readable run summary to stdout
        #[arg(long)]
        summary_json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env()?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    init_logging(&log_config)?;

    match cli.command {
        Command::Run {
            categories,
            years,
            months,
            summary_json,
        } => {
            let config = PipelineConfig::load()?;
            info!(
                categories = ?categories,
                years = ?years,
                months = ?months,
                "starting ingestion run"
            );

            let source = HttpSource::new(config.source.clone())?;
            let store = PostgresTableStore::connect(&config.database)
                .await?
                .with_chunk_rows(config.insert_chunk_rows);

            let runner = BatchRunner::new(Reconciler::new(source, store));
            let summary = runner.run(&categories, &years, &months).await;

            if summary_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }

            if summary.overall_failed() {
                anyhow::bail!(
                    "{} of {} keys failed",
                    summary.failed,
                    summary.reports.len()
                );
            }

            Ok(())
        },
    }
}
