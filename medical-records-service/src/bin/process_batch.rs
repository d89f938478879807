use anyhow::Result;
use clap::Parser;
use medical_records_service::{ServiceConfig, models::BatchRequest};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Convert scanned medical documents for one patient into CSV tables.
#[derive(Debug, Parser)]
#[command(name = "process_batch", version)]
struct Args {
    /// Patient identifier stamped on every row
    #[arg(long)]
    patient_id: String,

    /// Folder that receives the csv_database_ready directory
    #[arg(long)]
    output: String,

    /// Image or PDF files to process
    #[arg(required = true)]
    files: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = ServiceConfig::from_env()?;

    let processor = config
        .batch_processor()
        .with_progress(|percent, message| println!("[{percent:>5.1}%] {message}"));

    let request = BatchRequest {
        patient_id: args.patient_id,
        output_folder: args.output,
        selected_files: args.files,
    };
    let report = processor.process(&request).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.failed_files > 0 {
        for failed in &report.files_failed {
            eprintln!("Failed: {} ({})", failed.filename, failed.error);
        }
    }

    Ok(())
}
