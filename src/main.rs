use clap::Parser;
use report_reconciler::cli::{Args, setup_logging};
use report_reconciler::processor::ReportProcessor;
use std::process;
use tracing::{debug, info};

fn main() {
    let args = Args::parse();
    setup_logging(args.verbose);
    debug!("Command line arguments: {:?}", args);

    let config = match args.into_config() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(2);
        }
    };

    let processor = match ReportProcessor::new(config) {
        Ok(processor) => processor,
        Err(error) => {
            eprintln!("Error: {}", error);
            process::exit(2);
        }
    };

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        tokio::select! {
            result = processor.process() => Some(result),
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    eprintln!("Failed to listen for CTRL+C: {}", e);
                }
                None
            }
        }
    });

    match result {
        Some(Ok(stats)) if stats.files_failed == 0 => {
            info!("Reconciliation finished");
            process::exit(0);
        }
        Some(Ok(stats)) => {
            eprintln!("{} file(s) failed", stats.files_failed);
            process::exit(1);
        }
        Some(Err(error)) => {
            eprintln!("Error: {}", error);
            process::exit(1);
        }
        None => {
            eprintln!("\nReceived CTRL+C, shutting down...");
            process::exit(130);
        }
    }
}
