//! ioc-relay CLI — batch submission of security detections.
//!
//! Run `iocrelay --help` for usage information.

use anyhow::Result;
use console::style;
use ioc_relay::{Args, BatchProcessor, BatchReport, Command, CsvConverter, ProcessorConfig};
use tracing::{Level, error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();
    setup_logging(&args);

    match run(&args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("{e}");
            eprintln!("{} {e}", style("Error:").red().bold());
            std::process::exit(1);
        }
    }
}

async fn run(args: &Args) -> Result<i32> {
    // Conversion needs no client; handle it before building one.
    if let Command::Convert { files, output_dir } = &args.command {
        let mut converter = CsvConverter::new();
        if let Some(dir) = output_dir {
            converter = converter.with_output_dir(dir.clone());
        }

        for file in files {
            let json_path = converter.convert_file(file, None)?;
            println!(
                "{} {} -> {}",
                style("✓").green().bold(),
                file.display(),
                json_path.display()
            );
        }
        return Ok(0);
    }

    let config = ProcessorConfig::from_args(args)?;
    let processor = BatchProcessor::new(config)?;

    let report = match &args.command {
        Command::Submit { files, csv, large } => {
            if files.is_empty() {
                anyhow::bail!("no input files given");
            }
            info!(files = files.len(), csv, large, "starting submission");

            if *csv {
                processor.process_csv_files(files, args.debug).await?
            } else if *large {
                let mut merged: Option<BatchReport> = None;
                for file in files {
                    let report = processor.process_large_file(file, args.debug).await?;
                    merged = Some(match merged {
                        None => report,
                        Some(mut acc) => {
                            acc.summary += report.summary;
                            acc.succeeded += report.succeeded;
                            acc.failed += report.failed;
                            acc
                        }
                    });
                }
                merged.unwrap_or_else(BatchReport::empty)
            } else {
                processor.process_files(files, args.debug).await?
            }
        }
        Command::Dir {
            directory,
            pattern,
            recursive,
        } => {
            info!(dir = %directory.display(), pattern, "processing directory");
            processor
                .process_directory(directory, pattern, *recursive, args.debug)
                .await?
        }
        Command::Convert { .. } => unreachable!("handled above"),
    };

    if args.json_logs {
        // Machine-readable result for pipeline consumption.
        let rendered = serde_json::json!({
            "status": "complete",
            "succeeded": report.succeeded,
            "failed": report.failed,
            "summary": report.summary,
            "metrics": report.metrics,
        });
        println!("{}", serde_json::to_string(&rendered)?);
    } else {
        report.print_summary();
        if args.verbose {
            report.metrics.log_summary(Level::INFO);
        }
    }

    // Partial success is success; a run where nothing went through is not.
    if report.failed > 0 && report.succeeded == 0 {
        return Ok(1);
    }
    Ok(0)
}

fn setup_logging(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ioc_relay={level},iocrelay={level}")));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .compact(),
            )
            .init();
    }
}
