//! Main entry point for the zipget CLI application.
//!
//! Resolves a Zenodo record, then extracts the selected entries of its ZIP
//! archives without downloading the archives themselves.

use anyhow::{Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zipget::{
    ArchiveReport, Cli, Downloader, HttpTransport, ProgressSink, RangeFetcher, RecordResolver,
    ZenodoResolver,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    let config = cli.to_config();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling outstanding requests");
                cancel.cancel();
            }
        });
    }

    let transport = HttpTransport::new()?;
    let resolver = ZenodoResolver::new(transport.client().clone(), config.timeout);
    let sources = resolver.resolve(&cli.record).await?;
    info!(record = %cli.record, files = sources.len(), "record resolved");

    let fetcher = Arc::new(
        RangeFetcher::new(transport, config.retry, config.timeout).with_cancellation(cancel.clone()),
    );
    let mut downloader = Downloader::new(fetcher.clone(), config)?;

    let bar = (cli.show_progress() && std::io::stderr().is_terminal())
        .then(|| Arc::new(BarProgress::new()));
    if let Some(bar) = &bar {
        downloader = downloader.with_progress(bar.clone());
    }

    let reports = downloader.run(&sources).await;
    if let Some(bar) = &bar {
        bar.bar.finish_and_clear();
    }

    let (succeeded, failed) = print_summary(&reports);
    if !cli.quiet {
        eprintln!(
            "\n{} file(s) ready, {} failed, {} transferred",
            succeeded,
            failed,
            format_size(fetcher.transferred_bytes())
        );
    }

    if cancel.is_cancelled() {
        bail!("download interrupted by user");
    }
    if failed > 0 {
        bail!("{} file(s) could not be extracted", failed);
    }
    Ok(())
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("zipget={}", cli.log_level())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Print every extracted path to stdout and every failure to stderr.
///
/// Returns the number of succeeded and failed entries.
fn print_summary(reports: &[ArchiveReport]) -> (usize, usize) {
    for report in reports {
        match &report.results {
            Ok(results) => {
                for result in results {
                    match &result.outcome {
                        Ok(file) => println!("{}", file.path.display()),
                        Err(e) => eprintln!(
                            "{}: {}: {} ({:?})",
                            report.archive,
                            result.entry_name,
                            e,
                            e.kind()
                        ),
                    }
                }
            }
            Err(e) => eprintln!("{}: {} ({:?})", report.archive, e, e.kind()),
        }
    }

    (
        reports.iter().map(ArchiveReport::succeeded).sum(),
        reports.iter().map(ArchiveReport::failed).sum(),
    )
}

/// Byte progress across all entries in flight.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg:30!} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        Self { bar }
    }
}

impl ProgressSink for BarProgress {
    fn on_entry_start(&self, _archive: &str, entry: &str, total: u64) {
        self.bar.inc_length(total);
        self.bar.set_message(entry.to_string());
    }

    fn on_bytes(&self, _entry: &str, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn on_entry_retry(&self, _entry: &str, discarded: u64) {
        self.bar.dec(discarded);
    }
}

/// Formats a byte count into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
