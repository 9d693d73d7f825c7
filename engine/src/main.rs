//! multiget: fetch URLs from the command line.
//!
//! A thin driver over the transfer engine: it creates one task per URL
//! argument, follows the engine's event channel, and exits when every
//! transfer has reached a terminal state.

use anyhow::Result;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use multiget::{config, DownloadEngine, History, Scheme, TaskEvent, TaskStatus};

#[tokio::main]
async fn main() -> Result<()> {
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        eprintln!("usage: multiget <url> [<url>...]");
        std::process::exit(2);
    }

    info!("Starting multiget v{}", env!("CARGO_PKG_VERSION"));

    let settings = config::load_or_create_default()?;
    info!("Configuration loaded from {:?}", config::config_path());
    info!("Saving into {:?}", settings.download_dir);

    let history = History::open_default()?;
    let engine = DownloadEngine::new(settings, history);
    let mut events = engine.subscribe();

    let mut pending = 0usize;
    for url in &urls {
        match engine.create(url, Scheme::Https) {
            Ok(_) => pending += 1,
            Err(err) => error!("Rejected {url}: {err}"),
        }
    }

    let mut completed = 0usize;
    let mut failed = 0usize;
    while pending > 0 {
        match events.recv().await {
            Ok(TaskEvent::Progress { id }) => {
                if let Some(snapshot) = engine.snapshot(id) {
                    let position = match snapshot.total_size {
                        Some(total) => format!(
                            "{} / {} ({:.1}%)",
                            format_bytes(snapshot.bytes_transferred),
                            format_bytes(total),
                            snapshot.progress_percent.unwrap_or(0.0)
                        ),
                        None => format_bytes(snapshot.bytes_transferred),
                    };
                    info!(
                        "{}: {} {} at {}/s",
                        snapshot.filename,
                        snapshot.status,
                        position,
                        format_bytes(snapshot.speed_bytes_per_sec as u64)
                    );
                }
            }
            Ok(TaskEvent::Terminal { id, status }) => {
                pending -= 1;
                let name = engine
                    .snapshot(id)
                    .map(|s| s.filename)
                    .unwrap_or_else(|| id.to_string());
                match status {
                    TaskStatus::Completed => {
                        completed += 1;
                        info!("{name}: completed");
                    }
                    other => {
                        failed += 1;
                        warn!("{name}: {other}");
                    }
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Dropped {skipped} progress events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    info!("Done: {completed} completed, {failed} not completed");
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Human-readable byte count.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} PB")
}
