//! Watch command
//!
//! Registers every path with one engine and prints events until Ctrl-C.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use pathwatcher::{BackendKind, EventKind, EventReceiver, NormalizedEvent, PathWatcher};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

const RECV_POLL: Duration = Duration::from_millis(100);

pub struct WatchOptions {
    pub recursive: bool,
    pub backend: Option<BackendKind>,
    pub json: bool,
    pub stats: bool,
}

pub async fn run(paths: &[PathBuf], config_path: Option<&Path>, options: WatchOptions) -> Result<()> {
    let mut config = super::load_config(config_path)?;
    if let Some(backend) = options.backend {
        config = config.with_backend(backend);
    }

    let paths = paths
        .iter()
        .map(|path| {
            path.canonicalize()
                .with_context(|| format!("Cannot watch {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let watcher = PathWatcher::new(config);
    let rx = watcher.subscribe()?;

    let mut handles = Vec::with_capacity(paths.len());
    for path in &paths {
        let handle = watcher
            .watch(path, options.recursive)
            .with_context(|| format!("Failed to watch {}", path.display()))?;
        if !options.json {
            println!(
                "{} {} {}",
                "Watching".green().bold(),
                path.display(),
                format!("(handle {handle})").dimmed()
            );
        }
        handles.push(handle);
    }
    info!(
        backend = watcher.backend_name().unwrap_or("none"),
        watches = handles.len(),
        "watch started"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let printer = {
        let stop = stop.clone();
        let json = options.json;
        thread::Builder::new()
            .name("pw-printer".into())
            .spawn(move || print_events(&rx, &stop, json))
            .context("Failed to spawn printer thread")?
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    debug!("interrupt received");

    let diagnostics = watcher.diagnostics();
    for handle in handles {
        watcher.unwatch(handle);
    }
    stop.store(true, Ordering::Release);
    drop(watcher);

    tokio::task::spawn_blocking(move || printer.join())
        .await
        .context("Printer task failed")?
        .map_err(|_| anyhow::anyhow!("Printer thread panicked"))??;

    if options.stats {
        if let Some(stats) = diagnostics {
            if options.json {
                println!("{}", serde_json::to_string(&stats)?);
            } else {
                println!("\n{}", "Backend counters".bold());
                println!("  {}: {}", "batches".cyan(), stats.batches);
                println!("  {}: {}", "notifications".cyan(), stats.notifications);
                println!("  {}: {}", "unmatched".cyan(), stats.unmatched);
                println!("  {}: {}", "dropped signals".cyan(), stats.dropped_signals);
                println!("  {}: {}", "stream starts".cyan(), stats.stream_starts);
                println!("  {}: {}", "skipped paths".cyan(), stats.skipped_paths);
            }
        }
    }

    Ok(())
}

fn print_events(rx: &EventReceiver, stop: &AtomicBool, json: bool) -> Result<()> {
    let stdout = std::io::stdout();
    while !stop.load(Ordering::Acquire) {
        let Some(event) = rx.recv_timeout(RECV_POLL) else {
            continue;
        };
        let line = if json {
            serde_json::to_string(&event)?
        } else {
            render(&event)
        };
        let mut out = stdout.lock();
        writeln!(out, "{line}")?;
        out.flush()?;
    }
    Ok(())
}

/// Human-readable event line with a local timestamp
fn render(event: &NormalizedEvent) -> String {
    let time = chrono::Local::now().format("%H:%M:%S%.3f").to_string();
    let kind = match event.kind {
        EventKind::Create | EventKind::ChildCreate => event.kind.as_str().green().to_string(),
        EventKind::Delete | EventKind::ChildDelete => event.kind.as_str().red().to_string(),
        EventKind::Change | EventKind::ChildChange => event.kind.as_str().yellow().to_string(),
        EventKind::Rename | EventKind::ChildRename => event.kind.as_str().magenta().to_string(),
    };

    match &event.old_path {
        Some(old) => format!(
            "{} {:>12} {} {} {} {}",
            time.dimmed(),
            kind,
            format!("[{}]", event.handle).dimmed(),
            old.display(),
            "->".dimmed(),
            event.new_path.display()
        ),
        None => format!(
            "{} {:>12} {} {}",
            time.dimmed(),
            kind,
            format!("[{}]", event.handle).dimmed(),
            event.new_path.display()
        ),
    }
}
