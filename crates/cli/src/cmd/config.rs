//! Configuration command
//!
//! Prints the configuration `pw watch` would run with.

use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(path: Option<&Path>) -> Result<()> {
    let config = super::load_config(path)?;

    println!("{}", "Watcher Configuration".bold());
    match path {
        Some(path) => println!("{}: {}\n", "Location".dimmed(), path.display().dimmed()),
        None => println!("{}: {}\n", "Location".dimmed(), "(defaults)".dimmed()),
    }

    println!("{}", "[engine]".yellow());
    println!(
        "  {} = {} {}",
        "backend".cyan(),
        config.backend.as_str(),
        format!("(resolves to {})", config.backend.resolve().as_str()).dimmed()
    );
    println!(
        "  {} = {}",
        "filter_pre_watch_events".cyan(),
        match config.filter_pre_watch_events {
            Some(on) => on.to_string(),
            None => "backend default".dimmed().to_string(),
        }
    );

    println!("\n{}", "[delivery]".yellow());
    println!("  {} = {}", "delivery_capacity".cyan(), config.delivery_capacity);
    println!(
        "  {} = {} {}",
        "delivery_poll_ms".cyan(),
        config.delivery_poll_ms,
        "(shutdown re-check)".dimmed()
    );

    println!("\n{}", "[backends]".yellow());
    println!(
        "  {} = {} {}",
        "coalesce_latency_ms".cyan(),
        config.coalesce_latency_ms,
        "(coalescing)".dimmed()
    );
    println!(
        "  {} = {} {}",
        "rename_window_ms".cyan(),
        config.rename_window_ms,
        "(generic)".dimmed()
    );

    Ok(())
}
