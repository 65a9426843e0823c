//! Treecrawl main entry point
//!
//! This is the command-line interface for the treecrawl rule-tree crawler.

use anyhow::{anyhow, Context};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use treecrawl::config::{load_rule_file, LoadedRules};
use treecrawl::crawler::CrawlPlan;
use treecrawl::{crawl, PageData};

/// Treecrawl: a declarative web crawler
///
/// Treecrawl fetches an entry page, evaluates a tree of extraction rules
/// against it, follows links into nested rule trees and downloads
/// resources. The result tree is printed as JSON.
#[derive(Parser, Debug)]
#[command(name = "treecrawl")]
#[command(version = "1.0.0")]
#[command(about = "A declarative rule-tree web crawler", long_about = None)]
struct Cli {
    /// Path to TOML rule file
    #[arg(value_name = "RULES")]
    rules: PathBuf,

    /// Entry URL; overrides `entry` in the rule file
    #[arg(short, long)]
    url: Option<String>,

    /// Write the result JSON to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate the rule file and show the crawl plan without crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading rules from: {}", cli.rules.display());
    let loaded = load_rule_file(&cli.rules)
        .with_context(|| format!("failed to load rule file {}", cli.rules.display()))?;

    let entry = cli
        .url
        .clone()
        .or_else(|| loaded.entry.clone())
        .ok_or_else(|| anyhow!("no entry URL: pass --url or set `entry` in the rule file"))?;

    if cli.dry_run {
        return handle_dry_run(&entry, &loaded);
    }
    handle_crawl(&entry, loaded, cli.output.as_deref()).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Logs go to stderr so the result JSON can be piped from stdout.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("treecrawl=info,warn"),
            1 => EnvFilter::new("treecrawl=debug,info"),
            2 => EnvFilter::new("treecrawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates rules and shows the crawl plan
fn handle_dry_run(entry: &str, loaded: &LoadedRules) -> anyhow::Result<()> {
    let plan = CrawlPlan::resolve(&loaded.tree, &loaded.options)?;
    let options = &loaded.options;

    println!("=== Treecrawl Dry Run ===\n");
    println!("Entry: {}", entry);

    println!("\nOptions:");
    println!("  Mode: {:?}", options.mode);
    println!("  Total concurrent: {}", options.total_concurrent);
    println!("  Default rate: {}ms", options.rate);
    println!("  Default concurrent: {}", options.concurrent);
    println!("  Retry: {} (every {}ms)", options.retry, options.retry_timeout);

    println!("\nRule tree:");
    println!("  Page rules: {}", loaded.tree.page_count());
    println!("  Reachable through `rules`: {}", plan.page_rules_length);
    println!("  Fetch depth: {}", plan.rules_depth);
    println!("  Root fields: {}", loaded.tree.field_names(loaded.tree.root()).join(", "));

    println!("\n✓ Rule file is valid");
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(entry: &str, loaded: LoadedRules, output: Option<&Path>) -> anyhow::Result<()> {
    let result: PageData = match crawl(entry, loaded.tree, loaded.options).await {
        Ok(result) => {
            tracing::info!("Crawl completed successfully");
            result
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            return Err(e.into());
        }
    };

    let json = serde_json::to_string_pretty(&result.to_json())?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!("Result written to: {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
