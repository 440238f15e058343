use std::path::PathBuf;

use clap::{Parser, Subcommand};

use atlas_core::RenderMode;

#[derive(Parser)]
#[command(name = "atlas", about = "Site crawler producing self-describing .atls archives")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl a site into an .atls archive
    Crawl {
        /// Seed URLs: repeatable, comma-separated, or a file path
        #[arg(short, long, required = true)]
        seeds: Vec<String>,

        /// Output archive path (.atls)
        #[arg(short, long)]
        out: PathBuf,

        /// Render mode: raw | prerender | full
        #[arg(short, long)]
        mode: Option<RenderMode>,

        /// Parallel renderer workers
        #[arg(long)]
        concurrency: Option<usize>,

        /// Requests per second granted to each host
        #[arg(long)]
        rps: Option<f64>,

        /// Stop after this many pages (0 = unlimited)
        #[arg(long)]
        max_pages: Option<u64>,

        /// Link depth limit (-1 = unlimited, 0 = seeds only)
        #[arg(long)]
        max_depth: Option<i64>,

        /// Honor robots.txt (the default)
        #[arg(long, conflicts_with = "override_robots")]
        respect_robots: bool,

        /// Crawl past robots.txt; the reason is recorded in the manifest
        #[arg(long, value_name = "REASON")]
        override_robots: Option<String>,

        /// Resume from a previous run's staging directory
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Checkpoint every N pages
        #[arg(long)]
        checkpoint_every: Option<u64>,

        /// Counted errors allowed before aborting (0 = unlimited)
        #[arg(long)]
        error_budget: Option<u64>,
    },
    /// Validate a finished archive
    Validate {
        /// Path to the .atls file
        #[arg(long)]
        atls: PathBuf,
    },
}
