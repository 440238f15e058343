mod cli;
mod commands;
mod crawl;
mod seeds;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, warn};

// mimalloc keeps memory bounded with many parallel renderer workers; glibc
// malloc does not return freed pages under this allocation pattern.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use atlas_core::error::exit;
use atlas_core::{CompletionReason, CrawlError};

use crate::cli::{Cli, Commands};
use crate::crawl::{run_crawl, CrawlOptions};

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .thread_stack_size(8 * 1024 * 1024)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to build runtime: {e}");
            return ExitCode::from(exit::UNKNOWN);
        }
    };
    ExitCode::from(runtime.block_on(async_main()))
}

async fn async_main() -> u8 {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("config error: {e}");
            return exit::UNKNOWN;
        }
    };
    config.apply_env_overrides();

    match cli.command {
        Commands::Crawl {
            seeds,
            out,
            mode,
            concurrency,
            rps,
            max_pages,
            max_depth,
            respect_robots,
            override_robots,
            resume,
            checkpoint_every,
            error_budget,
        } => {
            if let Some(mode) = mode {
                config.render.mode = mode;
            }
            if let Some(n) = concurrency {
                config.crawl.concurrency = n.clamp(1, 128);
            }
            if let Some(n) = rps {
                if n > 0.0 {
                    config.crawl.per_host_rps = n;
                }
            }
            if let Some(n) = max_pages {
                config.crawl.max_pages = n;
            }
            if let Some(n) = max_depth {
                config.crawl.max_depth = n;
            }
            if respect_robots {
                config.robots.respect = true;
            }
            if let Some(reason) = override_robots {
                config.robots.override_used = true;
                config.robots.override_reason = Some(reason);
            }
            if let Some(n) = checkpoint_every {
                config.checkpoint.every_pages = n.max(1);
            }
            if let Some(n) = error_budget {
                config.crawl.error_budget = n;
            }

            let seed_list = match seeds::load_seeds(&seeds) {
                Ok(list) => list,
                Err(e) => {
                    error!("{e}");
                    return exit::UNKNOWN;
                }
            };

            match run_crawl(
                config,
                CrawlOptions {
                    out,
                    seeds: seed_list,
                    resume,
                },
            )
            .await
            {
                Ok(CompletionReason::ErrorBudget) => exit::ERROR_BUDGET,
                Ok(_) => exit::OK,
                Err(e) => {
                    error!("crawl failed: {e}");
                    match e {
                        CrawlError::WriteDisk(_) => exit::WRITE_FATAL,
                        CrawlError::RenderFatal { .. } => exit::RENDER_FATAL,
                        CrawlError::CorruptCheckpoint(_) => exit::VALIDATE_FATAL,
                        _ => exit::UNKNOWN,
                    }
                }
            }
        }
        Commands::Validate { atls } => commands::validate::run(&atls),
    }
}

fn load_config(path: &str) -> Result<atlas_core::CrawlConfig> {
    let raw = std::fs::read_to_string(path).unwrap_or_else(|_| {
        warn!(path, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    Ok(toml::from_str(&raw)?)
}
