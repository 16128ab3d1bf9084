//! dexft - move files between hosts on a private network
//!
//! `dexft --server` serves the current host; `dexft --client --ip HOST`
//! with one of `--pull`, `--push` or `--list` talks to it.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use dexft::cli::Args;
use dexft::config::Config;
use dexft::logger::{self, SharedLogger, TextLogger};
use dexft::net_async::{client, server};

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

async fn wait_for_ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal support: run until accept fails
        std::future::pending::<()>().await;
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    let transfer_log: SharedLogger = match &config.log_file {
        Some(path) => Arc::new(
            TextLogger::new(path)
                .with_context(|| format!("open log file {}", path.display()))?,
        ),
        None => logger::noop(),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    if args.server {
        return rt.block_on(async {
            let srv = server::Server::bind(config.server, transfer_log).await?;
            let port = srv.local_addr()?.port();
            match server::local_private_ip() {
                Some(ip) => println!("Server listening on {}:{}", ip, port),
                None => println!("Server listening on port {}", port),
            }
            srv.run_until(wait_for_ctrl_c()).await
        });
    }

    let host = args.ip.as_deref().context("-i is required")?;
    let (command, pattern) = args.command().context("-p, -u or -l is required")?;
    let summary = rt.block_on(client::run(&config.client, host, command, pattern, &transfer_log))?;
    for line in &summary.listing {
        println!("{}", line);
    }
    if summary.file_count < summary.total_files {
        anyhow::bail!(
            "{} of {} file(s) failed",
            summary.total_files - summary.file_count,
            summary.total_files
        );
    }
    Ok(())
}
