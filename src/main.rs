use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod bridge;
mod capture;
mod captures;
mod cli;
mod config;
mod eid;
mod lock;
mod retention;
mod sandbox;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use app::{factory::ADDR_ENV, AppFactory};
use lock::LockGuard;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = cli::Args::parse();
    let paths = AppFactory::get_paths()?;

    if let cli::Command::Daemon { addr } = &args.command {
        return web::start_daemon(paths, addr);
    }

    let remote = std::env::var(ADDR_ENV).is_ok();
    let _lock = LockGuard::acquire(&paths.base_path, remote)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            let backend = AppFactory::create_backend(&paths)?;
            cli::run(args.command, backend).await
        })
}
