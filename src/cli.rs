use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::app::{AppBackend, Message, Reply};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Start traceback as a service.
    ///
    /// The browser add-on pushes page state to it and it captures the
    /// active page on a timer and on navigation.
    Daemon {
        /// Address to listen on
        #[clap(short, long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
    /// Search captures
    Search {
        query: String,

        /// Plain keyword search, no vector similarity
        #[clap(short, long, default_value = "false")]
        keyword: bool,

        /// Print the count
        #[clap(short = 'c', long, default_value = "false")]
        count: bool,
    },
    /// Print a single capture
    Get { id: u64 },
    /// Store and index statistics
    Stats,
    /// Delete captures past the retention horizon
    Purge {
        /// Override the configured retention days
        #[clap(short, long)]
        days: Option<u32>,
    },
    /// Delete every capture
    DeleteAll {
        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Runs every command except `daemon`.
pub async fn run(command: Command, app: Arc<dyn AppBackend>) -> anyhow::Result<()> {
    match command {
        Command::Daemon { .. } => bail!("daemon is started from main"),

        Command::Search {
            query,
            keyword,
            count,
        } => {
            let reply = app
                .handle(Message::Search {
                    query,
                    semantic: !keyword,
                })
                .await?;
            let Reply::Search(reply) = reply else {
                bail!("unexpected reply: {reply:?}");
            };

            if count {
                println!("{} captures found", reply.results.len());
                return Ok(());
            }
            if !keyword && !reply.semantic {
                log::info!("semantic search unavailable, showing keyword matches");
            }
            print_json(&reply.results)
        }

        Command::Get { id } => match app.handle(Message::GetCapture { id }).await? {
            Reply::Capture {
                capture: Some(capture),
            } => print_json(&capture),
            Reply::Capture { capture: None } => bail!("capture {id} not found"),
            reply => bail!("unexpected reply: {reply:?}"),
        },

        Command::Stats => match app.handle(Message::GetStats).await? {
            Reply::Stats { stats } => print_json(&stats),
            reply => bail!("unexpected reply: {reply:?}"),
        },

        Command::Purge { days } => match app.handle(Message::Purge { days }).await? {
            Reply::Deleted { deleted, .. } => {
                println!("{deleted} captures purged");
                Ok(())
            }
            reply => bail!("unexpected reply: {reply:?}"),
        },

        Command::DeleteAll { yes } => {
            if !yes {
                match inquire::prompt_confirmation("Delete every capture? This cannot be undone (y/n)") {
                    Ok(true) => {}
                    Ok(false) => return Ok(()),
                    Err(err) => bail!("{err}"),
                }
            }

            match app.handle(Message::DeleteAll).await? {
                Reply::Deleted { deleted, .. } => {
                    println!("{deleted} captures deleted");
                    Ok(())
                }
                reply => bail!("unexpected reply: {reply:?}"),
            }
        }
    }
}
