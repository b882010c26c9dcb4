//! Sendline binary entry point.
//!
//! Usage: sendline [--base-dir <dir>] <run|enqueue|status|cancel>

mod app;
mod commands;

use clap::{Parser, Subcommand};
use sendline_config_and_utils::{init_logging, Config, Paths};
use std::path::PathBuf;

/// Sendline: reliable delivery of queued outbound messages.
#[derive(Parser)]
#[command(name = "sendline")]
#[command(about = "Queue outbound messages and deliver them through the relay")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level.
    #[arg(short, long, env = "SENDLINE_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Base directory for config, database and logs. Defaults to ~/.sendline
    #[arg(long, env = "SENDLINE_HOME", global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the delivery pipeline until Ctrl-C
    Run {
        /// Relay base URL
        #[arg(long, env = "SENDLINE_RELAY_URL")]
        relay_url: Option<String>,

        /// Resubmissions allowed for transient failures
        #[arg(long, env = "SENDLINE_MAX_RETRIES")]
        max_retries: Option<u32>,

        /// Concurrent network requests
        #[arg(long, env = "SENDLINE_WORKER_POOL_SIZE")]
        workers: Option<usize>,

        /// Health URL probed for connectivity; without one the network is assumed up
        #[arg(long, env = "SENDLINE_PROBE_URL")]
        probe_url: Option<String>,
    },
    /// Queue a payload file for delivery
    Enqueue {
        /// Recipient handle
        #[arg(long)]
        to: String,

        /// Payload file
        #[arg(long)]
        file: PathBuf,

        /// MIME type; guessed from the file extension when omitted
        #[arg(long)]
        mime: Option<String>,

        /// Payload duration in milliseconds, for audio and video
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Delivery provider
        #[arg(long, default_value = relay_provider::RELAY_PROVIDER_NAME)]
        provider: String,
    },
    /// List persisted messages
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Remove a message that has not been sent
    Cancel {
        /// Message id
        message_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    paths.ensure_dirs()?;
    init_logging(&config.log_level, Some(paths.log_file()));

    match cli.command {
        Commands::Run {
            relay_url,
            max_retries,
            workers,
            probe_url,
        } => {
            if let Some(url) = relay_url {
                config.relay_api_url = url;
            }
            if let Some(retries) = max_retries {
                config.max_retries = retries;
            }
            if workers.is_some() {
                config.worker_pool_size = workers;
            }
            if probe_url.is_some() {
                config.connectivity_probe_url = probe_url;
            }
            config.validate()?;
            app::run(config, paths).await?;
        }
        Commands::Enqueue {
            to,
            file,
            mime,
            duration_ms,
            provider,
        } => {
            let store = commands::open_store(&paths)?;
            let message = commands::enqueue(
                &store,
                commands::EnqueueRequest {
                    provider,
                    recipient: to,
                    file,
                    mime_type: mime,
                    duration_ms,
                },
            )?;
            println!("{}", message.id);
        }
        Commands::Status { json } => {
            let store = commands::open_store(&paths)?;
            if json {
                println!("{}", commands::status_json(&store)?);
            } else {
                for line in commands::status_lines(&store)? {
                    println!("{}", line);
                }
            }
        }
        Commands::Cancel { message_id } => {
            let store = commands::open_store(&paths)?;
            if commands::cancel(&store, &message_id)? {
                println!("Cancelled {}", message_id);
            } else {
                println!("Nothing to cancel for {}", message_id);
            }
        }
    }

    Ok(())
}
