//! Command-line interface for tableq: manage a queue table and its messages.
//!
//! ### Example
//!
//! ```sh
//! tableq --dsn sqlite://jobs.db?mode=rwc --queue emails setup
//! tableq -q emails submit --payload '{"to": "user@example.com"}' --delay 30s
//! tableq -q emails reserve --timeout 5s
//! tableq -q emails finish 1
//! tableq -q emails --format json stats
//! ```
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::process;
use std::time::Duration;
use tableq::{Config, MessageId, MessageOptions, Queue};
use tabled::Tabled;

mod output;

use crate::output::OutputWriter;

#[derive(Parser)]
#[command(name = "tableq")]
#[command(about = "A durable job queue stored in a relational table")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database URL (highest priority, overrides all other config sources)
    #[arg(long, short = 'd')]
    dsn: Option<String>,

    /// Config file path (overrides environment variables and defaults)
    #[arg(long, short = 'c')]
    config: Option<String>,

    /// Queue name
    #[arg(long, short = 'q', default_value = "default")]
    queue: String,

    /// Backing table name (default: derived from the queue name)
    #[arg(long)]
    table: Option<String>,

    /// Log destination: stderr or file path
    #[arg(long, default_value = "stderr")]
    log_dest: String,

    /// Log level: error, warn, info, debug, trace
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output format: json, table
    #[arg(long, default_value = "table")]
    format: String,

    /// Output destination: stdout or file path
    #[arg(long, default_value = "stdout")]
    out: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the queue table if it does not exist
    Setup,
    /// Drop and recreate the queue table, deleting every message
    Flush,
    /// Drop the queue table
    Teardown,
    /// Submit a JSON payload
    Submit {
        /// Payload as JSON text
        #[arg(long, short = 'p')]
        payload: String,

        /// Hide the message for this long (e.g. '30s', '5m')
        #[arg(long)]
        delay: Option<String>,
    },
    /// Wait for a message and reserve it
    Reserve {
        /// How long to wait (e.g. '10s'); defaults to the configured timeout
        #[arg(long, short = 't')]
        timeout: Option<String>,
    },
    /// Wait for a message, reserve it and delete it
    Take {
        /// How long to wait (e.g. '10s'); defaults to the configured timeout
        #[arg(long, short = 't')]
        timeout: Option<String>,
    },
    /// Return a reserved message to the queue, counting a failure
    Release {
        /// Message ID
        id: i64,

        /// Hide the message for this long before it can be reserved again
        #[arg(long)]
        delay: Option<String>,
    },
    /// Mark a message as failed
    Abort {
        /// Message ID
        id: i64,
    },
    /// Delete a message
    Finish {
        /// Message ID
        id: i64,
    },
    /// Show messages that could be reserved now, oldest first
    Peek {
        /// Maximum number of messages
        #[arg(long, short = 'n', default_value = "10")]
        limit: usize,
    },
    /// Count messages per state
    Stats,
}

#[derive(Serialize, Tabled)]
struct Submitted {
    id: MessageId,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli.log_level, &cli.log_dest) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = run_cli(cli).await {
        tracing::error!("Error: {}", e);
        process::exit(1);
    }
}

fn init_tracing(log_level: &str, log_dest: &str) -> anyhow::Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        other => {
            eprintln!("Unknown log level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let builder = tracing_subscriber::FmtSubscriber::builder().with_max_level(level);
    if log_dest == "stderr" {
        tracing::subscriber::set_global_default(builder.with_writer(std::io::stderr).finish())?;
    } else {
        let file = File::create(log_dest)?;
        let subscriber = builder
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

fn parse_duration(value: &str) -> anyhow::Result<Duration> {
    let duration = value
        .parse::<humantime::Duration>()
        .map_err(|e| anyhow::anyhow!("Invalid duration format '{}': {}", value, e))?;
    Ok(duration.into())
}

fn message_options(delay: Option<String>) -> anyhow::Result<MessageOptions> {
    match delay {
        Some(delay) => Ok(MessageOptions::delayed(parse_duration(&delay)?)),
        None => Ok(MessageOptions::immediate()),
    }
}

/// Load configuration, open the queue and dispatch the command.
async fn run_cli(cli: Cli) -> anyhow::Result<()> {
    // Priority order:
    // 1. --dsn CLI argument
    // 2. --config CLI argument
    // 3. TABLEQ_CONFIG_FILE environment variable
    // 4. TABLEQ_DSN and other environment variables
    // 5. Default config files (tableq.yaml, tableq.yml)
    let mut config = Config::load_with_options(cli.dsn, cli.config)
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(table) = cli.table {
        config = config.with_table_name(table);
    }

    let mut queue = tableq::queue(&cli.queue, &config).await?;

    let writer = OutputWriter::from_format(&cli.format);
    let mut out_writer: Box<dyn Write> = match cli.out.as_str() {
        "stdout" => Box::new(std::io::stdout()),
        _ => Box::new(File::create(&cli.out)?),
    };
    let out: &mut dyn Write = out_writer.as_mut();

    handle_command(&mut queue, cli.command, writer, out).await?;
    out.flush()?;
    Ok(())
}

async fn handle_command(
    queue: &mut Queue,
    command: Commands,
    writer: OutputWriter,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match command {
        Commands::Setup => {
            queue.setup().await?;
            writeln!(out, "Queue '{}' ready in table '{}'", queue.name(), queue.table_name())?;
        }

        Commands::Flush => {
            tracing::info!("Flushing queue '{}'...", queue.name());
            queue.flush().await?;
            writeln!(out, "Queue '{}' flushed", queue.name())?;
        }

        Commands::Teardown => {
            queue.teardown().await?;
            writeln!(out, "Table '{}' dropped", queue.table_name())?;
        }

        Commands::Submit { payload, delay } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)
                .map_err(|e| anyhow::anyhow!("Payload is not valid JSON: {}", e))?;
            let options = message_options(delay)?;
            let id = queue.submit(&payload, options).await?;
            if id.is_none() {
                tracing::warn!("Nothing was enqueued on '{}'", queue.name());
            }
            writer.write_optional(id.map(|id| Submitted { id }).as_ref(), out)?;
        }

        Commands::Reserve { timeout } => {
            let timeout = timeout.as_deref().map(parse_duration).transpose()?;
            let message = queue.reserve(timeout).await?;
            writer.write_optional(message.as_ref(), out)?;
        }

        Commands::Take { timeout } => {
            let timeout = timeout.as_deref().map(parse_duration).transpose()?;
            let message = queue.take(timeout).await?;
            writer.write_optional(message.as_ref(), out)?;
        }

        Commands::Release { id, delay } => {
            let id = MessageId::new(id);
            queue.release(id, message_options(delay)?).await?;
            writeln!(out, "Message {} released", id)?;
        }

        Commands::Abort { id } => {
            let id = MessageId::new(id);
            queue.abort(id).await?;
            writeln!(out, "Message {} aborted", id)?;
        }

        Commands::Finish { id } => {
            let id = MessageId::new(id);
            if queue.finish(id).await? {
                writeln!(out, "Message {} finished", id)?;
            } else {
                tracing::warn!("Message {} not found", id);
                writeln!(out, "Message {} not found", id)?;
            }
        }

        Commands::Peek { limit } => {
            let messages = queue.peek(limit).await?;
            writer.write_list(&messages, out)?;
        }

        Commands::Stats => {
            let stats = queue.stats().await?;
            writer.write_item(&stats, out)?;
        }
    }
    Ok(())
}
