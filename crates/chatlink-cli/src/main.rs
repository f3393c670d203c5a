//! chatlink: terminal client for the chatlink messaging backend.
//!
//! Lists conversations, prints history, sends messages and watches live
//! events over a STOMP-over-WebSocket connection.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use tracing::error;

use crate::config::Settings;

/// chatlink: real-time chat client
#[derive(Parser)]
#[command(name = "chatlink", version = "0.1.0", about = "Real-time chat client over STOMP on WebSocket")]
struct Cli {
    /// Local user as id[:name[:email]]
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Endpoint set: development or production
    #[arg(short, long, global = true)]
    env: Option<String>,

    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List conversations, most recent first
    Conversations {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print a conversation's message history
    History {
        /// Conversation id
        conversation: i64,
        /// Number of pages to fetch, newest first
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },

    /// Send a message
    Send {
        /// Conversation id
        conversation: i64,
        /// Message text
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },

    /// Stream live events until interrupted
    Watch {
        /// Conversation to keep open (incoming messages are marked read)
        #[arg(long)]
        open: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("chatlink=debug,chatlink_cli=debug,chatlink_client=debug,chatlink_core=debug")
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("chatlink=warn,chatlink_cli=warn,chatlink_client=warn")
            .with_target(false)
            .init();
    }

    let result = match Settings::resolve(cli.config.as_deref(), cli.env.as_deref(), cli.user.as_deref()) {
        Ok(settings) => match cli.command {
            Command::Conversations { json } => commands::conversations::run(&settings, json).await,
            Command::History { conversation, pages } => {
                commands::history::run(&settings, conversation, pages).await
            }
            Command::Send { conversation, text } => {
                commands::send::run(&settings, conversation, &text.join(" ")).await
            }
            Command::Watch { open } => commands::watch::run(&settings, open).await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("chatlink: {e:#}");
        std::process::exit(1);
    }
}
