use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "switchd", about = "In-memory message switch")]
pub struct Cli {
    /// Broker TCP port
    #[arg(long, global = true, default_value_t = 8080)]
    pub port: u16,

    /// Verbose logging (info level)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging (implies --verbose)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the broker daemon
    Broker {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        ip: String,

        /// Fork into the background after binding
        #[arg(long)]
        daemon: bool,

        /// Write the daemon pid to this file
        #[arg(long)]
        pidfile: Option<PathBuf>,

        /// Static asset root served by the Get verb
        #[arg(long, default_value = "www")]
        www: PathBuf,
    },

    #[command(flatten)]
    Client(ClientCommand),
}

/// One-shot (and `serve`: looping) client commands against a broker.
#[derive(Subcommand)]
pub enum ClientCommand {
    /// List queue names
    List {
        /// Only names starting with this prefix
        #[arg(long, default_value = "")]
        prefix: String,
    },

    /// Print trace events
    Tail {
        /// Keep polling for new events
        #[arg(long)]
        follow: bool,
    },

    /// Render the trace as an mscgen sequence chart
    Mscgen,

    /// Acknowledge (remove) one message
    Ack {
        /// Queue holding the message
        queue: String,
        /// Message index within the queue
        id: u64,
    },

    /// Remove a queue
    Destroy { queue: String },

    /// Print a broker state snapshot as JSON
    Diagnostics,

    /// Send a request and wait for the correlated reply
    Call {
        /// Queue to send the request to
        queue: String,

        /// Request body (default: read stdin)
        #[arg(long, conflicts_with = "file")]
        body: Option<String>,

        /// Read the request body from a file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Seconds to wait for the reply
        #[arg(long, default_value_t = 30.0)]
        timeout: f64,
    },

    /// Answer requests arriving on a queue
    Serve {
        /// Queue to serve (created if absent)
        queue: String,

        /// Shell command each request body is piped through
        /// (default: echo the body back)
        #[arg(long)]
        program: Option<String>,
    },
}
