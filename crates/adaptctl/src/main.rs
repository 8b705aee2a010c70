//! Adaptation Control - CLI client for the adaptation daemon.
//!
//! Registers policies, inspects the knowledge base, and surfaces the
//! event log for operators.

mod client;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "adaptctl")]
#[command(about = "Adaptation control plane - operator interface", long_about = None)]
#[command(version)]
struct Cli {
    /// Base URL of the adaptation daemon
    #[arg(long, default_value = "http://127.0.0.1:7850")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon health
    Status,

    /// Register or replace an adaptation policy from a JSON file
    Policy {
        /// Path to the policy JSON
        file: String,
    },

    /// Show recent adaptation events
    Events {
        /// Maximum events to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show the full knowledge view for a policy
    Knowledge {
        /// Policy id
        policy_id: String,
    },

    /// Tail the telemetry export stream for one instance
    Export {
        policy_id: String,
        instance_id: String,

        /// Rows from the end of the stream (0 = all)
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = client::DaemonClient::new(&cli.url)?;

    match cli.command {
        Commands::Status => commands::status(&client).await,
        Commands::Policy { file } => commands::register_policy(&client, &file).await,
        Commands::Events { limit } => commands::events(&client, limit).await,
        Commands::Knowledge { policy_id } => commands::knowledge(&client, &policy_id).await,
        Commands::Export {
            policy_id,
            instance_id,
            limit,
        } => commands::export(&client, &policy_id, &instance_id, limit).await,
    }
}
