use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "ephemera", about = "Ephemeral preview environment orchestrator", version)]
pub struct Cli {
    /// Base URL of a running API server, for the read-only `environments` commands.
    #[arg(long, env = "EPHEMERA_API_URL", global = true, default_value = "http://localhost:8000")]
    pub api_url: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP surface (webhooks, REST API, health checks).
    Serve,

    /// Run the job worker pool, queue janitor, and reconciliation scheduler.
    Worker,

    /// Run every reconciliation sweep once, in-process, and print the report.
    Reconcile,

    /// Inspect environments via a running server's REST API.
    #[command(subcommand)]
    Environments(EnvironmentsCommand),
}

#[derive(Debug, Subcommand)]
pub enum EnvironmentsCommand {
    /// List environments, optionally filtered.
    List {
        #[arg(long)]
        repository: Option<String>,
        #[arg(long)]
        active_only: bool,
    },

    /// Show one environment by id.
    Show { id: Uuid },
}
