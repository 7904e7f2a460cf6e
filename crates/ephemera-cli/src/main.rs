mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, EnvironmentsCommand};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_target(false).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve => commands::serve().await,
        Command::Worker => commands::worker().await,
        Command::Reconcile => commands::reconcile().await,
        Command::Environments(cmd) => match cmd {
            EnvironmentsCommand::List { repository, active_only } => commands::environments_list(&cli.api_url, repository, active_only).await,
            EnvironmentsCommand::Show { id } => commands::environments_show(&cli.api_url, id).await,
        },
    }
}
