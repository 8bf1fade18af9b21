mod commands;
mod opts;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::invoke::InvokeArgs;
use commands::sandbox::SandboxArgs;
use commands::trigger::{TriggerDeleteArgs, TriggerSetArgs, TriggerShowArgs};
use opts::GlobalOpts;

#[derive(Parser, Debug)]
#[command(name = "mcgate", version, about = "Sandboxed handler gateway CLI")]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect or edit an object's trigger metadata
    #[command(subcommand)]
    Trigger(TriggerCommand),

    /// Tenant sandbox management
    #[command(subcommand)]
    Sandbox(SandboxCommand),

    /// Run an object's handlers for one trigger
    Invoke(InvokeArgs),
}

#[derive(Subcommand, Debug)]
enum TriggerCommand {
    /// Print the trigger record
    Show(TriggerShowArgs),

    /// Assign handlers to a trigger
    Set(TriggerSetArgs),

    /// Remove handlers from one trigger, or every trigger
    Delete(TriggerDeleteArgs),
}

#[derive(Subcommand, Debug)]
enum SandboxCommand {
    /// Start the tenant's sandbox and control daemon if needed
    Ensure(SandboxArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    setup_logging();
    let opts = &cli.opts;

    match cli.command {
        Command::Trigger(cmd) => match cmd {
            TriggerCommand::Show(args) => commands::trigger::cmd_show(opts, &args),
            TriggerCommand::Set(args) => commands::trigger::cmd_set(opts, &args),
            TriggerCommand::Delete(args) => commands::trigger::cmd_delete(opts, &args),
        },
        Command::Sandbox(cmd) => match cmd {
            SandboxCommand::Ensure(args) => commands::sandbox::cmd_ensure(opts, &args).await,
        },
        Command::Invoke(args) => commands::invoke::cmd_invoke(opts, &args).await,
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
