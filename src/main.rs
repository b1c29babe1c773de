mod codec;
mod credentials;
mod error;
mod inbox;
mod logging;
mod login;
mod outbox;
mod settings;
mod sync;
mod transport;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::credentials::SecretBackend;
use crate::logging::Logger;
use crate::settings::Config;
use crate::sync::{Orchestrator, SyncOptions};
use crate::transport::NetworkConnector;

#[derive(Parser, Debug)]
#[command(name = "fsmail", version, about = "Synchronizes a directory with a mailbox")]
struct Cli {
    /// Config file (default: .fsmail.yaml in the target directory, then in $HOME)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level [debug, info, warn, error]
    #[arg(short = 'l', long, global = true)]
    log_level: Option<String>,

    /// Where credentials are kept
    #[arg(long, global = true, value_enum)]
    secret_backend: Option<SecretBackend>,

    /// Target directory holding inbox/, outbox/ and sent/
    #[arg(short = 'd', long, global = true)]
    directory: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the inbox, then send everything in the outbox
    Sync(SyncArgs),
    /// Store the account credentials
    Login,
}

#[derive(Args, Debug)]
struct SyncArgs {
    /// IMAP server address (host:port)
    #[arg(short = 'i', long)]
    imap_server_address: Option<String>,

    /// SMTP server address (host:port)
    #[arg(short = 's', long)]
    smtp_server_address: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("getting working directory")?;
    let lookup_dir = cli.directory.clone().unwrap_or_else(|| cwd.clone());
    let config = settings::load_settings(cli.config.as_deref(), &lookup_dir)?;

    let level = cli
        .log_level
        .as_deref()
        .or(config.log_level.as_deref())
        .unwrap_or("info");
    let log = Logger::stderr(logging::parse_level(level)?);

    let backend = cli.secret_backend.or(config.secret_backend).unwrap_or_default();
    let state_dir = settings::home_dir().unwrap_or_else(|| cwd.clone());
    let store = credentials::open_store(backend, &state_dir);
    log.debug(format_args!("using {backend:?} secret store"));

    match cli.command {
        Command::Login => login::run(store.as_ref(), &log),
        Command::Sync(args) => {
            let working_dir = cli.directory.or(config.directory.clone()).unwrap_or(cwd);
            let options = sync_options(working_dir, args, &config);

            let connector = NetworkConnector::new(log.clone());
            let mut orchestrator = Orchestrator::new(options, store.as_ref(), connector, log.scoped("sync"));
            let outcome = orchestrator.run().await;
            log.debug(format_args!("sync ended {:?}", orchestrator.state()));
            outcome?;
            Ok(())
        }
    }
}

fn sync_options(working_dir: PathBuf, args: SyncArgs, config: &Config) -> SyncOptions {
    let mut options = SyncOptions::new(working_dir);
    options.imap_server_address = args.imap_server_address.or(config.imap_server_address.clone());
    options.smtp_server_address = args.smtp_server_address.or(config.smtp_server_address.clone());
    if let Some(interval) = config.send_interval() {
        options.send_interval = interval;
    }
    options
}
