use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mailthreads::config::{Backend, Config};
use mailthreads::mail::{FolderGroup, ImapConnector, MaildirConnector};
use mailthreads::{ThreadRequest, fetch_email_threads};

/// Rebuild a mailbox's conversation threads and write them as JSON
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Account from the config file (defaults to `default_account`)
    #[arg(short, long)]
    account: Option<String>,

    /// Only fetch messages from the last N days
    #[arg(short, long)]
    days: Option<u32>,

    /// Where to write the thread document
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// IMAP server, overriding the account's
    #[arg(long)]
    server: Option<String>,

    /// Number of folders fetched in parallel
    #[arg(short, long)]
    workers: Option<usize>,

    /// Folder to fetch, repeatable; replaces the configured list
    #[arg(short, long = "folder")]
    folders: Vec<String>,
}

fn run(cli: Cli) -> Result<PathBuf> {
    let config = Config::load();

    let name = cli
        .account
        .as_deref()
        .or_else(|| config.default_account_name())
        .ok_or_else(|| anyhow!("no account configured in {}", Config::config_path().display()))?;
    let account = config
        .get_account(name)
        .with_context(|| {
            format!(
                "unknown account {} (configured: {})",
                name,
                config.account_names().join(", ")
            )
        })?;

    let folders = if cli.folders.is_empty() {
        config.fetch.folders.clone()
    } else {
        cli.folders.into_iter().map(FolderGroup::single).collect()
    };

    let request = ThreadRequest {
        folders,
        days: cli.days.or(config.fetch.days),
        workers: cli.workers.unwrap_or(config.fetch.workers),
        output: cli.output.unwrap_or_else(|| config.output_path()),
    };

    tracing::info!(account = name, backend = ?account.backend, days = ?request.days, "starting fetch");

    let path = match account.backend {
        Backend::Imap => {
            let server = cli.server.unwrap_or_else(|| account.server.clone());
            let connector = ImapConnector::new(server, account.port, account.credentials()?);
            fetch_email_threads(&connector, &request)?
        }
        Backend::Maildir => {
            let connector = MaildirConnector::new(account.maildir_path());
            fetch_email_threads(&connector, &request)?
        }
    };

    Ok(path)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mailthreads=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
