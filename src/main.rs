//! finder-ipc - line-mode front end for external search backends.
//!
//! With a query on the command line, runs one search and prints the results.
//! Otherwise reads commands from stdin, one per line:
//!
//! ```text
//! <query>         search
//! :activate N     let the backend activate result N
//! :open N         open result N with the default application
//! :reveal N       show result N in the file manager
//! :details N      size, dates and permissions of result N
//! :quit
//! ```
//!
//! Logs go to stderr; stdout carries only results.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use unicode_truncate::{Alignment, UnicodeTruncateStr};

use finder_ipc::config::Settings;
use finder_ipc::ipc::{BackendClient, ClientError};
use finder_ipc::models::Entry;
use finder_ipc::platform::{self, FileDetails};
use finder_ipc::results::ResultSet;

/// Display width of the title column.
const TITLE_WIDTH: usize = 40;

#[derive(Parser)]
#[command(name = "finder-ipc")]
#[command(version, about = "Query pop-launcher or gf from the terminal")]
struct Cli {
    /// Settings file (overrides FINDER_IPC_CONFIG and the default location)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Backend name from the settings (overrides FINDER_IPC_BACKEND)
    #[arg(long, value_name = "NAME")]
    backend: Option<String>,

    /// Per-search deadline in milliseconds
    #[arg(long, value_name = "N")]
    timeout_ms: Option<u64>,

    /// Print results as JSON lines
    #[arg(long)]
    json: bool,

    /// Run a single search and exit
    query: Vec<String>,
}

/// One parsed line of interactive input.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Search(String),
    Activate(u32),
    Open(u32),
    Reveal(u32),
    Details(u32),
    Quit,
    Empty,
}

fn parse_command(line: &str) -> Result<Command> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(if line.is_empty() {
            Command::Empty
        } else {
            Command::Search(line.to_string())
        });
    };

    let mut parts = rest.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    if matches!(verb, "quit" | "q") {
        return Ok(Command::Quit);
    }

    let id: u32 = match parts.next() {
        Some(arg) => arg
            .parse()
            .with_context(|| format!("Invalid result id `{}`", arg))?,
        None => bail!("`:{}` needs a result id", verb),
    };

    match verb {
        "activate" | "a" => Ok(Command::Activate(id)),
        "open" | "o" => Ok(Command::Open(id)),
        "reveal" | "r" => Ok(Command::Reveal(id)),
        "details" | "d" => Ok(Command::Details(id)),
        other => bail!("Unknown command `:{}`", other),
    }
}

/// Filesystem location behind an entry, if it names one.
fn entry_target(entry: &Entry) -> Option<PathBuf> {
    if let Some(path) = &entry.path {
        return Some(PathBuf::from(path));
    }
    // pop-launcher file results describe themselves by path
    let subtitle = entry.subtitle.as_str();
    (subtitle.starts_with('/') || subtitle.starts_with('~')).then(|| platform::expand_home(subtitle))
}

fn print_entries(entries: &[Entry], json: bool) -> Result<()> {
    if json {
        for entry in entries {
            println!("{}", serde_json::to_string(entry)?);
        }
        return Ok(());
    }

    if entries.is_empty() {
        println!("No results");
        return Ok(());
    }
    for entry in entries {
        let title = entry.title.unicode_pad(TITLE_WIDTH, Alignment::Left, true);
        println!(
            "{:>4}  {:<9} {}  {}",
            entry.id,
            entry.classification.icon_name(),
            title,
            entry.subtitle
        );
    }
    Ok(())
}

fn print_details(details: &FileDetails, mime: &str) {
    let unknown = || "Unknown".to_string();
    println!("Path:        {}", details.path.display());
    println!("Name:        {}", details.name);
    println!("MIME Type:   {}", mime);
    println!("Size:        {}", details.size_display());
    println!(
        "Modified:    {}",
        details.modified.map(|t| t.to_rfc2822()).unwrap_or_else(unknown)
    );
    println!(
        "Created:     {}",
        details.created.map(|t| t.to_rfc2822()).unwrap_or_else(unknown)
    );
    println!("Permissions: {}", details.permissions_display());
}

struct Session {
    client: BackendClient,
    results: ResultSet,
    timeout: Duration,
    json: bool,
}

impl Session {
    async fn search(&mut self, query: &str) -> Result<()> {
        let ticket = self.results.begin();
        debug!("Search #{} for {:?}", ticket.sequence(), query);
        match self.client.search_with_timeout(query, self.timeout).await {
            Ok(entries) => {
                if self.results.apply(ticket, entries) {
                    print_entries(self.results.entries(), self.json)?;
                }
            }
            // Recoverable: the backend stays up
            Err(e @ ClientError::Timeout(_)) => eprintln!("{}", e),
            Err(ClientError::BackendDied(reason)) => {
                warn!("Backend died ({}), reconnecting", reason);
                self.results.clear();
                self.client
                    .connect()
                    .await
                    .context("Failed to restart backend")?;
                eprintln!("Backend restarted, please repeat the search");
            }
            Err(e) => return Err(e).context("Search failed"),
        }
        Ok(())
    }

    fn entry(&self, id: u32) -> Result<&Entry> {
        self.results
            .get(id)
            .with_context(|| format!("No result with id {} in the current results", id))
    }

    fn target(&self, id: u32) -> Result<(PathBuf, Option<String>)> {
        let entry = self.entry(id)?;
        let path = entry_target(entry)
            .with_context(|| format!("Result {} ({}) is not a file", id, entry.title))?;
        Ok((path, entry.mime.clone()))
    }

    async fn execute(&mut self, command: Command) -> Result<bool> {
        match command {
            Command::Empty => {}
            Command::Quit => return Ok(false),
            Command::Search(query) => self.search(&query).await?,
            Command::Activate(id) => {
                self.entry(id)?;
                match self.client.activate(id).await {
                    Ok(()) => {}
                    // gf has no activation; open the file directly
                    Err(ClientError::Codec(_)) => {
                        let (path, _) = self.target(id)?;
                        platform::open_target(&path.to_string_lossy()).await?;
                    }
                    Err(e) => return Err(e).context("Activate failed"),
                }
            }
            Command::Open(id) => {
                let (path, _) = self.target(id)?;
                platform::open_target(&path.to_string_lossy()).await?;
            }
            Command::Reveal(id) => {
                let (path, mime) = self.target(id)?;
                platform::reveal_target(&path.to_string_lossy(), mime.as_deref()).await?;
            }
            Command::Details(id) => {
                let (path, mime) = self.target(id)?;
                let details = FileDetails::stat(&path).await?;
                let mime = match mime {
                    Some(mime) => mime,
                    None => platform::mime_type(&path.to_string_lossy()).await,
                };
                print_details(&details, &mime);
            }
        }
        Ok(true)
    }

    async fn interactive(&mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
            let command = match parse_command(&line) {
                Ok(command) => command,
                Err(e) => {
                    eprintln!("{:#}", e);
                    continue;
                }
            };
            match self.execute(command).await {
                Ok(true) => {}
                Ok(false) => break,
                // Keep the loop alive for per-command failures
                Err(e) => eprintln!("{:#}", e),
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "finder_ipc=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    info!("Starting finder-ipc v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    let backend = settings.select_backend(cli.backend.as_deref())?;
    let timeout = cli
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| backend.search_timeout());

    let client = BackendClient::from_config(backend);
    client
        .connect()
        .await
        .with_context(|| format!("Failed to start backend `{}`", backend.name))?;

    let mut session = Session {
        client,
        results: ResultSet::new(),
        timeout,
        json: cli.json,
    };

    let outcome = if cli.query.is_empty() {
        session.interactive().await
    } else {
        session.search(&cli.query.join(" ")).await
    };

    // Always reap the backend, even when the run failed
    if let Err(e) = session.client.close().await {
        warn!("{}", e);
    }
    outcome
}
