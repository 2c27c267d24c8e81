//! FileDeck CLI
//!
//! Command line front end for a FileDeck storage server.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use filedeck_client::config::default_config_path;
use filedeck_client::session::CheckOutcome;
use filedeck_client::storage::Database;
use filedeck_client::{
    open_store, ClientConfig, Drive, DriveError, HttpStorageApi, Notification,
    NotificationCenter, SessionHandle, TransferEvent, TransferStatus,
};
use protocol::{FileId, FileRecord, FolderId};
use tokio::sync::broadcast::error::RecvError;

/// Settings key holding the last username that logged in.
const LAST_USERNAME_KEY: &str = "last_username";

/// FileDeck - browse, upload and organize files on a storage server.
#[derive(Parser, Debug)]
#[command(name = "filedeck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Log in and remember the session
    Login {
        /// Account name (defaults to the last one used)
        #[arg(long, short)]
        username: Option<String>,

        /// Password (prompted for when omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Create an account
    Signup {
        /// Account name, at least 3 characters
        username: String,

        /// Contact email
        email: String,

        /// Password (prompted for when omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Forget the saved session
    Logout,

    /// Show who is logged in and whether the session is still valid
    Whoami,

    /// List files
    Ls {
        /// Ask the server for files matching this name
        #[arg(long, short)]
        search: Option<String>,

        /// Only show files whose name or tags contain this text
        #[arg(long, short)]
        filter: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Delete files
    Rm {
        /// File IDs to delete
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Move files into a folder, or to the root when no folder is given
    Mv {
        /// File IDs to move
        #[arg(required = true)]
        ids: Vec<String>,

        /// Destination folder ID
        #[arg(long)]
        folder: Option<String>,
    },

    /// Upload local files
    Upload {
        /// Files to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Download a file
    Download {
        /// File ID to download
        id: String,

        /// Destination path (defaults to the file's name)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Create a folder
    Mkdir {
        /// Folder name
        name: String,
    },

    /// List folders
    Folders,

    /// Show storage usage
    Stats,

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration file actions.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration, environment overrides included
    Show,
}

/// Engine plus the local settings database.
struct App {
    drive: Arc<Drive>,
    settings: Database,
}

impl App {
    fn open(config: &ClientConfig) -> anyhow::Result<Self> {
        let api = HttpStorageApi::new(&config.server, config.transfer.chunk_size)
            .context("Invalid server configuration")?;
        let store = open_store(&config.storage).context("Failed to open session store")?;
        let session = SessionHandle::load(store).context("Failed to load saved session")?;
        let settings = Database::open(config.storage.database_path())
            .context("Failed to open settings database")?;

        Ok(Self {
            drive: Drive::new(Arc::new(api), session, &config.transfer),
            settings,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        ClientConfig::load(config_path)?
    } else {
        ClientConfig::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.log.level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    // Config commands never touch the server or the session store
    let command = match cli.command {
        Commands::Config { action } => {
            let path = cli.config.unwrap_or_else(default_config_path);
            return run_config(&config, &action, &path);
        }
        command => command,
    };

    tracing::debug!("Using server {}", config.server.base_url);
    let app = App::open(&config)?;

    run(&app, command).await.map_err(|e| {
        let needs_login = e
            .downcast_ref::<DriveError>()
            .is_some_and(DriveError::is_auth);
        if needs_login {
            e.context("Not logged in; run `filedeck login` first")
        } else {
            e
        }
    })
}

fn run_config(config: &ClientConfig, action: &ConfigAction, path: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists; pass --force to overwrite it",
                    path.display()
                );
            }
            ClientConfig::default().save(path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigAction::Show => print!("{}", config.to_toml()?),
    }
    Ok(())
}

async fn run(app: &App, command: Commands) -> anyhow::Result<()> {
    let drive = &app.drive;

    match command {
        Commands::Login { username, password } => {
            let username = match username {
                Some(username) => username,
                None => app
                    .settings
                    .get_setting(LAST_USERNAME_KEY)?
                    .context("No username given; pass --username")?,
            };
            let password = match password {
                Some(password) => password,
                None => prompt("Password: ")?,
            };

            let session = drive.guard().login(&username, &password).await?;
            app.settings
                .set_setting(LAST_USERNAME_KEY, &session.user.username)?;
            println!("Logged in as {}", session.user.username);
        }
        Commands::Signup {
            username,
            email,
            password,
        } => {
            let (password, confirm) = match password {
                Some(password) => (password.clone(), password),
                None => (prompt("Password: ")?, prompt("Confirm password: ")?),
            };
            drive
                .guard()
                .signup(&username, &email, &password, &confirm)
                .await?;
            println!("Account {} created. Run `filedeck login` to sign in.", username);
        }
        Commands::Logout => {
            drive.guard().logout()?;
            println!("Logged out");
        }
        Commands::Whoami => match drive.session().current() {
            None => println!("Not logged in"),
            Some(session) => match drive.guard().check().await {
                CheckOutcome::Authenticated => {
                    println!("{} <{}>", session.user.username, session.user.email)
                }
                _ => println!("Session expired. Run `filedeck login` to sign in again."),
            },
        },
        Commands::Ls {
            search,
            filter,
            json,
        } => {
            match search {
                Some(query) => drive.search(&query).await?,
                None => drive.refresh().await?,
            };
            if filter.is_some() {
                drive.set_filter(filter.as_deref()).await;
            }

            let files = drive.visible().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else {
                print_files_table(&files);
            }
        }
        Commands::Rm { ids } => {
            select(drive, &ids);
            let deleted = drive.delete_selected().await?;
            println!("Deleted {} file(s)", deleted);
        }
        Commands::Mv { ids, folder } => {
            select(drive, &ids);
            let count = drive.selected().len();
            drive.move_selected(folder.clone().map(FolderId::new)).await?;
            match folder {
                Some(folder) => println!("Moved {} file(s) to folder {}", count, folder),
                None => println!("Moved {} file(s) to the root", count),
            }
        }
        Commands::Upload { paths } => run_upload(drive, &paths).await?,
        Commands::Download { id, output } => {
            let id = FileId::new(id);
            let dest = match output {
                Some(path) => path,
                None => default_download_path(drive, &id).await,
            };
            let written = drive.download(&id, &dest).await?;
            println!("Saved {} ({}) to {}", id, format_size(written), dest.display());
        }
        Commands::Mkdir { name } => {
            let folder = drive.create_folder(&name).await?;
            println!("Created folder {} ({})", folder.name, folder.id);
        }
        Commands::Folders => {
            let folders = drive.folders().await?;
            if folders.is_empty() {
                println!("No folders.");
            } else {
                for folder in folders {
                    println!("  {:<12} {}", folder.id, folder.name);
                }
            }
        }
        Commands::Stats => {
            let stats = drive.stats().await?;
            println!(
                "Used {} of {} ({:.1}%)",
                format_size(stats.used),
                format_size(stats.quota),
                stats.used_percent()
            );
            for category in &stats.categories {
                if category.files > 0 {
                    println!(
                        "  {:<12} {:>6} files  {:>10}",
                        category.name,
                        category.files,
                        format_size(category.size)
                    );
                } else {
                    println!("  {:<25} {:>10}", category.name, format_size(category.size));
                }
            }
        }
        Commands::Config { action } => {
            anyhow::bail!("`config {:?}` is handled before the session is opened", action)
        }
    }

    Ok(())
}

/// Read one line from stdin after printing `label`.
fn prompt(label: &str) -> anyhow::Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Replace the selection with `ids`, in order.
fn select(drive: &Drive, ids: &[String]) {
    drive.clear_selection();
    for id in ids {
        let id = FileId::new(id.as_str());
        if !drive.selected().contains(&id) {
            drive.toggle(&id, true);
        }
    }
}

async fn default_download_path(drive: &Drive, id: &FileId) -> PathBuf {
    if let Err(e) = drive.refresh().await {
        tracing::debug!("Could not look up file name: {}", e);
    }
    drive
        .file(id)
        .await
        .and_then(|file| Path::new(&file.name).file_name().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(id.as_str()))
}

/// Queue uploads and report each task until all have settled.
///
/// Ctrl-C cancels whatever is still pending or active.
async fn run_upload(drive: &Drive, paths: &[PathBuf]) -> anyhow::Result<()> {
    let transfers = drive.transfers().clone();
    let mut events = transfers.subscribe();
    let report = NotificationCenter::detached(transfers.clone(), false);

    let ids = drive.upload(paths)?;

    let idle = transfers.wait_idle();
    tokio::pin!(idle);
    loop {
        tokio::select! {
            _ = &mut idle => break,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelling uploads...");
                for id in &ids {
                    if let Err(e) = transfers.cancel(id) {
                        tracing::debug!("Cancel failed: {}", e);
                    }
                }
            }
            received = events.recv() => match received {
                Ok(event) => print_event(&report, &event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!("Missed {} transfer events", missed);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    while let Ok(event) = events.try_recv() {
        print_event(&report, &event);
    }

    let (completed, total) = report.summary();
    println!("{}/{} uploaded", completed, total);
    if completed < total {
        anyhow::bail!("{} upload(s) did not complete", total - completed);
    }
    Ok(())
}

/// Apply `event` and print a line when the entry changes visibly.
fn print_event(report: &NotificationCenter, event: &TransferEvent) {
    let before = report.get(event.task_id()).map(|n| n.progress);
    report.apply(event);
    let Some(entry) = report.get(event.task_id()) else {
        return;
    };

    match event {
        TransferEvent::Queued { .. } => {
            println!("{}: queued ({})", entry.file_name, format_size(entry.size))
        }
        // Every quarter is enough for a terminal.
        TransferEvent::Progress { progress, .. } => {
            if before.unwrap_or(0) / 25 < progress / 25 {
                println!("{}: {}", entry.file_name, entry.label());
            }
        }
        TransferEvent::Started { .. } => {}
        _ => println!("{}", describe_settled(&entry)),
    }
}

fn describe_settled(entry: &Notification) -> String {
    match (&entry.status, &entry.failure) {
        (TransferStatus::Failed, Some(reason)) => {
            format!("{}: {}: {}", entry.file_name, entry.label(), reason)
        }
        _ => format!("{}: {}", entry.file_name, entry.label()),
    }
}

fn print_files_table(files: &[FileRecord]) {
    if files.is_empty() {
        println!("No files.");
        return;
    }
    println!("{:<12} {:>10}  {:<24} NAME", "ID", "SIZE", "TYPE");
    for file in files {
        let tags = if file.tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", file.tags.join(", "))
        };
        println!(
            "{:<12} {:>10}  {:<24} {}{}",
            file.id,
            format_size(file.size),
            file.mime_type,
            file.name,
            tags
        );
    }
}

/// Format a byte count in binary units.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
