use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use lockbox_core::paths::settings_path;
use lockbox_core::{BlobStore, ClientSettings, FileStore, HttpRemote, Session, StoreOptions, SyncEvent};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

const PASSPHRASE_ENV: &str = "LOCKBOX_PASSPHRASE";

#[derive(Parser)]
#[command(name = "lockbox")]
#[command(about = "Encrypted credential vault synchronized with a lockbox service", long_about = None)]
struct Cli {
    /// Settings file; defaults to settings.json in the data directory
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// User name; defaults to the last one used
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or change client settings
    Config {
        #[arg(long)]
        remote_url: Option<String>,
        #[arg(long)]
        unique_text: Option<String>,
        #[arg(long)]
        cache_locally: Option<bool>,
    },

    /// Pull the remote copy and reconcile it with the local cache
    Sync,

    /// List entries, optionally filtered by id or user name
    List {
        #[arg(default_value = "")]
        filter: String,
    },

    /// Print one entry including its password
    Show { id: String },

    /// Add an entry or replace the one with the same id
    Add {
        id: String,
        #[arg(short = 'n', long, default_value = "")]
        username: String,
        #[arg(short, long, default_value = "")]
        website: String,
        #[arg(long, default_value = "")]
        notes: String,
        /// Id of the entry this one replaces, when renaming
        #[arg(long)]
        replacing: Option<String>,
    },

    /// Remove an entry
    Remove { id: String },

    /// Change the master passphrase
    Passwd,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let settings_file = match cli.settings {
        Some(path) => path,
        None => settings_path()?,
    };
    let mut settings = ClientSettings::load(&settings_file)?;

    if let Commands::Config {
        remote_url,
        unique_text,
        cache_locally,
    } = cli.command
    {
        if let Some(url) = remote_url {
            settings.remote_url = url;
        }
        if let Some(text) = unique_text {
            settings.unique_text = text;
        }
        if let Some(cache) = cache_locally {
            settings.cache_locally = cache;
        }
        settings.save(&settings_file)?;
        println!("settings: {}", settings_file.display());
        println!("remote_url: {}", settings.remote_url);
        println!("unique_text: {}", settings.unique_text);
        println!("cache_locally: {}", settings.cache_locally);
        println!("cache_dir: {}", settings.cache_dir()?.display());
        return Ok(());
    }

    let username = cli
        .user
        .or_else(|| settings.username.clone())
        .ok_or_else(|| anyhow!("no user name; pass --user"))?;
    if settings.username.as_deref() != Some(username.as_str()) {
        settings.username = Some(username.clone());
        settings.save(&settings_file)?;
    }

    let passphrase = prompt_passphrase("Master passphrase: ")?;
    let mut session = open_session(&settings, &username, &passphrase).await?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::Sync => {
            println!("{} entries", session.dataset().len());
        }
        Commands::List { filter } => {
            let dataset = session.dataset();
            let reused = dataset.reused_ids();
            for entry in dataset.filter(&filter) {
                let mut flags = Vec::new();
                if let Some(weak) = entry.weak {
                    flags.push(format!("weak: {}", weak.describe()));
                }
                if entry.insecure {
                    flags.push("insecure website".to_string());
                }
                if reused.contains(&entry.id) {
                    flags.push("reused password".to_string());
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!("  [{}]", flags.join(", "))
                };
                println!("{}\t{}\t{}{}", entry.id, entry.username, entry.website, flags);
            }
        }
        Commands::Show { id } => {
            let entry = session
                .dataset()
                .get(&id)
                .ok_or_else(|| anyhow!("no entry named {id}"))?;
            println!("id:       {}", entry.id);
            println!("username: {}", entry.username);
            println!("password: {}", entry.password);
            println!("website:  {}", entry.website);
            if !entry.notes.is_empty() {
                println!("notes:    {}", entry.notes);
            }
        }
        Commands::Add {
            id,
            username,
            website,
            notes,
            replacing,
        } => {
            let password = prompt_secret("Entry password: ")?;
            let entry = session.new_entry(&id, &username, &password, &website, &notes)?;
            report(session.upsert_entry(entry, replacing.as_deref()).await);
        }
        Commands::Remove { id } => {
            if session.dataset().get(&id).is_none() {
                return Err(anyhow!("no entry named {id}"));
            }
            report(session.remove_entry(&id).await);
        }
        Commands::Passwd => {
            let first = prompt_secret("New master passphrase: ")?;
            let second = prompt_secret("Confirm new master passphrase: ")?;
            if *first != *second {
                return Err(anyhow!("passphrases do not match"));
            }
            match session.change_passphrase(&first).await {
                None => println!("passphrase changed"),
                Some(event) => return Err(anyhow!("{event}")),
            }
        }
    }
    Ok(())
}

async fn open_session(settings: &ClientSettings, username: &str, passphrase: &str) -> Result<Session> {
    let ctx = settings.session_context(username, passphrase);
    let timeout = Duration::from_secs(settings.request_timeout_secs);
    let remote: Arc<dyn BlobStore> = Arc::new(HttpRemote::new(&settings.remote_url, Some(timeout))?);
    let cache_options = StoreOptions {
        backup_files: false,
        block_new: false,
    };
    let local: Arc<dyn BlobStore> = Arc::new(FileStore::open(settings.cache_dir()?, cache_options).await?);
    debug!(?ctx, "opening session");

    let mut session = Session::open(ctx, Some(local), remote).await;
    if let Some(event) = session.load_local().await {
        report(Some(event));
    }
    for event in session.sync_remote().await {
        report(Some(event));
    }
    Ok(session)
}

fn report(event: Option<SyncEvent>) {
    if let Some(event) = event {
        eprintln!("{event}");
    }
}

fn prompt_passphrase(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSPHRASE_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    prompt_secret(prompt)
}

fn prompt_secret(prompt: &str) -> Result<Zeroizing<String>> {
    let secret = rpassword::prompt_password(prompt).map_err(|e| anyhow!("password prompt: {e}"))?;
    if secret.is_empty() {
        return Err(anyhow!("empty input"));
    }
    Ok(Zeroizing::new(secret))
}
