//! Lockbox CLI
//!
//! Command-line front end for the encrypted vault: add, list, edit and
//! trash API credentials and passwords, and manage tags.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lockbox_core::{
    platform::get_default_config_path, FileKeyStore, NewRecord, RecordPatch, RecordSecrets,
    SecretPatch, Session, SqliteStore, TrimStatus, VaultConfig, VaultRecord, VaultRepository,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_TAG_COLOR: &str = "#6b7280";

#[derive(Parser)]
#[command(name = "lockbox", about = "Encrypted vault for API credentials and passwords")]
struct Cli {
    /// Vault user id
    #[arg(short, long)]
    user: String,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Use the locally stored fallback key instead of a master password
    #[arg(long)]
    fallback_key: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add an API credential
    AddCredential {
        name: String,

        /// API key (prompted if omitted)
        #[arg(long)]
        key: Option<String>,

        /// API secret
        #[arg(long)]
        secret: Option<String>,

        #[command(flatten)]
        meta: MetadataArgs,
    },

    /// Add a password entry
    AddPassword {
        name: String,

        /// Password (prompted if omitted)
        #[arg(long)]
        password: Option<String>,

        #[command(flatten)]
        meta: MetadataArgs,
    },

    /// List active records
    List {
        /// Print secrets in plain text
        #[arg(long)]
        show_secrets: bool,
    },

    /// Show one record
    Get {
        id: String,

        /// Print secrets in plain text
        #[arg(long)]
        show_secrets: bool,
    },

    /// Edit a record
    Update {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        /// Replace the tag list (repeatable)
        #[arg(long = "tag")]
        tags: Option<Vec<String>>,

        /// New API key (credentials)
        #[arg(long)]
        key: Option<String>,

        /// New API secret (credentials)
        #[arg(long)]
        secret: Option<String>,

        /// New password (password entries)
        #[arg(long)]
        password: Option<String>,
    },

    /// Move a record to the trash
    Delete { id: String },

    /// Bring a record back from the trash
    Restore { id: String },

    /// Permanently delete a record
    Purge { id: String },

    /// List the trash, most recently deleted first
    Trash,

    /// Show today's remaining quota
    Quota,

    /// Manage tags
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },
}

#[derive(clap::Args)]
struct MetadataArgs {
    #[arg(long, default_value = "general")]
    category: String,

    #[arg(long)]
    url: Option<String>,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    notes: Option<String>,

    /// Tag id (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,
}

#[derive(Subcommand)]
enum TagCommands {
    /// Create a tag (or return the existing one with the same name)
    Create {
        name: String,

        #[arg(long, default_value = DEFAULT_TAG_COLOR)]
        color: String,
    },
    Rename { id: String, name: String },
    Recolor { id: String, color: String },
    Delete { id: String },
    /// Fold SOURCE into TARGET
    Merge { source: String, target: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(get_default_config_path);
    let mut cfg = if config_path.exists() {
        VaultConfig::load(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?
    } else {
        info!("No config file found, using defaults");
        VaultConfig::default()
    };
    if let Some(database) = cli.database.clone() {
        cfg.database_path = database;
    }

    let session = if cli.fallback_key {
        Session::with_fallback_key(&cli.user, &FileKeyStore::new(&cfg.key_dir))?
    } else {
        let password = rpassword::prompt_password("Master password: ")?;
        Session::with_master_password(&cli.user, password.as_bytes())?
    };

    if let Some(parent) = cfg.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(
        SqliteStore::open(&cfg.database_path)
            .with_context(|| format!("Failed to open {}", cfg.database_path.display()))?,
    );
    let repo = VaultRepository::new(store, session, &cfg);

    run(&repo, cli.command).await
}

async fn run(repo: &VaultRepository<SqliteStore>, command: Commands) -> Result<()> {
    match command {
        Commands::AddCredential {
            name,
            key,
            secret,
            meta,
        } => {
            let key = match key {
                Some(key) => key,
                None => rpassword::prompt_password("API key: ")?,
            };
            let secrets = RecordSecrets::Credential { key, secret };
            let id = repo.add(new_record(name, secrets, meta)).await?;
            println!("Added credential {}", id);
        }

        Commands::AddPassword {
            name,
            password,
            meta,
        } => {
            let password = match password {
                Some(password) => password,
                None => rpassword::prompt_password("Password: ")?,
            };
            let secrets = RecordSecrets::Password { password };
            let id = repo.add(new_record(name, secrets, meta)).await?;
            println!("Added password entry {}", id);
        }

        Commands::List { show_secrets } => {
            let report = repo.fetch_all().await?;
            if report.records.is_empty() {
                println!("No records");
            }
            for record in &report.records {
                print_record(record, show_secrets);
            }
            if report.skipped > 0 {
                eprintln!(
                    "{} record(s) could not be decrypted and were skipped",
                    report.skipped
                );
            }
        }

        Commands::Get { id, show_secrets } => {
            let record = repo.get(&id).await?;
            print_record(&record, show_secrets);
        }

        Commands::Update {
            id,
            name,
            category,
            url,
            username,
            notes,
            tags,
            key,
            secret,
            password,
        } => {
            let secrets = match (password, key, secret) {
                (Some(password), None, None) => Some(SecretPatch::Password { password }),
                (None, None, None) => None,
                (None, key, secret) => Some(SecretPatch::Credential {
                    key,
                    secret: secret.map(Some),
                }),
                _ => anyhow::bail!("--password cannot be combined with --key or --secret"),
            };

            let patch = RecordPatch {
                name,
                category,
                url: url.map(Some),
                username: username.map(Some),
                notes: notes.map(Some),
                tag_ids: tags,
                secrets,
            };
            let outcome = repo.update(&id, patch).await?;
            if outcome.is_noop() {
                println!("Nothing to change");
            } else {
                println!("Updated {}", id);
            }
        }

        Commands::Delete { id } => {
            let outcome = repo.delete(&id).await?;
            println!("Moved {} to the trash", outcome.id);
            match outcome.trim {
                TrimStatus::Trimmed { evicted } => {
                    for id in evicted {
                        println!("Trash full: permanently deleted {}", id);
                    }
                }
                TrimStatus::Skipped { reason } => {
                    eprintln!("Trash was not trimmed: {}", reason);
                }
            }
        }

        Commands::Restore { id } => {
            repo.restore(&id).await?;
            println!("Restored {}", id);
        }

        Commands::Purge { id } => {
            if repo.hard_delete(&id).await? {
                println!("Permanently deleted {}", id);
            } else {
                println!("No record {}", id);
            }
        }

        Commands::Trash => {
            let report = repo.fetch_trash().await?;
            if report.records.is_empty() {
                println!("Trash is empty");
            }
            for record in &report.records {
                print_record(record, false);
            }
        }

        Commands::Quota => {
            for (category, left) in repo.quota_remaining().await? {
                println!("{:<16} {}", category, left);
            }
        }

        Commands::Tag { command } => run_tag(repo, command).await?,
    }

    Ok(())
}

async fn run_tag(repo: &VaultRepository<SqliteStore>, command: TagCommands) -> Result<()> {
    match command {
        TagCommands::Create { name, color } => {
            let id = repo.create_tag(&name, &color).await?;
            println!("{}", id);
        }
        TagCommands::Rename { id, name } => repo.rename_tag(&id, &name).await?,
        TagCommands::Recolor { id, color } => repo.recolor_tag(&id, &color).await?,
        TagCommands::Delete { id } => repo.delete_tag(&id).await?,
        TagCommands::Merge { source, target } => {
            repo.merge_tags(&source, &target).await?;
            println!("Merged {} into {}", source, target);
        }
        TagCommands::List => {
            for tag in repo.refresh_tags().await? {
                println!(
                    "{}  {:<32} {}  used {}",
                    tag.id, tag.name, tag.color, tag.usage_count
                );
            }
        }
    }
    Ok(())
}

fn new_record(name: String, secrets: RecordSecrets, meta: MetadataArgs) -> NewRecord {
    NewRecord {
        name,
        category: meta.category,
        url: meta.url,
        username: meta.username,
        notes: meta.notes,
        tag_ids: meta.tags,
        secrets,
    }
}

fn mask(value: &str, show: bool) -> String {
    if show {
        value.to_string()
    } else {
        "********".to_string()
    }
}

fn print_record(record: &VaultRecord, show_secrets: bool) {
    println!("{}  {} [{}]", record.id, record.name, record.category);
    if let Some(url) = &record.url {
        println!("    url:      {}", url);
    }
    if let Some(username) = &record.username {
        println!("    username: {}", username);
    }
    match &record.secrets {
        RecordSecrets::Credential { key, secret } => {
            println!("    key:      {}", mask(key, show_secrets));
            if let Some(secret) = secret {
                println!("    secret:   {}", mask(secret, show_secrets));
            }
        }
        RecordSecrets::Password { password } => {
            println!("    password: {}", mask(password, show_secrets));
        }
    }
    if let Some(notes) = &record.notes {
        println!("    notes:    {}", notes);
    }
    if !record.tag_ids.is_empty() {
        println!("    tags:     {}", record.tag_ids.join(", "));
    }
    if let Some(deleted_at) = record.deleted_at {
        println!("    deleted:  {}", deleted_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}
