use chrono::{DateTime, Utc};
use clap::Subcommand;
use prettytable::{row, Table};
use std::time::Duration;
use tollgate_core::auth::{ApiKeyManager, ApiKeySummary, IssuedKey, KeyStatus, RotateOptions};

use super::utils::{print_info, print_success, print_warning, CliError, CliResult};

const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Subcommand, Debug)]
pub enum KeysCommands {
    /// Issue a new API key
    Issue {
        /// Owner the key is billed and rate limited under
        #[arg(short, long)]
        owner: String,

        /// Granted scopes, comma separated or repeated (e.g. `ai:analyze,ai:enhance`)
        #[arg(short, long, value_delimiter = ',', required = true)]
        scope: Vec<String>,

        #[arg(short, long)]
        name: Option<String>,

        /// Lifetime in days; defaults to `auth.default_ttl_days`
        #[arg(long)]
        ttl_days: Option<u64>,
    },

    /// List API keys
    List {
        #[arg(short, long)]
        owner: Option<String>,

        /// Include revoked and expired keys
        #[arg(long)]
        all: bool,
    },

    /// Show one key
    Show { id: String },

    /// Revoke a key immediately
    Revoke { id: String },

    /// Replace a key with a new one carrying the same owner and scopes
    Rotate {
        id: String,

        /// New label for the replacement; defaults to the old key's
        #[arg(short, long)]
        name: Option<String>,

        /// Lifetime of the replacement in days; defaults to `auth.default_ttl_days`
        #[arg(long)]
        ttl_days: Option<u64>,
    },

    /// Delete keys revoked or expired more than the given number of days ago
    Purge {
        #[arg(long, default_value = "30")]
        older_than_days: u64,
    },
}

pub async fn handle_keys_command(command: KeysCommands, keys: &ApiKeyManager) -> CliResult<()> {
    match command {
        KeysCommands::Issue { owner, scope, name, ttl_days } => {
            let ttl = ttl_from_days(ttl_days)?;
            let issued = keys.issue_named(&owner, &scope, ttl, name).await?;
            print_issued("API Key issued successfully!", &issued);
        }

        KeysCommands::List { owner, all } => {
            let summaries = match owner.as_deref() {
                Some(owner) => keys.list_for_owner(owner).await?,
                None => keys.list_all().await?,
            };
            let shown: Vec<_> =
                summaries.into_iter().filter(|k| all || k.status == KeyStatus::Active).collect();
            if shown.is_empty() {
                print_info("No keys found");
            } else {
                key_table(&shown).printstd();
            }
        }

        KeysCommands::Show { id } => {
            let summary = keys.get(&id).await?;
            key_table(std::slice::from_ref(&summary)).printstd();
            if let Some(successor) = keys.successor_of(&id).await? {
                print_info(&format!("Rotated to {}", successor.id));
            }
        }

        KeysCommands::Revoke { id } => {
            let summary = keys.revoke(&id).await?;
            print_success(&format!("API Key '{}' has been revoked", summary.id));
        }

        KeysCommands::Rotate { id, name, ttl_days } => {
            let options = RotateOptions { name, ttl: ttl_from_days(ttl_days)? };
            let issued = keys.rotate_with(&id, options).await?;
            print_issued(&format!("API Key '{id}' rotated; the old key no longer works"), &issued);
        }

        KeysCommands::Purge { older_than_days } => {
            let retention = Duration::from_secs(older_than_days.saturating_mul(SECONDS_PER_DAY));
            let deleted = keys.purge_expired(retention).await?;
            print_success(&format!("Purged {deleted} inactive key(s)"));
        }
    }

    Ok(())
}

fn ttl_from_days(days: Option<u64>) -> CliResult<Option<Duration>> {
    match days {
        Some(0) => Err(CliError::Argument("--ttl-days must be at least 1".to_string())),
        Some(days) => days
            .checked_mul(SECONDS_PER_DAY)
            .map(|secs| Some(Duration::from_secs(secs)))
            .ok_or_else(|| CliError::Argument("--ttl-days is too large".to_string())),
        None => Ok(None),
    }
}

fn print_issued(headline: &str, issued: &IssuedKey) {
    print_success(headline);
    println!("Id: {}", issued.record.id);
    println!("Owner: {}", issued.record.owner_id);
    println!("Expires: {}", format_date(issued.record.expires_at));
    println!("Key: {}", issued.raw_key);
    print_warning("Save this key securely - it cannot be retrieved later!");
}

fn format_date(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "Never".to_string(), |at| at.format("%Y-%m-%d %H:%M").to_string())
}

fn key_table(keys: &[ApiKeySummary]) -> Table {
    let mut table = Table::new();
    table.add_row(row![
        "Id", "Owner", "Name", "Prefix", "Scopes", "Status", "Created", "Expires", "Last Used"
    ]);

    for key in keys {
        let scopes: Vec<&str> = key.scopes.iter().map(String::as_str).collect();
        table.add_row(row![
            key.id,
            key.owner_id,
            key.name.as_deref().unwrap_or("-"),
            key.key_prefix,
            scopes.join(","),
            key.status,
            key.created_at.format("%Y-%m-%d %H:%M"),
            format_date(key.expires_at),
            key.last_used_at.map_or_else(|| "-".to_string(), |at| format_date(Some(at))),
        ]);
    }

    table
}
