use clap::{Parser, Subcommand};
use std::sync::Arc;
use tollgate_core::{
    auth::{ApiKeyManager, SqliteRepository},
    clock::SystemClock,
    config::AppConfig,
};

mod commands;
use commands::{
    handle_config_command, handle_keys_command,
    utils::{print_error, CliError, CliResult},
    ConfigCommands, KeysCommands,
};

#[derive(Parser)]
#[command(name = "tollgate-cli")]
#[command(about = "Tollgate CLI - API key and configuration management for the tollgate gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file supplying hashing parameters and the default database
    #[arg(long, env = "TOLLGATE_CONFIG", default_value = "config/config.toml", global = true)]
    config: String,

    /// Key database URL; overrides `auth.database_url`
    #[arg(long, env = "DATABASE_URL", global = true)]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// API key management
    #[command(subcommand)]
    Keys(KeysCommands),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

async fn key_manager(config_path: &str, database: Option<String>) -> CliResult<ApiKeyManager> {
    let mut config =
        AppConfig::from_file(config_path).map_err(|e| CliError::Config(e.to_string()))?;
    if let Some(database) = database {
        config.auth.database_url = database;
    }

    let repo = SqliteRepository::new(&config.auth.database_url).await?;
    Ok(ApiKeyManager::from_config(&config.auth, Arc::new(repo), SystemClock::shared())?)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Keys(command) => match key_manager(&cli.config, cli.database).await {
            Ok(keys) => handle_keys_command(command, &keys).await,
            Err(e) => Err(e),
        },
        Commands::Config(command) => handle_config_command(command),
    };

    if let Err(e) = result {
        print_error(&e.to_string());
        std::process::exit(1);
    }
}
