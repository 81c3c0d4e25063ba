use clap::Subcommand;
use std::path::Path;
use tollgate_core::config::AppConfig;

use super::utils::{print_error, print_info, print_success, CliError, CliResult};

const HIDDEN: &str = "[hidden - use --show-sensitive to reveal]";

const SAMPLE_CONFIG: &str = r#"# Tollgate configuration
# Every key may be overridden with TOLLGATE__SECTION__KEY environment variables.

[server]
bind_address = "127.0.0.1"
bind_port = 3030
max_concurrent_requests = 100
request_timeout_seconds = 60
max_body_bytes = 1048576

[rate_limit]
capacity = 10
window_seconds = 60
max_buckets = 100000
idle_window_multiplier = 2

[cache]
enabled = true
ttl_seconds = 3600
sweep_interval_seconds = 300
dedupe_inflight = true

[auth]
database_url = "sqlite://./db/tollgate.db"
default_ttl_days = 90
hash_work_factor = 3
hash_memory_kib = 65536
verification_cache_ttl_seconds = 60
# admin_token = "change-me"

[upstream]
url = "http://127.0.0.1:8081/v1"
timeout_seconds = 30
default_model = "default"

[metrics]
enabled = true

[logging]
level = "info"
format = "pretty"
"#;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,
    },

    /// Print the effective configuration (file plus environment overrides)
    Show {
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,

        /// Show secrets such as the admin token and upstream API key
        #[arg(long)]
        show_sensitive: bool,
    },

    /// Write a sample configuration file
    Generate {
        #[arg(short, long, default_value = "config/config.toml")]
        output: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config_command(command: ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Validate { file } => validate_config(&file).map(|_| ()),
        ConfigCommands::Show { file, show_sensitive } => show_config(&file, show_sensitive),
        ConfigCommands::Generate { output, force } => generate_config(&output, force),
    }
}

fn load(file: &str) -> CliResult<AppConfig> {
    AppConfig::from_file(file).map_err(|e| CliError::Config(e.to_string()))
}

fn validate_config(file: &str) -> CliResult<AppConfig> {
    if !Path::new(file).exists() {
        print_error(&format!("Configuration file not found: {file}"));
        return Err(CliError::Config(format!("File not found: {file}")));
    }

    print_info(&format!("Loading configuration from {file}..."));
    let config = load(file)?;

    print_info("Validating configuration...");
    config.validate().map_err(CliError::Config)?;

    print_success("Configuration is valid!");
    println!("Configuration Summary:");
    println!("  Server: {}:{}", config.server.bind_address, config.server.bind_port);
    println!(
        "  Rate limit: {} requests per {}s",
        config.rate_limit.capacity, config.rate_limit.window_seconds
    );
    println!(
        "  Cache: {} (ttl {}s)",
        if config.cache.enabled { "enabled" } else { "disabled" },
        config.cache.ttl_seconds
    );
    println!("  Upstream: {}", config.upstream.url);
    println!(
        "  Admin API: {}",
        if config.auth.admin_token.is_some() { "enabled" } else { "disabled" }
    );

    Ok(config)
}

/// Replaces secrets with a placeholder.
fn redact(mut config: AppConfig) -> AppConfig {
    if config.auth.admin_token.is_some() {
        config.auth.admin_token = Some(HIDDEN.to_string());
    }
    if config.upstream.api_key.is_some() {
        config.upstream.api_key = Some(HIDDEN.to_string());
    }
    config
}

fn show_config(file: &str, show_sensitive: bool) -> CliResult<()> {
    let config = load(file)?;
    let config = if show_sensitive { config } else { redact(config) };

    let rendered =
        toml::to_string_pretty(&config).map_err(|e| CliError::Config(e.to_string()))?;
    println!("# Effective configuration from {file}");
    println!("{rendered}");

    Ok(())
}

fn generate_config(output: &str, force: bool) -> CliResult<()> {
    if Path::new(output).exists() && !force {
        return Err(CliError::Config(format!(
            "File {output} already exists. Use --force to overwrite."
        )));
    }

    if let Some(parent) = Path::new(output).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CliError::Config(e.to_string()))?;
    }
    std::fs::write(output, SAMPLE_CONFIG).map_err(|e| CliError::Config(e.to_string()))?;

    print_success(&format!("Sample configuration generated: {output}"));
    print_info("Set auth.admin_token to enable the key management API");

    Ok(())
}
