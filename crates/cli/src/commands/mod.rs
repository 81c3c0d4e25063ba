pub mod config;
pub mod keys;
pub mod utils;

pub use config::{handle_config_command, ConfigCommands};
pub use keys::{handle_keys_command, KeysCommands};
