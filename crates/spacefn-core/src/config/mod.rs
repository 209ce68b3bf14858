// spacefn Config Module
// TOML configuration file handling

pub mod parser;

pub use parser::{Config, ConfigError, ConfigToml, GeneralConfig, DEFAULT_STARTUP_DELAY};
