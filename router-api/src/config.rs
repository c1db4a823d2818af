//! Process bootstrap: CLI args (bind address, worker count, config file
//! path), YAML config loading, and `router_core::config::init` wiring
//! (§10.3). Argument shape follows the teacher's `main.rs` `clap::Command`.

use clap::Parser;
use router_core::config::FileConfig;

#[derive(Debug, Parser)]
#[command(name = "Router API", version, about = "Gateway HTTP and websocket surface")]
pub struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    pub ip: String,

    #[arg(long, default_value_t = 24042)]
    pub port: u16,

    #[arg(long, default_value_t = 2)]
    pub workers: usize,

    #[arg(long)]
    pub config: Option<String>,

    #[arg(long)]
    pub registry_url: Option<String>,
}

impl Args {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Load the YAML config file named on the CLI (if any), falling back to
/// an empty `FileConfig` whose defaults apply.
pub fn load_file_config(path: Option<&str>) -> FileConfig {
    let Some(path) = path else { return FileConfig::default() };
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_yaml::from_str(&contents).unwrap_or_else(|e| {
            tracing::warn!(error = %e, path, "failed to parse config file, using defaults");
            FileConfig::default()
        }),
        Err(e) => {
            tracing::warn!(error = %e, path, "failed to read config file, using defaults");
            FileConfig::default()
        }
    }
}
