//! Startup configuration from command-line flags and the environment
//!
//! Everything is resolved once at startup into a [`ServerConfig`];
//! nothing reads the environment after construction. The `PORT` variable
//! overrides the port flag (container orchestrators inject it), and the
//! downstream service URLs are optional: an absent URL means that
//! dependency is permanently unavailable for this process instance.

use clap::Parser;

/// Default local port of the orchestration sidecar's HTTP gateway.
const DEFAULT_SIDECAR_PORT: u16 = 9358;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
pub struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,
    /// The port to listen to traffic on
    #[clap(short, long, default_value = "7654")]
    pub port: u16,
}

/// Fully resolved startup configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the UDP socket binds to.
    pub bind_addr: String,
    /// Statistics service base URL, if configured.
    pub statistics_url: Option<String>,
    /// Inventory service base URL, if configured.
    pub inventory_url: Option<String>,
    /// Local port of the orchestration sidecar's HTTP gateway.
    pub sidecar_port: u16,
}

impl ServerConfig {
    /// Resolves the configuration from parsed flags and the environment.
    pub fn resolve(args: &Args) -> ServerConfig {
        let port = match std::env::var("PORT") {
            Ok(value) => match value.parse() {
                Ok(port) => port,
                Err(_) => {
                    log::warn!("Ignoring unparsable PORT value: {}", value);
                    args.port
                }
            },
            Err(_) => args.port,
        };
        let sidecar_port = std::env::var("AGONES_SDK_HTTP_PORT")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_SIDECAR_PORT);

        ServerConfig {
            bind_addr: format!("{}:{}", args.host, port),
            statistics_url: optional_env("SNAPEND_STATISTICS_URL"),
            inventory_url: optional_env("SNAPEND_INVENTORY_URL"),
            sidecar_port,
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => {
            log::info!("{} not set", key);
            None
        }
    }
}
