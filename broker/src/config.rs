// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::error::Error;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 1883;
const DEFAULT_MAX_CLIENTS: usize = 8;

/// Command-line surface. Parsed first; a `--config` file, if given, fills
/// in any flag the operator did not pass explicitly (CLI wins over file,
/// file wins over the built-in default).
#[derive(Debug, Parser)]
#[command(name = "wiretapd", about = "MQTT broker for observing embedded clients")]
struct Cli {
    /// Listener bind address.
    #[arg(long)]
    host: Option<String>,

    /// Listener bind port.
    #[arg(long)]
    port: Option<u16>,

    /// Maximum number of concurrent sessions.
    #[arg(long = "max-clients")]
    max_clients: Option<usize>,

    /// Emit hex of every received frame.
    #[arg(long = "log-raw")]
    log_raw: bool,

    /// Log publication payloads decoded as UTF-8.
    #[arg(long = "log-payload")]
    log_payload: bool,

    /// Prefix every log line with a local-time timestamp.
    #[arg(long)]
    timestamp: bool,

    /// Also deliver a PUBLISH back to its own publisher if subscribed.
    #[arg(long)]
    reflect: bool,

    /// Transition a session straight to Draining on any malformed frame.
    #[arg(long = "disconnect-on-error")]
    disconnect_on_error: bool,

    /// Artificial delay, in milliseconds, before replying to CONNECT.
    #[arg(long = "connect-delay-ms")]
    connect_delay_ms: Option<u64>,

    /// Suppress non-error log output.
    #[arg(long)]
    quiet: bool,

    /// Optional TOML file overriding any flag not passed on the command line.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Mirrors [`Cli`] with every field optional, for TOML deserialization.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    max_clients: Option<usize>,
    log_raw: Option<bool>,
    log_payload: Option<bool>,
    timestamp: Option<bool>,
    reflect: Option<bool>,
    disconnect_on_error: Option<bool>,
    connect_delay_ms: Option<u64>,
    quiet: Option<bool>,
}

/// Logging flags, split out of the flat CLI list the way `SessionConfig`
/// is split out of the top-level config in the teacher's session module.
#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    pub quiet: bool,
    pub timestamp: bool,
    pub log_raw: bool,
    pub log_payload: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub max_clients: usize,
    pub log: LogConfig,
    pub reflect: bool,
    pub disconnect_on_error: bool,
    pub connect_delay_ms: u64,
}

impl Config {
    /// Parse CLI flags, then overlay an optional `--config` TOML file.
    pub fn from_args() -> Result<Self, Error> {
        let cli = Cli::parse();
        let file = match &cli.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str(&text)?
            }
            None => FileConfig::default(),
        };
        Ok(Self::merge(cli, file))
    }

    fn merge(cli: Cli, file: FileConfig) -> Self {
        let host = cli.host.or(file.host).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = cli.port.or(file.port).unwrap_or(DEFAULT_PORT);
        let bind_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)));

        Self {
            bind_addr,
            max_clients: cli.max_clients.or(file.max_clients).unwrap_or(DEFAULT_MAX_CLIENTS),
            log: LogConfig {
                quiet: cli.quiet || file.quiet.unwrap_or(false),
                timestamp: cli.timestamp || file.timestamp.unwrap_or(false),
                log_raw: cli.log_raw || file.log_raw.unwrap_or(false),
                log_payload: cli.log_payload || file.log_payload.unwrap_or(false),
            },
            reflect: cli.reflect || file.reflect.unwrap_or(false),
            disconnect_on_error: cli.disconnect_on_error || file.disconnect_on_error.unwrap_or(false),
            connect_delay_ms: cli.connect_delay_ms.or(file.connect_delay_ms).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_to_1883() {
        let config = Config::merge(
            Cli {
                host: None,
                port: None,
                max_clients: None,
                log_raw: false,
                log_payload: false,
                timestamp: false,
                reflect: false,
                disconnect_on_error: false,
                connect_delay_ms: None,
                quiet: false,
                config: None,
            },
            FileConfig::default(),
        );
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.max_clients, DEFAULT_MAX_CLIENTS);
    }

    #[test]
    fn cli_flag_overrides_file() {
        let config = Config::merge(
            Cli {
                host: None,
                port: Some(9999),
                max_clients: None,
                log_raw: false,
                log_payload: false,
                timestamp: false,
                reflect: false,
                disconnect_on_error: false,
                connect_delay_ms: None,
                quiet: false,
                config: None,
            },
            FileConfig {
                port: Some(1111),
                ..Default::default()
            },
        );
        assert_eq!(config.bind_addr.port(), 9999);
    }
}
