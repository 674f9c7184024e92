// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::MlogtailError;
use postfix_stats::{
    constants::{DEFAULT_LISTEN, DEFAULT_LOG_FILE, DEFAULT_SOCKET_MODE, UNIX_ADDR_PREFIX},
    counter::Counter,
    listener::{ListenAddr, SocketOptions, SocketOwner},
};
use std::env;

/// Log file name meaning "read standard input".
pub const STDIN_LOG_FILE: &str = "-";

/// Log level used when none is configured.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Follow the log and serve queries until terminated.
    Tail,
    /// Process the whole log once and print the final report.
    Replay,
    /// Send a query to a running `tail` process and print the answer.
    Query(String),
}

impl Command {
    pub fn parse(arg: &str) -> Result<Self, MlogtailError> {
        match arg {
            "tail" => Ok(Command::Tail),
            "replay" => Ok(Command::Replay),
            "stats" | "stats_reset" | "reset" => Ok(Command::Query(arg.to_string())),
            name if Counter::from_name(name).is_some() => Ok(Command::Query(arg.to_string())),
            _ => Err(MlogtailError::UnknownCommand(Self::allowed())),
        }
    }

    fn allowed() -> String {
        let mut allowed = vec!["tail", "replay", "stats", "stats_reset", "reset"];
        allowed.extend(Counter::ALL.iter().map(Counter::as_str));
        allowed.join("|")
    }
}

/// Process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Mail log path, `-` for stdin
    pub log_file: String,
    /// Query socket, `unix:<path>` or `host:port`
    pub listen: ListenAddr,
    /// Permissions of a Unix query socket
    pub socket_mode: u32,
    /// Owner and group of a Unix query socket
    pub socket_owner: Option<SocketOwner>,
    /// Mail log flavour, only `postfix` is supported
    pub log_type: String,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_file: DEFAULT_LOG_FILE.to_string(),
            listen: ListenAddr::Unix(DEFAULT_LISTEN.trim_start_matches(UNIX_ADDR_PREFIX).into()),
            socket_mode: DEFAULT_SOCKET_MODE,
            socket_owner: None,
            log_type: "postfix".to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Create configuration from `MLOGTAIL_*` environment variables
    pub fn from_env() -> Result<Self, MlogtailError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MlogtailError> {
        let defaults = Self::default();

        let log_file = lookup("MLOGTAIL_LOG_FILE").unwrap_or(defaults.log_file);
        let listen = match lookup("MLOGTAIL_LISTEN") {
            Some(raw) => ListenAddr::parse(&raw)
                .map_err(|e| MlogtailError::InvalidConfig(format!("MLOGTAIL_LISTEN: {e}")))?,
            None => defaults.listen,
        };
        let socket_mode = match lookup("MLOGTAIL_SOCKET_MODE") {
            Some(raw) => u32::from_str_radix(raw.trim(), 8).map_err(|_| {
                MlogtailError::InvalidConfig(format!(
                    "MLOGTAIL_SOCKET_MODE must be an octal file mode, got {raw:?}"
                ))
            })?,
            None => defaults.socket_mode,
        };
        let socket_owner = lookup("MLOGTAIL_SOCKET_OWNER")
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| SocketOwner::parse(&raw))
            .transpose()
            .map_err(|e| MlogtailError::InvalidConfig(e.to_string()))?;
        let log_type = lookup("MLOGTAIL_LOG_TYPE")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_type);
        let log_level = lookup("MLOGTAIL_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            log_file,
            listen,
            socket_mode,
            socket_owner,
            log_type,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), MlogtailError> {
        if self.log_file.trim().is_empty() {
            return Err(MlogtailError::InvalidConfig(
                "MLOGTAIL_LOG_FILE cannot be empty".to_string(),
            ));
        }

        if self.socket_mode > 0o777 {
            return Err(MlogtailError::InvalidConfig(format!(
                "Socket mode {:o} cannot be greater than 777",
                self.socket_mode
            )));
        }

        if self.log_type != "postfix" {
            return Err(MlogtailError::InvalidConfig(format!(
                "Mail log type {:?} is not supported, only \"postfix\" is",
                self.log_type
            )));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(MlogtailError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn reads_stdin(&self) -> bool {
        self.log_file == STDIN_LOG_FILE
    }

    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            mode: self.socket_mode,
            owner: self.socket_owner,
        }
    }
}
