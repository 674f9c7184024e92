// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Largest query command accepted from a client; anything longer is truncated.
pub const MAX_COMMAND_LEN: usize = 32;

/// Width of the name column in a stats report.
pub const NAME_COLUMN_WIDTH: usize = 16;

/// Read buffer used when consuming a log file or stdin.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Unix socket paths longer than this are rejected (Linux limit is 108).
pub const MAX_UDS_PATH_LEN: usize = 100;

/// Default permissions applied to a freshly bound Unix socket file.
pub const DEFAULT_SOCKET_MODE: u32 = 0o666;

pub const DEFAULT_LISTEN: &str = "unix:/var/run/mlogtail.sock";
pub const DEFAULT_LOG_FILE: &str = "/var/log/mail.log";

/// Prefix marking a listen address as a Unix domain socket path.
pub const UNIX_ADDR_PREFIX: &str = "unix:";
