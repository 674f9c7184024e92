// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Query listener setup.
//!
//! A listen address is either `unix:<path>` for a Unix domain socket or a `host:port` TCP
//! address. Unix sockets get their file mode and, optionally, an owner and group applied after
//! binding, and the socket file is removed again when the last [`ListenerInfo`] is dropped.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
#[cfg(unix)]
use std::sync::Arc;

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::{debug, warn};

use crate::constants::{DEFAULT_SOCKET_MODE, MAX_UDS_PATH_LEN, UNIX_ADDR_PREFIX};
use crate::errors::{ListenAddrError, OwnerParseError};

/// Where the query server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    /// TCP `host:port`, IPv6 hosts in brackets.
    Tcp(String),
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl ListenAddr {
    pub fn parse(addr: &str) -> Result<Self, ListenAddrError> {
        let addr = addr.trim();
        if addr.is_empty() {
            return Err(ListenAddrError::Empty);
        }
        match addr.strip_prefix(UNIX_ADDR_PREFIX) {
            Some("") => Err(ListenAddrError::EmptySocketPath),
            Some(path) => Ok(ListenAddr::Unix(PathBuf::from(path))),
            None => Ok(ListenAddr::Tcp(addr.to_string())),
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "{}", addr),
            ListenAddr::Unix(path) => write!(f, "{}{}", UNIX_ADDR_PREFIX, path.display()),
        }
    }
}

/// `OWNER[:GROUP]` of a socket file, resolved to numeric ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOwner {
    pub uid: u32,
    pub gid: Option<u32>,
}

impl SocketOwner {
    /// Parses `OWNER[:GROUP]`. Each part is either a numeric id or a name looked up in the
    /// system user and group databases.
    pub fn parse(owner: &str) -> Result<Self, OwnerParseError> {
        let owner = owner.trim();
        let malformed = || OwnerParseError::Malformed(owner.to_string());
        let mut parts = owner.split(':');
        let user = parts.next().unwrap_or_default();
        let group = parts.next();
        if parts.next().is_some() || user.is_empty() || group == Some("") {
            return Err(malformed());
        }

        let uid = match numeric_id(user) {
            Some(id) => id.map_err(|_| malformed())?,
            None => lookup_uid(user)?,
        };
        let gid = match group {
            Some(group) => Some(match numeric_id(group) {
                Some(id) => id.map_err(|_| malformed())?,
                None => lookup_gid(group)?,
            }),
            None => None,
        };
        Ok(Self { uid, gid })
    }
}

fn numeric_id(part: &str) -> Option<Result<u32, std::num::ParseIntError>> {
    part.bytes()
        .all(|b| b.is_ascii_digit())
        .then(|| part.parse::<u32>())
}

#[cfg(unix)]
fn lookup_uid(name: &str) -> Result<u32, OwnerParseError> {
    match nix::unistd::User::from_name(name) {
        Ok(Some(user)) => Ok(user.uid.as_raw()),
        Ok(None) => Err(OwnerParseError::UnknownUser(name.to_string())),
        Err(e) => Err(OwnerParseError::Lookup {
            name: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(unix)]
fn lookup_gid(name: &str) -> Result<u32, OwnerParseError> {
    match nix::unistd::Group::from_name(name) {
        Ok(Some(group)) => Ok(group.gid.as_raw()),
        Ok(None) => Err(OwnerParseError::UnknownGroup(name.to_string())),
        Err(e) => Err(OwnerParseError::Lookup {
            name: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(not(unix))]
fn lookup_uid(name: &str) -> Result<u32, OwnerParseError> {
    Err(OwnerParseError::UnknownUser(name.to_string()))
}

#[cfg(not(unix))]
fn lookup_gid(name: &str) -> Result<u32, OwnerParseError> {
    Err(OwnerParseError::UnknownGroup(name.to_string()))
}

/// File attributes applied to a Unix socket after binding. Ignored for TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    pub mode: u32,
    pub owner: Option<SocketOwner>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            mode: DEFAULT_SOCKET_MODE,
            owner: None,
        }
    }
}

/// Validates a Unix domain socket path.
///
/// # Errors
///
/// Returns an error if the path is empty, contains a NUL byte, or is longer than
/// [`MAX_UDS_PATH_LEN`] bytes.
pub fn validate_uds_path(path: &Path) -> io::Result<()> {
    let raw = path.as_os_str().as_encoded_bytes();
    if raw.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Unix socket path cannot be empty",
        ));
    }
    if raw.contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "Unix socket path cannot contain null bytes",
        ));
    }
    if raw.len() > MAX_UDS_PATH_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Unix socket path too long: {} bytes (maximum {} bytes). Path: {}",
                raw.len(),
                MAX_UDS_PATH_LEN,
                path.display()
            ),
        ));
    }
    Ok(())
}

/// Removes a Unix socket file when dropped.
///
/// Tokio's `UnixListener` leaves the socket file behind, which would make the next bind fail.
#[cfg(unix)]
#[derive(Debug)]
pub struct UnixSocketCleanupGuard {
    path: PathBuf,
}

#[cfg(unix)]
impl UnixSocketCleanupGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[cfg(unix)]
impl Drop for UnixSocketCleanupGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed socket file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Cannot delete socket file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// A bound query listener.
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// Where a [`Listener`] ended up bound.
///
/// For Unix sockets this holds the cleanup guard; the socket file is removed when the last
/// clone is dropped.
#[derive(Debug, Clone)]
pub struct ListenerInfo {
    pub tcp_addr: Option<SocketAddr>,
    pub uds_path: Option<PathBuf>,
    #[cfg(unix)]
    _cleanup_guard: Option<Arc<UnixSocketCleanupGuard>>,
}

/// Binds the query listener.
///
/// # Errors
///
/// Fails when the address cannot be bound, when a Unix socket path is invalid, or when a stale
/// path exists that is a symlink or cannot be removed. Failing to apply socket mode or owner
/// is only logged.
pub async fn create_listener(
    addr: &ListenAddr,
    options: SocketOptions,
) -> io::Result<(Listener, ListenerInfo)> {
    match addr {
        ListenAddr::Tcp(host_port) => {
            let listener = TcpListener::bind(host_port.as_str()).await.map_err(|e| {
                io::Error::new(e.kind(), format!("Cannot open {}: {}", host_port, e))
            })?;
            let local_addr = listener.local_addr()?;
            debug!("Query listener bound to tcp {}", local_addr);
            Ok((
                Listener::Tcp(listener),
                ListenerInfo {
                    tcp_addr: Some(local_addr),
                    uds_path: None,
                    #[cfg(unix)]
                    _cleanup_guard: None,
                },
            ))
        }
        #[cfg(unix)]
        ListenAddr::Unix(path) => {
            validate_uds_path(path)?;
            remove_stale_socket(path)?;

            let listener = UnixListener::bind(path).map_err(|e| {
                io::Error::new(e.kind(), format!("Cannot open {}: {}", addr, e))
            })?;
            // From here on the socket file belongs to us.
            let cleanup_guard = Arc::new(UnixSocketCleanupGuard::new(path.clone()));

            apply_socket_options(path, options);
            debug!("Query listener bound to {}", addr);

            Ok((
                Listener::Unix(listener),
                ListenerInfo {
                    tcp_addr: None,
                    uds_path: Some(path.clone()),
                    _cleanup_guard: Some(cleanup_guard),
                },
            ))
        }
        #[cfg(not(unix))]
        ListenAddr::Unix(_) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Unix domain sockets are only supported on Unix platforms",
        )),
    }
}

#[cfg(unix)]
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(io::Error::new(
                e.kind(),
                format!("Failed to check existing file at {}: {}", path.display(), e),
            ))
        }
    };
    if metadata.file_type().is_symlink() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Unix socket path is a symlink, refusing to remove it: {}",
                path.display()
            ),
        ));
    }
    std::fs::remove_file(path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!(
                "Failed to remove existing Unix socket at {}: {}",
                path.display(),
                e
            ),
        )
    })
}

#[cfg(unix)]
fn apply_socket_options(path: &Path, options: SocketOptions) {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(options.mode)) {
        warn!(
            "Cannot set permissions {:o} on socket {}: {}",
            options.mode,
            path.display(),
            e
        );
    }
    if let Some(owner) = options.owner {
        if !nix::unistd::geteuid().is_root() {
            warn!("You need to be a superuser (root) to set the socket owner");
        } else if let Err(e) = std::os::unix::fs::chown(path, Some(owner.uid), owner.gid) {
            warn!("Cannot set socket owner on {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listen_addr() {
        assert_eq!(
            ListenAddr::parse("unix:/var/run/mlogtail.sock"),
            Ok(ListenAddr::Unix(PathBuf::from("/var/run/mlogtail.sock")))
        );
        assert_eq!(
            ListenAddr::parse("127.0.0.1:4000"),
            Ok(ListenAddr::Tcp("127.0.0.1:4000".to_string()))
        );
        assert_eq!(
            ListenAddr::parse("[::1]:4000"),
            Ok(ListenAddr::Tcp("[::1]:4000".to_string()))
        );
        assert_eq!(ListenAddr::parse(" "), Err(ListenAddrError::Empty));
        assert_eq!(
            ListenAddr::parse("unix:"),
            Err(ListenAddrError::EmptySocketPath)
        );
    }

    #[test]
    fn test_listen_addr_display() {
        let addr = ListenAddr::parse("unix:/tmp/x.sock").unwrap();
        assert_eq!(addr.to_string(), "unix:/tmp/x.sock");
    }

    #[test]
    fn test_parse_socket_owner() {
        assert_eq!(
            SocketOwner::parse("1000"),
            Ok(SocketOwner {
                uid: 1000,
                gid: None
            })
        );
        assert_eq!(
            SocketOwner::parse("0:8"),
            Ok(SocketOwner {
                uid: 0,
                gid: Some(8)
            })
        );
        assert_eq!(
            SocketOwner::parse("1:2:3"),
            Err(OwnerParseError::Malformed("1:2:3".to_string()))
        );
        assert!(SocketOwner::parse("1:").is_err());
        assert!(SocketOwner::parse(":1").is_err());
        assert!(SocketOwner::parse("99999999999").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_socket_owner_names() {
        use nix::unistd::{getgid, getuid, Group, User};

        // Resolve the names of the current user and group, as in "postfix:postdrop".
        let user = User::from_uid(getuid()).unwrap();
        let group = Group::from_gid(getgid()).unwrap();
        if let (Some(user), Some(group)) = (user, group) {
            assert_eq!(
                SocketOwner::parse(&format!("{}:{}", user.name, group.name)),
                Ok(SocketOwner {
                    uid: getuid().as_raw(),
                    gid: Some(getgid().as_raw())
                })
            );
            assert_eq!(
                SocketOwner::parse(&format!("{}:0", user.name)),
                Ok(SocketOwner {
                    uid: getuid().as_raw(),
                    gid: Some(0)
                })
            );
        }

        assert_eq!(
            SocketOwner::parse("no-such-user-mlogtail"),
            Err(OwnerParseError::UnknownUser(
                "no-such-user-mlogtail".to_string()
            ))
        );
        assert_eq!(
            SocketOwner::parse("0:no-such-group-mlogtail"),
            Err(OwnerParseError::UnknownGroup(
                "no-such-group-mlogtail".to_string()
            ))
        );
    }

    #[test]
    fn test_validate_uds_path() {
        assert!(validate_uds_path(Path::new("/tmp/ok.sock")).is_ok());
        assert!(validate_uds_path(Path::new("")).is_err());
        let long = format!("/tmp/{}.sock", "a".repeat(MAX_UDS_PATH_LEN));
        assert!(validate_uds_path(Path::new(&long)).is_err());
    }

    #[tokio::test]
    async fn test_create_tcp_listener_ephemeral_port() {
        let addr = ListenAddr::parse("127.0.0.1:0").unwrap();
        let (listener, info) = create_listener(&addr, SocketOptions::default())
            .await
            .unwrap();
        assert!(matches!(listener, Listener::Tcp(_)));
        assert_ne!(info.tcp_addr.unwrap().port(), 0);
        assert!(info.uds_path.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_listener_mode_and_cleanup() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.sock");
        // A stale file from an earlier run is replaced.
        std::fs::write(&path, b"stale").unwrap();

        let addr = ListenAddr::Unix(path.clone());
        let options = SocketOptions {
            mode: 0o600,
            owner: None,
        };
        let (listener, info) = create_listener(&addr, options).await.unwrap();
        assert!(matches!(listener, Listener::Unix(_)));
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        drop(listener);
        let clone = info.clone();
        drop(info);
        assert!(path.exists());
        drop(clone);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_listener_refuses_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, b"keep").unwrap();
        let link = dir.path().join("link.sock");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let result = create_listener(&ListenAddr::Unix(link), SocketOptions::default()).await;
        assert_eq!(
            result.err().map(|e| e.kind()),
            Some(io::ErrorKind::InvalidInput)
        );
        assert!(target.exists());
    }
}
