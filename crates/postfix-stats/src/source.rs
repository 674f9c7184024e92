// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line sources feeding the pipeline.
//!
//! [`ReaderSource`] replays a finite input (a file or stdin) and ends at EOF. [`FollowSource`]
//! follows a live log file from its current end, the way `tail -F` does, reopening it when the
//! file is rotated or truncated. Lines are decoded lossily: mail logs occasionally carry bytes
//! that are not valid UTF-8 and those lines must not stop the stream.

use std::fs::Metadata;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, BufReader, Stdin};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::READ_BUFFER_SIZE;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_ROTATION_GRACE: Duration = Duration::from_secs(5);

/// Pull-based supplier of log lines.
#[async_trait]
pub trait LineSource: Send {
    /// Returns the next line without its line terminator, `Ok(None)` at end of stream.
    async fn next_line(&mut self) -> io::Result<Option<String>>;
}

fn take_line(buf: &mut Vec<u8>) -> String {
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    line
}

/// Finite source over any buffered reader.
pub struct ReaderSource<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R> ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }
}

impl ReaderSource<BufReader<File>> {
    /// Opens `path` for a single pass from its beginning.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await.map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Cannot open log file {}: {}", path.display(), e),
            )
        })?;
        Ok(Self::new(BufReader::with_capacity(READ_BUFFER_SIZE, file)))
    }
}

impl ReaderSource<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::with_capacity(
            READ_BUFFER_SIZE,
            tokio::io::stdin(),
        ))
    }
}

#[async_trait]
impl<R> LineSource for ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(take_line(&mut self.buf)))
    }
}

/// Identity of the file behind a path, used to notice rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn identity(metadata: &Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some(FileIdentity {
        dev: metadata.dev(),
        ino: metadata.ino(),
    })
}

// Without inode numbers only truncation can be detected.
#[cfg(not(unix))]
fn identity(_metadata: &Metadata) -> Option<FileIdentity> {
    None
}

/// Handle on a file that was rotated away, read until it has been quiet for the grace period.
struct RetiredFile {
    reader: BufReader<File>,
    pending: Vec<u8>,
    quiet_since: Instant,
}

/// Endless source following a log file.
///
/// When the file is rotated, the old handle is kept and drained before lines from the new file
/// are returned: syslog daemons keep writing to the renamed file until they reopen their logs.
pub struct FollowSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    identity: Option<FileIdentity>,
    position: u64,
    pending: Vec<u8>,
    retired: Option<RetiredFile>,
    poll_interval: Duration,
    rotation_grace: Duration,
}

impl FollowSource {
    /// Starts following `path` from its current end.
    ///
    /// A missing file is not an error: it is picked up once it appears.
    pub async fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let mut source = Self {
            path: path.into(),
            reader: None,
            identity: None,
            position: 0,
            pending: Vec::new(),
            retired: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            rotation_grace: DEFAULT_ROTATION_GRACE,
        };
        match source.reopen(SeekFrom::End(0)).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    "Log file {} does not exist yet, waiting for it",
                    source.path.display()
                );
            }
            Err(e) => {
                return Err(io::Error::new(
                    e.kind(),
                    format!("Cannot tail log file {}: {}", source.path.display(), e),
                ))
            }
        }
        Ok(source)
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// How long a rotated file is still read after its last write.
    #[must_use]
    pub fn with_rotation_grace(mut self, rotation_grace: Duration) -> Self {
        self.rotation_grace = rotation_grace;
        self
    }

    async fn reopen(&mut self, from: SeekFrom) -> io::Result<()> {
        let mut file = File::open(&self.path).await?;
        let metadata = file.metadata().await?;
        self.position = file.seek(from).await?;
        self.identity = identity(&metadata);
        self.reader = Some(BufReader::with_capacity(READ_BUFFER_SIZE, file));
        self.pending.clear();
        Ok(())
    }

    /// Moves the current handle aside so its remaining lines are still read.
    fn retire_current(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        if let Some(previous) = self.retired.take() {
            // Rotated twice within the grace period; the older handle is given up.
            debug!(
                "Dropping rotated log handle with a {} byte partial line",
                previous.pending.len()
            );
        }
        self.retired = Some(RetiredFile {
            reader,
            pending: std::mem::take(&mut self.pending),
            quiet_since: Instant::now(),
        });
    }

    /// Returns the next line still arriving in a rotated file, if any.
    async fn next_retired_line(&mut self) -> io::Result<Option<String>> {
        let Some(retired) = self.retired.as_mut() else {
            return Ok(None);
        };
        let read = retired
            .reader
            .read_until(b'\n', &mut retired.pending)
            .await?;
        if read > 0 {
            retired.quiet_since = Instant::now();
        }
        if retired.pending.last() == Some(&b'\n') {
            return Ok(Some(take_line(&mut retired.pending)));
        }
        if retired.quiet_since.elapsed() < self.rotation_grace {
            return Ok(None);
        }

        debug!("Finished reading rotated log file");
        match self.retired.take() {
            Some(mut retired) if !retired.pending.is_empty() => {
                Ok(Some(take_line(&mut retired.pending)))
            }
            _ => Ok(None),
        }
    }

    /// Checks whether the path now points at a different or shorter file and reopens it.
    async fn follow_rotation(&mut self) -> io::Result<()> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            // Rotated away and not recreated yet; keep the old handle.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        if self.reader.is_none() {
            info!("Log file {} appeared, following it", self.path.display());
            return self.reopen(SeekFrom::Start(0)).await;
        }
        if identity(&metadata) != self.identity {
            info!("Log file {} was rotated, reopening", self.path.display());
            self.retire_current();
            return self.reopen(SeekFrom::Start(0)).await;
        }
        if metadata.len() < self.position {
            info!("Log file {} was truncated, reopening", self.path.display());
            return self.reopen(SeekFrom::Start(0)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl LineSource for FollowSource {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            // The rotated file holds older lines than the current one.
            if let Some(line) = self.next_retired_line().await? {
                return Ok(Some(line));
            }
            if let Some(reader) = self.reader.as_mut() {
                let read = reader.read_until(b'\n', &mut self.pending).await?;
                self.position += read as u64;
                if self.pending.last() == Some(&b'\n') {
                    return Ok(Some(take_line(&mut self.pending)));
                }
                if read > 0 {
                    // Partial line: the writer has not finished it yet.
                    debug!("Waiting for the rest of a partial line");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
            self.follow_rotation().await?;
        }
    }
}
