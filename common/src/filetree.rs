//! In-memory snapshots of local file trees.
//!
//! [`build`] walks a path once and records names, modes and sizes. File
//! contents are not read at that point: every file node keeps a [`Content`]
//! locator that is re-opened each time the bytes are needed, so a tree can be
//! built well before (and reused across) transfers without holding any file
//! descriptors open.

use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_recursion::async_recursion;
use tracing::instrument;

/// Boxed reader returned when opening file contents.
pub type BoxedRead = Box<dyn tokio::io::AsyncRead + Unpin + Send>;

const S_IFMT: u32 = 0o170_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFREG: u32 = 0o100_000;
const PERMISSION_BITS: u32 = 0o7777;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed reading metadata from {path:?}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot open directory {path:?} for reading")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed resolving symlink {path:?}")]
    Dereference {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("symlink {path:?} points back at {target:?} which is already being walked")]
    SymlinkLoop { path: PathBuf, target: PathBuf },
    #[error("unsupported file type at {path:?}: {file_type}")]
    Unsupported {
        path: PathBuf,
        file_type: &'static str,
    },
    #[error("{path:?} does not have a usable basename")]
    InvalidName { path: PathBuf },
    #[error("failed building tree under {path:?}")]
    Task {
        path: PathBuf,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl Error {
    #[must_use]
    pub fn class(&self) -> crate::ErrorClass {
        crate::ErrorClass::Construction
    }

    /// Kind of the underlying I/O failure, if there was one.
    #[must_use]
    pub fn io_error_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Error::Metadata { source, .. }
            | Error::ReadDir { source, .. }
            | Error::Dereference { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// Where the bytes of a file node come from.
#[derive(Clone, Debug)]
pub enum Content {
    /// Re-opened from the filesystem on every access.
    Path(PathBuf),
    Bytes(bytes::Bytes),
}

impl Content {
    /// Opens a fresh, independent stream over the content.
    ///
    /// The stream is closed when the returned reader is dropped; callers
    /// must not assume two concurrently open streams see the same bytes.
    pub async fn open(&self) -> std::io::Result<BoxedRead> {
        match self {
            Content::Path(path) => Ok(Box::new(tokio::fs::File::open(path).await?)),
            Content::Bytes(bytes) => Ok(Box::new(std::io::Cursor::new(bytes.clone()))),
        }
    }

    /// Human readable locator used in log and error messages.
    #[must_use]
    pub fn locator(&self) -> String {
        match self {
            Content::Path(path) => path.display().to_string(),
            Content::Bytes(bytes) => format!("<{} in-memory bytes>", bytes.len()),
        }
    }
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Directory { children: Vec<Node> },
    File { size: u64, content: Content },
}

/// One entry of a snapshot: a directory owning its children, or a regular file.
#[derive(Clone, Debug)]
pub struct Node {
    basename: String,
    mode: u32,
    kind: NodeKind,
}

impl Node {
    pub fn directory(basename: impl Into<String>, mode: u32, children: Vec<Node>) -> Self {
        Self {
            basename: basename.into(),
            mode: S_IFDIR | (mode & PERMISSION_BITS),
            kind: NodeKind::Directory { children },
        }
    }

    pub fn file(basename: impl Into<String>, mode: u32, size: u64, content: Content) -> Self {
        Self {
            basename: basename.into(),
            mode: S_IFREG | (mode & PERMISSION_BITS),
            kind: NodeKind::File { size, content },
        }
    }

    /// File node backed by an in-memory buffer; the size is taken from the buffer.
    pub fn from_bytes(basename: impl Into<String>, mode: u32, data: impl Into<bytes::Bytes>) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        Self::file(basename, mode, size, Content::Bytes(data))
    }

    #[must_use]
    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Raw `st_mode`, type bits included.
    #[must_use]
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Permission bits only (setuid/setgid/sticky and rwx).
    #[must_use]
    pub fn permissions(&self) -> u32 {
        self.mode & PERMISSION_BITS
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    /// Byte length of a file; always 0 for directories.
    #[must_use]
    pub fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::File { size, .. } => *size,
            NodeKind::Directory { .. } => 0,
        }
    }

    #[must_use]
    pub fn children(&self) -> &[Node] {
        match &self.kind {
            NodeKind::Directory { children } => children,
            NodeKind::File { .. } => &[],
        }
    }

    #[must_use]
    pub fn content(&self) -> Option<&Content> {
        match &self.kind {
            NodeKind::File { content, .. } => Some(content),
            NodeKind::Directory { .. } => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Totals for the whole subtree, i.e. what sending it would put on the wire.
    #[must_use]
    pub fn summary(&self) -> crate::Summary {
        let mut summary = crate::Summary::default();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            match &node.kind {
                NodeKind::Directory { children } => {
                    summary.directories_sent += 1;
                    pending.extend(children.iter());
                }
                NodeKind::File { size, .. } => {
                    summary.files_sent += 1;
                    summary.bytes_sent += size;
                }
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Settings {
    /// Follow symbolic links instead of rejecting them
    pub dereference: bool,
}

fn describe_file_type(file_type: &std::fs::FileType) -> &'static str {
    if file_type.is_symlink() {
        "symbolic link"
    } else if file_type.is_block_device() {
        "block device"
    } else if file_type.is_char_device() {
        "character device"
    } else if file_type.is_fifo() {
        "fifo"
    } else if file_type.is_socket() {
        "socket"
    } else {
        "unknown"
    }
}

async fn basename_of(path: &Path) -> Result<String, Error> {
    let name = match path.file_name() {
        Some(name) => name.to_os_string(),
        None => {
            // e.g. "." or "foo/..", the name only exists after resolving
            let resolved = tokio::fs::canonicalize(path)
                .await
                .map_err(|source| Error::Metadata {
                    path: path.to_path_buf(),
                    source,
                })?;
            resolved
                .file_name()
                .ok_or_else(|| Error::InvalidName {
                    path: path.to_path_buf(),
                })?
                .to_os_string()
        }
    };
    name.into_string().map_err(|_| Error::InvalidName {
        path: path.to_path_buf(),
    })
}

/// Builds a snapshot of `path`.
///
/// Directories are walked recursively and fail fast: the first error anywhere
/// in the subtree aborts the whole call, no partial tree is returned. Children
/// are sorted by basename.
#[instrument(skip(settings))]
pub async fn build(path: &Path, settings: &Settings) -> Result<Node, Error> {
    let basename = basename_of(path).await?;
    build_named(path, basename, settings, Arc::default()).await
}

/// `ancestors` holds the canonical paths of the directories entered on the
/// way down to `path`; a followed link resolving to any of them is a loop.
#[async_recursion]
async fn build_named(
    path: &Path,
    basename: String,
    settings: &Settings,
    ancestors: Arc<Vec<PathBuf>>,
) -> Result<Node, Error> {
    let metadata = tokio::fs::symlink_metadata(path)
        .await
        .map_err(|source| Error::Metadata {
            path: path.to_path_buf(),
            source,
        })?;
    let file_type = metadata.file_type();
    if file_type.is_symlink() {
        if !settings.dereference {
            return Err(Error::Unsupported {
                path: path.to_path_buf(),
                file_type: describe_file_type(&file_type),
            });
        }
        let target = tokio::fs::canonicalize(path)
            .await
            .map_err(|source| Error::Dereference {
                path: path.to_path_buf(),
                source,
            })?;
        if ancestors.iter().any(|dir| dir.starts_with(&target)) {
            return Err(Error::SymlinkLoop {
                path: path.to_path_buf(),
                target,
            });
        }
        tracing::debug!("following symlink {:?} -> {:?}", path, &target);
        return build_named(&target, basename, settings, ancestors).await;
    }
    if file_type.is_file() {
        tracing::trace!("regular file {:?}, {} bytes", path, metadata.len());
        return Ok(Node {
            basename,
            mode: metadata.mode(),
            kind: NodeKind::File {
                size: metadata.len(),
                content: Content::Path(path.to_path_buf()),
            },
        });
    }
    if !file_type.is_dir() {
        return Err(Error::Unsupported {
            path: path.to_path_buf(),
            file_type: describe_file_type(&file_type),
        });
    }
    let read_dir_error = |source| Error::ReadDir {
        path: path.to_path_buf(),
        source,
    };
    let ancestors = if settings.dereference {
        let canonical = tokio::fs::canonicalize(path)
            .await
            .map_err(|source| Error::Metadata {
                path: path.to_path_buf(),
                source,
            })?;
        let mut entered = Vec::with_capacity(ancestors.len() + 1);
        entered.extend(ancestors.iter().cloned());
        entered.push(canonical);
        Arc::new(entered)
    } else {
        ancestors
    };
    let mut entries = tokio::fs::read_dir(path).await.map_err(read_dir_error)?;
    let mut join_set = tokio::task::JoinSet::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_dir_error)? {
        let entry_path = entry.path();
        let name = entry
            .file_name()
            .into_string()
            .map_err(|_| Error::InvalidName {
                path: entry_path.clone(),
            })?;
        let settings = *settings;
        let ancestors = ancestors.clone();
        join_set.spawn(async move { build_named(&entry_path, name, &settings, ancestors).await });
    }
    drop(entries);
    let mut children = Vec::with_capacity(join_set.len());
    while let Some(res) = join_set.join_next().await {
        // returning early drops the JoinSet which aborts the remaining siblings
        let child = res.map_err(|source| Error::Task {
            path: path.to_path_buf(),
            source,
        })??;
        children.push(child);
    }
    children.sort_by(|a, b| a.basename.cmp(&b.basename));
    tracing::trace!("directory {:?} with {} entries", path, children.len());
    Ok(Node {
        basename,
        mode: metadata.mode(),
        kind: NodeKind::Directory { children },
    })
}
