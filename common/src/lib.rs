//! Shared plumbing for the treepush tools
//!
//! - [`filetree`]: lazily-readable snapshots of local file trees
//! - [`Summary`]: counters describing a finished transfer
//! - [`run`]: tokio runtime and `tracing` subscriber setup for binaries
//!
//! Errors produced anywhere in the workspace map onto an [`ErrorClass`] so
//! callers can tell a bad local path from a rejected login, a broken stream or
//! a remote command that failed.

pub mod config;
pub mod filetree;
pub mod summary;
pub mod testutils;

pub use config::{OutputConfig, RuntimeConfig};
pub use filetree::{Content, Node, NodeKind, build};
pub use summary::Summary;

/// Broad category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The local tree could not be snapshotted
    Construction,
    /// The authenticated connection could not be used
    Connection,
    /// Bytes could not be moved from the tree to the remote command
    Streaming,
    /// The remote command ran but did not succeed
    RemoteOutcome,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            ErrorClass::Construction => "construction",
            ErrorClass::Connection => "connection",
            ErrorClass::Streaming => "streaming",
            ErrorClass::RemoteOutcome => "remote outcome",
        };
        f.write_str(name)
    }
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the verbosity from `output`. Calling this
/// more than once is harmless, later calls are ignored.
pub fn init_tracing(output: &OutputConfig) {
    let level = if output.quiet {
        tracing::level_filters::LevelFilter::OFF
    } else {
        tracing::level_filters::LevelFilter::from_level(output.level())
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::default().add_directive(level.into()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Runs `func` on a freshly built tokio runtime.
///
/// Returns `None` if the runtime could not be created or `func` failed; the
/// error is printed unless `output.quiet` is set. On success the result is
/// printed when a summary was requested (or implied by `-v`).
pub fn run<Fut, T>(
    output: OutputConfig,
    runtime: RuntimeConfig,
    func: impl FnOnce() -> Fut,
) -> Option<T>
where
    T: std::fmt::Display,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    init_tracing(&output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(error) => {
            if !output.quiet {
                eprintln!("failed to start tokio runtime: {error:#}");
            }
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(result) => {
            if output.print_summary || output.verbose > 0 {
                println!("{result}");
            }
            Some(result)
        }
        Err(error) => {
            if !output.quiet {
                eprintln!("{error:#}");
            }
            None
        }
    }
}
