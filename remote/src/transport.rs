//! Seams between [`crate::Session`] and the authenticated connection it drives.
//!
//! [`crate::ssh`] implements these over SSH; tests substitute in-memory fakes.

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::Error;

/// Input stream of a remote process.
pub type BoxedWrite = Box<dyn AsyncWrite + Unpin + Send>;

/// How a remote process finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Exited {
        status: u32,
        /// Whatever the process reported on its output streams, may be empty
        diagnostics: String,
    },
    Signaled {
        signal: String,
    },
}

/// Dials and authenticates a connection.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    async fn connect(
        &self,
        endpoint: &str,
        identity: &str,
        secret: &str,
    ) -> Result<Self::Connection, Error>;
}

/// A live, authenticated connection able to run commands.
#[async_trait]
pub trait Connection: Send + Sync {
    type Process: RemoteProcess;

    /// Starts `command` verbatim on the remote host.
    async fn exec(&self, command: &str) -> Result<Self::Process, Error>;

    async fn disconnect(self) -> Result<(), Error>;
}

/// A command started by [`Connection::exec`].
#[async_trait]
pub trait RemoteProcess: Send {
    /// Hands out the process input once; later calls return `None`.
    fn take_stdin(&mut self) -> Option<BoxedWrite>;

    /// Signals end of input.
    async fn close_stdin(&mut self) -> Result<(), Error>;

    /// Waits until the process finishes.
    ///
    /// Must be cancel safe: dropping the future and calling `wait` again
    /// loses no events.
    async fn wait(&mut self) -> Result<Completion, Error>;

    /// Releases the process on the remote side. A process still reading
    /// its input is not left waiting for more.
    async fn close(&mut self) -> Result<(), Error>;
}
