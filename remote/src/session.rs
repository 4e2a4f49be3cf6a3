use std::sync::Arc;

use common::{Node, Summary};
use tracing::instrument;

use crate::Error;
use crate::coordinator;
use crate::encoder::DEFAULT_CHUNK_SIZE;
use crate::protocol;
use crate::ssh::SshConnector;
use crate::transport::{Connection, Connector};

/// Default directory the remote receiver writes into.
pub const DEFAULT_DESTINATION: &str = "/home/vcap";

#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory on the remote host that receives the tree
    pub destination: String,
    /// Receiver program started on the remote host
    pub scp_program: String,
    /// Read buffer size used while streaming file contents
    pub chunk_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            destination: DEFAULT_DESTINATION.to_string(),
            scp_program: "scp".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Owns at most one authenticated connection and pushes trees over it.
pub struct Session<C: Connector = SshConnector> {
    connector: C,
    settings: Settings,
    connection: Option<C::Connection>,
}

impl<C: Connector> Session<C> {
    pub fn new(connector: C, settings: Settings) -> Self {
        Self {
            connector,
            settings,
            connection: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Dials `endpoint` and authenticates as `identity` with `secret`.
    ///
    /// Fails with [`Error::AlreadyConnected`] without touching the live
    /// connection if there is one.
    #[instrument(skip(self, secret))]
    pub async fn connect(
        &mut self,
        endpoint: &str,
        identity: &str,
        secret: &str,
    ) -> Result<(), Error> {
        if self.connection.is_some() {
            return Err(Error::AlreadyConnected);
        }
        let connection = self.connector.connect(endpoint, identity, secret).await?;
        self.connection = Some(connection);
        Ok(())
    }

    /// Drops the connection. Closing a disconnected session does nothing.
    ///
    /// The session is disconnected afterwards even when this returns an error.
    #[instrument(skip(self))]
    pub async fn close(&mut self) -> Result<(), Error> {
        match self.connection.take() {
            Some(connection) => {
                tracing::debug!("disconnecting");
                connection.disconnect().await
            }
            None => Ok(()),
        }
    }

    /// Copies the tree rooted at `root` into the configured destination.
    #[instrument(skip_all, fields(root = root.basename()))]
    pub async fn send(&self, root: Arc<Node>) -> Result<Summary, Error> {
        let connection = self.connection.as_ref().ok_or(Error::SessionClosed)?;
        let command =
            protocol::receiver_command(&self.settings.scp_program, &self.settings.destination);
        tracing::info!("running {command:?}");
        let process = connection.exec(&command).await?;
        coordinator::run(process, root, self.settings.chunk_size).await
    }
}
