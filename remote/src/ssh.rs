//! SSH implementation of the [`crate::transport`] traits using `russh`.

use std::sync::Arc;

use async_trait::async_trait;
use russh::ChannelMsg;
use russh::client::{self, Msg};
use tracing::instrument;

use crate::Error;
use crate::protocol;
use crate::transport::{BoxedWrite, Completion, Connection, Connector, RemoteProcess};

/// Stderr is carried as extended data of this type.
const EXTENDED_DATA_STDERR: u32 = 1;

/// Keep at most this much receiver output for error messages.
const MAX_DIAGNOSTICS: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub struct SshConfig {
    /// Expected SHA-256 fingerprint of the server host key (base64, with or
    /// without a `SHA256:` prefix). Any key is accepted when unset.
    pub host_key_fingerprint: Option<String>,
}

struct ClientHandler {
    expected_fingerprint: Option<String>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        match &self.expected_fingerprint {
            None => {
                tracing::debug!("accepting unverified host key SHA256:{fingerprint}");
                Ok(true)
            }
            Some(expected) => {
                let expected = expected.strip_prefix("SHA256:").unwrap_or(expected);
                if expected == fingerprint {
                    Ok(true)
                } else {
                    tracing::error!(
                        "host key mismatch: expected SHA256:{expected}, got SHA256:{fingerprint}"
                    );
                    Ok(false)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    config: SshConfig,
}

impl SshConnector {
    #[must_use]
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Connection = SshConnection;

    #[instrument(skip(self, secret))]
    async fn connect(
        &self,
        endpoint: &str,
        identity: &str,
        secret: &str,
    ) -> Result<SshConnection, Error> {
        let connect_error = |source: russh::Error| Error::Connect {
            endpoint: endpoint.to_string(),
            source: source.into(),
        };
        let handler = ClientHandler {
            expected_fingerprint: self.config.host_key_fingerprint.clone(),
        };
        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, endpoint, handler)
            .await
            .map_err(connect_error)?;
        let authenticated = handle
            .authenticate_password(identity, secret)
            .await
            .map_err(connect_error)?;
        if !authenticated {
            return Err(Error::Authentication {
                user: identity.to_string(),
            });
        }
        tracing::info!("connected to {endpoint} as {identity}");
        Ok(SshConnection { handle })
    }
}

pub struct SshConnection {
    handle: client::Handle<ClientHandler>,
}

#[async_trait]
impl Connection for SshConnection {
    type Process = SshProcess;

    #[instrument(skip(self))]
    async fn exec(&self, command: &str) -> Result<SshProcess, Error> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|error| Error::transport("failed to open session channel", error))?;
        channel
            .exec(true, command)
            .await
            .map_err(|error| Error::transport("failed to request command execution", error))?;
        let stdin: BoxedWrite = Box::new(Box::pin(channel.make_writer()));
        Ok(SshProcess {
            command: command.to_string(),
            channel,
            stdin: Some(stdin),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }

    async fn disconnect(self) -> Result<(), Error> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(|error| Error::transport("failed to disconnect", error))
    }
}

pub struct SshProcess {
    command: String,
    channel: russh::Channel<Msg>,
    stdin: Option<BoxedWrite>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn append_bounded(buffer: &mut Vec<u8>, data: &[u8]) {
    let room = MAX_DIAGNOSTICS.saturating_sub(buffer.len());
    buffer.extend_from_slice(&data[..data.len().min(room)]);
}

impl SshProcess {
    fn diagnostics(&self) -> String {
        protocol::receiver_diagnostics(&self.stdout, &self.stderr)
    }
}

#[async_trait]
impl RemoteProcess for SshProcess {
    fn take_stdin(&mut self) -> Option<BoxedWrite> {
        self.stdin.take()
    }

    async fn close_stdin(&mut self) -> Result<(), Error> {
        self.channel
            .eof()
            .await
            .map_err(|error| Error::transport("failed to close remote command input", error))
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.stdin = None;
        self.channel
            .close()
            .await
            .map_err(|error| Error::transport("failed to close remote command channel", error))
    }

    async fn wait(&mut self) -> Result<Completion, Error> {
        while let Some(message) = self.channel.wait().await {
            match message {
                ChannelMsg::Success => tracing::debug!("remote accepted {:?}", self.command),
                ChannelMsg::Failure => {
                    return Err(Error::ExecRejected {
                        command: self.command.clone(),
                    });
                }
                ChannelMsg::Data { data } => {
                    let text: Vec<u8> = data.iter().copied().filter(|byte| *byte != 0).collect();
                    append_bounded(&mut self.stdout, &text);
                }
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == EXTENDED_DATA_STDERR {
                        append_bounded(&mut self.stderr, &data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    tracing::debug!("remote command exited with status {exit_status}");
                    return Ok(Completion::Exited {
                        status: exit_status,
                        diagnostics: self.diagnostics(),
                    });
                }
                ChannelMsg::ExitSignal {
                    signal_name,
                    error_message,
                    ..
                } => {
                    tracing::debug!("remote command killed: {error_message}");
                    return Ok(Completion::Signaled {
                        signal: format!("{signal_name:?}"),
                    });
                }
                ChannelMsg::Eof => tracing::trace!("remote closed its output"),
                ChannelMsg::Close => break,
                other => tracing::trace!("ignoring channel message {other:?}"),
            }
        }
        Err(Error::NoExitStatus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_are_bounded() {
        let mut buffer = Vec::new();
        append_bounded(&mut buffer, &vec![b'x'; MAX_DIAGNOSTICS - 1]);
        append_bounded(&mut buffer, b"yyy");
        assert_eq!(buffer.len(), MAX_DIAGNOSTICS);
        assert_eq!(buffer.last(), Some(&b'y'));
        append_bounded(&mut buffer, b"zzz");
        assert_eq!(buffer.len(), MAX_DIAGNOSTICS);
    }
}
