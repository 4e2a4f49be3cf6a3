use common::ErrorClass;

/// Errors returned by [`crate::Session`] and the transport it drives.
///
/// Use [`Error::class`] to tell connection problems, streaming failures and
/// remote command failures apart.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("already connected")]
    AlreadyConnected,
    #[error("session closed")]
    SessionClosed,
    #[error("unable to authenticate as {user:?}")]
    Authentication { user: String },
    #[error("failed to connect to {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("remote host rejected command {command:?}")]
    ExecRejected { command: String },
    #[error("{context}")]
    Transport {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed reading {locator}")]
    LocalRead {
        locator: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed writing to remote command input")]
    RemoteWrite(#[source] std::io::Error),
    #[error("{locator} shrank during transfer: announced {expected} bytes, read {actual}")]
    SizeMismatch {
        locator: String,
        expected: u64,
        actual: u64,
    },
    #[error("{name:?} cannot be used as a file name in the copy protocol")]
    InvalidName { name: String },
    #[error("writer task failed")]
    WriterTask(#[source] tokio::task::JoinError),
    #[error("{}", describe_exit(*status, message))]
    RemoteExit { status: u32, message: String },
    #[error("remote command killed by signal {signal}")]
    RemoteSignal { signal: String },
    #[error("remote command finished without reporting an exit status")]
    NoExitStatus,
}

fn describe_exit(status: u32, message: &str) -> String {
    if message.is_empty() {
        format!("remote command exited with status {status}")
    } else {
        format!("remote command exited with status {status}: {message}")
    }
}

impl Error {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::AlreadyConnected
            | Error::SessionClosed
            | Error::Authentication { .. }
            | Error::Connect { .. }
            | Error::ExecRejected { .. }
            | Error::Transport { .. } => ErrorClass::Connection,
            Error::LocalRead { .. }
            | Error::RemoteWrite(_)
            | Error::SizeMismatch { .. }
            | Error::InvalidName { .. }
            | Error::WriterTask(_) => ErrorClass::Streaming,
            Error::RemoteExit { .. } | Error::RemoteSignal { .. } | Error::NoExitStatus => {
                ErrorClass::RemoteOutcome
            }
        }
    }

    pub(crate) fn transport(context: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Error::Transport {
            context,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_protocol_wording() {
        assert_eq!(Error::AlreadyConnected.to_string(), "already connected");
        assert_eq!(Error::SessionClosed.to_string(), "session closed");
        assert_eq!(
            Error::RemoteExit {
                status: 1,
                message: String::new()
            }
            .to_string(),
            "remote command exited with status 1"
        );
        assert_eq!(
            Error::RemoteExit {
                status: 1,
                message: "scp: /nope: No such file or directory".to_string()
            }
            .to_string(),
            "remote command exited with status 1: scp: /nope: No such file or directory"
        );
    }

    #[test]
    fn classes() {
        assert_eq!(Error::SessionClosed.class(), ErrorClass::Connection);
        assert_eq!(
            Error::Authentication {
                user: "u".to_string()
            }
            .class(),
            ErrorClass::Connection
        );
        assert_eq!(
            Error::RemoteWrite(std::io::ErrorKind::BrokenPipe.into()).class(),
            ErrorClass::Streaming
        );
        assert_eq!(Error::NoExitStatus.class(), ErrorClass::RemoteOutcome);
    }
}
