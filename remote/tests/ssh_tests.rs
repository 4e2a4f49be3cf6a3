//! The SSH transport against an in-process `russh` server acting as the
//! remote `scp -t` receiver.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use common::{Content, Node, Summary};
use remote::{Error, Session, Settings, SshConfig, SshConnector};
use russh::server::{self, Auth, Msg, Server as _};
use russh::{Channel, ChannelId, CryptoVec, Sig};
use tracing_test::traced_test;

const USER: &str = "cf:0ab1c2d3/0";
const PASSWORD: &str = "one-time-code";

/// How the fake receiver reacts once the command is started.
#[derive(Clone, Debug)]
enum Behavior {
    /// Reads input until EOF, then exits with `status`
    Sink { status: u32 },
    /// Reports an error and exits right away
    FailEarly { status: u32 },
    /// Killed right away
    Killed,
    /// Reads input until EOF, then closes without an exit status
    Vanish,
    /// Refuses to run the command
    Reject,
}

#[derive(Debug, Default)]
struct ServerLog {
    commands: Vec<String>,
    received: Vec<u8>,
    channels_closed: usize,
}

type SharedLog = Arc<Mutex<ServerLog>>;

#[derive(Clone)]
struct Fixture {
    behavior: Behavior,
    log: SharedLog,
}

struct FixtureHandler {
    behavior: Behavior,
    log: SharedLog,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl server::Server for Fixture {
    type Handler = FixtureHandler;

    fn new_client(&mut self, _peer_addr: Option<SocketAddr>) -> FixtureHandler {
        FixtureHandler {
            behavior: self.behavior.clone(),
            log: self.log.clone(),
            channels: HashMap::new(),
        }
    }
}

#[async_trait]
impl server::Handler for FixtureHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == USER && password == PASSWORD {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::Reject {
                proceed_with_methods: None,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut server::Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut server::Session,
    ) -> Result<(), Self::Error> {
        self.log
            .lock()
            .unwrap()
            .commands
            .push(String::from_utf8_lossy(data).into_owned());
        match self.behavior {
            Behavior::Reject => {
                session.channel_failure(channel);
            }
            Behavior::Sink { .. } | Behavior::Vanish => {
                session.channel_success(channel);
            }
            Behavior::FailEarly { status } => {
                session.channel_success(channel);
                session.data(
                    channel,
                    CryptoVec::from_slice(b"\0\x01scp: /home/vcap: Permission denied\n"),
                );
                session.extended_data(channel, 1, CryptoVec::from_slice(b"quota exceeded\n"));
                session.exit_status_request(channel, status);
                session.eof(channel);
                session.close(channel);
            }
            Behavior::Killed => {
                session.channel_success(channel);
                session.exit_signal_request(
                    channel,
                    Sig::KILL,
                    false,
                    "killed",
                    "en",
                );
                session.close(channel);
            }
        }
        Ok(())
    }

    async fn data(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut server::Session,
    ) -> Result<(), Self::Error> {
        self.log.lock().unwrap().received.extend_from_slice(data);
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut server::Session,
    ) -> Result<(), Self::Error> {
        match self.behavior {
            Behavior::Sink { status } => {
                session.exit_status_request(channel, status);
                session.eof(channel);
                session.close(channel);
            }
            Behavior::Vanish => {
                session.close(channel);
            }
            _ => {}
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut server::Session,
    ) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        self.log.lock().unwrap().channels_closed += 1;
        Ok(())
    }
}

struct Running {
    endpoint: String,
    fingerprint: String,
    log: SharedLog,
}

async fn start(behavior: Behavior) -> Result<Running> {
    let key = russh_keys::key::KeyPair::generate_ed25519().unwrap();
    let fingerprint = key.clone_public_key()?.fingerprint();
    let config = Arc::new(server::Config {
        keys: vec![key],
        auth_rejection_time: Duration::from_millis(10),
        auth_rejection_time_initial: Some(Duration::from_millis(0)),
        ..Default::default()
    });
    let port = std::net::TcpListener::bind("127.0.0.1:0")?
        .local_addr()?
        .port();
    let endpoint = format!("127.0.0.1:{port}");
    let log = SharedLog::default();
    let fixture = Fixture {
        behavior,
        log: log.clone(),
    };
    let address = endpoint.clone();
    let mut fixture = fixture;
    tokio::spawn(async move {
        let _ = fixture.run_on_address(config, address.as_str()).await;
    });
    for _ in 0..200 {
        if tokio::net::TcpStream::connect(&endpoint).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(Running {
        endpoint,
        fingerprint,
        log,
    })
}

async fn connected(running: &Running) -> Result<Session> {
    let connector = SshConnector::new(SshConfig {
        host_key_fingerprint: Some(format!("SHA256:{}", running.fingerprint)),
    });
    let mut session = Session::new(connector, Settings::default());
    session.connect(&running.endpoint, USER, PASSWORD).await?;
    Ok(session)
}

fn greeting() -> Arc<Node> {
    Arc::new(Node::directory(
        "d",
        0o755,
        vec![Node::from_bytes("f", 0o644, "hello")],
    ))
}

async fn wait_for_closed_channels(log: &SharedLog, expected: usize) -> usize {
    for _ in 0..200 {
        let closed = log.lock().unwrap().channels_closed;
        if closed >= expected {
            return closed;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    log.lock().unwrap().channels_closed
}

#[tokio::test]
#[traced_test]
async fn pushes_tree_to_receiver() -> Result<()> {
    let running = start(Behavior::Sink { status: 0 }).await?;
    let mut session = connected(&running).await?;
    let summary = session.send(greeting()).await?;
    assert_eq!(
        summary,
        Summary {
            bytes_sent: 5,
            files_sent: 1,
            directories_sent: 1,
        }
    );
    {
        let log = running.log.lock().unwrap();
        assert_eq!(log.commands, vec!["scp -tr /home/vcap".to_string()]);
        assert_eq!(log.received, b"D0755 0 d\nC0644 5 f\nhello\x00E\n");
    }
    session.close().await?;
    assert!(!session.is_connected());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn wrong_password_is_an_authentication_error() -> Result<()> {
    let running = start(Behavior::Sink { status: 0 }).await?;
    let mut session = Session::new(SshConnector::default(), Settings::default());
    let result = session.connect(&running.endpoint, USER, "stale-code").await;
    assert!(
        matches!(result, Err(Error::Authentication { ref user }) if user == USER),
        "{result:?}"
    );
    assert!(!session.is_connected());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn unexpected_host_key_is_a_connect_error() -> Result<()> {
    let running = start(Behavior::Sink { status: 0 }).await?;
    let connector = SshConnector::new(SshConfig {
        host_key_fingerprint: Some("SHA256:bm90IHRoZSByaWdodCBrZXk".to_string()),
    });
    let mut session = Session::new(connector, Settings::default());
    let result = session.connect(&running.endpoint, USER, PASSWORD).await;
    assert!(matches!(result, Err(Error::Connect { .. })), "{result:?}");
    assert!(running.log.lock().unwrap().commands.is_empty());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn nonzero_exit_after_full_input() -> Result<()> {
    let running = start(Behavior::Sink { status: 1 }).await?;
    let session = connected(&running).await?;
    let result = session.send(greeting()).await;
    assert!(
        matches!(result, Err(Error::RemoteExit { status: 1, .. })),
        "{result:?}"
    );
    assert_eq!(
        running.log.lock().unwrap().received,
        b"D0755 0 d\nC0644 5 f\nhello\x00E\n"
    );
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn early_failure_carries_receiver_diagnostics() -> Result<()> {
    let running = start(Behavior::FailEarly { status: 1 }).await?;
    let session = connected(&running).await?;
    match session.send(greeting()).await {
        Err(Error::RemoteExit { status, message }) => {
            assert_eq!(status, 1);
            assert_eq!(
                message,
                "scp: /home/vcap: Permission denied\nquota exceeded"
            );
        }
        other => panic!("expected remote exit, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn refused_command_is_reported() -> Result<()> {
    let running = start(Behavior::Reject).await?;
    let session = connected(&running).await?;
    match session.send(greeting()).await {
        Err(Error::ExecRejected { command }) => assert_eq!(command, "scp -tr /home/vcap"),
        other => panic!("expected rejected command, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn killed_receiver_is_reported() -> Result<()> {
    let running = start(Behavior::Killed).await?;
    let session = connected(&running).await?;
    match session.send(greeting()).await {
        Err(Error::RemoteSignal { signal }) => assert_eq!(signal, "KILL"),
        other => panic!("expected signal, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn close_without_status_is_an_error() -> Result<()> {
    let running = start(Behavior::Vanish).await?;
    let session = connected(&running).await?;
    let result = session.send(greeting()).await;
    assert!(matches!(result, Err(Error::NoExitStatus)), "{result:?}");
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn failed_send_closes_channel_and_session_stays_usable() -> Result<()> {
    let running = start(Behavior::Sink { status: 0 }).await?;
    let session = connected(&running).await?;
    let tmp = tempfile::tempdir()?;
    let broken = Arc::new(Node::directory(
        "d",
        0o755,
        vec![Node::file(
            "gone",
            0o644,
            3,
            Content::Path(tmp.path().join("gone")),
        )],
    ));
    let result = session.send(broken).await;
    assert!(matches!(result, Err(Error::LocalRead { .. })), "{result:?}");
    // the receiver never saw EOF, only the channel close releases it
    assert_eq!(wait_for_closed_channels(&running.log, 1).await, 1);
    running.log.lock().unwrap().received.clear();
    session.send(greeting()).await?;
    assert_eq!(
        running.log.lock().unwrap().received,
        b"D0755 0 d\nC0644 5 f\nhello\x00E\n"
    );
    Ok(())
}
