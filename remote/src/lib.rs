//! Pushes local file trees to a remote host over SSH
//!
//! A [`Session`] holds one authenticated connection. [`Session::send`] starts
//! the classic `scp -tr <destination>` receiver on the remote host, streams a
//! [`common::Node`] tree into it with the records described in [`protocol`]
//! and reports success only when the receiver exits cleanly.
//!
//! The connection is reached through the traits in [`transport`]; [`ssh`]
//! provides the real implementation.

pub mod coordinator;
pub mod encoder;
pub mod error;
pub mod protocol;
pub mod session;
pub mod ssh;
pub mod transport;

pub use error::Error;
pub use session::{Session, Settings};
pub use ssh::{SshConfig, SshConnector};
