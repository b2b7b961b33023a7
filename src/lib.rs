//! SSH session core for a file-transfer client.
//!
//! This crate drives a black-box SSH engine (key exchange, ciphers, and
//! packetization live behind the [`engine::Engine`] trait) into an
//! authenticated, encrypted byte channel: it verifies the server host key
//! against a persistent trust store, negotiates credentials with the user,
//! and exposes an ordered, reliable reader/writer to an SFTP or SCP layer on
//! top.
//!
//! The concurrency model is single-threaded and cooperative: `open`,
//! `receive`, `receive_line`, and `send` (under back-pressure) block the
//! calling thread, and all I/O advances inside the session's own event loop.

pub mod auth;
pub mod config;
pub mod diag;
pub mod engine;
pub mod error;
pub mod hostkey;
pub mod probe;
pub mod session;
pub mod ui;

pub use config::{ClientConfig, SessionConfig};
pub use error::{NetworkErrorKind, Result, TransportError};
pub use hostkey::HostKeyStore;
pub use session::{
    OutputKind, SecureSession, SessionInfo, SshImplementation, MAX_BUFSIZE,
};
pub use ui::{HostKeyDecision, SessionUi, TimeoutAnswer};
