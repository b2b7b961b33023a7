//! The SSH session orchestrator.
//!
//! [`SecureSession`] owns the engine and drives connection establishment,
//! host-key verification, authentication prompting, and the buffered
//! receive/send path. The engine never holds a reference back into the
//! session: [`SessionCore`] implements [`EngineCallbacks`] and is passed into
//! every driving engine call, so no backend-to-session pointer cycle exists.
//!
//! All blocking methods suspend the calling thread until the operation
//! completes, fails, or the user aborts from a prompt; there is no internal
//! concurrency.

mod events;
mod info;
mod receive;
mod send;

pub use info::{
    detect_implementation, parse_server_implementation, SessionInfo, SshImplementation,
};
pub use send::{MAX_BUFSIZE, SEND_BUFFER_POLL};

use std::rc::Rc;
use std::time::{Instant, SystemTime};

use tracing::debug;

use crate::auth::{classify_prompt, normalize_instructions, try_auto_answer, CredentialUsage,
    StoredCredential};
use crate::config::{ClientConfig, SessionConfig};
use crate::diag::{map_init_error, normalize_tunnel_failure, FORWARDING_FAILURE_PREFIX,
    SERVER_VERSION_PREFIX};
use crate::engine::{build_engine_options, Engine, EngineCallbacks, Prompt, SocketId};
use crate::error::{Result, TransportError};
use crate::hostkey::{format_key_str, verify_host_key, HostKeyStore};
use crate::probe;
use crate::ui::SessionUi;

use receive::ReceiveState;

/// Classification of captured session output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Regular protocol output (`receive_line`).
    Output,
    /// Peer stderr.
    StdError,
    /// Locally sent lines (`send_line`).
    Input,
}

/// Callback receiving captured output lines.
pub type CaptureOutput = Box<dyn FnMut(&str, OutputKind)>;

/// Push-mode receive handler. Invoked after new bytes arrive; may call back
/// into the session (including `receive`).
pub type ReceiveHandler<E> = Box<dyn FnMut(&mut SecureSession<E>) -> Result<()>>;

/// The engine-facing half of the session: everything the engine may touch
/// through [`EngineCallbacks`] while a driving call is in progress.
pub(crate) struct SessionCore {
    pub(crate) config: SessionConfig,
    pub(crate) client: ClientConfig,
    pub(crate) ui: Rc<dyn SessionUi>,
    pub(crate) store: Box<dyn HostKeyStore>,

    // Lifecycle flags.
    pub(crate) active: bool,
    pub(crate) opened: bool,
    pub(crate) authenticating: bool,
    pub(crate) authenticated: bool,

    // Sockets registered by the engine.
    pub(crate) primary_socket: Option<SocketId>,
    pub(crate) port_forward_sockets: Vec<SocketId>,

    // Receive side.
    pub(crate) receive: ReceiveState,
    stderr_raw: String,
    stderr_fragment: String,
    console_fragment: String,

    // Authentication bookkeeping.
    pub(crate) credential_usage: CredentialUsage,
    pub(crate) authentication_log: String,
    pub(crate) user_name: Option<String>,

    // Session-info snapshot.
    pub(crate) info: SessionInfo,
    pub(crate) info_valid: bool,
    pub(crate) ssh_version: u32,
    pub(crate) implementation: SshImplementation,
    pub(crate) last_tunnel_error: Option<String>,

    // Statistics and prompt nesting.
    pub(crate) last_data_sent: Option<Instant>,
    pub(crate) waiting: u32,

    on_capture_output: Option<CaptureOutput>,
}

impl SessionCore {
    fn new(
        config: SessionConfig,
        client: ClientConfig,
        ui: Rc<dyn SessionUi>,
        store: Box<dyn HostKeyStore>,
    ) -> Self {
        Self {
            config,
            client,
            ui,
            store,
            active: false,
            opened: false,
            authenticating: false,
            authenticated: false,
            primary_socket: None,
            port_forward_sockets: Vec::new(),
            receive: ReceiveState::default(),
            stderr_raw: String::new(),
            stderr_fragment: String::new(),
            console_fragment: String::new(),
            credential_usage: CredentialUsage::default(),
            authentication_log: String::new(),
            user_name: None,
            info: SessionInfo::default(),
            info_valid: false,
            ssh_version: 0,
            implementation: SshImplementation::Unknown,
            last_tunnel_error: None,
            last_data_sent: None,
            waiting: 0,
            on_capture_output: None,
        }
    }

    pub(crate) fn reset_session_info(&mut self) {
        self.info_valid = false;
    }

    pub(crate) fn capture_output(&mut self, kind: OutputKind, line: &str) {
        debug!(?kind, "{line}");
        if let Some(callback) = &mut self.on_capture_output {
            callback(line, kind);
        }
    }

    fn got_host_key(&mut self) {
        // Rekeying may verify the host key again mid-session; only the first
        // verification marks the authentication phase.
        if !self.authenticating && !self.authenticated {
            self.authenticating = true;
            self.ui.information("Authenticating...", true);
        }
    }

    fn append_authentication_log(&mut self, line: &str) {
        if !self.authentication_log.is_empty() {
            self.authentication_log.push('\n');
        }
        self.authentication_log.push_str(line);
    }

    fn add_std_error(&mut self, data: &str) {
        self.stderr_raw.push_str(data);

        let stripped: String = data.chars().filter(|c| *c != '\r').collect();
        self.stderr_fragment.push_str(&stripped);
        while let Some(newline) = self.stderr_fragment.find('\n') {
            let line: String = self.stderr_fragment.drain(..=newline).collect();
            self.add_std_error_line(line.trim_end_matches('\n'));
        }
    }

    fn add_std_error_line(&mut self, line: &str) {
        if self.authenticating {
            self.append_authentication_log(line);
        }
        if !line.trim().is_empty() {
            self.capture_output(OutputKind::StdError, line);
        }
    }

    pub(crate) fn clear_std_error(&mut self) {
        // Flush an unterminated fragment so nothing is silently dropped.
        if !self.stderr_fragment.is_empty() {
            let fragment = std::mem::take(&mut self.stderr_fragment);
            if self.authenticating {
                self.append_authentication_log(&fragment);
            }
            self.capture_output(OutputKind::StdError, &fragment);
        }
        self.stderr_raw.clear();
    }

    pub(crate) fn discard(&mut self) {
        let was_active = self.active;
        self.active = false;
        self.opened = false;
        if was_active {
            self.ui.closed();
        }
    }
}

impl EngineCallbacks for SessionCore {
    fn from_backend(&mut self, is_stderr: bool, data: &[u8]) -> Result<()> {
        if !self.active {
            return Err(TransportError::NotConnected { exit_code: None });
        }
        if self.client.log_protocol >= 1 {
            debug!(bytes = data.len(), is_stderr, "Received bytes");
        }

        if is_stderr {
            // Anything on stderr may mean negotiated parameters changed.
            self.reset_session_info();
            self.add_std_error(&String::from_utf8_lossy(data));
            Ok(())
        } else {
            self.receive.push(data)
        }
    }

    fn console_write(&mut self, data: &[u8]) {
        self.reset_session_info();

        let text = String::from_utf8_lossy(data);
        let stripped: String = text.chars().filter(|c| *c != '\r').collect();
        self.console_fragment.push_str(&stripped);

        while let Some(newline) = self.console_fragment.find('\n') {
            let line: String = self.console_fragment.drain(..=newline).collect();
            let line = line.trim_end_matches('\n').to_string();
            self.capture_output(OutputKind::StdError, &line);
            if self.authenticating {
                self.append_authentication_log(&line);
            }
            self.ui.information(&line, false);
        }
    }

    fn log_event(&mut self, line: &str) {
        if let Some(version) = line.strip_prefix(SERVER_VERSION_PREFIX) {
            self.info.server_version_string = version.to_string();
            self.info.server_implementation =
                parse_server_implementation(version).to_string();
        } else if let Some(detail) = line.strip_prefix(FORWARDING_FAILURE_PREFIX) {
            self.last_tunnel_error = Some(normalize_tunnel_failure(detail));
        }
        debug!("{line}");
    }

    fn verify_host_key(
        &mut self,
        host: &str,
        port: u16,
        key_type: &str,
        key_str: &str,
        fingerprint: &str,
    ) -> Result<()> {
        debug!(
            key_type,
            key = %format_key_str(key_str),
            fingerprint,
            "Verifying host key"
        );
        self.got_host_key();
        self.info.host_key_fingerprint = fingerprint.to_string();

        verify_host_key(
            &self.config,
            &self.client,
            self.store.as_ref(),
            self.ui.as_ref(),
            host,
            port,
            key_type,
            key_str,
            fingerprint,
        )
    }

    fn prompt_user(
        &mut self,
        name: &str,
        instructions: &str,
        instructions_required: bool,
        prompts: &[Prompt],
    ) -> Result<Option<Vec<String>>> {
        // There can be zero prompts.
        let kind = classify_prompt(name);
        debug!(
            kind = kind.describe(),
            name,
            prompts = prompts.len(),
            "Prompt"
        );

        let instructions = normalize_instructions(instructions);
        let prompts: Vec<Prompt> = prompts
            .iter()
            .map(|p| Prompt::new(p.caption.trim(), p.echo))
            .collect();

        if let Some((answers, credential)) = try_auto_answer(
            kind,
            &self.config,
            &mut self.credential_usage,
            &instructions,
            instructions_required,
            &prompts,
        ) {
            match credential {
                StoredCredential::Password | StoredCredential::KeyboardInteractivePassword => {
                    debug!("Using stored password");
                    self.ui
                        .information("Authenticating with pre-entered password.", false);
                }
                StoredCredential::Passphrase => debug!("Using configured passphrase"),
                StoredCredential::EmptyKeyboardInteractive => {
                    debug!("Ignoring empty SSH server authentication request");
                }
                StoredCredential::GssapiUserName => {}
            }
            return Ok(Some(answers));
        }

        let results = self
            .ui
            .prompt_user(kind, name.trim(), &instructions, &prompts);

        if let Some(results) = &results {
            if prompts.first().is_some_and(|p| p.echo) {
                if let Some(first) = results.first() {
                    debug!(response = %first, "Response");
                }
            }
            if kind == crate::auth::PromptKind::UserName && prompts.len() == 1 {
                self.user_name = results.first().cloned();
            }
        }

        Ok(results)
    }

    fn ask_algorithm(&mut self, alg_type: &str, alg_name: &str) -> Result<()> {
        if self.ui.confirm_algorithm(alg_type, alg_name) {
            Ok(())
        } else {
            Err(TransportError::UserTerminated)
        }
    }

    fn display_banner(&mut self, banner: &str) {
        self.ui.display_banner(banner);
    }

    fn update_socket(&mut self, socket: Option<SocketId>, startup: bool) {
        if !self.active && !startup {
            // The engine tears down sockets it failed to open; nothing of
            // ours to undo.
            return;
        }
        if startup {
            debug_assert!(
                socket.is_some() || self.config.proxy.method == crate::config::ProxyMethod::LocalCommand
            );
            self.primary_socket = socket;
            self.active = true;
        } else {
            self.primary_socket = None;
            self.discard();
        }
    }

    fn update_port_forward_socket(&mut self, socket: SocketId, startup: bool) {
        if self.client.log_protocol >= 2 {
            debug!(?socket, startup, "Updating forwarding socket");
        }
        if startup {
            self.port_forward_sockets.push(socket);
        } else {
            self.port_forward_sockets.retain(|s| *s != socket);
        }
    }
}

/// An SSH session over a black-box engine.
pub struct SecureSession<E: Engine> {
    pub(crate) engine: E,
    pub(crate) core: SessionCore,
    pub(crate) on_receive: Option<ReceiveHandler<E>>,
    /// Engine throughput mode is only legal for plain transfer sessions.
    simple: bool,
}

impl<E: Engine> SecureSession<E> {
    #[must_use]
    pub fn new(
        engine: E,
        config: SessionConfig,
        client: ClientConfig,
        ui: Rc<dyn SessionUi>,
        store: Box<dyn HostKeyStore>,
    ) -> Self {
        let simple = config.tunnel_port_forwards.is_empty();
        Self {
            engine,
            core: SessionCore::new(config, client, ui, store),
            on_receive: None,
            simple,
        }
    }

    /// Opt out of the engine's throughput mode (tunnel and shell sessions).
    pub fn set_simple(&mut self, simple: bool) {
        self.simple = simple;
    }

    /// Establish the connection: engine init, host-key verification,
    /// authentication. Blocks until opened, failed, or aborted by the user.
    pub fn open(&mut self) -> Result<()> {
        self.reset_connection();
        self.core.authenticating = false;
        self.core.authenticated = false;
        self.core.ui.information("Searching for host...", true);

        if let Err(error) = self.open_connection() {
            if error.is_no_connection_response()
                && probe::suggest_ftp(&self.core.config, &self.core.client)
            {
                return Err(TransportError::FtpSuggested {
                    source: Box::new(error),
                });
            }
            return Err(error);
        }

        self.core.last_data_sent = Some(Instant::now());
        self.core.info.login_time = Some(SystemTime::now());

        self.core.authenticating = false;
        self.core.authenticated = true;
        self.core.ui.information("Authenticated.", true);

        self.core.reset_session_info();
        self.core.opened = true;

        self.core.implementation = detect_implementation(&self.core.info.server_implementation);
        Ok(())
    }

    fn open_connection(&mut self) -> Result<()> {
        let options = build_engine_options(&self.core.config, &self.core.client, self.simple)?;

        let init_result = {
            let Self { engine, core, .. } = self;
            engine.init(&options, core)
        };
        match init_result {
            Ok(real_host) => debug!(real_host = %real_host, "Backend initialized"),
            Err(diagnostic) => {
                return Err(map_init_error(&diagnostic, &self.core.config.hostname));
            }
        }

        self.core.ui.information("Connecting to host...", true);
        self.init_session()?;
        self.check_connection(Some("Connection failed"))?;
        Ok(())
    }

    /// Pump the event loop until the engine reaches the session phase.
    fn init_session(&mut self) -> Result<()> {
        let result = (|| -> Result<()> {
            while !self.engine.session_started() {
                if self.core.client.log_protocol >= 1 {
                    debug!("Waiting for the server to continue with the initialization");
                }
                self.wait_for_data()?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => Ok(()),
            // Host-key verdicts keep their identity; everything else failing
            // during the authentication phase is an authentication failure
            // and carries the transcript.
            Err(
                error @ (TransportError::HostKeyMismatch { .. }
                | TransportError::HostKeyRejected { .. }),
            ) => Err(error),
            Err(error) if self.core.authenticating => Err(TransportError::AuthenticationFailed {
                message: error.to_string(),
                log: self.core.authentication_log.clone(),
            }),
            Err(error) => Err(error),
        }
    }

    /// Close the connection: EOF to the peer (best effort), engine released,
    /// UI notified. Subsequent `send`/`receive` fail with `NotConnected`.
    pub fn close(&mut self) {
        debug!("Closing connection");
        if !self.core.active {
            return;
        }
        // Particularly necessary for local-proxy sessions, which hang on
        // teardown without an explicit EOF.
        let _ = self.send_eof();
        self.engine.free();
        self.core.discard();
    }

    fn reset_connection(&mut self) {
        self.engine.free();
        self.core.clear_std_error();
        self.core.receive.reset();
        self.core.console_fragment.clear();
        self.core.reset_session_info();
        self.core.authenticating = false;
        self.core.authenticated = false;
        self.core.authentication_log.clear();
        self.core.credential_usage = CredentialUsage::default();
        self.core.last_tunnel_error = None;
    }

    // ============== State accessors ==============

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.core.active
    }

    #[must_use]
    pub fn is_opened(&self) -> bool {
        self.core.opened
    }

    /// Opened and not currently stuck behind a timeout prompt.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.core.opened && self.core.waiting == 0
    }

    #[must_use]
    pub fn user_name(&self) -> Option<&str> {
        self.core.user_name.as_deref()
    }

    /// Raw accumulated peer stderr.
    #[must_use]
    pub fn std_error(&self) -> &str {
        &self.core.stderr_raw
    }

    #[must_use]
    pub fn authentication_log(&self) -> &str {
        &self.core.authentication_log
    }

    #[must_use]
    pub fn stored_credentials_tried(&self) -> bool {
        self.core.credential_usage.any_tried()
    }

    /// Timestamp of the last outgoing data, for external keepalive
    /// scheduling.
    #[must_use]
    pub fn last_data_sent(&self) -> Option<Instant> {
        self.core.last_data_sent
    }

    #[must_use]
    pub fn last_tunnel_error(&self) -> Option<&str> {
        self.core.last_tunnel_error.as_deref()
    }

    /// Typed error for the most recently refused forwarded connection, for
    /// tunnel-layer diagnostics.
    #[must_use]
    pub fn forwarding_refused(&self) -> Option<TransportError> {
        self.core
            .last_tunnel_error
            .as_ref()
            .map(|reason| TransportError::ForwardingRefused {
                reason: reason.clone(),
            })
    }

    #[must_use]
    pub fn ssh_implementation(&self) -> SshImplementation {
        self.core.implementation
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.engine.exit_code()
    }

    #[must_use]
    pub fn used_fallback_command(&self) -> bool {
        self.engine.used_fallback_command()
    }

    /// Negotiated session parameters, refreshed lazily from the engine.
    pub fn session_info(&mut self) -> &SessionInfo {
        if !self.core.info_valid {
            let version = self.engine.protocol_version();
            self.core.ssh_version = version;
            self.core.info.protocol_name = format!("SSH-{version}");
            self.core.info.cs_cipher = self.engine.cipher_client_to_server();
            self.core.info.sc_cipher = self.engine.cipher_server_to_client();
            self.core.info.cs_compression = self.engine.compression_client_to_server();
            self.core.info.sc_compression = self.engine.compression_server_to_client();
            self.core.info_valid = true;
        }
        &self.core.info
    }

    pub fn ssh_version(&mut self) -> u32 {
        self.session_info();
        self.core.ssh_version
    }

    /// Smallest packet size the peer published; `None` until the engine
    /// learns it.
    pub fn min_packet_size(&mut self) -> Option<u32> {
        self.session_info();
        self.engine.min_packet_size()
    }

    /// Largest packet size the peer published; `None` until the engine
    /// learns it.
    pub fn max_packet_size(&mut self) -> Option<u32> {
        self.session_info();
        self.engine.max_packet_size()
    }

    /// Capture every logged output line (session log mirroring).
    pub fn set_capture_output(&mut self, callback: CaptureOutput) {
        self.core.on_capture_output = Some(callback);
    }

    pub fn clear_capture_output(&mut self) {
        self.core.on_capture_output = None;
    }
}

impl<E: Engine> Drop for SecureSession<E> {
    fn drop(&mut self) {
        debug_assert!(self.core.waiting == 0);
        if self.core.active {
            self.close();
        }
    }
}
