//! Translation of session configuration into the engine's option bag.
//!
//! The mapping is exhaustive and deterministic: every option starts from a
//! neutral default and user-configured fields overwrite it. Preference lists
//! keep their index order.

use std::time::Duration;

use zeroize::Zeroizing;

use crate::config::{
    AddressFamily, AutoFlag, Cipher, ClientConfig, FsProtocol, KexAlgorithm, ProxyMethod,
    SessionConfig, SshBugs, SshProtocol,
};
use crate::error::{Result, TransportError};

/// Shell probe script used for SFTP-only sessions with no explicit server
/// command configured.
pub const SFTP_ONLY_PROBE_SCRIPT: &str = "test -x /usr/lib/sftp-server && exec /usr/lib/sftp-server\n\
     test -x /usr/local/lib/sftp-server && exec /usr/local/lib/sftp-server\n\
     exec sftp-server";

/// What to run on one session channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    /// Request a named subsystem.
    Subsystem(String),
    /// Run an explicit remote command.
    Command(String),
    /// Force the server's default shell (an empty remote command the engine
    /// must not ignore).
    DefaultShell,
}

/// The engine's option bag. Field names follow the engine's vocabulary, not
/// the session configuration's.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub host: String,
    pub username: String,
    pub port: u16,

    /// Always zero: keepalives are scheduled by the session core, not the
    /// engine timer.
    pub ping_interval: u32,

    pub compression: bool,
    pub try_agent: bool,
    pub agent_forwarding: bool,
    pub address_family: AddressFamily,
    pub rekey_data: String,
    pub rekey_time_minutes: u32,

    /// Ordered cipher preferences, emitted index-preserving.
    pub cipher_list: Vec<Cipher>,
    /// Ordered KEX preferences, emitted index-preserving.
    pub kex_list: Vec<KexAlgorithm>,

    /// Expanded private key path; empty when none is configured.
    pub key_file: String,

    pub ssh_protocol: SshProtocol,
    pub ssh2_des_cbc: bool,
    pub no_user_auth: bool,
    pub try_tis_auth: bool,
    pub try_ki_auth: bool,
    pub try_gssapi_auth: bool,
    pub gssapi_forward_tgt: bool,
    pub change_username: bool,

    pub proxy_method: ProxyMethod,
    pub proxy_host: String,
    pub proxy_port: u16,
    pub proxy_username: String,
    pub proxy_password: Option<Zeroizing<String>>,
    /// Proxy command template: the local command for `local-command`
    /// proxying, the telnet template otherwise.
    pub proxy_command: String,
    pub proxy_dns: AutoFlag,
    pub proxy_consider_localhost: bool,

    pub bugs: SshBugs,

    /// Parsed tunnel port-forward rules.
    pub port_forwards: Vec<(String, String)>,
    /// Set for tunnel sessions: open no shell or subsystem at all.
    pub no_shell: bool,
    pub ssh_simple: bool,

    pub channel1: Option<ChannelCommand>,
    pub channel2: Option<ChannelCommand>,

    pub connect_timeout: Duration,
    pub send_buffer: u32,

    // Permanent settings.
    pub no_pty: bool,
    pub tcp_keepalives: u32,
    pub show_banner: bool,
}

impl EngineOptions {
    /// Neutral baseline: integer zero, empty string, empty list everywhere.
    fn neutral() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            port: 0,
            ping_interval: 0,
            compression: false,
            try_agent: false,
            agent_forwarding: false,
            address_family: AddressFamily::Any,
            rekey_data: String::new(),
            rekey_time_minutes: 0,
            cipher_list: Vec::new(),
            kex_list: Vec::new(),
            key_file: String::new(),
            ssh_protocol: SshProtocol::V2,
            ssh2_des_cbc: false,
            no_user_auth: false,
            try_tis_auth: false,
            try_ki_auth: false,
            try_gssapi_auth: false,
            gssapi_forward_tgt: false,
            change_username: false,
            proxy_method: ProxyMethod::None,
            proxy_host: String::new(),
            proxy_port: 0,
            proxy_username: String::new(),
            proxy_password: None,
            proxy_command: String::new(),
            proxy_dns: AutoFlag::Auto,
            proxy_consider_localhost: false,
            bugs: SshBugs::default(),
            port_forwards: Vec::new(),
            no_shell: false,
            ssh_simple: false,
            channel1: None,
            channel2: None,
            connect_timeout: Duration::ZERO,
            send_buffer: 0,
            no_pty: true,
            tcp_keepalives: 0,
            show_banner: true,
        }
    }
}

fn config_error(reason: impl Into<String>) -> TransportError {
    TransportError::Configuration {
        reason: reason.into(),
    }
}

/// A preference list must mention every variant of its enum exactly once.
fn validate_preference_list<T: Copy + PartialEq + std::fmt::Debug>(
    list: &[T],
    all: &[T],
    what: &str,
) -> Result<()> {
    if list.len() != all.len() {
        return Err(config_error(format!(
            "{what} preference list must contain exactly {} entries, got {}",
            all.len(),
            list.len()
        )));
    }
    for variant in all {
        if !list.contains(variant) {
            return Err(config_error(format!(
                "{what} preference list is missing {variant:?}"
            )));
        }
    }
    Ok(())
}

fn parse_port_forwards(raw: &str) -> Result<Vec<(String, String)>> {
    let mut rules = Vec::new();
    for rule in raw.split(',').filter(|r| !r.is_empty()) {
        let (key, value) = rule.split_once('\t').ok_or_else(|| {
            config_error(format!("malformed port-forward rule {rule:?}: missing tab"))
        })?;
        rules.push((key.to_string(), value.to_string()));
    }
    Ok(rules)
}

fn shell_command(shell: &str) -> ChannelCommand {
    if shell.is_empty() {
        ChannelCommand::DefaultShell
    } else {
        ChannelCommand::Command(shell.to_string())
    }
}

/// Channel selection for non-tunnel sessions.
fn select_channels(
    session: &SessionConfig,
) -> Result<(Option<ChannelCommand>, Option<ChannelCommand>)> {
    match session.fs_protocol {
        FsProtocol::ScpOnly => {
            if !session.sftp_server.is_empty() {
                return Err(config_error(
                    "an SFTP server command conflicts with the SCP-only protocol",
                ));
            }
            Ok((Some(shell_command(&session.shell)), None))
        }
        FsProtocol::Sftp => {
            let first = if session.sftp_server.is_empty() {
                ChannelCommand::Subsystem("sftp".to_string())
            } else {
                ChannelCommand::Command(session.sftp_server.clone())
            };
            Ok((Some(first), Some(shell_command(&session.shell))))
        }
        FsProtocol::SftpOnly => {
            if session.sftp_server.is_empty() {
                Ok((
                    Some(ChannelCommand::Subsystem("sftp".to_string())),
                    Some(ChannelCommand::Command(SFTP_ONLY_PROBE_SCRIPT.to_string())),
                ))
            } else {
                Ok((
                    Some(ChannelCommand::Command(session.sftp_server.clone())),
                    None,
                ))
            }
        }
    }
}

/// Build the engine option bag for one session.
///
/// `simple` requests the engine's throughput mode and is only legal for plain
/// transfer sessions; tunnel sessions (non-empty port-forward rules) must not
/// set it.
pub fn build_engine_options(
    session: &SessionConfig,
    client: &ClientConfig,
    simple: bool,
) -> Result<EngineOptions> {
    validate_preference_list(&session.ciphers, &Cipher::ALL, "cipher")?;
    validate_preference_list(&session.kex, &KexAlgorithm::ALL, "KEX")?;

    let mut options = EngineOptions::neutral();

    options.host = session.hostname.clone();
    options.username = session.username.clone();
    options.port = session.port;
    options.compression = session.compression;
    options.try_agent = session.try_agent;
    options.agent_forwarding = session.agent_forwarding;
    options.address_family = session.address_family;
    options.rekey_data = session.rekey_data.clone();
    options.rekey_time_minutes = session.rekey_time_minutes;
    options.cipher_list = session.ciphers.clone();
    options.kex_list = session.kex.clone();

    let key_file = if session.private_key_file.is_empty() {
        client.default_key_file.as_str()
    } else {
        session.private_key_file.as_str()
    };
    options.key_file = shellexpand::tilde(key_file).into_owned();

    options.ssh_protocol = session.ssh_protocol;
    options.ssh2_des_cbc = session.ssh2_des_cbc;
    options.no_user_auth = session.no_user_auth;
    options.try_tis_auth = session.auth_tis;
    options.try_ki_auth = session.auth_keyboard_interactive;
    options.try_gssapi_auth = session.auth_gssapi;
    options.gssapi_forward_tgt = session.gssapi_forward_tgt;
    options.change_username = session.change_username;

    options.proxy_method = session.proxy.method;
    options.proxy_host = session.proxy.host.clone();
    options.proxy_port = session.proxy.port;
    options.proxy_username = session.proxy.username.clone();
    options.proxy_password = session.proxy.password.clone();
    options.proxy_command = if session.proxy.method == ProxyMethod::LocalCommand {
        session.proxy.local_command.clone()
    } else {
        session.proxy.telnet_command.clone()
    };
    options.proxy_dns = session.proxy.dns;
    options.proxy_consider_localhost = session.proxy.consider_localhost;

    options.bugs = session.bugs;

    if session.tunnel_port_forwards.is_empty() {
        options.ssh_simple = session.ssh_simple && simple;
        let (channel1, channel2) = select_channels(session)?;
        options.channel1 = channel1;
        options.channel2 = channel2;
    } else {
        if simple {
            return Err(config_error(
                "tunnel port-forward rules conflict with simple transfer mode",
            ));
        }
        options.port_forwards = parse_port_forwards(&session.tunnel_port_forwards)?;
        options.no_shell = true;
    }

    options.connect_timeout = session.timeout();
    options.send_buffer = session.send_buffer;

    Ok(options)
}
