use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// File-system protocol driven over the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FsProtocol {
    /// SCP over a shell channel only.
    #[serde(rename = "scp")]
    ScpOnly,
    /// SFTP with SCP fallback on a second channel (default).
    #[default]
    Sftp,
    /// SFTP only; no shell fallback.
    #[serde(rename = "sftp-only")]
    SftpOnly,
}

/// Cipher preference entry. The configured list is an ordered preference and
/// must mention every variant exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cipher {
    Warn,
    #[serde(rename = "3des")]
    TripleDes,
    Blowfish,
    Aes,
    Des,
    Arcfour,
}

impl Cipher {
    pub const ALL: [Self; 6] = [
        Self::Warn,
        Self::TripleDes,
        Self::Blowfish,
        Self::Aes,
        Self::Des,
        Self::Arcfour,
    ];

    fn default_order() -> Vec<Self> {
        vec![
            Self::Aes,
            Self::Blowfish,
            Self::TripleDes,
            Self::Warn,
            Self::Arcfour,
            Self::Des,
        ]
    }
}

/// Key-exchange preference entry; same ordered-and-complete contract as
/// [`Cipher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KexAlgorithm {
    Warn,
    DhGroup1,
    DhGroup14,
    DhGroupExchange,
    Rsa,
}

impl KexAlgorithm {
    pub const ALL: [Self; 5] = [
        Self::Warn,
        Self::DhGroup1,
        Self::DhGroup14,
        Self::DhGroupExchange,
        Self::Rsa,
    ];

    fn default_order() -> Vec<Self> {
        vec![
            Self::DhGroupExchange,
            Self::DhGroup14,
            Self::DhGroup1,
            Self::Rsa,
            Self::Warn,
        ]
    }
}

/// SSH protocol version policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SshProtocol {
    #[serde(rename = "1-only")]
    V1Only,
    #[serde(rename = "1")]
    V1,
    #[serde(rename = "2")]
    #[default]
    V2,
    #[serde(rename = "2-only")]
    V2Only,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[default]
    Any,
    Ipv4,
    Ipv6,
}

/// Three-state engine toggle: let the engine decide, or force a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoFlag {
    #[default]
    Auto,
    Off,
    On,
}

/// Server-bug workaround switches, one per known server quirk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SshBugs {
    pub ignore1: AutoFlag,
    pub plain_pw1: AutoFlag,
    pub rsa1: AutoFlag,
    pub hmac2: AutoFlag,
    pub derive_key2: AutoFlag,
    pub rsa_pad2: AutoFlag,
    pub rekey2: AutoFlag,
    pub pk_sess_id2: AutoFlag,
    pub max_pkt2: AutoFlag,
    pub ignore2: AutoFlag,
    pub winadj: AutoFlag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMethod {
    #[default]
    None,
    Socks4,
    Socks5,
    Http,
    Telnet,
    /// Engine talks through a spawned local command over pipes; the primary
    /// socket stays invalid for such sessions.
    #[serde(rename = "local-command")]
    LocalCommand,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub method: ProxyMethod,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<Zeroizing<String>>,
    /// Telnet-style proxy command template.
    pub telnet_command: String,
    /// Local command to spawn when `method` is `local-command`.
    pub local_command: String,
    pub dns: AutoFlag,
    pub consider_localhost: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            method: ProxyMethod::None,
            host: String::new(),
            port: 80,
            username: String::new(),
            password: None,
            telnet_command: String::new(),
            local_command: String::new(),
            dns: AutoFlag::Auto,
            consider_localhost: false,
        }
    }
}

/// Pre-tunnel endpoint, used for trust lookups when the connection is
/// redirected through a local tunnel listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TunnelOrigin {
    pub hostname: String,
    pub port: u16,
}

/// Per-session data: everything the backend adapter and the orchestrator need
/// to establish one connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    pub hostname: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    /// Stored password; offered at most once per session.
    #[serde(default)]
    pub password: Option<Zeroizing<String>>,

    /// Stored key passphrase; offered at most once per session.
    #[serde(default)]
    pub passphrase: Option<Zeroizing<String>>,

    #[serde(default)]
    pub fs_protocol: FsProtocol,

    /// Explicit remote shell; empty means the server default shell.
    #[serde(default)]
    pub shell: String,

    /// Explicit SFTP server command; empty means the `sftp` subsystem.
    #[serde(default)]
    pub sftp_server: String,

    /// Ordered cipher preferences; must mention each cipher exactly once.
    #[serde(default = "Cipher::default_order")]
    pub ciphers: Vec<Cipher>,

    /// Ordered KEX preferences; must mention each algorithm exactly once.
    #[serde(default = "KexAlgorithm::default_order")]
    pub kex: Vec<KexAlgorithm>,

    #[serde(default)]
    pub compression: bool,

    #[serde(default = "default_true")]
    pub try_agent: bool,

    #[serde(default)]
    pub agent_forwarding: bool,

    #[serde(default)]
    pub address_family: AddressFamily,

    #[serde(default = "default_rekey_data")]
    pub rekey_data: String,

    #[serde(default = "default_rekey_time")]
    pub rekey_time_minutes: u32,

    /// Private key file path; `~` is expanded. Empty falls back to
    /// [`ClientConfig::default_key_file`].
    #[serde(default)]
    pub private_key_file: String,

    #[serde(default)]
    pub ssh_protocol: SshProtocol,

    #[serde(default)]
    pub ssh2_des_cbc: bool,

    #[serde(default)]
    pub no_user_auth: bool,

    #[serde(default)]
    pub auth_tis: bool,

    #[serde(default = "default_true")]
    pub auth_keyboard_interactive: bool,

    /// Allow answering a single non-echo keyboard-interactive prompt with the
    /// stored password.
    #[serde(default = "default_true")]
    pub auth_ki_password: bool,

    #[serde(default)]
    pub auth_gssapi: bool,

    #[serde(default)]
    pub gssapi_forward_tgt: bool,

    #[serde(default)]
    pub change_username: bool,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub bugs: SshBugs,

    /// Tunnel port-forward rules, `key\tvalue` pairs separated by commas.
    /// Non-empty turns this session into a tunnel hop (no shell, no subsystem).
    #[serde(default)]
    pub tunnel_port_forwards: String,

    /// This session is carried over a local tunnel listener; trust lookups use
    /// the pre-tunnel endpoint.
    #[serde(default)]
    pub tunnel_origin: Option<TunnelOrigin>,

    /// Request the engine's throughput-optimized mode for plain transfer
    /// sessions.
    #[serde(default = "default_true")]
    pub ssh_simple: bool,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_send_buffer")]
    pub send_buffer: u32,

    /// Pinned host keys: `;`-separated fingerprints, or `*` to accept any key
    /// with a notice.
    #[serde(default)]
    pub host_key: String,

    /// Consult pinned keys even when a cached key exists.
    #[serde(default)]
    pub override_cached_host_key: bool,
}

impl SessionConfig {
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: default_ssh_port(),
            username: String::new(),
            password: None,
            passphrase: None,
            fs_protocol: FsProtocol::default(),
            shell: String::new(),
            sftp_server: String::new(),
            ciphers: Cipher::default_order(),
            kex: KexAlgorithm::default_order(),
            compression: false,
            try_agent: true,
            agent_forwarding: false,
            address_family: AddressFamily::default(),
            rekey_data: default_rekey_data(),
            rekey_time_minutes: default_rekey_time(),
            private_key_file: String::new(),
            ssh_protocol: SshProtocol::default(),
            ssh2_des_cbc: false,
            no_user_auth: false,
            auth_tis: false,
            auth_keyboard_interactive: true,
            auth_ki_password: true,
            auth_gssapi: false,
            gssapi_forward_tgt: false,
            change_username: false,
            proxy: ProxyConfig::default(),
            bugs: SshBugs::default(),
            tunnel_port_forwards: String::new(),
            tunnel_origin: None,
            ssh_simple: true,
            timeout_seconds: default_timeout_seconds(),
            send_buffer: default_send_buffer(),
            host_key: String::new(),
            override_cached_host_key: false,
        }
    }

    /// Session timeout governing `wait_for_data` and send-buffer dispatch.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Trust-lookup endpoint: pre-tunnel origin when tunneling, otherwise the
    /// configured endpoint.
    #[must_use]
    pub fn trust_endpoint(&self) -> (&str, u16) {
        match &self.tunnel_origin {
            Some(origin) => (&origin.hostname, origin.port),
            None => (&self.hostname, self.port),
        }
    }
}

/// Application-level settings that outlive any one session.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Knock the FTP port when an SSH connect fails in a recognizable way and
    /// suggest switching protocols.
    pub try_ftp_when_ssh_fails: bool,

    /// Never offer to accept unknown or changed host keys.
    pub disable_accepting_host_keys: bool,

    /// Auto-abort a timeout prompt after this many seconds; 0 disables.
    pub session_reopen_auto_stall_seconds: u64,

    /// Key file used when the session does not configure one.
    pub default_key_file: String,

    /// Protocol log verbosity: 0 quiet, 1 normal, 2 chatty.
    pub log_protocol: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            try_ftp_when_ssh_fails: true,
            disable_accepting_host_keys: false,
            session_reopen_auto_stall_seconds: 0,
            default_key_file: String::new(),
            log_protocol: 0,
        }
    }
}

impl ClientConfig {
    /// Auto-abort deadline for timeout prompts, when configured.
    #[must_use]
    pub fn auto_stall(&self) -> Option<Duration> {
        (self.session_reopen_auto_stall_seconds > 0)
            .then(|| Duration::from_secs(self.session_reopen_auto_stall_seconds))
    }
}

const fn default_ssh_port() -> u16 {
    22
}

const fn default_true() -> bool {
    true
}

fn default_rekey_data() -> String {
    "1G".to_string()
}

const fn default_rekey_time() -> u32 {
    60
}

const fn default_timeout_seconds() -> u64 {
    15
}

const fn default_send_buffer() -> u32 {
    262_144
}
