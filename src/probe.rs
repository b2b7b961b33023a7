//! FTP fallback probe.
//!
//! When an SSH connect fails without any response from the server, a quick
//! TCP knock on the FTP port tells whether the machine is actually an FTP
//! server, so the fatal error can suggest switching protocols.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::config::{ClientConfig, FsProtocol, ProxyMethod, SessionConfig};

/// Well-known SSH port; the probe only fires for sessions targeting it.
pub const SSH_PORT: u16 = 22;

/// Well-known FTP control port.
pub const FTP_PORT: u16 = 21;

/// How long the knock waits for the TCP handshake.
pub const KNOCK_TIMEOUT: Duration = Duration::from_millis(2000);

/// Try a TCP connect to `(host, port)` within `timeout`. Only the first
/// resolved address is knocked.
#[must_use]
pub fn knock(host: &str, port: u16, timeout: Duration) -> bool {
    let Ok(mut addrs) = (host, port).to_socket_addrs() else {
        return false;
    };
    let Some(addr) = addrs.next() else {
        return false;
    };
    TcpStream::connect_timeout(&addr, timeout).is_ok()
}

/// Whether this session qualifies for the fallback probe at all: an
/// SFTP-family protocol on the standard port, with no tunnel and no proxy.
#[must_use]
pub fn qualifies(config: &SessionConfig, client: &ClientConfig) -> bool {
    client.try_ftp_when_ssh_fails
        && matches!(config.fs_protocol, FsProtocol::Sftp | FsProtocol::SftpOnly)
        && config.port == SSH_PORT
        && config.tunnel_origin.is_none()
        && config.tunnel_port_forwards.is_empty()
        && config.proxy.method == ProxyMethod::None
}

/// Run the probe for a failed connect. True means the fatal error should
/// carry the FTP suggestion.
#[must_use]
pub fn suggest_ftp(config: &SessionConfig, client: &ClientConfig) -> bool {
    if !client.try_ftp_when_ssh_fails {
        return false;
    }
    if !qualifies(config, client) {
        debug!(
            host = %config.hostname,
            "Using non-standard protocol or port, tunnel or proxy, will not knock FTP port"
        );
        return false;
    }

    debug!(host = %config.hostname, "Knocking FTP port");
    let opened = knock(&config.hostname, FTP_PORT, KNOCK_TIMEOUT);
    if opened {
        debug!(host = %config.hostname, "FTP port opened, will suggest using FTP protocol");
    } else {
        debug!(host = %config.hostname, "FTP port did not open");
    }
    opened
}
