//! Session-information snapshot and server-version parsing.

use std::time::SystemTime;

use serde::Serialize;

/// Server implementation classified from the version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SshImplementation {
    OpenSsh,
    SunSsh,
    /// ProFTPD's `mod_sftp`.
    ProFtpd,
    /// Bitvise SSH Server (`FlowSsh`).
    Bitvise,
    #[default]
    Unknown,
}

/// Snapshot of negotiated session parameters. Invalid until first populated;
/// stderr receipt or reconnect invalidates the engine-derived fields.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionInfo {
    /// Protocol name with version, e.g. `SSH-2`.
    pub protocol_name: String,
    /// Client-to-server cipher.
    pub cs_cipher: String,
    /// Server-to-client cipher.
    pub sc_cipher: String,
    pub cs_compression: bool,
    pub sc_compression: bool,
    /// Raw server version string, e.g. `SSH-2.0-OpenSSH_7.4`.
    pub server_version_string: String,
    /// Implementation part of the version string, e.g. `OpenSSH_7.4`.
    pub server_implementation: String,
    /// Printable fingerprint of the verified host key.
    pub host_key_fingerprint: String,
    pub login_time: Option<SystemTime>,
}

/// Extract the implementation part of a server version string: everything
/// after the second dash of `SSH-<ver>-<implementation>`.
#[must_use]
pub fn parse_server_implementation(version_string: &str) -> &str {
    let Some(first) = version_string.find('-') else {
        return "";
    };
    match version_string[first + 1..].find('-') {
        Some(second) => &version_string[first + 1 + second + 1..],
        None => "",
    }
}

/// Classify the implementation string.
#[must_use]
pub fn detect_implementation(implementation: &str) -> SshImplementation {
    // e.g. "OpenSSH_5.3"
    if implementation.starts_with("OpenSSH") {
        SshImplementation::OpenSsh
    // Sun SSH is an OpenSSH derivative with its own tag
    } else if implementation.starts_with("Sun_SSH") {
        SshImplementation::SunSsh
    // e.g. "mod_sftp/0.9.8"
    } else if implementation.starts_with("mod_sftp") {
        SshImplementation::ProFtpd
    // e.g. "5.25 FlowSsh: Bitvise SSH Server (WinSSHD) 6.07"
    } else if implementation.contains("FlowSsh") {
        SshImplementation::Bitvise
    } else {
        SshImplementation::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openssh_version() {
        assert_eq!(
            parse_server_implementation("SSH-2.0-OpenSSH_7.4"),
            "OpenSSH_7.4"
        );
    }

    #[test]
    fn test_parse_keeps_later_dashes() {
        assert_eq!(
            parse_server_implementation("SSH-2.0-mod_sftp/0.9.8-extra"),
            "mod_sftp/0.9.8-extra"
        );
    }

    #[test]
    fn test_parse_without_second_dash() {
        assert_eq!(parse_server_implementation("SSH2.0 OpenSSH"), "");
        assert_eq!(parse_server_implementation("SSH-2.0"), "");
        assert_eq!(parse_server_implementation(""), "");
    }

    #[test]
    fn test_detect_openssh() {
        assert_eq!(
            detect_implementation("OpenSSH_7.4"),
            SshImplementation::OpenSsh
        );
    }

    #[test]
    fn test_detect_sun_ssh() {
        assert_eq!(
            detect_implementation("Sun_SSH_1.1.5"),
            SshImplementation::SunSsh
        );
    }

    #[test]
    fn test_detect_mod_sftp() {
        assert_eq!(
            detect_implementation("mod_sftp/0.9.8"),
            SshImplementation::ProFtpd
        );
    }

    #[test]
    fn test_detect_bitvise_by_substring() {
        assert_eq!(
            detect_implementation("5.25 FlowSsh: Bitvise SSH Server (WinSSHD) 6.07"),
            SshImplementation::Bitvise
        );
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(
            detect_implementation("libssh_0.11.0"),
            SshImplementation::Unknown
        );
        assert_eq!(detect_implementation(""), SshImplementation::Unknown);
    }

    #[test]
    fn test_session_info_serializes() {
        let info = SessionInfo {
            protocol_name: "SSH-2".to_string(),
            cs_cipher: "aes".to_string(),
            ..SessionInfo::default()
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("SSH-2"));
        assert!(json.contains("aes"));
    }
}
