//! Translation of engine diagnostic strings into the typed error taxonomy.
//!
//! The engine reports failures as English text. A closed table maps the known
//! messages to [`NetworkErrorKind`] entries; the `%HOST%` placeholder in the
//! mapped message is substituted with the expanded hostname. Unknown
//! diagnostics stay verbatim.

use crate::error::{NetworkErrorKind, TransportError};

/// Log-line prefix carrying the server version string.
pub const SERVER_VERSION_PREFIX: &str = "Server version: ";

/// Log-line prefix reporting a refused forwarded connection.
pub const FORWARDING_FAILURE_PREFIX: &str = "Forwarded connection refused by server: ";

struct ErrorTranslation {
    /// Engine message, `%` matching an arbitrary middle part.
    pattern: &'static str,
    kind: NetworkErrorKind,
    message: &'static str,
}

const ERROR_TRANSLATIONS: &[ErrorTranslation] = &[
    ErrorTranslation {
        pattern: "Server unexpectedly closed network connection",
        kind: NetworkErrorKind::UnexpectedClose,
        message: "Server unexpectedly closed network connection",
    },
    ErrorTranslation {
        pattern: "Network error: Connection refused",
        kind: NetworkErrorKind::Refused,
        message: "Connection to %HOST% was refused by the server",
    },
    ErrorTranslation {
        pattern: "Network error: Connection reset by peer",
        kind: NetworkErrorKind::Reset,
        message: "Connection to %HOST% was reset by the peer",
    },
    ErrorTranslation {
        pattern: "Network error: Connection timed out",
        kind: NetworkErrorKind::Timeout,
        message: "Connection to %HOST% timed out",
    },
    ErrorTranslation {
        pattern: "Network error: No route to host",
        kind: NetworkErrorKind::NoRoute,
        message: "No route to host %HOST%",
    },
    ErrorTranslation {
        pattern: "Network error: Software caused connection abort",
        kind: NetworkErrorKind::Aborted,
        message: "Connection to %HOST% was aborted by local networking software",
    },
    ErrorTranslation {
        pattern: "Host does not exist",
        kind: NetworkErrorKind::HostNotFound,
        message: "Host %HOST% does not exist",
    },
    ErrorTranslation {
        pattern: "Incoming packet was garbled on decryption",
        kind: NetworkErrorKind::Garbled,
        message: "An incoming packet was garbled on decryption",
    },
];

/// Match `message` against `template`, where a single `%` matches any middle
/// part. Returns the captured part (right-trimmed) on a wildcard match, or an
/// empty capture on an exact match.
#[must_use]
pub fn match_template(template: &str, message: &str) -> Option<String> {
    match template.split_once('%') {
        None => (message == template).then(String::new),
        Some((prefix, suffix)) => {
            if message.len() + 1 >= template.len()
                && message.starts_with(prefix)
                && message.ends_with(suffix)
            {
                let middle = &message[prefix.len()..message.len() - suffix.len()];
                Some(middle.trim_end().to_string())
            } else {
                None
            }
        }
    }
}

/// Translate an engine diagnostic into a typed network error. Returns `None`
/// for diagnostics outside the closed table.
#[must_use]
pub fn translate_network_error(diagnostic: &str, host: &str) -> Option<TransportError> {
    for entry in ERROR_TRANSLATIONS {
        if match_template(entry.pattern, diagnostic).is_some() {
            return Some(TransportError::Network {
                kind: entry.kind,
                message: entry.message.replace("%HOST%", host),
            });
        }
    }
    None
}

/// Map an engine `init` failure to the taxonomy: a known network diagnostic
/// becomes [`TransportError::Network`], anything else
/// [`TransportError::InitializationFailed`].
#[must_use]
pub fn map_init_error(diagnostic: &str, host: &str) -> TransportError {
    translate_network_error(diagnostic, host).unwrap_or_else(|| {
        TransportError::InitializationFailed {
            reason: diagnostic.to_string(),
        }
    })
}

/// Normalize the detail of a refused forwarded connection.
#[must_use]
pub fn normalize_tunnel_failure(detail: &str) -> String {
    if let Some(reason) = match_template("Administratively prohibited [%]", detail) {
        return format!("administratively prohibited ({reason})");
    }
    if let Some(reason) = match_template("Connect failed [%]", detail) {
        return format!("connect failed ({reason})");
    }
    detail.to_string()
}
