//! Host-key trust decisions.
//!
//! A key is accepted when it matches a cached key, matches a configured
//! pinned key, the configuration pins `*`, or the user accepts it. Cached
//! entries are `;`-separated and hold either raw key blobs (`0x` prefix) or
//! printable fingerprints; fingerprints compare byte-exact after
//! normalization.

use tracing::{debug, warn};

use crate::config::{ClientConfig, SessionConfig};
use crate::error::{Result, TransportError};
use crate::ui::{HostKeyDecision, HostKeyPrompt, SessionUi};

/// Persistent host-key trust store, keyed by `(host, port, key_type)`.
/// Values are `;`-separated concatenations of key blobs and/or fingerprints.
pub trait HostKeyStore {
    /// Cached keys for an endpoint; `None` when nothing is cached or the
    /// store cannot be read.
    fn retrieve(&self, host: &str, port: u16, key_type: &str) -> Option<String>;

    /// Persist the key list for an endpoint, replacing any previous value.
    fn store(&self, host: &str, port: u16, key_type: &str, keys: &str) -> Result<()>;
}

/// Normalize a printable fingerprint: lowercase, separators stripped.
/// Idempotent; equality after normalization is byte-exact.
#[must_use]
pub fn normalize_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Group long hex runs into 16-digit blocks for log readability.
#[must_use]
pub fn format_key_str(key_str: &str) -> String {
    let mut result = String::with_capacity(key_str.len() + key_str.len() / 16);
    let mut digits = 0;
    for c in key_str.chars() {
        result.push(c);
        if c.is_ascii_hexdigit() {
            digits += 1;
            if digits >= 16 {
                result.push(' ');
                digits = 0;
            }
        } else {
            digits = 0;
        }
    }
    result
}

fn matches_cached(stored: &str, key_str: &str, normalized_fingerprint: &str) -> bool {
    if stored.starts_with("0x") {
        // A raw key blob, compared verbatim.
        stored == key_str
    } else {
        // A fingerprint cached by a configuration import.
        normalize_fingerprint(stored) == normalized_fingerprint
    }
}

/// Decide whether to trust `key_str`/`fingerprint` for the session's trust
/// endpoint, consulting the cache, the configured pinned keys, and finally
/// the user. Persists the key on an accept-and-store decision.
#[allow(clippy::too_many_arguments)]
pub fn verify_host_key(
    config: &SessionConfig,
    client: &ClientConfig,
    store: &dyn HostKeyStore,
    ui: &dyn SessionUi,
    host: &str,
    port: u16,
    key_type: &str,
    key_str: &str,
    fingerprint: &str,
) -> Result<()> {
    debug_assert!(!key_str.contains(';'), "key blobs must not contain the list delimiter");

    // Trust lookups for tunneled sessions use the pre-tunnel endpoint.
    let (host, port) = match &config.tunnel_origin {
        Some(origin) => (origin.hostname.as_str(), origin.port),
        None => (host, port),
    };

    let normalized = normalize_fingerprint(fingerprint);
    let stored_keys = store.retrieve(host, port, key_type).unwrap_or_default();
    let has_cache = !stored_keys.is_empty();

    let mut matched = false;
    for stored in stored_keys.split(';').filter(|s| !s.is_empty()) {
        if matches_cached(stored, key_str, &normalized) {
            debug!(host, port, key_type, "Host key matches cached key");
            matched = true;
            break;
        }
        debug!(
            host,
            cached = %format_key_str(stored),
            "Host key does not match cached key"
        );
    }

    let mut configured_mismatch = false;
    if !matched && !config.host_key.is_empty() && (!has_cache || config.override_cached_host_key) {
        for expected in config.host_key.split(';').filter(|s| !s.is_empty()) {
            if expected == "*" {
                let message = "Any host key is accepted per session configuration";
                warn!(host, "{message}");
                ui.information(message, true);
                matched = true;
                break;
            }
            if normalize_fingerprint(expected) == normalized {
                debug!(host, "Host key matches configured key");
                matched = true;
                break;
            }
            debug!(host, expected, "Host key does not match configured key");
        }
        configured_mismatch = !matched;
    }

    if matched {
        return Ok(());
    }

    if configured_mismatch || client.disable_accepting_host_keys {
        let message = if configured_mismatch {
            format!(
                "the server's key did not match any configured key ({})",
                config.host_key
            )
        } else {
            "the server's key was not verified".to_string()
        };
        return Err(TransportError::HostKeyMismatch {
            message,
            fingerprint: fingerprint.to_string(),
        });
    }

    let prompt = HostKeyPrompt {
        unknown: !has_cache,
        host,
        port,
        key_type,
        fingerprint,
    };
    match ui.confirm_host_key(&prompt) {
        HostKeyDecision::AcceptAndStore | HostKeyDecision::ReplaceStored => {
            store.store(host, port, key_type, key_str)?;
            Ok(())
        }
        HostKeyDecision::AddStored => {
            let combined = if has_cache {
                format!("{stored_keys};{key_str}")
            } else {
                key_str.to_string()
            };
            store.store(host, port, key_type, &combined)?;
            Ok(())
        }
        HostKeyDecision::AcceptOnce => Ok(()),
        HostKeyDecision::Reject => Err(TransportError::HostKeyRejected {
            fingerprint: fingerprint.to_string(),
        }),
    }
}
