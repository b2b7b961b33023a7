//! Authentication prompt classification and stored-credential policy.
//!
//! The engine describes credential prompts with English titles; a fixed
//! template table classifies them into [`PromptKind`]. Stored credentials are
//! offered at most once per session, tracked by latch flags that never reset.

use crate::config::SessionConfig;
use crate::diag::match_template;
use crate::engine::Prompt;

/// Classified prompt kinds, in the engine's own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    UserName,
    Passphrase,
    Tis,
    CryptoCard,
    KeyboardInteractive,
    Password,
    NewPassword,
    Unknown,
}

impl PromptKind {
    /// Short tag used in prompt log lines.
    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::UserName => "username",
            Self::Passphrase => "passphrase",
            Self::Tis => "tis",
            Self::CryptoCard => "cryptocard",
            Self::KeyboardInteractive => "keyboard interactive",
            Self::Password => "password",
            Self::NewPassword => "new password",
            Self::Unknown => "unknown",
        }
    }

    /// The keyboard-interactive family shares one stored-credential rule.
    #[must_use]
    pub fn is_interactive_family(self) -> bool {
        matches!(self, Self::Tis | Self::CryptoCard | Self::KeyboardInteractive)
    }
}

// Beware of changing the order: the server-prompt wildcard must be probed
// before the plain server-authentication title.
const NAME_CLASSIFICATION: &[(&str, PromptKind)] = &[
    ("SSH login name", PromptKind::UserName),
    ("SSH key passphrase", PromptKind::Passphrase),
    ("SSH TIS authentication", PromptKind::Tis),
    ("SSH CryptoCard authentication", PromptKind::CryptoCard),
    ("SSH server: %", PromptKind::KeyboardInteractive),
    ("SSH server authentication", PromptKind::KeyboardInteractive),
    ("SSH password", PromptKind::Password),
    ("New SSH password", PromptKind::NewPassword),
];

/// Classify an engine prompt title.
#[must_use]
pub fn classify_prompt(name: &str) -> PromptKind {
    for (template, kind) in NAME_CLASSIFICATION {
        if match_template(template, name).is_some() {
            return *kind;
        }
    }
    PromptKind::Unknown
}

/// Canonicalize instruction line endings (`CRLF`, `LFCR`, `LF`, `CR` all
/// become `CRLF`) and trim surrounding blank padding some servers add.
#[must_use]
pub fn normalize_instructions(instructions: &str) -> String {
    let canonical = instructions
        .replace("\r\n", "\x01")
        .replace("\n\r", "\x01")
        .replace(['\n', '\r'], "\x01")
        .replace('\x01', "\r\n");
    canonical.trim().to_string()
}

/// Which stored credential answered a prompt automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredCredential {
    /// GSSAPI lets the server deduce the user; answer with an empty name.
    GssapiUserName,
    Password,
    /// Stored password injected into a single non-echo interactive prompt.
    KeyboardInteractivePassword,
    /// Informationless zero-prompt request acknowledged without answers.
    EmptyKeyboardInteractive,
    Passphrase,
}

/// Once-per-session latches for stored credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialUsage {
    pub password_tried: bool,
    pub password_tried_for_ki: bool,
    pub passphrase_tried: bool,
}

impl CredentialUsage {
    #[must_use]
    pub fn any_tried(&self) -> bool {
        self.password_tried || self.password_tried_for_ki || self.passphrase_tried
    }
}

/// Apply the stored-credential policy. Latches the relevant usage flag when a
/// credential is consumed; returns `None` when the UI must be consulted.
pub fn try_auto_answer(
    kind: PromptKind,
    config: &SessionConfig,
    usage: &mut CredentialUsage,
    instructions: &str,
    instructions_required: bool,
    prompts: &[Prompt],
) -> Option<(Vec<String>, StoredCredential)> {
    let stored_password = config
        .password
        .as_deref()
        .map(String::as_str)
        .filter(|p| !p.is_empty());

    match kind {
        PromptKind::UserName if config.auth_gssapi => {
            Some((vec![String::new()], StoredCredential::GssapiUserName))
        }
        _ if kind.is_interactive_family() => {
            if config.auth_ki_password
                && !usage.password_tried_for_ki
                && prompts.len() == 1
                && !prompts[0].echo
            {
                if let Some(password) = stored_password {
                    usage.password_tried_for_ki = true;
                    return Some((
                        vec![password.to_string()],
                        StoredCredential::KeyboardInteractivePassword,
                    ));
                }
            }
            if instructions.is_empty() && !instructions_required && prompts.is_empty() {
                return Some((Vec::new(), StoredCredential::EmptyKeyboardInteractive));
            }
            None
        }
        PromptKind::Password if !usage.password_tried => stored_password.map(|password| {
            usage.password_tried = true;
            (vec![password.to_string()], StoredCredential::Password)
        }),
        PromptKind::Passphrase if !usage.passphrase_tried => config
            .passphrase
            .as_deref()
            .map(String::as_str)
            .filter(|p| !p.is_empty())
            .map(|passphrase| {
                usage.passphrase_tried = true;
                (vec![passphrase.to_string()], StoredCredential::Passphrase)
            }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroize::Zeroizing;

    fn config_with_password(password: &str) -> SessionConfig {
        let mut config = SessionConfig::new("h");
        config.password = Some(Zeroizing::new(password.to_string()));
        config
    }

    // ============== Classification ==============

    #[test]
    fn test_classify_known_titles() {
        assert_eq!(classify_prompt("SSH login name"), PromptKind::UserName);
        assert_eq!(classify_prompt("SSH key passphrase"), PromptKind::Passphrase);
        assert_eq!(classify_prompt("SSH TIS authentication"), PromptKind::Tis);
        assert_eq!(
            classify_prompt("SSH CryptoCard authentication"),
            PromptKind::CryptoCard
        );
        assert_eq!(classify_prompt("SSH password"), PromptKind::Password);
        assert_eq!(classify_prompt("New SSH password"), PromptKind::NewPassword);
    }

    #[test]
    fn test_classify_server_prompt_wildcard() {
        assert_eq!(
            classify_prompt("SSH server: pam_unix"),
            PromptKind::KeyboardInteractive
        );
        assert_eq!(
            classify_prompt("SSH server authentication"),
            PromptKind::KeyboardInteractive
        );
    }

    #[test]
    fn test_classify_unknown_title() {
        assert_eq!(classify_prompt("Completely new prompt"), PromptKind::Unknown);
    }

    #[test]
    fn test_password_title_is_not_confused_with_new_password() {
        // "New SSH password" must not be captured by the "SSH password" entry.
        assert_eq!(classify_prompt("New SSH password"), PromptKind::NewPassword);
    }

    // ============== Instruction normalization ==============

    #[test]
    fn test_normalize_all_line_ending_variants() {
        assert_eq!(normalize_instructions("a\r\nb"), "a\r\nb");
        assert_eq!(normalize_instructions("a\n\rb"), "a\r\nb");
        assert_eq!(normalize_instructions("a\nb"), "a\r\nb");
        assert_eq!(normalize_instructions("a\rb"), "a\r\nb");
    }

    #[test]
    fn test_normalize_trims_padding() {
        // Some servers add a leading blank line to prettify console output.
        assert_eq!(normalize_instructions("\nEnter code:\n"), "Enter code:");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_instructions("x\ry\nz\r\n");
        assert_eq!(normalize_instructions(&once), once);
    }

    // ============== Stored-credential policy ==============

    #[test]
    fn test_gssapi_answers_username_with_empty_string() {
        let mut config = SessionConfig::new("h");
        config.auth_gssapi = true;
        let mut usage = CredentialUsage::default();
        let (answers, credential) = try_auto_answer(
            PromptKind::UserName,
            &config,
            &mut usage,
            "",
            false,
            &[Prompt::new("login as: ", true)],
        )
        .unwrap();
        assert_eq!(answers, vec![String::new()]);
        assert_eq!(credential, StoredCredential::GssapiUserName);
    }

    #[test]
    fn test_username_without_gssapi_goes_to_ui() {
        let config = SessionConfig::new("h");
        let mut usage = CredentialUsage::default();
        assert!(try_auto_answer(
            PromptKind::UserName,
            &config,
            &mut usage,
            "",
            false,
            &[Prompt::new("login as: ", true)],
        )
        .is_none());
    }

    #[test]
    fn test_stored_password_used_exactly_once() {
        let config = config_with_password("hunter2");
        let mut usage = CredentialUsage::default();
        let prompts = [Prompt::new("Password: ", false)];

        let first = try_auto_answer(
            PromptKind::Password,
            &config,
            &mut usage,
            "",
            false,
            &prompts,
        );
        assert_eq!(
            first,
            Some((vec!["hunter2".to_string()], StoredCredential::Password))
        );
        assert!(usage.password_tried);

        let second = try_auto_answer(
            PromptKind::Password,
            &config,
            &mut usage,
            "",
            false,
            &prompts,
        );
        assert!(second.is_none());
    }

    #[test]
    fn test_empty_stored_password_is_not_offered() {
        let config = config_with_password("");
        let mut usage = CredentialUsage::default();
        assert!(try_auto_answer(
            PromptKind::Password,
            &config,
            &mut usage,
            "",
            false,
            &[Prompt::new("Password: ", false)],
        )
        .is_none());
        assert!(!usage.password_tried);
    }

    #[test]
    fn test_ki_single_non_echo_prompt_uses_stored_password() {
        let config = config_with_password("hunter2");
        let mut usage = CredentialUsage::default();
        let result = try_auto_answer(
            PromptKind::KeyboardInteractive,
            &config,
            &mut usage,
            "",
            false,
            &[Prompt::new("Password: ", false)],
        );
        assert_eq!(
            result,
            Some((
                vec!["hunter2".to_string()],
                StoredCredential::KeyboardInteractivePassword
            ))
        );
        assert!(usage.password_tried_for_ki);
        // The plain-password latch is independent.
        assert!(!usage.password_tried);
    }

    #[test]
    fn test_ki_echo_prompt_is_not_auto_answered() {
        let config = config_with_password("hunter2");
        let mut usage = CredentialUsage::default();
        assert!(try_auto_answer(
            PromptKind::KeyboardInteractive,
            &config,
            &mut usage,
            "",
            false,
            &[Prompt::new("Token: ", true)],
        )
        .is_none());
    }

    #[test]
    fn test_ki_multiple_prompts_are_not_auto_answered() {
        let config = config_with_password("hunter2");
        let mut usage = CredentialUsage::default();
        assert!(try_auto_answer(
            PromptKind::KeyboardInteractive,
            &config,
            &mut usage,
            "",
            false,
            &[
                Prompt::new("Password: ", false),
                Prompt::new("Token: ", false)
            ],
        )
        .is_none());
    }

    #[test]
    fn test_ki_password_disabled_by_config() {
        let mut config = config_with_password("hunter2");
        config.auth_ki_password = false;
        let mut usage = CredentialUsage::default();
        assert!(try_auto_answer(
            PromptKind::KeyboardInteractive,
            &config,
            &mut usage,
            "",
            false,
            &[Prompt::new("Password: ", false)],
        )
        .is_none());
    }

    #[test]
    fn test_ki_latch_used_once() {
        let config = config_with_password("hunter2");
        let mut usage = CredentialUsage::default();
        let prompts = [Prompt::new("Password: ", false)];
        assert!(try_auto_answer(
            PromptKind::Tis,
            &config,
            &mut usage,
            "",
            false,
            &prompts
        )
        .is_some());
        assert!(try_auto_answer(
            PromptKind::CryptoCard,
            &config,
            &mut usage,
            "",
            false,
            &prompts
        )
        .is_none());
    }

    #[test]
    fn test_empty_ki_request_is_acknowledged() {
        let config = SessionConfig::new("h");
        let mut usage = CredentialUsage::default();
        let result = try_auto_answer(
            PromptKind::KeyboardInteractive,
            &config,
            &mut usage,
            "",
            false,
            &[],
        );
        assert_eq!(
            result,
            Some((Vec::new(), StoredCredential::EmptyKeyboardInteractive))
        );
    }

    #[test]
    fn test_empty_ki_request_with_required_instructions_goes_to_ui() {
        let config = SessionConfig::new("h");
        let mut usage = CredentialUsage::default();
        assert!(try_auto_answer(
            PromptKind::KeyboardInteractive,
            &config,
            &mut usage,
            "",
            true,
            &[],
        )
        .is_none());
    }

    #[test]
    fn test_stored_passphrase_used_exactly_once() {
        let mut config = SessionConfig::new("h");
        config.passphrase = Some(Zeroizing::new("key phrase".to_string()));
        let mut usage = CredentialUsage::default();
        let prompts = [Prompt::new("Passphrase for key \"id\": ", false)];

        let first = try_auto_answer(
            PromptKind::Passphrase,
            &config,
            &mut usage,
            "",
            false,
            &prompts,
        );
        assert_eq!(
            first,
            Some((vec!["key phrase".to_string()], StoredCredential::Passphrase))
        );
        assert!(try_auto_answer(
            PromptKind::Passphrase,
            &config,
            &mut usage,
            "",
            false,
            &prompts,
        )
        .is_none());
    }

    #[test]
    fn test_new_password_always_goes_to_ui() {
        let config = config_with_password("hunter2");
        let mut usage = CredentialUsage::default();
        assert!(try_auto_answer(
            PromptKind::NewPassword,
            &config,
            &mut usage,
            "",
            false,
            &[Prompt::new("Enter new password: ", false)],
        )
        .is_none());
    }

    #[test]
    fn test_usage_any_tried() {
        let mut usage = CredentialUsage::default();
        assert!(!usage.any_tried());
        usage.passphrase_tried = true;
        assert!(usage.any_tried());
    }
}
