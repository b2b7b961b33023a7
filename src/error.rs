use thiserror::Error;

/// Network failure classes mapped from engine diagnostic text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Refused,
    Reset,
    Timeout,
    NoRoute,
    Aborted,
    HostNotFound,
    Garbled,
    UnexpectedClose,
}

#[derive(Error, Debug)]
pub enum TransportError {
    // Configuration errors
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    // Engine lifecycle errors
    #[error("Failed to initialize SSH backend: {reason}")]
    InitializationFailed { reason: String },

    #[error("Not connected{}", exit_code_suffix(.exit_code))]
    NotConnected { exit_code: Option<i32> },

    #[error("{message}{}", exit_code_suffix(.exit_code))]
    Disconnected {
        message: String,
        exit_code: Option<i32>,
    },

    // Network errors (mapped from engine diagnostics)
    #[error("{message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    // Host key verification outcomes
    #[error("Host key verification failed: {message} (fingerprint: {fingerprint})")]
    HostKeyMismatch {
        message: String,
        fingerprint: String,
    },

    #[error("Host key was rejected (fingerprint: {fingerprint})")]
    HostKeyRejected { fingerprint: String },

    // Authentication
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        message: String,
        /// Accumulated server-side authentication transcript.
        log: String,
    },

    // Timeouts and user decisions
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Terminated by user")]
    UserTerminated,

    #[error("Out of memory growing the receive buffer")]
    OutOfMemory,

    #[error("Forwarded connection refused by server: {reason}")]
    ForwardingRefused { reason: String },

    /// A connect failure where an FTP server answered the fallback probe.
    #[error("{source}. An FTP server is answering on the standard FTP port; the server may support FTP instead of SFTP")]
    FtpSuggested {
        #[source]
        source: Box<TransportError>,
    },
}

fn exit_code_suffix(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!(" (server exit code {code})"),
        None => String::new(),
    }
}

impl TransportError {
    /// Help topic keyword for UI-side context help, when one exists.
    #[must_use]
    pub fn help_topic(&self) -> Option<&'static str> {
        match self {
            Self::Network { kind, .. } => Some(match kind {
                NetworkErrorKind::Refused => "net-refused",
                NetworkErrorKind::Reset => "net-reset",
                NetworkErrorKind::Timeout => "net-timeout",
                NetworkErrorKind::NoRoute => "net-no-route",
                NetworkErrorKind::Aborted => "net-aborted",
                NetworkErrorKind::HostNotFound => "net-host-not-found",
                NetworkErrorKind::Garbled => "net-packet-garbled",
                NetworkErrorKind::UnexpectedClose => "net-unexpected-close",
            }),
            Self::NotConnected { .. } | Self::Disconnected { .. } => Some("not-connected"),
            Self::HostKeyMismatch { .. } | Self::HostKeyRejected { .. } => Some("host-key"),
            Self::Timeout { .. } => Some("host-not-communicating"),
            Self::FtpSuggested { source } => source.help_topic(),
            _ => None,
        }
    }

    /// True for the network failures that gate the FTP fallback probe.
    #[must_use]
    pub fn is_no_connection_response(&self) -> bool {
        matches!(
            self,
            Self::Network {
                kind: NetworkErrorKind::Refused
                    | NetworkErrorKind::Reset
                    | NetworkErrorKind::Timeout
                    | NetworkErrorKind::UnexpectedClose,
                ..
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
