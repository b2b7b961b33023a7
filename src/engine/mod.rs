//! Contract between the session core and the external SSH engine.
//!
//! The engine owns key exchange, ciphers, MACs and packetization; this crate
//! drives it through [`Engine`] and receives progress through
//! [`EngineCallbacks`]. The session implements the callback side, so the
//! engine never holds a pointer back into the session: every driving call
//! passes the callback receiver explicitly.

mod options;

pub use options::{build_engine_options, ChannelCommand, EngineOptions, SFTP_ONLY_PROBE_SCRIPT};

use std::time::Duration;

use bitflags::bitflags;

use crate::error::Result;

/// Opaque socket identifier assigned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub u64);

/// Opaque waitable-handle identifier assigned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

bitflags! {
    /// Socket readiness classes, mirroring the engine's event selection mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u32 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const OOB     = 1 << 2;
        const ACCEPT  = 1 << 3;
        const CONNECT = 1 << 4;
        const CLOSE   = 1 << 5;
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::empty()
    }
}

impl EventMask {
    /// Selection mask installed on a socket at startup.
    pub const STARTUP: Self = Self::CONNECT
        .union(Self::READ)
        .union(Self::WRITE)
        .union(Self::OOB)
        .union(Self::CLOSE)
        .union(Self::ACCEPT);

    /// Selection mask installed at teardown.
    pub const TEARDOWN: Self = Self::empty();
}

/// One readiness class with its bit index into the per-event error array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Read,
    Write,
    Oob,
    Accept,
    Connect,
    Close,
}

impl EventKind {
    /// Dispatch order for [`crate::session::SecureSession`]: read first so
    /// inbound data is consumed before close is observed.
    pub const DISPATCH_ORDER: [Self; 6] = [
        Self::Read,
        Self::Write,
        Self::Oob,
        Self::Accept,
        Self::Connect,
        Self::Close,
    ];

    #[must_use]
    pub fn mask(self) -> EventMask {
        match self {
            Self::Read => EventMask::READ,
            Self::Write => EventMask::WRITE,
            Self::Oob => EventMask::OOB,
            Self::Accept => EventMask::ACCEPT,
            Self::Connect => EventMask::CONNECT,
            Self::Close => EventMask::CLOSE,
        }
    }

    #[must_use]
    pub fn bit(self) -> usize {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::Oob => 2,
            Self::Accept => 3,
            Self::Connect => 4,
            Self::Close => 5,
        }
    }

    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Oob => "oob",
            Self::Accept => "accept",
            Self::Connect => "connect",
            Self::Close => "close",
        }
    }
}

/// Accumulated readiness bitmask with per-event error codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkEvents {
    pub events: EventMask,
    errors: [i32; 6],
}

impl NetworkEvents {
    /// OR-fold another enumeration result into this accumulator. Later
    /// non-zero error codes overwrite earlier ones, per event class.
    pub fn fold(&mut self, other: &Self) {
        self.events |= other.events;
        for (slot, code) in self.errors.iter_mut().zip(other.errors) {
            if code != 0 {
                *slot = code;
            }
        }
    }

    pub fn set(&mut self, kind: EventKind, error: i32) {
        self.events |= kind.mask();
        self.errors[kind.bit()] = error;
    }

    #[must_use]
    pub fn error_for(&self, kind: EventKind) -> i32 {
        self.errors[kind.bit()]
    }

    /// True when a read-class event (read or close) is present.
    #[must_use]
    pub fn has_read_class(&self) -> bool {
        self.events.intersects(EventMask::READ | EventMask::CLOSE)
    }
}

/// One readiness event replayed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectEvent {
    pub kind: EventKind,
    pub error: i32,
}

/// Outcome of one multiplexed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// One of the supplied handles signalled.
    Handle(HandleId),
    /// The wait timed out.
    Timeout,
}

/// Out-of-band signals sent to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialCode {
    /// End-of-file on the outgoing stream.
    Eof,
    /// Keepalive no-op packet.
    Ping,
}

/// One credential prompt issued by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub caption: String,
    /// Whether the user's answer may be echoed.
    pub echo: bool,
}

impl Prompt {
    #[must_use]
    pub fn new(caption: impl Into<String>, echo: bool) -> Self {
        Self {
            caption: caption.into(),
            echo,
        }
    }
}

/// Callbacks the engine invokes while being driven. Implemented by the
/// session core.
pub trait EngineCallbacks {
    /// Bytes arrived from the peer, on stdout or stderr.
    fn from_backend(&mut self, is_stderr: bool, data: &[u8]) -> Result<()>;

    /// Raw console output from the engine (seat-belt messages, progress).
    fn console_write(&mut self, data: &[u8]);

    /// One diagnostic log line from the engine.
    fn log_event(&mut self, line: &str);

    /// Decide whether to trust the server's host key. An error rejects the
    /// connection.
    fn verify_host_key(
        &mut self,
        host: &str,
        port: u16,
        key_type: &str,
        key_str: &str,
        fingerprint: &str,
    ) -> Result<()>;

    /// Collect answers for a batch of credential prompts. `Ok(None)` means
    /// the user declined.
    fn prompt_user(
        &mut self,
        name: &str,
        instructions: &str,
        instructions_required: bool,
        prompts: &[Prompt],
    ) -> Result<Option<Vec<String>>>;

    /// The engine negotiated an algorithm below the warning threshold. An
    /// error aborts the connection.
    fn ask_algorithm(&mut self, alg_type: &str, alg_name: &str) -> Result<()>;

    /// Server pre-authentication banner.
    fn display_banner(&mut self, banner: &str);

    /// The primary socket appeared (`startup`) or went away. `None` marks a
    /// piped local-command proxy session with no real socket.
    fn update_socket(&mut self, socket: Option<SocketId>, startup: bool);

    /// A forwarded-port socket appeared or went away.
    fn update_port_forward_socket(&mut self, socket: SocketId, startup: bool);
}

/// The external SSH engine. All driving calls that can produce progress take
/// the callback receiver; getters do not.
pub trait Engine {
    /// Start the connection. Returns the resolved real host name, or the
    /// engine's diagnostic string on failure.
    fn init(
        &mut self,
        options: &EngineOptions,
        callbacks: &mut dyn EngineCallbacks,
    ) -> std::result::Result<String, String>;

    /// Release engine-side session resources. Idempotent; called on close
    /// and before a reconnect.
    fn free(&mut self);

    /// Submit outgoing bytes; returns the engine's outbound buffer size after
    /// the write.
    fn send(&mut self, data: &[u8], callbacks: &mut dyn EngineCallbacks) -> Result<usize>;

    /// Current outbound buffer size.
    fn send_buffer_size(&mut self) -> usize;

    /// Send an out-of-band signal.
    fn special(&mut self, code: SpecialCode, callbacks: &mut dyn EngineCallbacks) -> Result<()>;

    /// Remote exit code, once known and non-negative.
    fn exit_code(&self) -> Option<i32>;

    /// True once the session phase (post key-exchange, post auth) is reached.
    fn session_started(&self) -> bool;

    /// True once the engine considers the connection closed.
    fn is_closed(&self) -> bool;

    /// True when the server ran the fallback command instead of the
    /// subsystem.
    fn used_fallback_command(&self) -> bool;

    /// Waitable handles the engine currently needs serviced.
    fn wait_handles(&mut self) -> Vec<HandleId>;

    /// The handle signalled on socket readiness.
    fn socket_event_handle(&self) -> HandleId;

    /// Block until one of `handles` signals or `timeout` elapses.
    fn wait(&mut self, handles: &[HandleId], timeout: Duration) -> WaitStatus;

    /// Service a signalled non-socket handle. Returns true when the handle
    /// produced inbound data.
    fn handle_signalled(
        &mut self,
        handle: HandleId,
        callbacks: &mut dyn EngineCallbacks,
    ) -> Result<bool>;

    /// Drain the pending readiness bitmask (with per-event error codes) for a
    /// socket.
    fn enumerate_socket_events(&mut self, socket: SocketId) -> NetworkEvents;

    /// Replay one readiness event to the engine. `Ok(false)` reports the
    /// socket dead.
    fn select_result(
        &mut self,
        socket: SocketId,
        event: SelectEvent,
        callbacks: &mut dyn EngineCallbacks,
    ) -> Result<bool>;

    /// Whether deferred engine actions are queued.
    fn toplevel_callback_pending(&self) -> bool;

    /// Run deferred engine actions queued behind the event loop.
    fn run_toplevel_callbacks(&mut self, callbacks: &mut dyn EngineCallbacks) -> Result<()>;

    /// Advance the engine's internal timers (rekey schedule and friends).
    fn poke_timer(&mut self, callbacks: &mut dyn EngineCallbacks);

    // Session-info sources, valid once `session_started` is true.

    fn protocol_version(&self) -> u32;
    fn cipher_client_to_server(&self) -> String;
    fn cipher_server_to_client(&self) -> String;
    fn compression_client_to_server(&self) -> bool;
    fn compression_server_to_client(&self) -> bool;

    /// Smallest packet size the peer published, once known.
    fn min_packet_size(&self) -> Option<u32>;

    /// Largest packet size the peer published, once known.
    fn max_packet_size(&self) -> Option<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_mask_has_all_classes() {
        for kind in EventKind::DISPATCH_ORDER {
            assert!(EventMask::STARTUP.contains(kind.mask()), "{kind:?}");
        }
    }

    #[test]
    fn test_teardown_mask_is_empty() {
        assert!(EventMask::TEARDOWN.is_empty());
    }

    #[test]
    fn test_dispatch_order_reads_first_closes_last() {
        assert_eq!(EventKind::DISPATCH_ORDER[0], EventKind::Read);
        assert_eq!(EventKind::DISPATCH_ORDER[5], EventKind::Close);
    }

    #[test]
    fn test_event_bits_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for kind in EventKind::DISPATCH_ORDER {
            assert!(seen.insert(kind.bit()), "duplicate bit for {kind:?}");
        }
    }

    // ============== NetworkEvents ==============

    #[test]
    fn test_fold_ors_masks() {
        let mut acc = NetworkEvents::default();
        let mut read = NetworkEvents::default();
        read.set(EventKind::Read, 0);
        let mut close = NetworkEvents::default();
        close.set(EventKind::Close, 10053);

        acc.fold(&read);
        acc.fold(&close);

        assert!(acc.events.contains(EventMask::READ));
        assert!(acc.events.contains(EventMask::CLOSE));
        assert_eq!(acc.error_for(EventKind::Close), 10053);
        assert_eq!(acc.error_for(EventKind::Read), 0);
    }

    #[test]
    fn test_fold_keeps_earlier_error_when_later_is_zero() {
        let mut acc = NetworkEvents::default();
        let mut first = NetworkEvents::default();
        first.set(EventKind::Write, 7);
        let mut second = NetworkEvents::default();
        second.set(EventKind::Write, 0);

        acc.fold(&first);
        acc.fold(&second);

        assert_eq!(acc.error_for(EventKind::Write), 7);
    }

    #[test]
    fn test_read_class_detection() {
        let mut events = NetworkEvents::default();
        assert!(!events.has_read_class());
        events.set(EventKind::Write, 0);
        assert!(!events.has_read_class());
        events.set(EventKind::Close, 0);
        assert!(events.has_read_class());

        let mut read_only = NetworkEvents::default();
        read_only.set(EventKind::Read, 0);
        assert!(read_only.has_read_class());
    }

    #[test]
    fn test_prompt_constructor() {
        let prompt = Prompt::new("Password: ", false);
        assert_eq!(prompt.caption, "Password: ");
        assert!(!prompt.echo);
    }
}
