//! The user-interaction seam.
//!
//! Everything the transport needs from a user interface goes through
//! [`SessionUi`]. Implementations may be a GUI, a terminal, or a scripted
//! double in tests. All methods take `&self`; interior mutability is the
//! implementor's business.

use std::time::Duration;

use crate::auth::PromptKind;
use crate::engine::Prompt;

/// Polling cadence for timeout prompts.
pub const TIMEOUT_PROMPT_POLL: Duration = Duration::from_millis(500);

/// Host-key confirmation request.
#[derive(Debug, Clone, Copy)]
pub struct HostKeyPrompt<'a> {
    /// True when no cached key exists for this endpoint (first contact);
    /// false when a cached key exists but did not match (changed key).
    pub unknown: bool,
    pub host: &'a str,
    pub port: u16,
    pub key_type: &'a str,
    pub fingerprint: &'a str,
}

/// User's trust decision.
///
/// For an unknown host only `AcceptAndStore` and `Reject` are offered; for a
/// changed key the full set is. Offering the fingerprint for clipboard copy
/// is a presentation detail inside the UI, not a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyDecision {
    /// Trust and persist, replacing whatever was cached.
    AcceptAndStore,
    /// Trust and replace the stored key (changed-key flow).
    ReplaceStored,
    /// Trust and append to the stored key list (changed-key flow).
    AddStored,
    /// Trust for this session only.
    AcceptOnce,
    Reject,
}

/// Parameters of a stalled-operation prompt.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutQuery {
    /// Configured session timeout that expired, for display.
    pub seconds: u64,
    /// How often the UI should invoke the poll callback.
    pub poll_interval: Duration,
    /// Auto-answer `Abort` after this long with no user action.
    pub auto_abort_after: Option<Duration>,
}

/// Outcome of one poll callback during a timeout prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// The awaited condition was met; the UI should close the prompt and the
    /// caller treats it as `Continue`.
    Ready,
    Pending,
}

/// User's answer to a timeout prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAnswer {
    /// Keep waiting for another full timeout.
    Retry,
    /// Accept the current state and stop waiting.
    Continue,
    /// Give up; surfaces as a fatal user-termination error.
    Abort,
}

pub trait SessionUi {
    /// Informational message. `status` marks connection-phase status updates
    /// as opposed to incidental output.
    fn information(&self, message: &str, status: bool);

    /// Server pre-authentication banner.
    fn display_banner(&self, banner: &str);

    /// Ask the user to answer credential prompts. `None` cancels
    /// authentication.
    fn prompt_user(
        &self,
        kind: PromptKind,
        name: &str,
        instructions: &str,
        prompts: &[Prompt],
    ) -> Option<Vec<String>>;

    /// Ask the user to trust a host key.
    fn confirm_host_key(&self, prompt: &HostKeyPrompt<'_>) -> HostKeyDecision;

    /// Ask whether to proceed with an algorithm below the warning threshold.
    fn confirm_algorithm(&self, alg_type: &str, alg_name: &str) -> bool;

    /// Show a stalled-operation prompt. The UI should invoke `poll` every
    /// `query.poll_interval` and treat [`PollStatus::Ready`] as an implicit
    /// `Continue`.
    fn query_timeout(
        &self,
        query: &TimeoutQuery,
        poll: &mut dyn FnMut() -> PollStatus,
    ) -> TimeoutAnswer;

    /// The connection went away (orderly or not).
    fn closed(&self);
}
