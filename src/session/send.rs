//! The send pipeline: back-pressure against the engine's outbound buffer,
//! specials, and keepalive.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::engine::{Engine, SpecialCode};
use crate::error::{Result, TransportError};
use crate::session::{OutputKind, SecureSession};
use crate::ui::TimeoutAnswer;

/// Outbound buffer level above which `send` blocks until the engine drains.
pub const MAX_BUFSIZE: usize = 128 * 1024;

/// Event-loop pass interval while draining an over-full send buffer.
pub const SEND_BUFFER_POLL: Duration = Duration::from_millis(100);

impl<E: Engine> SecureSession<E> {
    /// Submit bytes to the engine. Returns once the engine's outbound buffer
    /// is at or below [`MAX_BUFSIZE`]; blocks behind back-pressure otherwise.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.check_connection(None)?;

        let buffer_size = {
            let Self { engine, core, .. } = self;
            engine.send(data, core)?
        };
        if self.core.client.log_protocol >= 1 {
            debug!(sent = data.len(), buffered = buffer_size, "Sent bytes");
        }
        self.core.last_data_sent = Some(Instant::now());

        // Among other things this drains peer acks, freeing the server-side
        // window.
        self.event_select_loop(Duration::ZERO, false, None)?;

        if buffer_size > MAX_BUFSIZE {
            self.dispatch_send_buffer(buffer_size)?;
        }
        self.check_connection(None)?;
        Ok(())
    }

    /// Send a single NUL byte.
    pub fn send_null(&mut self) -> Result<()> {
        debug!("Sending NUL byte");
        self.send(&[0])
    }

    /// Send a string as raw bytes.
    pub fn send_str(&mut self, text: &str) -> Result<()> {
        self.send(text.as_bytes())
    }

    /// Send a line followed by a newline; the line is captured to the
    /// session log as input.
    pub fn send_line(&mut self, line: &str) -> Result<()> {
        self.send_str(line)?;
        self.send(b"\n")?;
        self.core.capture_output(OutputKind::Input, line);
        Ok(())
    }

    /// Send an out-of-band signal to the peer.
    pub fn send_special(&mut self, code: SpecialCode) -> Result<()> {
        debug!(?code, "Sending special code");
        self.check_connection(None)?;
        {
            let Self { engine, core, .. } = self;
            engine.special(code, core)?;
        }
        self.check_connection(None)?;
        self.core.last_data_sent = Some(Instant::now());
        Ok(())
    }

    /// Send EOF on the outgoing stream.
    pub fn send_eof(&mut self) -> Result<()> {
        self.send_special(SpecialCode::Eof)
    }

    /// Emit a no-op keepalive packet, or just re-arm the timestamp while a
    /// prompt is on screen.
    pub fn keep_alive(&mut self) -> Result<()> {
        if self.core.active && self.core.waiting == 0 {
            debug!("Sending null packet to keep session alive");
            self.send_special(SpecialCode::Ping)
        } else {
            // Defer the next keepalive attempt instead.
            self.core.last_data_sent = Some(Instant::now());
            Ok(())
        }
    }

    /// Drive engine timers and run one non-blocking event-loop pass. No-op
    /// when inactive.
    pub fn idle(&mut self, budget: Duration) -> Result<()> {
        if !self.core.active {
            return Ok(());
        }
        {
            let Self { engine, core, .. } = self;
            engine.poke_timer(core);
        }
        self.event_select_loop(budget, false, None)?;
        Ok(())
    }

    /// Poll the event loop until the engine's outbound buffer drops to
    /// [`MAX_BUFSIZE`]; past the session timeout the user decides whether to
    /// keep waiting, accept the oversize state, or abort.
    pub(crate) fn dispatch_send_buffer(&mut self, mut buffer_size: usize) -> Result<()> {
        let mut start = Instant::now();

        loop {
            self.check_connection(None)?;
            if self.core.client.log_protocol >= 1 {
                debug!(
                    buffered = buffer_size,
                    excess = buffer_size.saturating_sub(MAX_BUFSIZE),
                    "Send buffer over threshold"
                );
            }

            self.event_select_loop(SEND_BUFFER_POLL, false, None)?;
            buffer_size = self.engine.send_buffer_size();
            if self.core.client.log_protocol >= 1 {
                debug!(buffered = buffer_size, "Send buffer level");
            }

            if start.elapsed() > self.core.config.timeout() {
                debug!("Waiting for dispatching send buffer timed out, asking user what to do");
                match self.timeout_prompt_send_buffer() {
                    TimeoutAnswer::Retry => start = Instant::now(),
                    TimeoutAnswer::Continue => buffer_size = 0,
                    TimeoutAnswer::Abort => {
                        return Err(TransportError::Timeout {
                            seconds: self.core.config.timeout_seconds,
                        })
                    }
                }
            }

            if buffer_size <= MAX_BUFSIZE {
                return Ok(());
            }
        }
    }
}
