//! The receive pipeline: two-level buffering and the push-mode dispatcher.
//!
//! Bytes delivered by the engine first fill the in-flight out-request (the
//! staging buffer for the current `receive` call), then spill into the
//! pending buffer. The pending buffer grows geometrically
//! (`len + incoming + 4096`) and releases its storage when drained empty.

use tracing::debug;

use crate::engine::Engine;
use crate::error::{Result, TransportError};
use crate::session::{OutputKind, ReceiveHandler, SecureSession};

/// Staging for the bytes of one in-flight `receive` call.
struct OutRequest {
    wanted: usize,
    data: Vec<u8>,
}

/// Receive-side buffering state.
#[derive(Default)]
pub(crate) struct ReceiveState {
    pending: Vec<u8>,
    out: Option<OutRequest>,
    /// A push-mode dispatch is on the stack.
    pub(crate) frozen: bool,
    /// New stdout bytes arrived since the last dispatch iteration.
    pub(crate) data_arrived: bool,
}

impl ReceiveState {
    /// Accept bytes from the engine: fill the out-request first, spill the
    /// rest into pending.
    pub(crate) fn push(&mut self, data: &[u8]) -> Result<()> {
        let mut rest = data;

        if let Some(out) = &mut self.out {
            let take = (out.wanted - out.data.len()).min(rest.len());
            out.data.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }

        if !rest.is_empty() {
            self.append_pending(rest)?;
        }

        self.data_arrived = true;
        Ok(())
    }

    fn append_pending(&mut self, data: &[u8]) -> Result<()> {
        if self.pending.capacity() < self.pending.len() + data.len() {
            self.pending
                .try_reserve_exact(data.len() + 4096)
                .map_err(|_| TransportError::OutOfMemory)?;
        }
        self.pending.extend_from_slice(data);
        Ok(())
    }

    /// Move up to `buf.len()` pending bytes into `buf`; storage is released
    /// once the buffer drains empty.
    fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let used = self.pending.len().min(buf.len());
        if used > 0 {
            buf[..used].copy_from_slice(&self.pending[..used]);
            self.pending.drain(..used);
            if self.pending.is_empty() {
                self.pending = Vec::new();
            }
        }
        used
    }

    fn begin_out_request(&mut self, wanted: usize) {
        debug_assert!(self.out.is_none());
        self.out = Some(OutRequest {
            wanted,
            data: Vec::with_capacity(wanted),
        });
    }

    fn out_request_remaining(&self) -> usize {
        self.out
            .as_ref()
            .map_or(0, |out| out.wanted - out.data.len())
    }

    fn take_out_request(&mut self) -> Vec<u8> {
        self.out.take().map_or_else(Vec::new, |out| out.data)
    }

    /// Put staged bytes back at the front of pending (failed wait path), so
    /// a later `receive` still observes them in order.
    fn requeue_front(&mut self, data: Vec<u8>) {
        if !data.is_empty() {
            self.pending.splice(..0, data);
        }
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn peek(&self, length: usize) -> Option<&[u8]> {
        (self.pending.len() >= length).then(|| &self.pending[..length])
    }

    pub(crate) fn reset(&mut self) {
        self.pending = Vec::new();
        self.out = None;
        self.frozen = false;
        self.data_arrived = false;
    }
}

impl<E: Engine> SecureSession<E> {
    /// Blocking read of exactly `buf.len()` bytes, in arrival order.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_connection(None)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let mut filled = self.core.receive.drain_into(buf);

        if filled < buf.len() {
            self.core.receive.begin_out_request(buf.len() - filled);

            let waited = loop {
                let remaining = self.core.receive.out_request_remaining();
                if remaining == 0 {
                    break Ok(());
                }
                if self.core.client.log_protocol >= 1 {
                    debug!(remaining, "Waiting for more bytes");
                }
                if let Err(error) = self.wait_for_data() {
                    break Err(error);
                }
            };

            let staged = self.core.receive.take_out_request();
            match waited {
                Ok(()) => {
                    buf[filled..filled + staged.len()].copy_from_slice(&staged);
                    filled += staged.len();
                }
                Err(error) => {
                    self.core.receive.requeue_front(staged);
                    return Err(error);
                }
            }
        }

        debug_assert_eq!(filled, buf.len());
        if self.core.client.log_protocol >= 1 {
            debug!(
                read = buf.len(),
                pending = self.core.receive.pending_len(),
                "Read bytes"
            );
        }
        Ok(buf.len())
    }

    /// Borrow `length` buffered bytes without consuming, if that many are
    /// pending.
    #[must_use]
    pub fn peek(&self, length: usize) -> Option<&[u8]> {
        self.core.receive.peek(length)
    }

    /// Blocking read of one line. The trailing newline is consumed but not
    /// returned; the line is right-trimmed and decoded lossily.
    pub fn receive_line(&mut self) -> Result<String> {
        let mut line: Vec<u8> = Vec::new();
        let mut eol = false;

        while !eol {
            // Walk the pending buffer up to and including a newline.
            let pending_len = self.core.receive.pending_len();
            if pending_len > 0 {
                let pending = self.core.receive.peek(pending_len).unwrap_or(&[]);
                let take = match pending.iter().position(|b| *b == b'\n') {
                    Some(position) => {
                        eol = true;
                        position + 1
                    }
                    None => pending_len,
                };
                let start = line.len();
                line.resize(start + take, 0);
                self.receive(&mut line[start..])?;
            }

            // No newline buffered: read one byte at a time, which blocks for
            // the next batch.
            if !eol {
                let mut byte = [0u8; 1];
                self.receive(&mut byte)?;
                line.push(byte[0]);
                eol = byte[0] == b'\n';
            }
        }

        line.pop();
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end().to_string();
        self.core.capture_output(OutputKind::Output, &text);
        Ok(text)
    }

    /// Register the push-mode handler. Delivery starts with the next
    /// arrival; at most one handler may be registered.
    pub fn register_receive_handler(&mut self, handler: ReceiveHandler<E>) {
        debug_assert!(self.on_receive.is_none());
        self.core.receive.data_arrived = false;
        self.on_receive = Some(handler);
    }

    pub fn unregister_receive_handler(&mut self) {
        debug_assert!(self.on_receive.is_some());
        self.on_receive = None;
    }

    /// True while a push-mode dispatch is on the stack.
    #[must_use]
    pub fn is_receive_frozen(&self) -> bool {
        self.core.receive.frozen
    }

    /// Run the push-mode handler for newly arrived data. Loop-with-dirty-flag:
    /// bytes arriving while the handler runs re-run it serially instead of
    /// recursing, so dispatch depth stays bounded and arrival order is kept.
    pub(crate) fn dispatch_receive_handler(&mut self) -> Result<()> {
        if self.core.receive.frozen || !self.core.receive.data_arrived {
            return Ok(());
        }
        let Some(mut handler) = self.on_receive.take() else {
            return Ok(());
        };

        self.core.receive.frozen = true;
        let mut result = Ok(());
        loop {
            self.core.receive.data_arrived = false;
            if let Err(error) = handler(self) {
                result = Err(error);
                break;
            }
            if !self.core.receive.data_arrived {
                break;
            }
        }
        self.core.receive.frozen = false;
        self.on_receive = Some(handler);
        result
    }
}
