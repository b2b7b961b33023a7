//! The event loop: one multiplexed wait over engine handles, the primary
//! socket, forwarded sockets, and the engine's deferred callbacks.

use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::engine::{Engine, EventKind, NetworkEvents, SelectEvent, WaitStatus};
use crate::error::{Result, TransportError};
use crate::session::SecureSession;
use crate::ui::{PollStatus, TimeoutAnswer, TimeoutQuery, TIMEOUT_PROMPT_POLL};

impl<E: Engine> SecureSession<E> {
    /// Fail unless the session is active and the engine still considers the
    /// connection open. Attaches the remote exit code when known.
    pub(crate) fn check_connection(&mut self, message: Option<&str>) -> Result<()> {
        if !self.core.active || self.engine.is_closed() {
            let exit_code = self.engine.exit_code();
            return Err(match message {
                Some(message) => TransportError::Disconnected {
                    message: message.to_string(),
                    exit_code,
                },
                None => TransportError::NotConnected { exit_code },
            });
        }
        Ok(())
    }

    /// One multiplexed wait-and-dispatch pass, repeated while `read_required`
    /// until a read-class event arrives or the time budget is consumed.
    /// Returns true iff a read-class event occurred.
    ///
    /// With `collect` supplied, primary-socket events are enumerated into the
    /// accumulator instead of being dispatched; forwarded sockets are always
    /// dispatched.
    pub(crate) fn event_select_loop(
        &mut self,
        timeout: Duration,
        read_required: bool,
        mut collect: Option<&mut NetworkEvents>,
    ) -> Result<bool> {
        self.check_connection(None)?;

        let mut result = false;
        let mut remaining = timeout;

        loop {
            let started = Instant::now();

            let mut handles = self.engine.wait_handles();
            let socket_event = self.engine.socket_event_handle();
            handles.push(socket_event);

            // Deferred engine actions take priority over blocking.
            let wait_budget = if self.engine.toplevel_callback_pending() {
                Duration::ZERO
            } else {
                remaining
            };

            match self.engine.wait(&handles, wait_budget) {
                WaitStatus::Handle(handle) if handle == socket_event => {
                    if self.core.client.log_protocol >= 1 {
                        debug!("Detected network event");
                    }
                    if let Some(primary) = self.core.primary_socket {
                        if let Some(events) = &mut collect {
                            if self.enumerate_network_events(primary, &mut **events) {
                                result = true;
                            }
                        } else if self.process_network_events(primary)? {
                            result = true;
                        }
                    }
                    let forwarded = self.core.port_forward_sockets.clone();
                    for socket in forwarded {
                        self.process_network_events(socket)?;
                    }
                }
                WaitStatus::Handle(handle) => {
                    let produced = {
                        let Self { engine, core, .. } = self;
                        engine.handle_signalled(handle, core)?
                    };
                    if produced {
                        result = true;
                    }
                }
                WaitStatus::Timeout => {
                    remaining = Duration::ZERO;
                }
            }

            {
                let Self { engine, core, .. } = self;
                engine.run_toplevel_callbacks(core)?;
            }
            self.dispatch_receive_handler()?;

            remaining = remaining.saturating_sub(started.elapsed());
            if !(read_required && remaining > Duration::ZERO && !result) {
                break;
            }
        }

        Ok(result)
    }

    /// Drain a socket's readiness bitmask into `accumulator`. Returns true
    /// when the accumulated events contain a read-class event.
    pub(crate) fn enumerate_network_events(
        &mut self,
        socket: crate::engine::SocketId,
        accumulator: &mut NetworkEvents,
    ) -> bool {
        if self.core.client.log_protocol >= 2 {
            debug!(?socket, "Enumerating network events");
        }
        let events = self.engine.enumerate_socket_events(socket);
        accumulator.fold(&events);
        if self.core.client.log_protocol >= 2 {
            debug!(
                ?socket,
                new = ?events.events,
                cumulative = ?accumulator.events,
                "Enumerated network events"
            );
        }
        accumulator.has_read_class()
    }

    /// Replay accumulated readiness events to the engine, one class at a
    /// time in fixed order. A dead-socket report escalates through
    /// `check_connection`.
    pub(crate) fn handle_network_events(
        &mut self,
        socket: crate::engine::SocketId,
        events: &NetworkEvents,
    ) -> Result<()> {
        for kind in EventKind::DISPATCH_ORDER {
            if !events.events.contains(kind.mask()) {
                continue;
            }
            let error = events.error_for(kind);
            if self.core.client.log_protocol >= 2 {
                debug!(?socket, event = kind.describe(), error, "Handling network event");
            }
            let alive = {
                let Self { engine, core, .. } = self;
                engine.select_result(socket, SelectEvent { kind, error }, core)?
            };
            if !alive {
                // The connection closed definitely; surface it.
                self.check_connection(None)?;
            }
        }
        Ok(())
    }

    pub(crate) fn process_network_events(
        &mut self,
        socket: crate::engine::SocketId,
    ) -> Result<bool> {
        let mut events = NetworkEvents::default();
        let result = self.enumerate_network_events(socket, &mut events);
        self.handle_network_events(socket, &events)?;
        Ok(result)
    }

    /// Block until a read-class event arrives. Past the session timeout the
    /// user chooses between retrying, continuing on late data, or aborting.
    pub(crate) fn wait_for_data(&mut self) -> Result<()> {
        loop {
            if self.core.client.log_protocol >= 2 {
                debug!("Looking for incoming data");
            }
            let incoming = self.event_select_loop(self.core.config.timeout(), true, None)?;
            if incoming {
                return Ok(());
            }

            debug!("Waiting for data timed out, asking user what to do");
            let mut events = NetworkEvents::default();
            match self.timeout_prompt_wait_data(&mut events) {
                TimeoutAnswer::Retry => {}
                TimeoutAnswer::Continue => {
                    // A read event was captured by the prompt's poll; replay
                    // it rather than selecting again (that would just time
                    // out unless more data arrives).
                    if let Some(primary) = self.core.primary_socket {
                        self.handle_network_events(primary, &events)?;
                    }
                    return Ok(());
                }
                TimeoutAnswer::Abort => {
                    return Err(TransportError::Timeout {
                        seconds: self.core.config.timeout_seconds,
                    })
                }
            }
        }
    }

    fn timeout_query(&self) -> TimeoutQuery {
        TimeoutQuery {
            seconds: self.core.config.timeout_seconds,
            poll_interval: TIMEOUT_PROMPT_POLL,
            auto_abort_after: self.core.client.auto_stall(),
        }
    }

    /// Stalled-receive prompt. The poll keeps looking for data; captured
    /// events land in `events` so `Continue` can replay them.
    fn timeout_prompt_wait_data(&mut self, events: &mut NetworkEvents) -> TimeoutAnswer {
        let ui = Rc::clone(&self.core.ui);
        let query = self.timeout_query();
        self.core.waiting += 1;

        let answer = {
            let session = &mut *self;
            ui.query_timeout(&query, &mut || {
                if !session.core.active {
                    return PollStatus::Pending;
                }
                if session.core.client.log_protocol >= 2 {
                    debug!("Polling for data in case it finally arrives");
                }
                // An error here would cascade into nested prompts; report
                // pending and let the resumed wait surface it.
                match session.event_select_loop(Duration::ZERO, false, Some(&mut *events)) {
                    Ok(true) => {
                        debug!("Data has arrived, closing query to user");
                        PollStatus::Ready
                    }
                    Ok(false) | Err(_) => PollStatus::Pending,
                }
            })
        };

        self.core.waiting -= 1;
        answer
    }

    /// Stalled-send prompt. The poll reports ready once the engine's
    /// outbound buffer has drained to the threshold.
    pub(crate) fn timeout_prompt_send_buffer(&mut self) -> TimeoutAnswer {
        let ui = Rc::clone(&self.core.ui);
        let query = self.timeout_query();
        self.core.waiting += 1;

        let answer = {
            let session = &mut *self;
            ui.query_timeout(&query, &mut || {
                if !session.core.active {
                    return PollStatus::Pending;
                }
                if session.engine.send_buffer_size() <= crate::session::MAX_BUFSIZE {
                    PollStatus::Ready
                } else {
                    PollStatus::Pending
                }
            })
        };

        self.core.waiting -= 1;
        answer
    }
}
