//! Readiness-driven event loop.
//!
//! Single-threaded cooperative dispatch over registered socket contexts.
//! Each readiness event invokes the owning context's read or write
//! callback; callbacks use only the non-blocking transport and never
//! block. The loop exits when a registered shutdown signal arrives, when a
//! callback requests exit, or when the last context is removed.

use crate::error::IpcError;
use crate::nonblock::SocketContext;
use crate::signal;
use agentd_wire::status::STATUS_SUCCESS;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io::ErrorKind;
use std::time::{Duration, Instant};

/// How long the loop sleeps when nothing else bounds the poll; shutdown
/// flags are checked at least this often.
const IDLE_POLL: Duration = Duration::from_millis(200);

/// A read or write callback on a socket context.
pub type Handler<S> = Box<dyn FnMut(&mut SocketContext, &mut S, &mut LoopControl<S>)>;

/// A one-shot timer callback.
pub type TimerHandler<S> = Box<dyn FnOnce(&mut S, &mut LoopControl<S>)>;

/// Actions a callback may request from the loop.
pub struct LoopControl<S> {
    close_current: bool,
    exit: Option<u32>,
    timers: Vec<(Duration, TimerHandler<S>)>,
    sockets: Vec<(SocketContext, Option<Handler<S>>, Option<Handler<S>>)>,
}

impl<S> LoopControl<S> {
    fn new() -> Self {
        LoopControl {
            close_current: false,
            exit: None,
            timers: Vec::new(),
            sockets: Vec::new(),
        }
    }

    /// Unregisters and closes the context whose callback is running.
    pub fn close_current(&mut self) {
        self.close_current = true;
    }

    /// Ends the loop with the given status after this batch drains.
    pub fn exit(&mut self, status: u32) {
        self.exit = Some(status);
    }

    /// Arms a one-shot timer.
    pub fn add_timer(&mut self, after: Duration, cb: TimerHandler<S>) {
        self.timers.push((after, cb));
    }

    /// Registers a new socket context once this batch drains. Used by
    /// accept paths that receive fresh connections mid-loop.
    pub fn add_socket(
        &mut self,
        ctx: SocketContext,
        on_read: Option<Handler<S>>,
        on_write: Option<Handler<S>>,
    ) {
        self.sockets.push((ctx, on_read, on_write));
    }
}

struct Entry<S> {
    ctx: SocketContext,
    interest: Interest,
    on_read: Option<Handler<S>>,
    on_write: Option<Handler<S>>,
}

struct Timer<S> {
    deadline: Instant,
    callback: TimerHandler<S>,
}

/// The event loop. `S` is the service state threaded into every callback.
pub struct EventLoop<S> {
    poll: Poll,
    events: Events,
    entries: Vec<Option<Entry<S>>>,
    timers: Vec<Timer<S>>,
}

impl<S> EventLoop<S> {
    /// Initializes the loop.
    pub fn new() -> Result<EventLoop<S>, IpcError> {
        let poll = Poll::new().map_err(|_| IpcError::EventLoopInit)?;
        Ok(EventLoop {
            poll,
            events: Events::with_capacity(64),
            entries: Vec::new(),
            timers: Vec::new(),
        })
    }

    /// Arranges for delivery of `sig` to end the loop after the current
    /// readiness batch drains.
    pub fn exit_on_signal(&self, sig: libc::c_int) -> Result<(), IpcError> {
        signal::exit_on_signal(sig)
    }

    /// Registers a socket context with its callbacks.
    ///
    /// Returns the context's token index. The context must already be
    /// non-blocking.
    pub fn add_socket(
        &mut self,
        ctx: SocketContext,
        on_read: Option<Handler<S>>,
        on_write: Option<Handler<S>>,
    ) -> Result<usize, IpcError> {
        let token = self
            .entries
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.entries.len());

        let interest = if ctx.has_pending_output() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        self.poll
            .registry()
            .register(&mut SourceFd(&ctx.fd()), Token(token), interest)
            .map_err(|_| IpcError::EventLoopAdd)?;

        let entry = Entry {
            ctx,
            interest,
            on_read,
            on_write,
        };
        if token == self.entries.len() {
            self.entries.push(Some(entry));
        } else {
            self.entries[token] = Some(entry);
        }
        Ok(token)
    }

    /// Arms a one-shot timer.
    pub fn add_timer(&mut self, after: Duration, cb: TimerHandler<S>) {
        self.timers.push(Timer {
            deadline: Instant::now() + after,
            callback: cb,
        });
    }

    /// Runs until shutdown; returns the exit status.
    pub fn run(&mut self, state: &mut S) -> Result<u32, IpcError> {
        loop {
            if signal::exit_requested() {
                return Ok(STATUS_SUCCESS);
            }
            if self.entries.iter().all(Option::is_none) && self.timers.is_empty() {
                return Ok(STATUS_SUCCESS);
            }

            let timeout = self.next_timeout();
            match self.poll.poll(&mut self.events, Some(timeout)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return Err(IpcError::EventLoopRun),
            }

            let ready: Vec<(usize, bool, bool)> = self
                .events
                .iter()
                .map(|ev| (ev.token().0, ev.is_readable(), ev.is_writable()))
                .collect();

            let mut control = LoopControl::new();
            for (token, readable, writable) in ready {
                self.dispatch(token, readable, writable, state, &mut control);
            }
            self.fire_due_timers(state, &mut control);

            for (after, cb) in control.timers.drain(..) {
                self.add_timer(after, cb);
            }
            for (ctx, on_read, on_write) in control.sockets.drain(..) {
                self.add_socket(ctx, on_read, on_write)?;
            }
            if let Some(status) = control.exit {
                return Ok(status);
            }
            self.update_interests();
        }
    }

    fn next_timeout(&self) -> Duration {
        let now = Instant::now();
        self.timers
            .iter()
            .map(|t| t.deadline.saturating_duration_since(now))
            .min()
            .map_or(IDLE_POLL, |d| d.min(IDLE_POLL))
    }

    fn dispatch(
        &mut self,
        token: usize,
        readable: bool,
        writable: bool,
        state: &mut S,
        control: &mut LoopControl<S>,
    ) {
        let Some(mut entry) = self.entries.get_mut(token).and_then(Option::take) else {
            return;
        };

        // The read callback pulls its own bytes (fill_input, accept or
        // recvmsg, whichever fits the socket's role); the loop only
        // reports readiness.
        let mut broken = false;
        if readable
            && let Some(cb) = entry.on_read.as_mut()
        {
            cb(&mut entry.ctx, state, control);
        }
        if writable && !control.close_current {
            if entry.ctx.flush_output().is_err() {
                broken = true;
            } else if let Some(cb) = entry.on_write.as_mut() {
                cb(&mut entry.ctx, state, control);
            }
        }

        if control.close_current || broken {
            control.close_current = false;
            let _ = self.poll.registry().deregister(&mut SourceFd(&entry.ctx.fd()));
            // Entry drop closes the descriptor.
        } else {
            self.entries[token] = Some(entry);
        }
    }

    fn fire_due_timers(&mut self, state: &mut S, control: &mut LoopControl<S>) {
        let now = Instant::now();
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.timers.len() {
            if self.timers[i].deadline <= now {
                due.push(self.timers.swap_remove(i));
            } else {
                i += 1;
            }
        }
        for timer in due {
            (timer.callback)(state, control);
        }
    }

    fn update_interests(&mut self) {
        for (token, slot) in self.entries.iter_mut().enumerate() {
            let Some(entry) = slot.as_mut() else { continue };
            let wanted = if entry.ctx.has_pending_output() {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            if wanted != entry.interest
                && self
                    .poll
                    .registry()
                    .reregister(&mut SourceFd(&entry.ctx.fd()), Token(token), wanted)
                    .is_ok()
            {
                entry.interest = wanted;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{blocking, socket};

    struct Echoed {
        values: Vec<u64>,
    }

    #[test]
    fn read_callback_sees_packets_and_loop_exits_on_close() {
        signal::reset();
        let (lhs, rhs) = socket::stream_pair().unwrap();
        socket::make_noblock(lhs).unwrap();

        let mut event_loop: EventLoop<Echoed> = EventLoop::new().unwrap();
        event_loop
            .add_socket(
                SocketContext::new(lhs),
                Some(Box::new(|ctx, state: &mut Echoed, control| {
                    if ctx.fill_input().is_err() {
                        control.close_current();
                        return;
                    }
                    loop {
                        match ctx.read_u64() {
                            Ok(v) => state.values.push(v),
                            Err(IpcError::WouldBlock) => break,
                            Err(_) => {
                                control.close_current();
                                break;
                            }
                        }
                    }
                })),
                None,
            )
            .unwrap();

        blocking::write_u64(rhs, 11).unwrap();
        blocking::write_u64(rhs, 22).unwrap();
        socket::close(rhs).unwrap();

        let mut state = Echoed { values: Vec::new() };
        let status = event_loop.run(&mut state).unwrap();
        assert_eq!(status, STATUS_SUCCESS);
        assert_eq!(state.values, vec![11, 22]);
    }

    #[test]
    fn buffered_writes_drain_through_write_interest() {
        signal::reset();
        let (lhs, rhs) = socket::stream_pair().unwrap();
        socket::make_noblock(lhs).unwrap();

        let mut ctx = SocketContext::new(lhs);
        ctx.write_string("from the loop");

        let mut event_loop: EventLoop<()> = EventLoop::new().unwrap();
        event_loop
            .add_socket(
                ctx,
                Some(Box::new(|ctx, _state, control| {
                    let _ = ctx.fill_input();
                    if ctx.read_u8().is_err() {
                        control.close_current();
                    }
                })),
                None,
            )
            .unwrap();

        // One iteration is enough to flush; exit via timer so run returns.
        event_loop.add_timer(
            Duration::from_millis(50),
            Box::new(|_state, control| control.exit(STATUS_SUCCESS)),
        );

        let mut state = ();
        event_loop.run(&mut state).unwrap();
        assert_eq!(blocking::read_string(rhs).unwrap(), "from the loop");
        socket::close(rhs).unwrap();
    }

    #[test]
    fn timer_fires_and_can_exit_loop() {
        signal::reset();
        let mut event_loop: EventLoop<u32> = EventLoop::new().unwrap();
        event_loop.add_timer(
            Duration::from_millis(10),
            Box::new(|state, control| {
                *state += 1;
                control.exit(7);
            }),
        );

        let mut fired = 0;
        let status = event_loop.run(&mut fired).unwrap();
        assert_eq!(status, 7);
        assert_eq!(fired, 1);
    }

    #[test]
    fn timer_can_rearm_itself() {
        signal::reset();
        let mut event_loop: EventLoop<u32> = EventLoop::new().unwrap();

        fn tick(state: &mut u32, control: &mut LoopControl<u32>) {
            *state += 1;
            if *state < 3 {
                control.add_timer(Duration::from_millis(5), Box::new(tick));
            } else {
                control.exit(STATUS_SUCCESS);
            }
        }
        event_loop.add_timer(Duration::from_millis(5), Box::new(tick));

        let mut ticks = 0;
        event_loop.run(&mut ticks).unwrap();
        assert_eq!(ticks, 3);
    }

    #[test]
    fn empty_loop_returns_immediately() {
        signal::reset();
        let mut event_loop: EventLoop<()> = EventLoop::new().unwrap();
        let mut state = ();
        assert_eq!(event_loop.run(&mut state).unwrap(), STATUS_SUCCESS);
    }
}
