use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{error, trace};

use crate::core_reactor::poller::{Interest, IoEvent, OsPoller, Poller};
use crate::core_reactor::scheduler::{Scheduler, TimerHandle};

/// Hooks a channel exposes to the reactor.
///
/// All hooks run on the reactor thread; no two hooks of the same reactor
/// ever run concurrently. A hook that fails must close its own channel —
/// nothing propagates out of the dispatch loop.
pub trait EventHandler {
    fn fd(&self) -> RawFd;

    fn handle_readable(&mut self, reactor: &mut Reactor);

    fn handle_writable(&mut self, _reactor: &mut Reactor) {}

    /// ERR/HUP on the descriptor. The default routes to `handle_close`.
    fn handle_error_event(&mut self, reactor: &mut Reactor) {
        self.handle_close(reactor);
    }

    fn handle_close(&mut self, reactor: &mut Reactor);
}

/// Single-threaded dispatch loop owning the poller and the scheduler.
///
/// Channels are dynamically registered against file descriptors; each
/// poll round dispatches readiness events, then fires due scheduled
/// calls. The loop ends when the stop flag is set or when no channels
/// and no scheduled calls remain.
pub struct Reactor {
    poller: Box<dyn Poller>,
    scheduler: Scheduler,
    channels: HashMap<RawFd, Rc<RefCell<dyn EventHandler>>>,
    stop: Rc<Cell<bool>>,
    events_buf: Vec<IoEvent>,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Box::new(OsPoller::new()?),
            scheduler: Scheduler::new(),
            channels: HashMap::new(),
            stop: Rc::new(Cell::new(false)),
            events_buf: Vec::new(),
        })
    }

    /// Shared flag that makes the loop return at the next tick. Signal
    /// handlers flip it and wake the loop through the self-pipe channel.
    pub fn stop_flag(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.stop)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn add_channel(
        &mut self,
        handler: Rc<RefCell<dyn EventHandler>>,
        interest: Interest,
    ) -> io::Result<()> {
        let fd = handler.borrow().fd();
        self.poller.register(fd, interest)?;
        self.channels.insert(fd, handler);
        Ok(())
    }

    pub fn modify_channel(&mut self, fd: RawFd, interest: Interest) {
        if let Err(err) = self.poller.modify(fd, interest) {
            trace!("poller modify failed for fd {}: {}", fd, err);
        }
    }

    /// Detach a channel. Must happen before the descriptor is released,
    /// otherwise a recycled fd could receive a stale registration.
    pub fn remove_channel(&mut self, fd: RawFd) {
        if let Err(err) = self.poller.unregister(fd) {
            trace!("poller unregister failed for fd {}: {}", fd, err);
        }
        self.channels.remove(&fd);
    }

    pub fn call_later<F>(&mut self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnMut(&mut Reactor) + 'static,
    {
        self.scheduler.call_later(delay, Box::new(callback))
    }

    pub fn call_every<F>(&mut self, interval: Duration, callback: F) -> TimerHandle
    where
        F: FnMut(&mut Reactor) + 'static,
    {
        self.scheduler.call_every(interval, Box::new(callback))
    }

    /// Cancel + reinsert, used by channels that keep resetting the same
    /// timeout (idle timers).
    pub fn reschedule<F>(&mut self, handle: &TimerHandle, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnMut(&mut Reactor) + 'static,
    {
        handle.cancel();
        self.scheduler.note_cancellation();
        self.call_later(delay, callback)
    }

    /// Run until the stop flag flips or nothing is left to drive.
    pub fn run(&mut self) {
        while !self.stop.get() {
            if self.channels.is_empty() && self.scheduler.is_empty() {
                break;
            }
            self.turn(None);
        }
    }

    /// A single poll round followed by a scheduler tick.
    pub fn serve_once(&mut self, timeout: Option<Duration>) {
        self.turn(timeout);
    }

    fn turn(&mut self, timeout_cap: Option<Duration>) {
        let mut timeout = self.scheduler.next_timeout();
        if let Some(cap) = timeout_cap {
            timeout = Some(timeout.map_or(cap, |t| t.min(cap)));
        }
        // nothing to wait for: an unbounded poll over zero descriptors
        // would never return
        if self.channels.is_empty() && timeout.is_none() {
            return;
        }

        let mut events = std::mem::take(&mut self.events_buf);
        events.clear();
        match self.poller.poll(timeout, &mut events) {
            Ok(_) => {}
            Err(err) => {
                error!("poller failure: {}", err);
                self.stop.set(true);
            }
        }
        for event in events.iter() {
            self.dispatch(*event);
        }
        self.events_buf = events;

        self.run_due_calls();
    }

    fn dispatch(&mut self, event: IoEvent) {
        // Clone the handler out of the map so hooks can freely add or
        // remove channels while running.
        let handler = match self.channels.get(&event.fd) {
            Some(handler) => Rc::clone(handler),
            None => return,
        };
        if event.error && !event.readable {
            handler.borrow_mut().handle_error_event(self);
            return;
        }
        if event.readable {
            handler.borrow_mut().handle_readable(self);
        }
        if event.writable && self.channels.contains_key(&event.fd) {
            handler.borrow_mut().handle_writable(self);
        }
    }

    fn run_due_calls(&mut self) {
        let due = self.scheduler.pop_due(Instant::now());
        for mut task in due {
            (task.callback)(self);
            if let Some(interval) = task.interval {
                if !task.cancelled.get() {
                    task.deadline = Instant::now() + interval;
                    self.scheduler.reinsert(task);
                }
            }
        }
    }

    /// Close every registered channel and drop all scheduled calls. Used
    /// on shutdown and by the pre-fork workers when the parent dies.
    pub fn close_all(&mut self) {
        let channels: Vec<Rc<RefCell<dyn EventHandler>>> =
            self.channels.values().map(Rc::clone).collect();
        for handler in channels {
            handler.borrow_mut().handle_close(self);
        }
        self.channels.clear();
        self.scheduler.clear();
    }
}
