/*
 * evtcp - reactor-driven TcpServer/TcpChannel with handler-chain dispatch
 * This is free and unencumbered software released into the public domain.
 */
use std::collections::HashMap;
use std::io::{ErrorKind, Result as IoResult};
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use mio::event::Event;
use mio::{Events, Poll, Registry, Token, Waker};

use log::{debug, error};

use crate::utilities::{lock, Flag};
use crate::{CompletionSignal, TcpError};

const WAKER: Token = Token(usize::MAX);
const EVENTS_CAPACITY: usize = 128;

/// Readiness bitmask delivered to a registered resource.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Signal(u8);

impl Signal {
    const READABLE: u8 = 0b01;
    const WRITABLE: u8 = 0b10;

    fn from_event(event: &Event) -> Self {
        let mut bits = 0;
        if event.is_readable() || event.is_read_closed() {
            bits |= Self::READABLE;
        }
        if event.is_writable() || event.is_write_closed() {
            bits |= Self::WRITABLE;
        }
        if event.is_error() {
            // let the next socket operation surface the fault
            bits |= Self::READABLE | Self::WRITABLE;
        }
        Self(bits)
    }

    pub fn is_readable(self) -> bool {
        self.0 & Self::READABLE != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE != 0
    }
}

/// A resource that can be driven by a [`TcpReactor`]
///
/// `apply` performs the actual poll registration and must read the
/// resource's *current* interest mask – a queued request never carries one,
/// so an interest change between enqueue and apply can not be lost. `signal`
/// and `failed` both run on the reactor thread.
pub(crate) trait Selectable: Send + Sync {
    fn apply(&self, registry: &Registry, token: Token) -> IoResult<()>;

    fn signal(&self, signal: Signal);

    fn failed(&self, error: TcpError);
}

enum Request {
    Register { target: Arc<dyn Selectable>, token: Token },
    Update { token: Token },
    Remove { token: Token },
}

/// Shared reactor state: everything the event loop and the thread-safe
/// entry points have in common.
pub(crate) struct ReactorContext {
    registry: Registry,
    waker: Arc<Waker>,
    closed: Flag,
    pending: Mutex<Vec<Request>>,
    next: AtomicUsize,
    completion: CompletionSignal,
}

impl ReactorContext {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Hands out the next unused token, skipping the waker's reserved one.
    pub fn token(&self) -> Token {
        loop {
            let token = Token(self.next.fetch_add(1, Ordering::Relaxed));
            if token != WAKER {
                return token;
            }
        }
    }

    /// Enqueues the initial registration of `target` and wakes the poll so
    /// the new interest takes effect before the next readiness wait. Safe to
    /// call from any thread, including from inside a readiness callback.
    pub fn register(&self, target: Arc<dyn Selectable>, token: Token) -> Result<(), TcpError> {
        self.enqueue(Request::Register { target, token })
    }

    /// Enqueues a re-registration picking up `token`'s current interest.
    pub fn update(&self, token: Token) -> Result<(), TcpError> {
        self.enqueue(Request::Update { token })
    }

    /// Drops the reactor's reference to `token`. The owning resource is
    /// expected to deregister its own socket.
    pub fn remove(&self, token: Token) -> Result<(), TcpError> {
        self.enqueue(Request::Remove { token })
    }

    fn enqueue(&self, request: Request) -> Result<(), TcpError> {
        if self.closed.check() {
            return Err(TcpError::Closed);
        }
        lock(&self.pending).push(request);
        self.waker.wake().map_err(TcpError::from)?;
        Ok(())
    }

    fn run(&self, mut poll: Poll, events_capacity: usize) {
        let mut events = Events::with_capacity(events_capacity);
        let mut targets: HashMap<Token, Arc<dyn Selectable>> = HashMap::new();

        loop {
            if let Err(fault) = poll.poll(&mut events, None) {
                if fault.kind() == ErrorKind::Interrupted {
                    continue;
                }
                // a fault on the multiplexer itself is fatal; every
                // registered resource becomes unusable
                error!("Reactor poll failed: {:?}", fault);
                let fault = TcpError::from(fault);
                for (_token, target) in targets.drain() {
                    target.failed(fault.clone());
                }
                break;
            }

            if self.closed.check() {
                break;
            }

            for event in events.iter() {
                if event.token() == WAKER {
                    continue;
                }
                if let Some(target) = targets.get(&event.token()) {
                    target.signal(Signal::from_event(event));
                }
            }

            let requests = mem::take(&mut *lock(&self.pending));
            for request in requests {
                match request {
                    Request::Register { target, token } => {
                        match target.apply(&self.registry, token) {
                            Ok(()) => {
                                targets.insert(token, target);
                            }
                            Err(fault) => {
                                debug!("Registration of {:?} failed: {:?}", token, fault);
                                target.failed(fault.into());
                            }
                        }
                    }
                    Request::Update { token } => {
                        match targets.get(&token).map(|target| target.apply(&self.registry, token)) {
                            Some(Ok(())) => {}
                            Some(Err(fault)) => {
                                debug!("Re-registration of {:?} failed: {:?}", token, fault);
                                if let Some(target) = targets.remove(&token) {
                                    target.failed(fault.into());
                                }
                            }
                            None => debug!("Interest update for unknown token {:?}", token),
                        }
                    }
                    Request::Remove { token } => {
                        targets.remove(&token);
                    }
                }
            }
        }

        // registrations that never made it into the loop still own sockets;
        // their targets must learn that the reactor is gone
        for request in mem::take(&mut *lock(&self.pending)) {
            if let Request::Register { target, .. } = request {
                target.failed(TcpError::Closed);
            }
        }
        targets.clear();
        self.completion.done();
    }
}

/// A single-threaded readiness reactor for non-blocking TCP sockets
///
/// Creating an `evtcp_rs::TcpReactor` spawns one dedicated thread that owns
/// the OS-level multiplexer for the reactor's whole lifetime. All readiness
/// dispatch, every [`TcpChannel`](crate::TcpChannel) state transition and
/// every [`Handler`](crate::Handler) callback for resources registered with
/// this reactor execute serialized on that thread.
///
/// Handles are cheap to clone and may be shared freely; registration
/// requests from any thread wake the blocked multiplexer immediately, so a
/// changed interest takes effect before the next readiness wait.
///
/// The lifecycle is one-shot: after [`stop()`](TcpReactor::stop) the loop
/// exits, the reactor cannot be restarted, and further registrations fail
/// with [`TcpError::Closed`](crate::TcpError::Closed).
#[derive(Clone)]
pub struct TcpReactor {
    context: Arc<ReactorContext>,
}

impl TcpReactor {
    pub fn new() -> IoResult<Self> {
        Self::with_capacity(EVENTS_CAPACITY)
    }

    /// Creates a reactor whose event loop collects up to `events_capacity`
    /// readiness events per poll wait.
    pub fn with_capacity(events_capacity: usize) -> IoResult<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        let context = Arc::new(ReactorContext {
            registry,
            waker: waker.clone(),
            closed: Flag::new(waker),
            pending: Mutex::new(Vec::new()),
            next: AtomicUsize::new(usize::MIN),
            completion: CompletionSignal::new(),
        });

        let shared = context.clone();
        thread::Builder::new()
            .name("tcp-reactor".into())
            .spawn(move || shared.run(poll, events_capacity))?;

        Ok(Self { context })
    }

    /// Stops the event loop. The pending readiness wait is interrupted
    /// immediately, even if the reactor is idle. Returns `true` if this
    /// call initiated the shutdown.
    pub fn stop(&self) -> IoResult<bool> {
        self.context.closed.raise()
    }

    pub fn is_running(&self) -> bool {
        !self.context.completion.is_done()
    }

    /// Blocks until the event loop has exited.
    pub fn wait(&self) {
        self.context.completion.wait();
    }

    pub(crate) fn context(&self) -> &Arc<ReactorContext> {
        &self.context
    }
}
