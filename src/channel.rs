/*
 * evtcp - reactor-driven TcpServer/TcpChannel with handler-chain dispatch
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use mio::net::TcpStream as MioTcpStream;
use mio::{Interest, Registry, Token};

use log::{debug, warn};

use crate::reactor::{Selectable, Signal};
use crate::utilities::lock;
use crate::{Buffer, Handler, HandlerChain, TcpError, TcpReactor};

const BUFFER_CAPACITY: usize = 1024;

/// One accepted TCP connection, driven by a [`TcpReactor`](crate::TcpReactor)
///
/// A channel owns the connected socket, an inbound and an outbound
/// [`Buffer`](crate::Buffer), and the [`HandlerChain`](crate::HandlerChain)
/// its events are dispatched through. Channels are created by a
/// [`TcpServer`](crate::TcpServer) when a connection is accepted; all state
/// transitions and handler callbacks execute on the reactor thread.
///
/// The lifecycle is `Created → Started → Running → Closed`. Entering
/// `Started` fires `on_start`; reaching the terminal `Closed` state fires
/// exactly one of `on_stop` (peer close or local [`stop()`](TcpChannel::stop))
/// or `on_error` (fault), never both, and releases the socket.
///
/// [`write()`](TcpChannel::write) may be called from a handler callback or
/// from any other thread: the bytes are appended to the outbound buffer and
/// drained whenever the socket signals writability, with write-interest
/// toggled automatically (backpressure). The outbound buffer grows without
/// bound if the peer stops reading; callers that need a bound must enforce
/// it in a handler.
pub struct TcpChannel {
    selfref: Weak<TcpChannel>,
    reactor: TcpReactor,
    token: Token,
    io: Mutex<ChannelIo>,
    inbound: Mutex<Buffer>,
    outbound: Mutex<Buffer>,
    chain: Mutex<HandlerChain>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Created,
    Started,
    Running,
    Closed,
}

struct ChannelIo {
    stream: Option<MioTcpStream>,
    interest: Interest,
    registered: bool,
    phase: Phase,
}

/// Outcome of one inbound fill pass.
enum Fill {
    /// The socket has no more data for now.
    Drained,
    /// The fill crossed into a fresh buffer segment; dispatch what was
    /// collected before reading on.
    SegmentFull,
    /// The peer closed its end of the connection.
    PeerClosed,
}

impl TcpChannel {
    pub(crate) fn new(reactor: &TcpReactor, stream: MioTcpStream, chain: HandlerChain) -> Arc<Self> {
        Arc::new_cyclic(|selfref| Self {
            selfref: selfref.clone(),
            reactor: reactor.clone(),
            token: reactor.context().token(),
            io: Mutex::new(ChannelIo {
                stream: Some(stream),
                interest: Interest::READABLE,
                registered: false,
                phase: Phase::Created,
            }),
            inbound: Mutex::new(Buffer::with_capacity(BUFFER_CAPACITY)),
            outbound: Mutex::new(Buffer::with_capacity(BUFFER_CAPACITY)),
            chain: Mutex::new(chain),
        })
    }

    /// Registers the channel with its reactor and fires `on_start` through
    /// the chain.
    pub(crate) fn start(&self) -> Result<(), TcpError> {
        let this = self.selfref.upgrade().ok_or(TcpError::Closed)?;

        {
            let mut io = lock(&self.io);
            if io.phase != Phase::Created {
                return Err(TcpError::Closed);
            }
            io.phase = Phase::Started;
        }

        if let Err(error) = self
            .reactor
            .context()
            .register(Arc::clone(&this) as Arc<dyn Selectable>, self.token)
        {
            self.close(Some(error.clone()));
            return Err(error);
        }

        let chain = lock(&self.chain).clone();
        for handler in chain.iter() {
            if let Err(error) = handler.on_start(&this) {
                self.close(Some(error.clone()));
                return Err(error);
            }
        }

        let mut io = lock(&self.io);
        if io.phase == Phase::Started {
            io.phase = Phase::Running;
        }
        Ok(())
    }

    /// Appends `data` to the outbound buffer and arms write-interest, so
    /// the bytes are drained to the socket as soon as it accepts them.
    /// Safe to call from handler callbacks (except `on_outbound`) and from
    /// other threads.
    pub fn write(&self, data: &[u8]) -> Result<(), TcpError> {
        let mut outbound = lock(&self.outbound);
        let mut io = lock(&self.io);
        if io.phase == Phase::Closed {
            return Err(TcpError::Closed);
        }
        outbound.write_slice(data);
        self.arm_write_interest(&mut io)
    }

    /// Drains `source` into the outbound buffer and arms write-interest.
    /// The typical use is echoing the inbound buffer from `on_inbound`.
    pub fn write_buffer(&self, source: &mut Buffer) -> Result<(), TcpError> {
        let mut outbound = lock(&self.outbound);
        let mut io = lock(&self.io);
        if io.phase == Phase::Closed {
            return Err(TcpError::Closed);
        }
        while source.readable() {
            let count = {
                let view = source.view_for_read();
                outbound.write_slice(view);
                view.len()
            };
            source.advance_read_position(count);
        }
        self.arm_write_interest(&mut io)
    }

    /// Stops the channel: cancels the reactor registration, closes the
    /// socket and fires `on_stop`. Idempotent.
    pub fn stop(&self) {
        self.close(None);
    }

    pub fn is_running(&self) -> bool {
        lock(&self.io).phase == Phase::Running
    }

    /// Get the *peer* socket address of this channel.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        lock(&self.io)
            .stream
            .as_ref()
            .and_then(|stream| stream.peer_addr().ok())
    }

    /// Get the *local* socket address of this channel.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.io)
            .stream
            .as_ref()
            .and_then(|stream| stream.local_addr().ok())
    }

    /// Replaces the channel's handler chain. Intended for
    /// [`ServerHandler::on_new_channel`](crate::ServerHandler::on_new_channel),
    /// before the channel starts.
    pub fn set_chain(&self, chain: HandlerChain) {
        *lock(&self.chain) = chain;
    }

    pub fn chain(&self) -> HandlerChain {
        lock(&self.chain).clone()
    }

    pub fn append_handler<H: Handler + 'static>(&self, handler: H) {
        lock(&self.chain).append(handler);
    }

    /// Requests write-readiness events if they are not already requested.
    /// Interest changes travel through the reactor's registration queue, so
    /// they take effect before the next readiness wait regardless of the
    /// calling thread.
    fn arm_write_interest(&self, io: &mut ChannelIo) -> Result<(), TcpError> {
        if !io.interest.is_writable() {
            io.interest = Interest::READABLE | Interest::WRITABLE;
            if io.registered {
                self.reactor.context().update(self.token)?;
            }
        }
        Ok(())
    }

    fn fail(&self, error: TcpError) {
        self.close(Some(error));
    }

    /// Transitions to `Closed` exactly once, releases the socket and fires
    /// the terminal callback: `on_error` when a fault is given, `on_stop`
    /// otherwise.
    fn close(&self, reason: Option<TcpError>) {
        let released = {
            let mut io = lock(&self.io);
            if io.phase == Phase::Closed {
                return;
            }
            io.phase = Phase::Closed;
            let registered = io.registered;
            io.stream.take().map(|stream| (stream, registered))
        };

        if let Some((mut stream, registered)) = released {
            if registered {
                if let Err(error) = self.reactor.context().registry().deregister(&mut stream) {
                    warn!("Failed to de-register: {:?}", error);
                }
            }
            // dropping the stream closes the socket
        }

        if let Err(error) = self.reactor.context().remove(self.token) {
            debug!("Failed to drop {:?} from the reactor: {:?}", self.token, error);
        }

        let this = match self.selfref.upgrade() {
            Some(this) => this,
            None => return,
        };
        let chain = lock(&self.chain).clone();
        match reason {
            Some(error) => {
                for handler in chain.iter() {
                    handler.on_error(&this, &error);
                }
            }
            None => {
                for handler in chain.iter() {
                    handler.on_stop(&this);
                }
            }
        }
    }

    /// Services one read-readiness event: fill, dispatch, repeat. The poll
    /// is edge-triggered, so the socket must be drained before returning;
    /// the fill still pauses at every fresh buffer segment to dispatch what
    /// was collected, bounding the bytes handed to a single `on_inbound`.
    fn handle_readable(&self) {
        let this = match self.selfref.upgrade() {
            Some(this) => this,
            None => return,
        };

        loop {
            if lock(&self.io).phase == Phase::Closed {
                return;
            }
            let outcome = self.fill_inbound();

            {
                let mut inbound = lock(&self.inbound);
                if inbound.readable() {
                    let chain = lock(&self.chain).clone();
                    for handler in chain.iter() {
                        if let Err(error) = handler.on_inbound(&this, &mut inbound) {
                            inbound.unmark();
                            drop(inbound);
                            self.fail(error);
                            return;
                        }
                    }
                    // a peek must not survive past the event boundary
                    inbound.unmark();
                }
            }

            match outcome {
                Ok(Fill::Drained) => return,
                Ok(Fill::SegmentFull) => continue,
                Ok(Fill::PeerClosed) => {
                    self.stop();
                    return;
                }
                Err(error) => {
                    self.fail(error);
                    return;
                }
            }
        }
    }

    /// Non-blocking read loop into the inbound buffer's current write view.
    fn fill_inbound(&self) -> Result<Fill, TcpError> {
        let mut inbound = lock(&self.inbound);
        loop {
            let mut io = lock(&self.io);
            let stream = match io.stream.as_mut() {
                Some(stream) => stream,
                None => return Ok(Fill::Drained),
            };
            let result = stream.read(inbound.view_for_write());
            match result {
                Ok(0) => return Ok(Fill::PeerClosed),
                Ok(count) => {
                    if inbound.advance_write_position(count) {
                        return Ok(Fill::SegmentFull);
                    }
                }
                Err(error) => match error.kind() {
                    ErrorKind::WouldBlock => return Ok(Fill::Drained),
                    ErrorKind::Interrupted => (),
                    _ => return Err(error.into()),
                },
            }
        }
    }

    /// Services one write-readiness event: give the chain a last chance to
    /// transform the outbound buffer, then drain it. A short write leaves
    /// write-interest armed so the next writable event resumes; a full
    /// drain releases the backpressure.
    fn handle_writable(&self) {
        let this = match self.selfref.upgrade() {
            Some(this) => this,
            None => return,
        };

        let mut outbound = lock(&self.outbound);
        if lock(&self.io).phase == Phase::Closed {
            return;
        }

        if outbound.readable() {
            let chain = lock(&self.chain).clone();
            for handler in chain.iter().rev() {
                if let Err(error) = handler.on_outbound(&this, &mut outbound) {
                    drop(outbound);
                    self.fail(error);
                    return;
                }
            }
        }

        loop {
            if !outbound.readable() {
                break;
            }
            let mut io = lock(&self.io);
            let stream = match io.stream.as_mut() {
                Some(stream) => stream,
                None => return,
            };
            let requested = outbound.readable_bytes();
            let result = stream.write(outbound.view_for_read());
            match result {
                Ok(written) => {
                    outbound.advance_read_position(written);
                    if written < requested {
                        return;
                    }
                }
                Err(error) => match error.kind() {
                    ErrorKind::WouldBlock => return,
                    ErrorKind::Interrupted => (),
                    _ => {
                        drop(io);
                        drop(outbound);
                        self.fail(error.into());
                        return;
                    }
                },
            }
        }

        // fully drained: release the backpressure. Re-checked under the
        // same locks write() takes, so a concurrent write can not be
        // stranded with a disarmed interest.
        let mut io = lock(&self.io);
        if io.phase != Phase::Closed && io.interest.is_writable() && !outbound.readable() {
            io.interest = Interest::READABLE;
            if io.registered {
                if let Err(error) = self.reactor.context().update(self.token) {
                    debug!("Failed to release write interest on {:?}: {:?}", self.token, error);
                }
            }
        }
    }
}

impl Selectable for TcpChannel {
    fn apply(&self, registry: &Registry, token: Token) -> IoResult<()> {
        let mut io = lock(&self.io);
        let interest = io.interest;
        let registered = io.registered;
        match io.stream.as_mut() {
            Some(stream) => {
                if registered {
                    registry.reregister(stream, token, interest)
                } else {
                    registry.register(stream, token, interest)?;
                    io.registered = true;
                    Ok(())
                }
            }
            None => Err(IoError::new(ErrorKind::NotConnected, "channel is closed")),
        }
    }

    fn signal(&self, signal: Signal) {
        if signal.is_readable() {
            self.handle_readable();
        }
        if signal.is_writable() {
            self.handle_writable();
        }
    }

    fn failed(&self, error: TcpError) {
        self.close(Some(error));
    }
}
