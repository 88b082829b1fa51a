/*
 * evtcp - reactor-driven TcpServer/TcpChannel with handler-chain dispatch
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use mio::net::TcpListener as MioTcpListener;
use mio::{Interest, Registry, Token};

use log::{debug, warn};

use crate::reactor::{Selectable, Signal};
use crate::utilities::lock;
use crate::{CompletionSignal, HandlerChain, ServerHandler, TcpChannel, TcpError, TcpReactor};

/// A TCP socket server, listening for connections on a
/// [`TcpReactor`](crate::TcpReactor)
///
/// A server is configured and started through
/// [`TcpServer::builder()`](TcpServer::builder); `start()` binds the
/// listening socket, registers it for accept-readiness and returns
/// immediately. Accepted connections become [`TcpChannel`](crate::TcpChannel)s
/// bound to a clone of the server's default [`HandlerChain`], which the
/// [`ServerHandler`](crate::ServerHandler) may replace per connection in
/// `on_new_channel`.
///
/// The process lifetime is the caller's responsibility:
/// [`wait()`](TcpServer::wait) blocks until the server stops, the timed
/// variant gives up after a deadline without affecting the server.
pub struct TcpServer {
    selfref: Weak<TcpServer>,
    reactor: TcpReactor,
    token: Token,
    state: Mutex<ServerState>,
    local_addr: SocketAddr,
    handler: Arc<dyn ServerHandler>,
    default_chain: Mutex<HandlerChain>,
    completion: CompletionSignal,
}

struct ServerState {
    listener: Option<MioTcpListener>,
    registered: bool,
}

/// Configuration surface for a [`TcpServer`]
///
/// An unset host binds the unspecified address (any interface).
pub struct TcpServerBuilder {
    host: Option<String>,
    port: u16,
    handler: Arc<dyn ServerHandler>,
    default_chain: HandlerChain,
}

struct DefaultServerHandler;

impl ServerHandler for DefaultServerHandler {}

impl TcpServerBuilder {
    fn new() -> Self {
        Self {
            host: None,
            port: 0,
            handler: Arc::new(DefaultServerHandler),
            default_chain: HandlerChain::new(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn server_handler<H: ServerHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    pub fn default_chain(mut self, chain: HandlerChain) -> Self {
        self.default_chain = chain;
        self
    }

    /// Binds the listening socket and registers it with `reactor` for
    /// accept-readiness. Returns immediately; incoming connections are
    /// served on the reactor thread.
    pub fn start(self, reactor: &TcpReactor) -> Result<Arc<TcpServer>, TcpError> {
        let addr = self.resolve_addr()?;
        let listener = MioTcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        let server = Arc::new_cyclic(|selfref| TcpServer {
            selfref: selfref.clone(),
            reactor: reactor.clone(),
            token: reactor.context().token(),
            state: Mutex::new(ServerState {
                listener: Some(listener),
                registered: false,
            }),
            local_addr,
            handler: self.handler,
            default_chain: Mutex::new(self.default_chain),
            completion: CompletionSignal::new(),
        });

        reactor
            .context()
            .register(Arc::clone(&server) as Arc<dyn Selectable>, server.token)?;

        server.handler.on_start(&server);
        Ok(server)
    }

    fn resolve_addr(&self) -> IoResult<SocketAddr> {
        match &self.host {
            None => Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port)),
            Some(host) => (host.as_str(), self.port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| {
                    IoError::new(ErrorKind::AddrNotAvailable, "hostname did not resolve")
                }),
        }
    }
}

impl TcpServer {
    pub fn builder() -> TcpServerBuilder {
        TcpServerBuilder::new()
    }

    /// The address the listening socket is bound to. With port 0 this is
    /// the ephemeral port the OS picked.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A clone of the chain attached to every accepted channel.
    pub fn default_chain(&self) -> HandlerChain {
        lock(&self.default_chain).clone()
    }

    /// Unregisters and closes the listening socket, fires
    /// [`ServerHandler::on_stop`](crate::ServerHandler::on_stop) and signals
    /// completion. Idempotent. Channels accepted earlier keep running.
    pub fn stop(&self) {
        if self.shutdown() {
            if let Some(this) = self.selfref.upgrade() {
                self.handler.on_stop(&this);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.completion.is_done()
    }

    /// Blocks the calling thread until the server stops.
    pub fn wait(&self) {
        self.completion.wait();
    }

    /// Blocks until the server stops or the timeout elapses. Returns
    /// `false` on timeout, leaving the server running.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.completion.wait_timeout(timeout)
    }

    /// Closes the listener exactly once. Returns `true` if this call
    /// performed the shutdown.
    fn shutdown(&self) -> bool {
        let released = {
            let mut state = lock(&self.state);
            let registered = state.registered;
            state.listener.take().map(|listener| (listener, registered))
        };

        match released {
            Some((mut listener, registered)) => {
                if registered {
                    if let Err(error) = self.reactor.context().registry().deregister(&mut listener)
                    {
                        warn!("Failed to de-register: {:?}", error);
                    }
                }
                if let Err(error) = self.reactor.context().remove(self.token) {
                    debug!("Failed to drop {:?} from the reactor: {:?}", self.token, error);
                }
                self.completion.done();
                true
            }
            None => false,
        }
    }

    /// Accepts every pending connection. The poll is edge-triggered, so the
    /// listener must be drained until it would block, or connections would
    /// be left unserved until the next arrival.
    fn accept_ready(&self) {
        let this = match self.selfref.upgrade() {
            Some(this) => this,
            None => return,
        };

        loop {
            let accepted = {
                let mut state = lock(&self.state);
                match state.listener.as_mut() {
                    Some(listener) => listener.accept(),
                    None => return,
                }
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!("Connection received: {:?}", peer);
                    let chain = lock(&self.default_chain).clone();
                    let channel = TcpChannel::new(&self.reactor, stream, chain);
                    self.handler.on_new_channel(&this, &channel);
                    if let Err(error) = channel.start() {
                        warn!("Failed to start channel for {:?}: {:?}", peer, error);
                    }
                }
                Err(error) => match error.kind() {
                    ErrorKind::WouldBlock => return,
                    ErrorKind::Interrupted => (),
                    _ => {
                        let error = TcpError::from(error);
                        self.handler.on_error(&this, &error);
                        self.shutdown();
                        return;
                    }
                },
            }
        }
    }
}

impl Selectable for TcpServer {
    fn apply(&self, registry: &Registry, token: Token) -> IoResult<()> {
        let mut state = lock(&self.state);
        let registered = state.registered;
        match state.listener.as_mut() {
            Some(listener) => {
                if registered {
                    registry.reregister(listener, token, Interest::READABLE)
                } else {
                    registry.register(listener, token, Interest::READABLE)?;
                    state.registered = true;
                    Ok(())
                }
            }
            None => Err(IoError::new(ErrorKind::NotConnected, "server is stopped")),
        }
    }

    fn signal(&self, signal: Signal) {
        if signal.is_readable() {
            self.accept_ready();
        }
    }

    fn failed(&self, error: TcpError) {
        if let Some(this) = self.selfref.upgrade() {
            self.handler.on_error(&this, &error);
        }
        self.shutdown();
    }
}
