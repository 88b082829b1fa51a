/*
 * evtcp - reactor-driven TcpServer/TcpChannel with handler-chain dispatch
 * This is free and unencumbered software released into the public domain.
 */
use std::sync::Arc;

use crate::{Buffer, TcpChannel, TcpError, TcpServer};

/// Byte-stream event consumer bound to a [`TcpChannel`](crate::TcpChannel)
///
/// Every capability has a no-op default, so a handler implements only what
/// it needs. All callbacks run on the reactor thread that owns the channel;
/// they must not block or perform long computation, since doing so stalls
/// every other channel sharing the reactor.
///
/// `on_start`, `on_inbound` and `on_outbound` are fallible: an `Err`
/// escaping one of them is treated as a fault on the owning channel, which
/// routes to [`on_error`](Handler::on_error) and force-closes the channel.
pub trait Handler: Send + Sync {
    /// Invoked once the channel is registered and about to enter service.
    fn on_start(&self, _channel: &Arc<TcpChannel>) -> Result<(), TcpError> {
        Ok(())
    }

    /// Invoked with the inbound buffer whenever freshly received bytes are
    /// available. The handler may `mark()`/`reset()` the buffer to peek;
    /// any mark still set when the callback returns is discarded.
    fn on_inbound(&self, _channel: &Arc<TcpChannel>, _buffer: &mut Buffer) -> Result<(), TcpError> {
        Ok(())
    }

    /// Invoked with the outbound buffer right before it is drained to the
    /// socket – the last chance to transform or append data. Append through
    /// the provided buffer; calling [`TcpChannel::write`] from inside this
    /// callback is not supported.
    fn on_outbound(&self, _channel: &Arc<TcpChannel>, _buffer: &mut Buffer) -> Result<(), TcpError> {
        Ok(())
    }

    /// Invoked exactly once when the channel closes gracefully (peer close
    /// or local stop).
    fn on_stop(&self, _channel: &Arc<TcpChannel>) {}

    /// Invoked exactly once when the channel is force-closed by a fault.
    fn on_error(&self, _channel: &Arc<TcpChannel>, _error: &TcpError) {}
}

/// Lifecycle event consumer bound to a [`TcpServer`](crate::TcpServer)
///
/// All capabilities are optional. The server attaches its default
/// [`HandlerChain`] to every accepted channel *before*
/// [`on_new_channel`](ServerHandler::on_new_channel) runs, so the default
/// implementation needs to do nothing; override it to replace the chain via
/// [`TcpChannel::set_chain`] or to track connections.
pub trait ServerHandler: Send + Sync {
    fn on_start(&self, _server: &Arc<TcpServer>) {}

    fn on_new_channel(&self, _server: &Arc<TcpServer>, _channel: &Arc<TcpChannel>) {}

    fn on_stop(&self, _server: &Arc<TcpServer>) {}

    fn on_error(&self, _server: &Arc<TcpServer>, _error: &TcpError) {}
}

/// An ordered pipeline of [`Handler`]s bound to one channel
///
/// Inbound events visit the handlers in chain order, outbound events in
/// reverse order; every handler runs on every event – no handler can
/// short-circuit a later one. Cloning a chain is cheap (the handlers
/// themselves are shared), which is how a server's default chain is handed
/// to each accepted channel.
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a chain holding a single handler.
    pub fn of<H: Handler + 'static>(handler: H) -> Self {
        let mut chain = Self::new();
        chain.append(handler);
        chain
    }

    pub fn append<H: Handler + 'static>(&mut self, handler: H) {
        self.handlers.push(Arc::new(handler));
    }

    /// Inserts a handler at `at`, shifting later handlers towards the tail.
    /// Panics if `at > len()`.
    pub fn insert<H: Handler + 'static>(&mut self, at: usize, handler: H) {
        self.handlers.insert(at, Arc::new(handler));
    }

    /// Removes and returns the handler at `at`. Panics if out of bounds.
    pub fn remove(&mut self, at: usize) -> Arc<dyn Handler> {
        self.handlers.remove(at)
    }

    pub fn get(&self, at: usize) -> Option<Arc<dyn Handler>> {
        self.handlers.get(at).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<dyn Handler>> {
        self.handlers.iter()
    }
}
