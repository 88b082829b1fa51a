/*
 * evtcp - reactor-driven TcpServer/TcpChannel with handler-chain dispatch
 * This is free and unencumbered software released into the public domain.
 */

//! **evtcp** provides a single-threaded-reactor, ***non-blocking*** TCP
//! networking engine: a listening socket accepts connections, a reactor
//! thread waits for readiness on many sockets at once, and per-connection
//! state machines turn raw readiness events into buffered byte streams
//! delivered to user-supplied handlers.
//!
//! The readiness multiplexing is built on the [**`mio`**](mio) library, but
//! thanks to **evtcp** you won't have to bother with `mio` events or the
//! event polling mechanism at all: implement a [`Handler`] (every capability
//! has a no-op default), chain it into a [`HandlerChain`], and the engine
//! drives it. The engine exposes raw byte streams only – there is no
//! protocol framing, no TLS and no codec layer.
//!
//! # Usage
//!
//! First of all, a [`evtcp_rs::TcpReactor`](TcpReactor) instance must be
//! created; this spawns the thread that owns the multiplexer. Then a
//! [`evtcp_rs::TcpServer`](TcpServer) can be configured via
//! [`TcpServer::builder()`](TcpServer::builder) and started on that reactor.
//! Each accepted connection is handed to the server's
//! [`evtcp_rs::ServerHandler`](ServerHandler) as a
//! [`evtcp_rs::TcpChannel`](TcpChannel), whose inbound bytes arrive in a
//! segmented [`evtcp_rs::Buffer`](Buffer) through the channel's handler
//! chain. Writes are buffered and drained under write-interest backpressure.
//!
//! Handlers run on the reactor thread and must not block: a stalled handler
//! stalls every channel sharing the reactor.
//!
//! # Examples
//!
//! A runnable echo server can be found in the `demos` sub-directory.

mod buffer;
mod channel;
mod error;
mod handler;
mod reactor;
mod server;
mod signal;
mod utilities;

pub use buffer::Buffer;
pub use channel::TcpChannel;
pub use error::TcpError;
pub use handler::{Handler, HandlerChain, ServerHandler};
pub use reactor::TcpReactor;
pub use server::{TcpServer, TcpServerBuilder};
pub use signal::CompletionSignal;
