/*
 * evtcp - reactor-driven TcpServer/TcpChannel with handler-chain dispatch
 * This is free and unencumbered software released into the public domain.
 */
use std::sync::Arc;

use evtcp_rs::{Buffer, Handler, HandlerChain, ServerHandler, TcpChannel, TcpError, TcpReactor, TcpServer};

use log::{error, info, warn};

const PORT_NUMBER: u16 = 8080;
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Writes every received byte straight back to the peer.
struct EchoHandler;

impl Handler for EchoHandler {
    fn on_start(&self, channel: &Arc<TcpChannel>) -> Result<(), TcpError> {
        info!("Connection started: {:?}", channel.peer_addr());
        Ok(())
    }

    fn on_inbound(&self, channel: &Arc<TcpChannel>, buffer: &mut Buffer) -> Result<(), TcpError> {
        channel.write_buffer(buffer)
    }

    fn on_stop(&self, channel: &Arc<TcpChannel>) {
        info!("Connection closed: {:?}", channel.peer_addr());
    }

    fn on_error(&self, _channel: &Arc<TcpChannel>, error: &TcpError) {
        warn!("Connection failed: {}", error);
    }
}

struct LoggingServerHandler;

impl ServerHandler for LoggingServerHandler {
    fn on_start(&self, server: &Arc<TcpServer>) {
        info!("Listening on {:?}", server.local_addr());
    }

    fn on_stop(&self, _server: &Arc<TcpServer>) {
        info!("Server stopped.");
    }

    fn on_error(&self, _server: &Arc<TcpServer>, error: &TcpError) {
        error!("Server failed: {}", error);
    }
}

fn main() {
    /* Initialize the log output */
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    /* Print logo */
    info!("evtcp - Example Echo Server [Version {}]", PKG_VERSION);

    /* Spawn the reactor thread */
    let reactor = match TcpReactor::new() {
        Ok(value) => value,
        Err(error) => return error!("Failed to create reactor: {:?}", error),
    };

    /* Configure and start the server */
    let server = match TcpServer::builder()
        .host("127.0.0.1")
        .port(PORT_NUMBER)
        .server_handler(LoggingServerHandler)
        .default_chain(HandlerChain::of(EchoHandler))
        .start(&reactor)
    {
        Ok(value) => value,
        Err(error) => return error!("Failed to start server: {}", error),
    };

    /* Stop server and reactor on Ctrl+C */
    {
        let server = server.clone();
        let reactor = reactor.clone();
        ctrlc::set_handler(move || {
            warn!("Shutdown has been requested!");
            server.stop();
            if let Err(error) = reactor.stop() {
                warn!("Failed to stop reactor: {:?}", error);
            }
        })
        .expect("Failed to register CTRL+C handler!");
    }

    /* Block until the server has been stopped */
    server.wait();
    reactor.wait();

    info!("Goodbye!");
}
