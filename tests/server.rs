/*
 * evtcp - reactor-driven TcpServer/TcpChannel with handler-chain dispatch
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use evtcp_rs::{
    Buffer, Handler, HandlerChain, ServerHandler, TcpChannel, TcpError, TcpReactor, TcpServer,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

#[derive(Debug, PartialEq)]
enum Event {
    Started,
    Inbound(Vec<u8>),
    Stopped,
    Errored(String),
}

/// Records every channel event; optionally echoes inbound data back.
struct Recorder {
    events: Sender<Event>,
    echo: bool,
}

impl Handler for Recorder {
    fn on_start(&self, _channel: &Arc<TcpChannel>) -> Result<(), TcpError> {
        self.events.send(Event::Started).ok();
        Ok(())
    }

    fn on_inbound(&self, channel: &Arc<TcpChannel>, buffer: &mut Buffer) -> Result<(), TcpError> {
        let mut data = Vec::new();
        buffer.read_to_end(&mut data).map_err(TcpError::from)?;
        if self.echo {
            channel.write(&data)?;
        }
        self.events.send(Event::Inbound(data)).ok();
        Ok(())
    }

    fn on_stop(&self, _channel: &Arc<TcpChannel>) {
        self.events.send(Event::Stopped).ok();
    }

    fn on_error(&self, _channel: &Arc<TcpChannel>, error: &TcpError) {
        self.events.send(Event::Errored(error.to_string())).ok();
    }
}

/// Hands every accepted channel out of the reactor thread.
struct Capture {
    channels: Sender<Arc<TcpChannel>>,
}

impl ServerHandler for Capture {
    fn on_new_channel(&self, _server: &Arc<TcpServer>, channel: &Arc<TcpChannel>) {
        self.channels.send(channel.clone()).ok();
    }
}

fn connect(server: &Arc<TcpServer>) -> TcpStream {
    let client = TcpStream::connect(server.local_addr()).expect("failed to connect");
    client.set_read_timeout(Some(TIMEOUT)).unwrap();
    client
}

/// Collects inbound events until `count` bytes arrived; TCP is free to
/// deliver the payload in as many chunks as it likes.
fn recv_bytes(events: &Receiver<Event>, count: usize) -> Vec<u8> {
    let mut data = Vec::new();
    while data.len() < count {
        match events.recv_timeout(TIMEOUT).expect("timed out waiting for inbound data") {
            Event::Inbound(chunk) => data.extend_from_slice(&chunk),
            other => panic!("unexpected event: {:?}", other),
        }
    }
    data
}

#[test]
fn echo_round_trip_keeps_channel_running() {
    let reactor = TcpReactor::new().unwrap();
    let (events_tx, events_rx) = unbounded();
    let (channels_tx, channels_rx) = unbounded();

    let server = TcpServer::builder()
        .host("127.0.0.1")
        .port(0)
        .server_handler(Capture { channels: channels_tx })
        .default_chain(HandlerChain::of(Recorder { events: events_tx, echo: true }))
        .start(&reactor)
        .unwrap();

    let mut client = connect(&server);
    client.write_all(b"ping").unwrap();

    let mut reply = [0u8; 4];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"ping");

    assert_eq!(events_rx.recv_timeout(TIMEOUT).unwrap(), Event::Started);
    assert_eq!(recv_bytes(&events_rx, 4), b"ping");

    let channel = channels_rx.recv_timeout(TIMEOUT).unwrap();
    assert!(channel.is_running());
    assert!(channel.peer_addr().is_some());
    assert!(channel.local_addr().is_some());

    server.stop();
    reactor.stop().unwrap();
    reactor.wait();
}

#[test]
fn peer_close_stops_the_channel_exactly_once() {
    let reactor = TcpReactor::new().unwrap();
    let (events_tx, events_rx) = unbounded();
    let (channels_tx, channels_rx) = unbounded();

    let server = TcpServer::builder()
        .host("127.0.0.1")
        .port(0)
        .server_handler(Capture { channels: channels_tx })
        .default_chain(HandlerChain::of(Recorder { events: events_tx, echo: false }))
        .start(&reactor)
        .unwrap();

    let mut client = connect(&server);
    client.write_all(b"bye").unwrap();
    client.shutdown(Shutdown::Write).unwrap();

    assert_eq!(events_rx.recv_timeout(TIMEOUT).unwrap(), Event::Started);
    assert_eq!(recv_bytes(&events_rx, 3), b"bye");
    assert_eq!(events_rx.recv_timeout(TIMEOUT).unwrap(), Event::Stopped);

    let channel = channels_rx.recv_timeout(TIMEOUT).unwrap();
    assert!(!channel.is_running());
    assert!(matches!(channel.write(b"x"), Err(TcpError::Closed)));

    // stopping an already closed channel is a no-op: no second on_stop
    channel.stop();
    channel.stop();
    assert!(events_rx.recv_timeout(QUIET).is_err());

    server.stop();
    reactor.stop().unwrap();
    reactor.wait();
}

#[test]
fn backpressure_drains_large_writes_completely() {
    let payload: Arc<Vec<u8>> = Arc::new((0..1_000_000u32).map(|i| (i % 251) as u8).collect());

    struct Blaster {
        payload: Arc<Vec<u8>>,
    }

    impl Handler for Blaster {
        fn on_start(&self, channel: &Arc<TcpChannel>) -> Result<(), TcpError> {
            channel.write(&self.payload)
        }
    }

    let reactor = TcpReactor::new().unwrap();
    let server = TcpServer::builder()
        .host("127.0.0.1")
        .port(0)
        .default_chain(HandlerChain::of(Blaster { payload: payload.clone() }))
        .start(&reactor)
        .unwrap();

    let mut client = connect(&server);
    client.set_read_timeout(Some(Duration::from_secs(30))).unwrap();
    // give the kernel buffers time to fill up, forcing short writes
    thread::sleep(Duration::from_millis(300));

    let mut received = vec![0u8; payload.len()];
    client.read_exact(&mut received).unwrap();
    assert_eq!(&received, payload.as_ref());

    server.stop();
    reactor.stop().unwrap();
    reactor.wait();
}

#[test]
fn chain_dispatches_inbound_forward_and_outbound_reverse() {
    struct Tag {
        name: &'static str,
        log: Sender<String>,
        echo: bool,
    }

    impl Handler for Tag {
        fn on_inbound(&self, channel: &Arc<TcpChannel>, buffer: &mut Buffer) -> Result<(), TcpError> {
            self.log.send(format!("in:{}", self.name)).ok();
            if self.echo {
                channel.write_buffer(buffer)?;
            }
            Ok(())
        }

        fn on_outbound(&self, _channel: &Arc<TcpChannel>, _buffer: &mut Buffer) -> Result<(), TcpError> {
            self.log.send(format!("out:{}", self.name)).ok();
            Ok(())
        }
    }

    let reactor = TcpReactor::new().unwrap();
    let (log_tx, log_rx) = unbounded();

    let mut chain = HandlerChain::new();
    chain.append(Tag { name: "a", log: log_tx.clone(), echo: false });
    chain.append(Tag { name: "b", log: log_tx, echo: true });

    let server = TcpServer::builder()
        .host("127.0.0.1")
        .port(0)
        .default_chain(chain)
        .start(&reactor)
        .unwrap();

    let mut client = connect(&server);
    client.write_all(b"x").unwrap();
    let mut reply = [0u8; 1];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"x");

    let mut order = Vec::new();
    for _ in 0..4 {
        order.push(log_rx.recv_timeout(TIMEOUT).unwrap());
    }
    assert_eq!(order, ["in:a", "in:b", "out:b", "out:a"]);

    server.stop();
    reactor.stop().unwrap();
    reactor.wait();
}

#[test]
fn on_new_channel_can_replace_the_chain() {
    struct Replacer {
        events: Sender<Event>,
        channels: Sender<Arc<TcpChannel>>,
    }

    impl ServerHandler for Replacer {
        fn on_new_channel(&self, _server: &Arc<TcpServer>, channel: &Arc<TcpChannel>) {
            channel.set_chain(HandlerChain::new());
            channel.append_handler(Recorder {
                events: self.events.clone(),
                echo: true,
            });
            self.channels.send(channel.clone()).ok();
        }
    }

    let reactor = TcpReactor::new().unwrap();
    let (events_tx, events_rx) = unbounded();
    let (channels_tx, channels_rx) = unbounded();

    // the default chain stays empty; the server handler swaps it per channel
    let server = TcpServer::builder()
        .host("127.0.0.1")
        .port(0)
        .server_handler(Replacer { events: events_tx, channels: channels_tx })
        .start(&reactor)
        .unwrap();
    assert!(server.default_chain().is_empty());

    let mut client = connect(&server);
    client.write_all(b"swap").unwrap();
    let mut reply = [0u8; 4];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"swap");

    assert_eq!(events_rx.recv_timeout(TIMEOUT).unwrap(), Event::Started);
    let channel = channels_rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(channel.chain().len(), 1);

    server.stop();
    reactor.stop().unwrap();
    reactor.wait();
}

#[test]
fn timed_wait_expires_without_stopping_the_server() {
    struct Lifecycle {
        log: Sender<&'static str>,
    }

    impl ServerHandler for Lifecycle {
        fn on_start(&self, _server: &Arc<TcpServer>) {
            self.log.send("start").ok();
        }

        fn on_stop(&self, _server: &Arc<TcpServer>) {
            self.log.send("stop").ok();
        }
    }

    let reactor = TcpReactor::new().unwrap();
    let (log_tx, log_rx) = unbounded();
    let server = TcpServer::builder()
        .host("127.0.0.1")
        .port(0)
        .server_handler(Lifecycle { log: log_tx })
        .start(&reactor)
        .unwrap();

    assert_eq!(log_rx.recv_timeout(TIMEOUT).unwrap(), "start");
    assert!(!server.wait_timeout(Duration::from_millis(100)));
    assert!(server.is_running());

    let waiter = {
        let server = server.clone();
        thread::spawn(move || server.wait())
    };
    thread::sleep(Duration::from_millis(50));
    server.stop();
    waiter.join().unwrap();

    assert!(!server.is_running());
    assert!(server.wait_timeout(Duration::from_millis(1)));
    assert_eq!(log_rx.recv_timeout(TIMEOUT).unwrap(), "stop");

    // stopping again changes nothing
    server.stop();
    assert!(log_rx.recv_timeout(QUIET).is_err());

    reactor.stop().unwrap();
    reactor.wait();
}

#[test]
fn handler_fault_closes_the_channel_with_on_error() {
    struct Faulty {
        events: Sender<Event>,
    }

    impl Handler for Faulty {
        fn on_inbound(&self, _channel: &Arc<TcpChannel>, _buffer: &mut Buffer) -> Result<(), TcpError> {
            Err(TcpError::handler("poisoned payload"))
        }

        fn on_stop(&self, _channel: &Arc<TcpChannel>) {
            self.events.send(Event::Stopped).ok();
        }

        fn on_error(&self, _channel: &Arc<TcpChannel>, error: &TcpError) {
            self.events.send(Event::Errored(error.to_string())).ok();
        }
    }

    let reactor = TcpReactor::new().unwrap();
    let (events_tx, events_rx) = unbounded();
    let (channels_tx, channels_rx) = unbounded();

    let server = TcpServer::builder()
        .host("127.0.0.1")
        .port(0)
        .server_handler(Capture { channels: channels_tx })
        .default_chain(HandlerChain::of(Faulty { events: events_tx }))
        .start(&reactor)
        .unwrap();

    let mut client = connect(&server);
    client.write_all(b"x").unwrap();

    match events_rx.recv_timeout(TIMEOUT).unwrap() {
        Event::Errored(message) => assert!(message.contains("poisoned payload")),
        other => panic!("unexpected event: {:?}", other),
    }
    // the fault force-closed the channel; on_stop never fires
    assert!(events_rx.recv_timeout(QUIET).is_err());

    let channel = channels_rx.recv_timeout(TIMEOUT).unwrap();
    assert!(!channel.is_running());

    server.stop();
    reactor.stop().unwrap();
    reactor.wait();
}

#[test]
fn starting_on_a_stopped_reactor_fails() {
    let reactor = TcpReactor::new().unwrap();
    reactor.stop().unwrap();
    reactor.wait();

    let result = TcpServer::builder().host("127.0.0.1").port(0).start(&reactor);
    assert!(matches!(result, Err(TcpError::Closed)));
}
