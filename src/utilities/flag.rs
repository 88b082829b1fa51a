/*
 * evtcp - reactor-driven TcpServer/TcpChannel with handler-chain dispatch
 * This is free and unencumbered software released into the public domain.
 */
use std::io::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::Waker;

use crate::utilities::always;

/// One-way flag backed by a poll waker. Raising the flag interrupts a
/// blocked poll immediately; the flag never resets.
#[derive(Debug)]
pub(crate) struct Flag {
    waker: Arc<Waker>,
    flag: AtomicBool,
}

impl Flag {
    pub fn new(waker: Arc<Waker>) -> Self {
        Self {
            waker,
            flag: AtomicBool::new(false),
        }
    }

    pub fn raise(&self) -> Result<bool> {
        match self.flag.compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => self.waker.wake().map(always),
            Err(_) => Ok(false),
        }
    }

    pub fn check(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
