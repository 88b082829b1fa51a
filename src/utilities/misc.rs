/*
 * evtcp - reactor-driven TcpServer/TcpChannel with handler-chain dispatch
 * This is free and unencumbered software released into the public domain.
 */
use std::sync::{Mutex, MutexGuard, PoisonError};

pub fn always<T>(_: T) -> bool {
    true
}

/// Acquires a mutex, recovering the guard if a panicking thread poisoned it.
/// A poisoned lock must not wedge the remaining entry points of a channel
/// that is about to be force-closed anyway.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
