/*
 * evtcp - reactor-driven TcpServer/TcpChannel with handler-chain dispatch
 * This is free and unencumbered software released into the public domain.
 */
mod flag;
mod misc;

pub(crate) use flag::Flag;
pub(crate) use misc::{always, lock};
