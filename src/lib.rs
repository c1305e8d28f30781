//! Two-way ranging for the DW1000 UWB transceiver
//!
//! Measures the time of flight between two nodes by exchanging timestamped
//! frames. Two variants are supported:
//!
//! - Single-sided two-way ranging: request, response, final report. The
//!   initiator learns all four timestamps of the exchange.
//! - Symmetric double-sided two-way ranging: the single-sided exchange is run
//!   once in each direction, which cancels most of the clock drift error.
//!   Uses two exchange records.
//!
//! A [`RangingSession`] sits between an application and a transceiver driver.
//! The driver implements [`Transceiver`] and forwards its radio events to the
//! session's [`EventHandler`] implementation. The application calls
//! [`RangingSession::request`], which blocks until the exchange is over, and
//! then reads the timestamps from the session's [`ExchangeRecord`]s.
//!
//! Every node answers requests addressed to it, whether or not it ever
//! initiates an exchange itself.


#![no_std]

#![deny(missing_docs)]


#[cfg(any(test, feature = "std"))]
extern crate std;


pub mod config;
pub mod driver;
pub mod frame;
pub mod schedule;
pub mod sync;
pub mod time;

mod dispatch;
mod error;
mod fmt;
mod session;

#[cfg(test)]
mod testing;


pub use ieee802154::mac;

pub use crate::{
    config::SessionConfig,
    dispatch::{Ignored, Step},
    driver::{EventHandler, Transceiver, TxStart},
    error::Error,
    frame::{Code, ExchangeRecord, FrameError, Mode, RequestFrame, ResponseFrame},
    session::{RangingSession, Status},
    sync::Rendezvous,
    time::{Duration, Instant, TIME_MAX},
};

#[cfg(any(test, feature = "std"))]
pub use crate::sync::StdRendezvous;
