//! Session configuration

use core::time::Duration;

use serde::{Deserialize, Serialize};


/// Ranging session configuration
///
/// Applied with [`RangingSession::new`], [`RangingSession::init`] or
/// [`RangingSession::configure`].
///
/// [`RangingSession::new`]: ../struct.RangingSession.html#method.new
/// [`RangingSession::init`]: ../struct.RangingSession.html#method.init
/// [`RangingSession::configure`]: ../struct.RangingSession.html#method.configure
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long to listen for a reply after transmitting a frame that expects
    /// one, in the transceiver's receive timeout units
    pub rx_timeout_period: u16,

    /// Delay between receiving a frame and transmitting the reply to it, in
    /// units of 2^15 system time ticks
    pub tx_holdoff_delay: u32,

    /// How long an initiator waits for its exchange to complete
    ///
    /// This is a backstop for events that never arrive. An exchange that
    /// isn't completed in time is reported with
    /// [`Status::request_timeout`](crate::Status::request_timeout) set.
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            rx_timeout_period: 0x1000,
            tx_holdoff_delay: 0x0800,
            request_timeout: Duration::from_secs(10),
        }
    }
}
