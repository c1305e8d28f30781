//! The interface between ranging and the transceiver driver
//!
//! Ranging doesn't talk to the DW1000 directly. It needs a handful of
//! operations on the transmit and receive buffers and the timing registers,
//! described by [`Transceiver`]. In the other direction, the driver's
//! interrupt handling reports radio events to ranging through
//! [`EventHandler`].

use ieee802154::mac::{PanId, ShortAddress};

use crate::time::{Duration, Instant};


/// Outcome of starting a transmission
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxStart {
    /// The transmission has been started, or scheduled
    Started,

    /// The transceiver refused the transmission
    ///
    /// This typically means a delayed transmission time has already passed
    /// when the transmission was started.
    Rejected,
}

/// The transceiver operations ranging relies on
///
/// All timestamps are in the transceiver's 40-bit system time. Operations
/// that could fail on the bus return `Self::Error`.
pub trait Transceiver {
    /// Error reported by the driver
    type Error;

    /// Returns the PAN ID and short address the transceiver is configured
    /// with
    fn address(&mut self) -> Result<(PanId, ShortAddress), Self::Error>;

    /// Returns the transmit antenna delay, in units of 4 ticks
    fn tx_antenna_delay(&mut self) -> Result<Duration, Self::Error>;

    /// Returns the frame control field of the last received frame
    fn rx_frame_control(&mut self) -> Result<u16, Self::Error>;

    /// Returns the length of the last received frame, without the FCS
    fn rx_frame_len(&mut self) -> Result<usize, Self::Error>;

    /// Copies from the receive buffer, starting at `offset`
    fn read_rx(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Copies into the transmit buffer, starting at `offset`
    fn write_tx(&mut self, offset: usize, data: &[u8]) -> Result<(), Self::Error>;

    /// Sets the length and buffer offset of the next frame
    ///
    /// `ranging` marks the frame as a ranging frame, so the transceiver
    /// timestamps it precisely.
    fn write_tx_fctrl(
        &mut self,
        len: usize,
        offset: usize,
        ranging: bool,
    ) -> Result<(), Self::Error>;

    /// Configures whether the receiver turns on after the next transmission
    fn set_wait_for_response(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Sets the receive timeout used after the next transmission
    fn set_rx_timeout(&mut self, period: u16) -> Result<(), Self::Error>;

    /// Makes the next transmission a delayed one, starting at `time`
    fn set_delay_start(&mut self, time: Instant) -> Result<(), Self::Error>;

    /// Starts the transmission that was set up
    fn start_tx(&mut self) -> Result<TxStart, Self::Error>;

    /// Returns the full reception timestamp of the last received frame
    fn read_rx_time(&mut self) -> Result<Instant, Self::Error>;

    /// Returns the low 32 bits of the last transmission timestamp
    fn read_tx_time_lo(&mut self) -> Result<u32, Self::Error>;

    /// Returns the low 32 bits of the last reception timestamp
    fn read_rx_time_lo(&mut self) -> Result<u32, Self::Error>;
}

/// Receives the radio events the ranging state machine reacts to
///
/// The driver calls these from its interrupt handling. All methods take
/// `&self`, as events may arrive while a request is waiting.
pub trait EventHandler {
    /// A transmission has completed
    fn on_tx_complete(&self);

    /// A frame has been received
    fn on_rx_complete(&self);

    /// Nothing was received within the receive timeout
    fn on_rx_timeout(&self);

    /// A frame was received, but corrupted
    fn on_rx_error(&self);
}
