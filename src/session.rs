use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};
use ieee802154::mac::{PanId, ShortAddress};
use serde::{Deserialize, Serialize};

use crate::{
    config::SessionConfig,
    dispatch::Step,
    driver::{EventHandler, Transceiver, TxStart},
    error::Error,
    fmt::{debug, info, trace, warn},
    frame::{ExchangeRecord, Mode, RequestFrame, ResponseFrame, RANGING_FRAME_CONTROL},
    sync::Rendezvous,
    time::{Duration, Instant},
};


/// Outcome flags of the latest exchange
///
/// Cleared when a request starts. On a node that only responds, flags
/// accumulate until the node starts a request itself.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    /// The exchange didn't complete within the request timeout
    pub request_timeout: bool,

    /// A corrupted frame was received, or the driver failed while handling
    /// a received frame
    pub rx_error: bool,

    /// No reply was received within the receive timeout
    pub rx_timeout_error: bool,

    /// The transceiver refused to start a transmission
    pub start_tx_error: bool,
}

impl Status {
    /// Whether no flag is set
    pub fn is_ok(&self) -> bool {
        !(self.request_timeout || self.rx_error || self.rx_timeout_error || self.start_tx_error)
    }
}


/// A two-way ranging session on one transceiver
///
/// The session owns the transceiver and `N` exchange records. Use `N = 1` for
/// single-sided ranging only, `N = 2` to support symmetric double-sided
/// ranging as well.
///
/// The transceiver driver reports radio events through the session's
/// [`EventHandler`] implementation, usually from an interrupt handler.
/// Applications start exchanges with [`request`], which blocks until the
/// exchange completes or fails.
///
/// `M` is the raw mutex protecting the session state against the event
/// handler. Use `CriticalSectionRawMutex` if events are handled in interrupt
/// context.
///
/// [`request`]: #method.request
pub struct RangingSession<M, R, Z, const N: usize>
where
    M: RawMutex,
    R: Transceiver,
{
    pub(crate) inner: Mutex<M, RefCell<Inner<R, N>>>,
    pub(crate) rendezvous: Z,
}

pub(crate) struct Inner<R, const N: usize> {
    pub(crate) radio: R,
    pub(crate) records: [ExchangeRecord; N],
    pub(crate) config: SessionConfig,
    pub(crate) status: Status,
    pub(crate) initialized: bool,
    pub(crate) pan_id: PanId,
    pub(crate) address: ShortAddress,
    pub(crate) tx_antenna_delay: Duration,
}

impl<M, R, Z, const N: usize> RangingSession<M, R, Z, N>
where
    M: RawMutex,
    R: Transceiver,
    Z: Rendezvous,
{
    /// Creates an initialized session
    ///
    /// Reads the PAN ID, short address and antenna delay from the
    /// transceiver. Uses the default configuration, if `config` is `None`.
    pub fn new(
        mut radio: R,
        rendezvous: Z,
        config: Option<SessionConfig>,
    ) -> Result<Self, Error<R::Error>> {
        let (pan_id, address) = radio.address()?;
        let tx_antenna_delay = radio.tx_antenna_delay()?;

        info!(
            "Ranging session for {:#x} on PAN {:#x}",
            address.0, pan_id.0
        );

        let inner = Inner {
            radio,
            records: [ExchangeRecord::default(); N],
            config: config.unwrap_or_default(),
            status: Status::default(),
            initialized: true,
            pan_id,
            address,
            tx_antenna_delay,
        };

        Ok(RangingSession {
            inner: Mutex::new(RefCell::new(inner)),
            rendezvous,
        })
    }

    /// Initializes the session again
    ///
    /// Re-reads the device parameters from the transceiver and applies
    /// `config`, if given. Exchange records and the configuration are kept
    /// otherwise. Calling this on an initialized session is harmless.
    ///
    /// A completion signal left over from earlier exchanges is cleared.
    pub fn init(&self, config: Option<SessionConfig>) -> Result<(), Error<R::Error>> {
        self.rendezvous.reset();

        self.with_inner(|inner| -> Result<(), Error<R::Error>> {
            let (pan_id, address) = inner.radio.address()?;
            inner.tx_antenna_delay = inner.radio.tx_antenna_delay()?;
            inner.pan_id = pan_id;
            inner.address = address;

            if let Some(config) = config {
                inner.config = config;
            }
            inner.initialized = true;

            Ok(())
        })
    }

    /// Replaces the configuration
    ///
    /// Takes effect with the next frame the session sends.
    pub fn configure(&self, config: SessionConfig) {
        self.with_inner(|inner| inner.config = config)
    }

    /// Returns the active configuration
    pub fn config(&self) -> SessionConfig {
        self.with_inner(|inner| inner.config)
    }

    /// Marks the session as uninitialized
    ///
    /// Received frames are ignored and requests are refused until
    /// [`init`](#method.init) is called again.
    pub fn free(&self) {
        self.with_inner(|inner| inner.initialized = false)
    }

    /// Whether the session is initialized
    pub fn is_initialized(&self) -> bool {
        self.with_inner(|inner| inner.initialized)
    }

    /// Tears down the session, returning the transceiver and the rendezvous
    pub fn into_parts(self) -> (R, Z) {
        (self.inner.into_inner().into_inner().radio, self.rendezvous)
    }

    /// Installs exchange record templates
    ///
    /// Header fields that the session doesn't overwrite, like the frame
    /// control of later legs, are taken from these templates.
    pub fn set_records(&self, records: [ExchangeRecord; N]) {
        self.with_inner(|inner| inner.records = records)
    }

    /// Returns a copy of all exchange records
    pub fn records(&self) -> [ExchangeRecord; N] {
        self.with_inner(|inner| inner.records)
    }

    /// Returns a copy of one exchange record, if `slot` exists
    pub fn record(&self, slot: usize) -> Option<ExchangeRecord> {
        self.with_inner(|inner| inner.records.get(slot).copied())
    }

    /// Returns the status flags
    pub fn status(&self) -> Status {
        self.with_inner(|inner| inner.status)
    }

    /// Gives `f` access to the transceiver
    ///
    /// Runs inside the session's critical section. Don't call back into the
    /// session from `f`.
    pub fn with_radio<U>(&self, f: impl FnOnce(&mut R) -> U) -> U {
        self.with_inner(|inner| f(&mut inner.radio))
    }

    /// Performs a ranging exchange with `dst_address`
    ///
    /// Sends the request, then blocks until the exchange completes, fails, or
    /// the configured request timeout passes. Only one exchange is in flight
    /// at a time. A concurrent call blocks until the current exchange is
    /// over.
    ///
    /// Failures of the exchange itself are reported through the returned
    /// [`Status`]. After a failed exchange the sequence number is rolled
    /// back, so the next request reuses it.
    ///
    /// Returns an error if the driver fails, the session isn't initialized,
    /// or `mode` needs more exchange records than the session has.
    pub fn request(
        &self,
        dst_address: ShortAddress,
        mode: Mode,
    ) -> Result<Status, Error<R::Error>> {
        if mode.slots() > N {
            return Err(Error::UnsupportedMode(mode));
        }

        self.rendezvous.lock();
        self.rendezvous.reset();

        let step = match self.with_inner(|inner| inner.start_request(dst_address, mode)) {
            Ok(step) => step,
            Err(error) => {
                self.rendezvous.unlock();
                return Err(error);
            }
        };

        let timed_out = match step {
            Step::Sent(_) => self.rendezvous.wait(self.config().request_timeout).is_err(),
            _ => false,
        };

        let status = self.with_inner(|inner| inner.finish_request(timed_out));
        self.rendezvous.unlock();

        Ok(status)
    }

    /// Returns the event handler to register with the transceiver driver
    pub fn events(&self) -> &dyn EventHandler {
        self
    }

    pub(crate) fn with_inner<U>(&self, f: impl FnOnce(&mut Inner<R, N>) -> U) -> U {
        self.inner.lock(|inner| f(&mut inner.borrow_mut()))
    }
}

impl<R, const N: usize> Inner<R, N>
where
    R: Transceiver,
{
    fn start_request(
        &mut self,
        dst_address: ShortAddress,
        mode: Mode,
    ) -> Result<Step, Error<R::Error>> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }

        for record in self.records.iter_mut() {
            record.reset();
        }
        self.status = Status::default();

        let record = &mut self.records[0];
        record.request = RequestFrame {
            frame_control: RANGING_FRAME_CONTROL,
            seq_num: record.request.seq_num.wrapping_add(1),
            pan_id: self.pan_id,
            dst_address,
            src_address: self.address,
            code: mode.request_code(),
        };
        record.response = ResponseFrame::from_header(record.request, 0, 0);
        let request = record.request;

        trace!(
            "Requesting {:?} ranging with {:#x}, seq {}",
            mode,
            dst_address.0,
            request.seq_num
        );

        let mut buffer = [0; RequestFrame::LEN];
        let result = request
            .encode(&mut buffer)
            .map_err(Error::Frame)
            .and_then(|len| self.transmit(&buffer[..len], None, true));

        match result {
            Ok(start) => Ok(Step::sent(request.code, start)),
            Err(error) => {
                self.rollback();
                Err(error)
            }
        }
    }

    fn finish_request(&mut self, timed_out: bool) -> Status {
        if timed_out {
            warn!("Ranging request timed out");
            self.status.request_timeout = true;
        }

        if !self.status.is_ok() {
            debug!("Exchange failed: {:?}", self.status);
            self.rollback();
        }

        self.status
    }

    fn rollback(&mut self) {
        let request = &mut self.records[0].request;
        request.seq_num = request.seq_num.wrapping_sub(1);
    }

    /// Sends `frame`, immediately or at `delayed`
    ///
    /// If `expect_reply` is set, the receiver turns on after the transmission
    /// and times out after the configured period.
    pub(crate) fn transmit(
        &mut self,
        frame: &[u8],
        delayed: Option<Instant>,
        expect_reply: bool,
    ) -> Result<TxStart, Error<R::Error>> {
        self.radio.write_tx(0, frame)?;
        self.radio.write_tx_fctrl(frame.len(), 0, true)?;
        self.radio.set_wait_for_response(expect_reply)?;
        if let Some(time) = delayed {
            self.radio.set_delay_start(time)?;
        }
        if expect_reply {
            self.radio.set_rx_timeout(self.config.rx_timeout_period)?;
        }

        let start = self.radio.start_tx()?;
        if start == TxStart::Rejected {
            warn!("Transceiver refused to start transmission");
            self.status.start_tx_error = true;
        }

        Ok(start)
    }

    fn sent_final(&self) -> bool {
        let single_sided = self.records[0].code() == Mode::SingleSided.final_code();
        let double_sided = self
            .records
            .get(1)
            .map_or(false, |record| record.code() == Mode::DoubleSided.final_code());

        self.initialized && (single_sided || double_sided)
    }
}

impl<M, R, Z, const N: usize> EventHandler for RangingSession<M, R, Z, N>
where
    M: RawMutex,
    R: Transceiver,
    Z: Rendezvous,
{
    fn on_tx_complete(&self) {
        if self.with_inner(|inner| inner.sent_final()) {
            trace!("Final message sent");
            self.rendezvous.signal();
        }
    }

    fn on_rx_complete(&self) {
        if self.handle_rx().is_err() {
            warn!("Driver error while handling received frame");
            self.with_inner(|inner| inner.status.rx_error = true);
            self.rendezvous.signal();
        }
    }

    fn on_rx_timeout(&self) {
        debug!("Receive timeout");
        self.with_inner(|inner| inner.status.rx_timeout_error = true);
        self.rendezvous.signal();
    }

    fn on_rx_error(&self) {
        debug!("Receive error");
        self.with_inner(|inner| inner.status.rx_error = true);
        self.rendezvous.signal();
    }
}
