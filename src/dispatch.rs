//! Handling of received ranging frames
//!
//! Every received frame passes through [`RangingSession::handle_rx`]. The
//! progression code of the frame determines the role the node plays in the
//! current step, and what it does:
//!
//! | Code                        | Role      | Action                                |
//! |-----------------------------|-----------|---------------------------------------|
//! | `SingleSidedRequest`        | responder | send `SingleSidedResponse`, delayed   |
//! | `SingleSidedResponse`       | initiator | send `SingleSidedFinal`               |
//! | `SingleSidedFinal`          | responder | exchange complete                     |
//! | `DoubleSidedRequest`        | responder | send `DoubleSidedFirstResponse`       |
//! | `DoubleSidedFirstResponse`  | initiator | send `DoubleSidedSecondResponse`      |
//! | `DoubleSidedSecondResponse` | responder | send `DoubleSidedFinal`               |
//! | `DoubleSidedFinal`          | initiator | exchange complete                     |
//!
//! Frames that can't be handled are dropped without touching the session.

use core::convert::TryFrom;

use byte::{BytesExt as _, LE};
use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::{
    driver::{Transceiver, TxStart},
    error::Error,
    fmt::{debug, trace, warn},
    frame::{
        self, Code, ExchangeRecord, FrameError, Mode, RequestFrame, ResponseFrame,
        RANGING_FRAME_CONTROL,
    },
    schedule,
    session::{Inner, RangingSession},
    sync::Rendezvous,
};


/// What handling a received frame resulted in
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// A reply with this code was handed to the transceiver
    Sent(Code),

    /// The transceiver refused to send the reply with this code
    TxRejected(Code),

    /// The frame with this code completed the exchange
    Completed(Code),

    /// The frame was dropped
    Ignored(Ignored),
}

impl Step {
    pub(crate) fn sent(code: Code, start: TxStart) -> Self {
        match start {
            TxStart::Started => Step::Sent(code),
            TxStart::Rejected => Step::TxRejected(code),
        }
    }
}

/// Why a received frame was dropped
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ignored {
    /// The session isn't initialized
    Inactive,

    /// The frame control doesn't identify a ranging frame
    ForeignFrame {
        /// Frame control of the received frame
        frame_control: u16,
    },

    /// The frame is addressed to another node
    NotAddressed {
        /// Destination address of the received frame
        dst_address: u16,
    },

    /// The frame is shorter than its progression code requires
    Malformed {
        /// Length of the received frame
        len: usize,
        /// Length the progression code requires
        required_len: usize,
    },

    /// The progression code is not one of the known codes
    UnknownCode(u16),

    /// The progression code is known, but can't be handled here
    UnsupportedCode(Code),
}

impl From<FrameError> for Ignored {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::TooShort { required_len, len } => Ignored::Malformed { len, required_len },
            FrameError::UnknownCode(code) => Ignored::UnknownCode(code),
        }
    }
}

impl<M, R, Z, const N: usize> RangingSession<M, R, Z, N>
where
    M: RawMutex,
    R: Transceiver,
    Z: Rendezvous,
{
    /// Handles the frame the transceiver just received
    ///
    /// This is what [`EventHandler::on_rx_complete`] does. It's exposed
    /// separately, as the returned [`Step`] tells what happened to the frame.
    /// The rendezvous is signaled if the frame completed the exchange, or the
    /// reply to it couldn't be sent.
    ///
    /// [`EventHandler::on_rx_complete`]: crate::EventHandler::on_rx_complete
    pub fn handle_rx(&self) -> Result<Step, Error<R::Error>> {
        let step = self.with_inner(|inner| inner.dispatch())?;

        match step {
            Step::Completed(_) | Step::TxRejected(_) => self.rendezvous.signal(),
            Step::Ignored(reason) => debug!("Ignoring frame: {:?}", reason),
            Step::Sent(_) => {}
        }

        Ok(step)
    }
}

impl<R, const N: usize> Inner<R, N>
where
    R: Transceiver,
{
    fn dispatch(&mut self) -> Result<Step, Error<R::Error>> {
        if !self.initialized {
            return Ok(Step::Ignored(Ignored::Inactive));
        }

        let frame_control = self.radio.rx_frame_control()?;
        let len = self.radio.rx_frame_len()?;

        let mut buffer = [0; ExchangeRecord::LEN];
        let len = len.min(buffer.len());
        self.radio.read_rx(0, &mut buffer[..len])?;
        let frame = &buffer[..len];

        if frame_control != RANGING_FRAME_CONTROL {
            dump_foreign(frame_control, frame);
            return Ok(Step::Ignored(Ignored::ForeignFrame { frame_control }));
        }

        let (dst_address, code) = match frame::peek(frame) {
            Ok(peeked) => peeked,
            Err(error) => return Ok(Step::Ignored(error.into())),
        };
        if dst_address != self.address {
            return Ok(Step::Ignored(Ignored::NotAddressed {
                dst_address: dst_address.0,
            }));
        }

        let code = match Code::try_from(code) {
            Ok(code) => code,
            Err(_) => return Ok(Step::Ignored(Ignored::UnknownCode(code))),
        };
        if code.mode() == Some(Mode::DoubleSided) && N < 2 {
            return Ok(Step::Ignored(Ignored::UnsupportedCode(code)));
        }

        trace!("Received {:?}", code);

        match code {
            Code::SingleSidedRequest | Code::DoubleSidedRequest => self.respond(frame, code),
            Code::SingleSidedResponse => self.close_single_sided(frame),
            Code::DoubleSidedFirstResponse => self.answer_first_response(frame),
            Code::DoubleSidedSecondResponse => self.close_double_sided(frame),
            Code::SingleSidedFinal => self.complete(frame, 0, code),
            Code::DoubleSidedFinal => self.complete(frame, 1, code),
            Code::Invalid => Ok(Step::Ignored(Ignored::UnsupportedCode(code))),
        }
    }

    /// Answers a request, as the responder
    fn respond(&mut self, frame: &[u8], code: Code) -> Result<Step, Error<R::Error>> {
        let request = match RequestFrame::decode(frame) {
            Ok(request) => request,
            Err(error) => return Ok(Step::Ignored(error.into())),
        };
        let reply_code = match code.next() {
            Some(reply_code) => reply_code,
            None => return Ok(Step::Ignored(Ignored::UnsupportedCode(code))),
        };

        let rx_time = self.radio.read_rx_time()?;
        let tx = schedule::delayed_tx(rx_time, self.config.tx_holdoff_delay, self.tx_antenna_delay);

        for record in self.records.iter_mut() {
            record.reset();
        }

        let header = RequestFrame {
            dst_address: request.src_address,
            src_address: self.address,
            code: reply_code,
            ..request
        };
        let response = ResponseFrame::from_header(
            header,
            rx_time.low_bits(),
            tx.advertised_tx_time.low_bits(),
        );

        let record = &mut self.records[0];
        record.request = request;
        record.response = response;

        let mut buffer = [0; ResponseFrame::LEN];
        let len = response.encode(&mut buffer).map_err(Error::Frame)?;
        let start = self.transmit(&buffer[..len], Some(tx.tx_time), true)?;

        Ok(Step::sent(reply_code, start))
    }

    /// Takes the timestamps of the first leg, as the initiator
    fn capture_response(&mut self, response: ResponseFrame) -> Result<ExchangeRecord, Error<R::Error>> {
        let request_timestamp = self.radio.read_tx_time_lo()?;
        let response_timestamp = self.radio.read_rx_time_lo()?;

        let record = &mut self.records[0];
        record.response = response;
        record.request_timestamp = request_timestamp;
        record.response_timestamp = response_timestamp;

        Ok(*record)
    }

    /// Reports the single-sided exchange back to the responder
    fn close_single_sided(&mut self, frame: &[u8]) -> Result<Step, Error<R::Error>> {
        let response = match ResponseFrame::decode(frame) {
            Ok(response) => response,
            Err(error) => return Ok(Step::Ignored(error.into())),
        };
        let mut record = self.capture_response(response)?;

        record.response.dst_address = record.response.src_address;
        record.response.src_address = self.address;
        record.response.code = Code::SingleSidedFinal;
        self.records[0] = record;

        self.send_final(record)
    }

    /// Starts the second leg of a double-sided exchange, as the initiator
    fn answer_first_response(&mut self, frame: &[u8]) -> Result<Step, Error<R::Error>> {
        let response = match ResponseFrame::decode(frame) {
            Ok(response) => response,
            Err(error) => return Ok(Step::Ignored(error.into())),
        };
        let first = self.capture_response(response)?;

        let rx_time = self.radio.read_rx_time()?;
        let tx = schedule::delayed_tx(rx_time, self.config.tx_holdoff_delay, self.tx_antenna_delay);

        let header = RequestFrame {
            frame_control: first.response.frame_control,
            seq_num: first.response.seq_num,
            pan_id: first.response.pan_id,
            dst_address: first.response.src_address,
            src_address: self.address,
            code: Code::DoubleSidedSecondResponse,
        };
        let second = ExchangeRecord {
            request: header,
            response: ResponseFrame::from_header(
                header,
                rx_time.low_bits(),
                tx.advertised_tx_time.low_bits(),
            ),
            request_timestamp: 0,
            response_timestamp: 0,
        };
        self.records[1] = second;

        let mut buffer = [0; ExchangeRecord::LEN];
        let len = second.encode(&mut buffer).map_err(Error::Frame)?;
        let start = self.transmit(&buffer[..len], Some(tx.tx_time), true)?;

        Ok(Step::sent(Code::DoubleSidedSecondResponse, start))
    }

    /// Reports the second leg back to the initiator, as the responder
    fn close_double_sided(&mut self, frame: &[u8]) -> Result<Step, Error<R::Error>> {
        let mut record = match ExchangeRecord::decode(frame) {
            Ok(record) => record,
            Err(error) => return Ok(Step::Ignored(error.into())),
        };

        record.request_timestamp = self.radio.read_tx_time_lo()?;
        record.response_timestamp = self.radio.read_rx_time_lo()?;
        record.response.dst_address = record.response.src_address;
        record.response.src_address = self.address;
        record.response.code = Code::DoubleSidedFinal;
        self.records[1] = record;

        self.send_final(record)
    }

    fn send_final(&mut self, record: ExchangeRecord) -> Result<Step, Error<R::Error>> {
        let mut buffer = [0; ExchangeRecord::LEN];
        let len = record.encode(&mut buffer).map_err(Error::Frame)?;
        let start = self.transmit(&buffer[..len], None, false)?;

        Ok(Step::sent(record.code(), start))
    }

    /// Stores the final report of an exchange
    fn complete(&mut self, frame: &[u8], slot: usize, code: Code) -> Result<Step, Error<R::Error>> {
        let report = match ExchangeRecord::decode(frame) {
            Ok(report) => report,
            Err(error) => return Ok(Step::Ignored(error.into())),
        };

        let record = &mut self.records[slot];
        record.response = report.response;
        record.request_timestamp = report.request_timestamp;
        record.response_timestamp = report.response_timestamp;

        Ok(Step::Completed(code))
    }
}

fn dump_foreign(frame_control: u16, frame: &[u8]) {
    warn!(
        "Unknown frame type: frame control {:#x}, {} bytes",
        frame_control,
        frame.len()
    );

    if let Ok((seq_num, pan_id, dst_address, src_address, code)) = raw_header(frame) {
        warn!(
            "seq {} pan {:#x} dst {:#x} src {:#x} code {:#x}",
            seq_num, pan_id, dst_address, src_address, code
        );
    }
    if let Ok((rx, tx)) = raw_timestamps(frame, RequestFrame::LEN) {
        warn!("rx {:#x} tx {:#x}", rx, tx);
    }
    if let Ok((request, response)) = raw_timestamps(frame, ResponseFrame::LEN) {
        warn!(
            "request timestamp {:#x} response timestamp {:#x}",
            request, response
        );
    }
}

/// Reads the header fields at their fixed offsets, whatever the code is
fn raw_header(frame: &[u8]) -> byte::Result<(u8, u16, u16, u16, u16)> {
    let offset = &mut 2;
    Ok((
        frame.read_with::<u8>(offset, LE)?,
        frame.read_with::<u16>(offset, LE)?,
        frame.read_with::<u16>(offset, LE)?,
        frame.read_with::<u16>(offset, LE)?,
        frame.read_with::<u16>(offset, LE)?,
    ))
}

fn raw_timestamps(frame: &[u8], mut offset: usize) -> byte::Result<(u32, u32)> {
    let first = frame.read_with::<u32>(&mut offset, LE)?;
    let second = frame.read_with::<u32>(&mut offset, LE)?;
    Ok((first, second))
}
