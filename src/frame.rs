//! Ranging frames and the exchange record
//!
//! All ranging messages start with the same IEEE 802.15.4 data frame header,
//! using PAN ID compression and short addresses. The progression code follows
//! the header and identifies the message's position in its exchange:
//!
//! ``` text
//! offset  size  field
//!      0     2  frame control (0x8841)
//!      2     1  sequence number
//!      3     2  PAN id
//!      5     2  destination address
//!      7     2  source address
//!      9     2  progression code                      <- end of request (11)
//!     11     4  reception timestamp
//!     15     4  transmission timestamp                <- end of response (19)
//!     19     4  request timestamp
//!     23     4  response timestamp                    <- end of record (27)
//! ```
//!
//! All fields are little-endian. Timestamps carry the low-order 32 bits of
//! the 40-bit system time.

use core::convert::TryFrom;

use byte::{BytesExt as _, TryRead, TryWrite, LE};
use ieee802154::mac::{PanId, ShortAddress};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Frame control of all ranging frames
///
/// Data frame, PAN ID compression, short destination and source addresses.
pub const RANGING_FRAME_CONTROL: u16 = 0x8841;

/// Offset of the destination address within every ranging frame
pub const DST_ADDRESS_OFFSET: usize = 5;

/// Offset of the progression code within every ranging frame
pub const CODE_OFFSET: usize = 9;

/// Identifies a ranging message's position in its exchange
///
/// Single-sided ranging uses three messages, symmetric double-sided ranging
/// uses four. The two sequences don't overlap, so the code alone tells a node
/// which role it plays in the current step.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Code {
    /// No message; slots are reset to this before every exchange
    Invalid = 0,

    /// Single-sided: initiator asks for a response
    SingleSidedRequest = 1,
    /// Single-sided: responder reports when it received the request
    SingleSidedResponse = 2,
    /// Single-sided: initiator reports the whole exchange
    SingleSidedFinal = 3,

    /// Double-sided: initiator asks for a response
    DoubleSidedRequest = 5,
    /// Double-sided: responder answers the request
    DoubleSidedFirstResponse = 6,
    /// Double-sided: initiator answers the first response
    DoubleSidedSecondResponse = 7,
    /// Double-sided: responder reports the second leg
    DoubleSidedFinal = 8,
}

impl Code {
    /// Returns the ranging mode this code belongs to
    pub fn mode(self) -> Option<Mode> {
        match self {
            Code::Invalid => None,
            Code::SingleSidedRequest
            | Code::SingleSidedResponse
            | Code::SingleSidedFinal => Some(Mode::SingleSided),
            Code::DoubleSidedRequest
            | Code::DoubleSidedFirstResponse
            | Code::DoubleSidedSecondResponse
            | Code::DoubleSidedFinal => Some(Mode::DoubleSided),
        }
    }

    /// Returns the code of the message that answers this one
    ///
    /// Returns `None` for the final codes, which aren't answered.
    pub fn next(self) -> Option<Code> {
        match self {
            Code::SingleSidedRequest => Some(Code::SingleSidedResponse),
            Code::SingleSidedResponse => Some(Code::SingleSidedFinal),
            Code::DoubleSidedRequest => Some(Code::DoubleSidedFirstResponse),
            Code::DoubleSidedFirstResponse => Some(Code::DoubleSidedSecondResponse),
            Code::DoubleSidedSecondResponse => Some(Code::DoubleSidedFinal),
            Code::Invalid | Code::SingleSidedFinal | Code::DoubleSidedFinal => None,
        }
    }
}

/// The two-way ranging variant
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Single-sided two-way ranging, three messages
    SingleSided,

    /// Symmetric double-sided two-way ranging, four messages
    ///
    /// Cancels most of the clock drift error by running the single-sided
    /// measurement once in each direction.
    DoubleSided,
}

impl Mode {
    /// The code that opens an exchange of this mode
    pub fn request_code(self) -> Code {
        match self {
            Mode::SingleSided => Code::SingleSidedRequest,
            Mode::DoubleSided => Code::DoubleSidedRequest,
        }
    }

    /// The code of the last message of an exchange of this mode
    pub fn final_code(self) -> Code {
        match self {
            Mode::SingleSided => Code::SingleSidedFinal,
            Mode::DoubleSided => Code::DoubleSidedFinal,
        }
    }

    /// The number of exchange records this mode uses
    pub fn slots(self) -> usize {
        match self {
            Mode::SingleSided => 1,
            Mode::DoubleSided => 2,
        }
    }
}

/// An error that can occur while encoding or decoding a frame
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// The buffer is shorter than the frame layout
    TooShort {
        /// Length of the layout
        required_len: usize,
        /// Length of the buffer that was provided
        len: usize,
    },

    /// The progression code is not one of the known codes
    UnknownCode(u16),
}

/// A ranging request
///
/// This is also the header that every other ranging frame starts with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RequestFrame {
    /// Frame control, [`RANGING_FRAME_CONTROL`] for ranging frames
    pub frame_control: u16,

    /// Incremented for every exchange the initiator starts
    pub seq_num: u8,

    /// Network id
    pub pan_id: PanId,

    /// Recipient of the frame
    pub dst_address: ShortAddress,

    /// Sender of the frame
    pub src_address: ShortAddress,

    /// Position of this frame in the exchange
    pub code: Code,
}

impl RequestFrame {
    /// Length of the encoded frame
    pub const LEN: usize = 11;

    /// Decodes a request from the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        decode(bytes, Self::LEN)
    }

    /// Encodes the request into `buffer`, returning the number of bytes written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        encode(*self, buffer, Self::LEN)
    }
}

impl Default for RequestFrame {
    fn default() -> Self {
        RequestFrame {
            frame_control: RANGING_FRAME_CONTROL,
            seq_num: 0,
            pan_id: PanId(0),
            dst_address: ShortAddress(0),
            src_address: ShortAddress(0),
            code: Code::Invalid,
        }
    }
}

/// A ranging response
///
/// Carries the responder's view of the request it answers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResponseFrame {
    /// Frame control, [`RANGING_FRAME_CONTROL`] for ranging frames
    pub frame_control: u16,

    /// Sequence number of the exchange this response belongs to
    pub seq_num: u8,

    /// Network id
    pub pan_id: PanId,

    /// Recipient of the frame
    pub dst_address: ShortAddress,

    /// Sender of the frame
    pub src_address: ShortAddress,

    /// Position of this frame in the exchange
    pub code: Code,

    /// When the answered message was received, in local responder time
    pub reception_timestamp: u32,

    /// When this response is scheduled to leave the antenna, in local
    /// responder time
    pub transmission_timestamp: u32,
}

impl ResponseFrame {
    /// Length of the encoded frame
    pub const LEN: usize = 19;

    /// Creates a response that shares `header`'s header fields
    pub fn from_header(
        header: RequestFrame,
        reception_timestamp: u32,
        transmission_timestamp: u32,
    ) -> Self {
        ResponseFrame {
            frame_control: header.frame_control,
            seq_num: header.seq_num,
            pan_id: header.pan_id,
            dst_address: header.dst_address,
            src_address: header.src_address,
            code: header.code,
            reception_timestamp,
            transmission_timestamp,
        }
    }

    /// Returns the header fields of this response
    pub fn header(&self) -> RequestFrame {
        RequestFrame {
            frame_control: self.frame_control,
            seq_num: self.seq_num,
            pan_id: self.pan_id,
            dst_address: self.dst_address,
            src_address: self.src_address,
            code: self.code,
        }
    }

    /// Decodes a response from the start of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        decode(bytes, Self::LEN)
    }

    /// Encodes the response into `buffer`, returning the number of bytes
    /// written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        encode(*self, buffer, Self::LEN)
    }
}

impl Default for ResponseFrame {
    fn default() -> Self {
        ResponseFrame::from_header(RequestFrame::default(), 0, 0)
    }
}

/// One leg of a ranging exchange
///
/// Holds both messages of a leg and the two timestamps only the node that
/// receives the response can know. A single-sided exchange uses one record,
/// a double-sided exchange two.
///
/// The timestamps are only valid once the record's [`code`] has advanced past
/// the message that sets them. Records are reset to [`Code::Invalid`] at the
/// start of every exchange.
///
/// [`code`]: #method.code
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExchangeRecord {
    /// The message that opened this leg
    pub request: RequestFrame,

    /// The latest message of this leg
    pub response: ResponseFrame,

    /// When the opening message was sent, in local time of the node that
    /// received the response
    pub request_timestamp: u32,

    /// When the response was received, in local time of the node that
    /// received it
    pub response_timestamp: u32,
}

impl ExchangeRecord {
    /// Length of the encoded record
    pub const LEN: usize = 27;

    /// The progression code this record has reached
    pub fn code(&self) -> Code {
        self.response.code
    }

    /// Marks the record as unused
    pub fn reset(&mut self) {
        self.request.code = Code::Invalid;
        self.response.code = Code::Invalid;
    }

    /// Decodes a record from the start of `bytes`
    ///
    /// Only the response and the two timestamps are on the air. `request` is
    /// filled in with the response's header.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        decode(bytes, Self::LEN)
    }

    /// Encodes the record into `buffer`, returning the number of bytes written
    pub fn encode(&self, buffer: &mut [u8]) -> Result<usize, FrameError> {
        encode(*self, buffer, Self::LEN)
    }
}

/// Reads the destination address and raw progression code of a frame
///
/// This is all the dispatcher needs to decide whether a frame concerns it,
/// and which layout the rest of the frame has.
pub fn peek(bytes: &[u8]) -> Result<(ShortAddress, u16), FrameError> {
    let too_short = |_| FrameError::TooShort {
        required_len: RequestFrame::LEN,
        len: bytes.len(),
    };

    let mut offset = DST_ADDRESS_OFFSET;
    let dst_address = bytes.read_with::<u16>(&mut offset, LE).map_err(too_short)?;
    let mut offset = CODE_OFFSET;
    let code = bytes.read_with::<u16>(&mut offset, LE).map_err(too_short)?;

    Ok((ShortAddress(dst_address), code))
}

fn decode<'a, T>(bytes: &'a [u8], required_len: usize) -> Result<T, FrameError>
where
    T: TryRead<'a>,
{
    if bytes.len() < required_len {
        return Err(FrameError::TooShort {
            required_len,
            len: bytes.len(),
        });
    }

    bytes.read_with::<T>(&mut 0, ()).map_err(|error| match error {
        byte::Error::BadInput { .. } => match peek(bytes) {
            Ok((_, code)) => FrameError::UnknownCode(code),
            Err(error) => error,
        },
        _ => FrameError::TooShort {
            required_len,
            len: bytes.len(),
        },
    })
}

fn encode<T>(value: T, buffer: &mut [u8], required_len: usize) -> Result<usize, FrameError>
where
    T: TryWrite,
{
    let too_short = FrameError::TooShort {
        required_len,
        len: buffer.len(),
    };
    if buffer.len() < required_len {
        return Err(too_short);
    }

    let mut len = 0;
    buffer
        .write_with(&mut len, value, ())
        .map_err(|_| too_short)?;

    Ok(len)
}

fn read_header(bytes: &[u8], offset: &mut usize) -> byte::Result<RequestFrame> {
    let frame_control = bytes.read_with::<u16>(offset, LE)?;
    let seq_num = bytes.read_with::<u8>(offset, LE)?;
    let pan_id = PanId(bytes.read_with::<u16>(offset, LE)?);
    let dst_address = ShortAddress(bytes.read_with::<u16>(offset, LE)?);
    let src_address = ShortAddress(bytes.read_with::<u16>(offset, LE)?);
    let code = Code::try_from(bytes.read_with::<u16>(offset, LE)?).map_err(|_| {
        byte::Error::BadInput {
            err: "unknown progression code",
        }
    })?;

    Ok(RequestFrame {
        frame_control,
        seq_num,
        pan_id,
        dst_address,
        src_address,
        code,
    })
}

fn write_header(header: &RequestFrame, bytes: &mut [u8], offset: &mut usize) -> byte::Result<()> {
    bytes.write_with(offset, header.frame_control, LE)?;
    bytes.write_with(offset, header.seq_num, LE)?;
    bytes.write_with(offset, header.pan_id.0, LE)?;
    bytes.write_with(offset, header.dst_address.0, LE)?;
    bytes.write_with(offset, header.src_address.0, LE)?;
    bytes.write_with(offset, u16::from(header.code), LE)?;

    Ok(())
}

impl<'a> TryRead<'a> for RequestFrame {
    fn try_read(bytes: &'a [u8], _: ()) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;
        let header = read_header(bytes, offset)?;

        Ok((header, *offset))
    }
}

impl TryWrite for RequestFrame {
    fn try_write(self, bytes: &mut [u8], _: ()) -> byte::Result<usize> {
        let offset = &mut 0;
        write_header(&self, bytes, offset)?;

        Ok(*offset)
    }
}

impl<'a> TryRead<'a> for ResponseFrame {
    fn try_read(bytes: &'a [u8], _: ()) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;
        let header = read_header(bytes, offset)?;
        let reception_timestamp = bytes.read_with::<u32>(offset, LE)?;
        let transmission_timestamp = bytes.read_with::<u32>(offset, LE)?;

        let response =
            ResponseFrame::from_header(header, reception_timestamp, transmission_timestamp);

        Ok((response, *offset))
    }
}

impl TryWrite for ResponseFrame {
    fn try_write(self, bytes: &mut [u8], _: ()) -> byte::Result<usize> {
        let offset = &mut 0;
        write_header(&self.header(), bytes, offset)?;
        bytes.write_with(offset, self.reception_timestamp, LE)?;
        bytes.write_with(offset, self.transmission_timestamp, LE)?;

        Ok(*offset)
    }
}

impl<'a> TryRead<'a> for ExchangeRecord {
    fn try_read(bytes: &'a [u8], _: ()) -> byte::Result<(Self, usize)> {
        let offset = &mut 0;
        let response = bytes.read_with::<ResponseFrame>(offset, ())?;
        let request_timestamp = bytes.read_with::<u32>(offset, LE)?;
        let response_timestamp = bytes.read_with::<u32>(offset, LE)?;

        let record = ExchangeRecord {
            request: response.header(),
            response,
            request_timestamp,
            response_timestamp,
        };

        Ok((record, *offset))
    }
}

impl TryWrite for ExchangeRecord {
    fn try_write(self, bytes: &mut [u8], _: ()) -> byte::Result<usize> {
        let offset = &mut 0;
        bytes.write_with(offset, self.response, ())?;
        bytes.write_with(offset, self.request_timestamp, LE)?;
        bytes.write_with(offset, self.response_timestamp, LE)?;

        Ok(*offset)
    }
}
