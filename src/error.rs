use core::fmt;

use crate::frame::{FrameError, Mode};


/// An error that can occur while ranging
pub enum Error<E> {
    /// The transceiver driver reported an error
    Driver(E),

    /// The session hasn't been initialized, or has been freed
    NotInitialized,

    /// The mode needs more exchange records than the session has
    UnsupportedMode(Mode),

    /// A frame could not be encoded or decoded
    Frame(FrameError),
}

impl<E> From<E> for Error<E> {
    fn from(error: E) -> Self {
        Error::Driver(error)
    }
}

// Not derived, so `E` only needs `Debug` where the error is actually printed.
impl<E> fmt::Debug for Error<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Driver(error) => write!(f, "Driver({:?})", error),
            Error::NotInitialized => write!(f, "NotInitialized"),
            Error::UnsupportedMode(mode) => write!(f, "UnsupportedMode({:?})", mode),
            Error::Frame(error) => write!(f, "Frame({:?})", error),
        }
    }
}

#[cfg(feature = "defmt")]
impl<E> defmt::Format for Error<E>
where
    E: defmt::Format,
{
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Driver(error) => defmt::write!(f, "Driver({})", error),
            Error::NotInitialized => defmt::write!(f, "NotInitialized"),
            Error::UnsupportedMode(mode) => defmt::write!(f, "UnsupportedMode({})", mode),
            Error::Frame(error) => defmt::write!(f, "Frame({})", error),
        }
    }
}
