//! Delayed transmission scheduling
//!
//! A reply is never sent right away. It is scheduled a fixed hold-off after
//! the reception that triggered it, so the node has time to prepare the frame
//! and the other side knows in advance when it will leave the antenna.

use crate::time::{Duration, Instant};


/// Hold-off values are given in units of 2^15 ticks
pub const HOLDOFF_SHIFT: u32 = 15;

/// The transceiver ignores the low 9 bits of a delayed transmission time
pub const DELAYED_TX_MASK: u64 = 0xff_ffff_fe00;

/// Antenna delays are configured in units of 4 ticks
pub const ANTENNA_DELAY_SHIFT: u32 = 2;


/// A delayed transmission, as computed by [`delayed_tx`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DelayedTx {
    /// The time to hand to the transceiver's delayed start register
    pub tx_time: Instant,

    /// The time the frame actually leaves the antenna
    ///
    /// Accounts for the ignored low bits of `tx_time` and the transmit
    /// antenna delay. This is the value to advertise in the frame.
    pub advertised_tx_time: Instant,
}

/// Computes the delayed transmission time for a reply
///
/// `rx_time` is the reception timestamp of the frame being answered,
/// `holdoff` the hold-off in units of 2^15 ticks. All arithmetic wraps
/// modulo 2^40, like the transceiver's clock.
pub fn delayed_tx(rx_time: Instant, holdoff: u32, tx_antenna_delay: Duration) -> DelayedTx {
    let tx_time = rx_time + Duration::wrapping(u64::from(holdoff) << HOLDOFF_SHIFT);
    let advertised_tx_time = Instant::wrapping(tx_time.value() & DELAYED_TX_MASK)
        + Duration::wrapping(tx_antenna_delay.value() << ANTENNA_DELAY_SHIFT);

    DelayedTx {
        tx_time,
        advertised_tx_time,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TIME_MAX;

    #[test]
    fn reply_is_scheduled_after_the_holdoff() {
        let rx_time = Instant::new(0x10_0000_0123).unwrap();
        let delay = Duration::new(16436).unwrap();

        let tx = delayed_tx(rx_time, 0x0800, delay);

        assert_eq!(tx.tx_time.value(), 0x10_0400_0123);
        assert_eq!(tx.advertised_tx_time.value(), 0x10_0400_0000 + 16436 * 4);
    }

    #[test]
    fn masking_never_moves_more_than_one_grid_step() {
        let delay = Duration::new(0).unwrap();

        for &rx in &[0, 1, 0x1ff, 0x200, 0x3ff, 0x12_3456_789a] {
            let tx = delayed_tx(Instant::new(rx).unwrap(), 1, delay);
            let lost = tx.tx_time.duration_since(tx.advertised_tx_time).value();

            assert!(lost < 0x200);
            assert_eq!(tx.advertised_tx_time.value() & !DELAYED_TX_MASK & TIME_MAX, 0);
        }
    }

    #[test]
    fn schedule_wraps_around_the_clock() {
        let rx_time = Instant::new(TIME_MAX - 0xff).unwrap();
        let delay = Duration::new(1).unwrap();

        let tx = delayed_tx(rx_time, 1, delay);

        assert_eq!(tx.tx_time.value(), (1 << HOLDOFF_SHIFT) - 0x100);
        assert_eq!(tx.advertised_tx_time.value(), 0x7e00 + 4);
    }
}
