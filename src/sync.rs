//! Synchronization between requests and radio events
//!
//! An initiator starts an exchange, then blocks until the event handler
//! reports that the exchange is over. Only one exchange may be in flight at a
//! time. Both concerns are covered by [`Rendezvous`], which is kept separate
//! from the session so it can be backed by whatever the platform offers.

use core::time::Duration;


/// The wait for a completion signal timed out
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeout;

/// Exchange guard and completion signal
///
/// The guard serializes requests. The signal is raised by the event handler
/// when an exchange completes or fails, and consumed by the waiting request.
pub trait Rendezvous {
    /// Blocks until no other exchange is in flight, then claims the guard
    fn lock(&self);

    /// Releases the guard
    fn unlock(&self);

    /// Discards a pending completion signal
    fn reset(&self);

    /// Raises the completion signal, waking a waiting request
    fn signal(&self);

    /// Blocks until the completion signal is raised, then consumes it
    fn wait(&self, timeout: Duration) -> Result<(), Timeout>;
}


#[cfg(any(test, feature = "std"))]
pub use self::std_impl::StdRendezvous;

#[cfg(any(test, feature = "std"))]
mod std_impl {
    use core::time::Duration;
    use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

    use super::{Rendezvous, Timeout};


    /// [`Rendezvous`] built on a mutex and a condition variable
    #[derive(Debug, Default)]
    pub struct StdRendezvous {
        state: Mutex<State>,
        changed: Condvar,
    }

    #[derive(Debug, Default)]
    struct State {
        busy: bool,
        signaled: bool,
    }

    impl StdRendezvous {
        /// Creates an idle rendezvous
        pub fn new() -> Self {
            Self::default()
        }

        /// Whether an exchange currently holds the guard
        pub fn is_busy(&self) -> bool {
            self.state().busy
        }

        /// Whether a completion signal is pending
        pub fn is_signaled(&self) -> bool {
            self.state().signaled
        }

        fn state(&self) -> MutexGuard<State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl Rendezvous for StdRendezvous {
        fn lock(&self) {
            let mut state = self
                .changed
                .wait_while(self.state(), |state| state.busy)
                .unwrap_or_else(PoisonError::into_inner);
            state.busy = true;
        }

        fn unlock(&self) {
            self.state().busy = false;
            self.changed.notify_all();
        }

        fn reset(&self) {
            self.state().signaled = false;
        }

        fn signal(&self) {
            self.state().signaled = true;
            self.changed.notify_all();
        }

        fn wait(&self, timeout: Duration) -> Result<(), Timeout> {
            let (mut state, _) = self
                .changed
                .wait_timeout_while(self.state(), timeout, |state| !state.signaled)
                .unwrap_or_else(PoisonError::into_inner);

            if state.signaled {
                state.signaled = false;
                Ok(())
            } else {
                Err(Timeout)
            }
        }
    }


}
