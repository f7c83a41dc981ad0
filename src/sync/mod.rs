pub mod queue;
pub mod ricart_agrawala;
pub mod tracker;

use std::fmt;

use tracing::error;

use crate::error::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum State {
    Wanted,
    Held,
    #[default]
    Released,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Wanted => "WANTED",
            State::Held => "HELD",
            State::Released => "RELEASED",
        })
    }
}

/// Mutual exclusion across processes rather than threads.
///
/// Unlike a local lock, acquiring can fail: a peer may be unreachable or may
/// never answer.
pub trait DistributedMutex {
    fn acquire(&self) -> Result<MutexGuard<'_, Self>>;
    // Returns the number of deferred requesters that were answered
    fn release(&self) -> Result<usize>;
}

/// Held critical section. Dropping it releases.
pub struct MutexGuard<'a, M: DistributedMutex + ?Sized> {
    mutex: &'a M,
}

impl<'a, M: DistributedMutex + ?Sized> Drop for MutexGuard<'a, M> {
    fn drop(&mut self) {
        if let Err(e) = self.mutex.release() {
            error!("release on drop failed: {e}");
        }
    }
}
