use std::sync::Mutex;

use super::{LogicalClock, Timestamp};
use crate::error::{Error, Result};

/// Lamport clock shared between the sending and receiving threads of a node.
///
/// Every read-modify-write happens under one lock so a concurrent send and
/// receive cannot lose an update. An update that would overflow leaves the
/// clock untouched and fails with [`Error::ClockOverflow`].
#[derive(Debug, Default)]
pub struct LamportClock {
    t: Mutex<Timestamp>,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by one before sending. Returns the new value.
    pub fn increment(&self) -> Result<u64> {
        self.update(None, |t| t.extend())
    }

    /// `max(self, other) + 1`. Returns the new value.
    pub fn max_and_advance(&self, other: u64) -> Result<u64> {
        self.update(Some(other), |t| t.merge(&Timestamp(other)))
    }

    pub fn value(&self) -> u64 {
        self.t.lock().unwrap_or_else(|e| e.into_inner()).0
    }

    fn update(
        &self,
        other: Option<u64>,
        f: impl FnOnce(&Timestamp) -> Option<Timestamp>,
    ) -> Result<u64> {
        let mut t = self.t.lock().unwrap_or_else(|e| e.into_inner());
        let next = f(&*t).ok_or(Error::ClockOverflow {
            clock: t.0,
            received: other,
        })?;
        *t = next;
        Ok(next.0)
    }
}

#[cfg(test)]
mod tests {
    use super::LamportClock;
    use crate::error::Error;
    use rand::Rng;
    use std::sync::Arc;

    const N_THREADS: usize = 4;
    const WORK: u64 = 10_000;

    #[test]
    fn strictly_increasing() {
        let mut rng = rand::thread_rng();
        let clk = LamportClock::new();
        let mut last = clk.value();
        for _ in 0..1_000 {
            let now = if rng.gen_bool(0.5) {
                clk.increment().unwrap()
            } else {
                let other = rng.gen_range(0..last + 100);
                let now = clk.max_and_advance(other).unwrap();
                assert!(now > other);
                now
            };
            assert!(now > last);
            assert_eq!(now, clk.value());
            last = now;
        }
    }

    #[test]
    fn merge_with_older_still_advances() {
        let clk = LamportClock::new();
        clk.max_and_advance(10).unwrap();
        assert_eq!(clk.value(), 11);
        assert_eq!(clk.max_and_advance(3).unwrap(), 12);
    }

    #[test]
    fn overflow_leaves_clock_unchanged() {
        let clk = LamportClock::new();
        clk.max_and_advance(41).unwrap();
        assert!(matches!(
            clk.max_and_advance(u64::MAX),
            Err(Error::ClockOverflow {
                clock: 42,
                received: Some(u64::MAX)
            })
        ));
        assert_eq!(clk.value(), 42);

        assert_eq!(clk.max_and_advance(u64::MAX - 1).unwrap(), u64::MAX);
        assert!(matches!(
            clk.increment(),
            Err(Error::ClockOverflow { received: None, .. })
        ));
        assert_eq!(clk.value(), u64::MAX);
    }

    #[test]
    fn no_lost_updates() {
        let clk = Arc::new(LamportClock::new());
        let ths = (0..N_THREADS)
            .map(|_| {
                let clk = clk.clone();
                std::thread::spawn(move || {
                    for _ in 0..WORK {
                        clk.increment().unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        ths.into_iter().for_each(|th| th.join().unwrap());
        assert_eq!(clk.value(), WORK * N_THREADS as u64);
    }
}
