use std::sync::Mutex;

#[derive(Debug, Default)]
struct Tally {
    round: u64,
    count: usize,
}

/// Acknowledgements received for one multicast round.
///
/// Each increment names the round it belongs to, so a late reply for an
/// earlier round cannot inflate the current tally.
#[derive(Debug, Default)]
pub struct ReplyTracker {
    tally: Mutex<Tally>,
}

impl ReplyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `round` from zero. Must happen before any of its requests go out.
    pub fn reset(&self, round: u64) {
        *self.lock() = Tally { round, count: 0 };
    }

    /// Count one ack for `round`. Returns the new tally, or `None` if `round`
    /// is not the current one.
    pub fn increment(&self, round: u64) -> Option<usize> {
        let mut tally = self.lock();
        if tally.round != round {
            return None;
        }
        tally.count += 1;
        Some(tally.count)
    }

    pub fn value(&self) -> usize {
        self.lock().count
    }

    pub fn round(&self) -> u64 {
        self.lock().round
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tally> {
        self.tally.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::ReplyTracker;
    use std::sync::Arc;

    #[test]
    fn reset_starts_a_new_round() {
        let t = ReplyTracker::new();
        t.reset(1);
        assert_eq!(t.increment(1), Some(1));
        assert_eq!(t.increment(1), Some(2));
        t.reset(4);
        assert_eq!(t.value(), 0);
        assert_eq!(t.round(), 4);
    }

    #[test]
    fn late_replies_are_ignored() {
        let t = ReplyTracker::new();
        t.reset(1);
        t.increment(1);
        t.reset(2);
        assert_eq!(t.increment(1), None);
        assert_eq!(t.value(), 0);
        assert_eq!(t.increment(2), Some(1));
    }

    #[test]
    fn concurrent_increments() {
        const N_THREADS: usize = 8;
        const WORK: usize = 1_000;
        let t = Arc::new(ReplyTracker::new());
        t.reset(7);
        let ths = (0..N_THREADS)
            .map(|i| {
                let t = t.clone();
                std::thread::spawn(move || {
                    for _ in 0..WORK {
                        // odd threads report a stale round
                        t.increment(if i % 2 == 0 { 7 } else { 6 });
                    }
                })
            })
            .collect::<Vec<_>>();
        ths.into_iter().for_each(|th| th.join().unwrap());
        assert_eq!(t.value(), WORK * N_THREADS / 2);
    }
}
