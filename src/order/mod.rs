pub mod lamport;

use serde::{Deserialize, Serialize};

// Lamport time is totally ordered, but the trait only asks for PartialOrd so
// that other clocks (vector, matrix) fit the same shape.
// Both return None when the counter would overflow.
pub trait LogicalClock: PartialOrd + Clone {
    // Local event or send
    fn extend(&self) -> Option<Self>;
    // Receive: take the max of both sides, then extend
    fn merge(&self, other: &Self) -> Option<Self>;
}

/// Scalar Lamport time.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub u64);

impl LogicalClock for Timestamp {
    fn extend(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
    fn merge(&self, other: &Self) -> Option<Self> {
        self.0.max(other.0).checked_add(1).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::{LogicalClock, Timestamp};

    #[test]
    fn extend_and_merge() {
        let t = Timestamp::default();
        assert_eq!(t.extend(), Some(Timestamp(1)));
        assert_eq!(t.merge(&Timestamp(7)), Some(Timestamp(8)));
        assert_eq!(Timestamp(9).merge(&Timestamp(7)), Some(Timestamp(10)));
    }

    #[test]
    fn overflow() {
        assert_eq!(Timestamp(u64::MAX).extend(), None);
        assert_eq!(Timestamp(0).merge(&Timestamp(u64::MAX)), None);
        assert_eq!(
            Timestamp(0).merge(&Timestamp(u64::MAX - 1)),
            Some(Timestamp(u64::MAX))
        );
    }
}
