//! Transfer progress snapshots.

/// Completed and expected unit counts of an upload or download.
///
/// Counts are signed because transports report `-1` for an unknown total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Units expected in total, negative when unknown
    pub total: i64,
    /// Units transferred so far
    pub completed: i64,
}

impl Progress {
    /// Create a progress snapshot.
    #[must_use]
    pub const fn new(total: i64, completed: i64) -> Self {
        Self { total, completed }
    }

    /// Fraction done in `0.0..=1.0`.
    ///
    /// Unknown (negative) counts read as `0.0`; a zero total reads as done.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Byte counts fit f64 well past any real transfer
    pub fn fraction_completed(&self) -> f64 {
        if self.total < 0 || self.completed < 0 {
            return 0.0;
        }
        if self.total == 0 {
            return 1.0;
        }
        (self.completed as f64 / self.total as f64).min(1.0)
    }
}
