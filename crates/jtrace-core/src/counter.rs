//! Step counter owned by a single session.

/// Number of steps observed since the owning session last started.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepCounter(u64);

impl StepCounter {
    /// A counter at zero.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Current count.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Advance by one step and return the new count.
    ///
    /// Saturates at `u64::MAX`; the count never decreases.
    #[inline]
    pub fn advance(&mut self) -> u64 {
        self.0 = self.0.saturating_add(1);
        self.0
    }

    /// Back to zero. Only a session `start` should call this.
    #[inline]
    pub fn reset(&mut self) {
        self.0 = 0;
    }
}
