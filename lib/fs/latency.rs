use std::time::Duration;

/// Decides how long an origin-tier read waits before touching the origin tier.
///
/// Cache-tier reads never consult the policy.
pub trait ColdReadPolicy: Send + Sync + 'static {
    /// Delay to apply before the next origin-tier read.
    fn penalty(&self) -> Duration;
}

/// Waits the same fixed amount before every origin-tier read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPenalty(pub Duration);

impl FixedPenalty {
    /// Half a second, modelling a slow network-attached origin.
    pub const DEFAULT: Self = Self(Duration::from_millis(500));
}

impl Default for FixedPenalty {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl ColdReadPolicy for FixedPenalty {
    fn penalty(&self) -> Duration {
        self.0
    }
}

/// Reads the origin tier immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoPenalty;

impl ColdReadPolicy for NoPenalty {
    fn penalty(&self) -> Duration {
        Duration::ZERO
    }
}
