use serde::{Deserialize, Serialize};

/// key: billing-usage-calculator -> seconds of protected video to minor units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub base_cents: i64,
    pub per_minute_cents: i64,
}

impl Pricing {
    pub const fn new(base_cents: i64, per_minute_cents: i64) -> Self {
        Self {
            base_cents,
            per_minute_cents,
        }
    }

    /// Every started minute is billed as a full minute.
    pub fn amount(&self, total_seconds: u64) -> i64 {
        let minutes = i64::try_from(total_seconds.div_ceil(60)).unwrap_or(i64::MAX);
        self.base_cents
            .saturating_add(minutes.saturating_mul(self.per_minute_cents))
    }
}
