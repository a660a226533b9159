use serde::{Deserialize, Serialize};

/// Taker side of an executed trade.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Execution time in milliseconds since the epoch.
    pub timestamp: i64,
    pub price: f64,
    pub amount: f64,
    pub side: Side,
}

impl Trade {
    /// Whether the trade happened inside `[start, end)`.
    pub fn within(&self, start: i64, end: i64) -> bool {
        start <= self.timestamp && self.timestamp < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_half_open() {
        let trade = |timestamp| Trade {
            timestamp,
            price: 1.0,
            amount: 1.0,
            side: Side::Buy,
        };
        assert!(trade(100).within(100, 200));
        assert!(trade(199).within(100, 200));
        assert!(!trade(200).within(100, 200));
        assert!(!trade(99).within(100, 200));
    }
}
