use crate::{Candle, Side, Trade};
use serde::{Deserialize, Serialize};

/// Buy and sell taker volume distributed over price bins.
///
/// Bin 0 covers `[min_price, bin_upper_bounds[0]]`, bin `i` covers
/// `(bin_upper_bounds[i - 1], bin_upper_bounds[i]]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeProfile {
    pub bin_upper_bounds: Vec<f64>,
    pub buy_amounts: Vec<f64>,
    pub sell_amounts: Vec<f64>,
}

impl VolumeProfile {
    /// Distribute `trades` over `bin_count` equally wide bins spanning the
    /// traded price range.
    ///
    /// Without trades there is no price range, so the bins are spread over
    /// `fallback` (usually the candle's low and high) and all amounts are zero.
    /// When every trade has the same price, all volume lands in bin 0.
    ///
    /// # Panics
    ///
    /// Panics if `bin_count` is zero. `Settings::validate` rejects such
    /// settings before any pipeline runs.
    pub fn aggregate(trades: &[Trade], bin_count: usize, fallback: (f64, f64)) -> Self {
        assert!(bin_count > 0, "a volume profile needs at least one bin");

        let mut profile = VolumeProfile {
            bin_upper_bounds: Vec::with_capacity(bin_count),
            buy_amounts: vec![0.0; bin_count],
            sell_amounts: vec![0.0; bin_count],
        };

        let (min_price, max_price) = match price_range(trades) {
            Some(range) => range,
            None => {
                let (low, high) = fallback;
                profile.bin_upper_bounds = upper_bounds(low.min(high), low.max(high), bin_count);
                return profile;
            }
        };
        profile.bin_upper_bounds = upper_bounds(min_price, max_price, bin_count);

        let width = (max_price - min_price) / bin_count as f64;
        for trade in trades {
            let bin = profile.bin_of(trade.price, min_price, width);
            match trade.side {
                Side::Buy => profile.buy_amounts[bin] += trade.amount,
                Side::Sell => profile.sell_amounts[bin] += trade.amount,
            }
        }

        profile
    }

    pub fn bin_count(&self) -> usize {
        self.bin_upper_bounds.len()
    }

    /// Smallest bin whose upper bound is not below `price`, clamped to the
    /// profile. Constant time: the index is estimated from the bin width and
    /// then corrected against the stored bounds, which absorbs rounding.
    fn bin_of(&self, price: f64, min_price: f64, width: f64) -> usize {
        let last = self.bin_count() - 1;
        if width <= 0.0 || price <= min_price {
            return 0;
        }

        let estimate = ((price - min_price) / width).ceil() - 1.0;
        let mut bin = if estimate <= 0.0 {
            0
        } else {
            (estimate as usize).min(last)
        };

        while bin > 0 && price <= self.bin_upper_bounds[bin - 1] {
            bin -= 1;
        }
        while bin < last && price > self.bin_upper_bounds[bin] {
            bin += 1;
        }
        bin
    }

    /// Sum of all sell side volume, the "bid" volume of the output record.
    pub fn sell_total(&self) -> f64 {
        self.sell_amounts.iter().sum()
    }

    /// Sum of all buy side volume, the "ask" volume of the output record.
    pub fn buy_total(&self) -> f64 {
        self.buy_amounts.iter().sum()
    }
}

fn price_range(trades: &[Trade]) -> Option<(f64, f64)> {
    trades.iter().fold(None, |range, trade| match range {
        None => Some((trade.price, trade.price)),
        Some((min, max)) => Some((min.min(trade.price), max.max(trade.price))),
    })
}

// The last bound is pinned to `max` so that no trade falls above every bin.
fn upper_bounds(min: f64, max: f64, bin_count: usize) -> Vec<f64> {
    let width = (max - min) / bin_count as f64;
    (0..bin_count)
        .map(|i| {
            if i + 1 == bin_count {
                max
            } else {
                min + (i + 1) as f64 * width
            }
        })
        .collect()
}

/// A candle together with the volume profile of its trades.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnrichedCandle {
    pub candle: Candle,
    pub profile: VolumeProfile,
}

impl EnrichedCandle {
    pub fn record(&self) -> Record {
        Record::from(self)
    }
}

/// Flat output row handed to exports.
///
/// `bid_volume_sum` is the aggregated sell side taker volume and
/// `ask_volume_sum` the aggregated buy side taker volume.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub bid_volume_sum: f64,
    pub ask_volume_sum: f64,
    pub delta: f64,
}

impl From<&EnrichedCandle> for Record {
    fn from(enriched: &EnrichedCandle) -> Self {
        let candle = enriched.candle;
        let bid_volume_sum = enriched.profile.sell_total();
        let ask_volume_sum = enriched.profile.buy_total();

        Record {
            timestamp: candle.timestamp,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            bid_volume_sum,
            ask_volume_sum,
            delta: ask_volume_sum - bid_volume_sum,
        }
    }
}
