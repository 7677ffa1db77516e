//! Volume profile (slow cycle)
//!
//! Price-bucketed volume histogram over the rolling 30 min trade window with
//! POC and the 70 % value area. Bins are `tick_size × bin_width_ticks` wide;
//! on equal volume the lowest price wins.

use crate::error::CalcError;
use crate::market::TradeTick;

/// Minimum trades before a profile is emitted
const MIN_PROFILE_TRADES: usize = 10;

/// Share of total volume the value area must cover
const VALUE_AREA_FRACTION: f64 = 0.70;

/// Volume profile for the report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeProfile {
    /// Centre price of the highest-volume bin (lowest such bin on ties)
    pub poc: f64,

    /// Upper edge of the value area
    pub vah: f64,

    /// Lower edge of the value area
    pub val: f64,

    /// Window length the profile covers, seconds
    pub window_sec: u32,

    /// Trades aggregated into the histogram
    pub trade_count: usize,
}

/// Build the volume profile over `trades`
///
/// Returns `Ok(None)` with fewer than 10 trades (field omitted from the
/// report). A violated `VAL ≤ POC ≤ VAH` is a fatal calculation error: the
/// caller must not publish that cycle.
pub fn calculate_volume_profile(
    trades: &[&TradeTick],
    bin_size: f64,
    window_sec: u32,
) -> Result<Option<VolumeProfile>, CalcError> {
    if trades.len() < MIN_PROFILE_TRADES {
        return Ok(None);
    }
    if bin_size <= 0.0 || !bin_size.is_finite() {
        return Err(CalcError::InvariantViolation(format!(
            "non-positive profile bin size {bin_size}"
        )));
    }

    let mut price_min = f64::INFINITY;
    let mut price_max = f64::NEG_INFINITY;
    for trade in trades {
        price_min = price_min.min(trade.price);
        price_max = price_max.max(trade.price);
    }

    let bin_count = ((price_max - price_min) / bin_size).floor() as usize + 1;
    let mut volumes = vec![0.0f64; bin_count];
    for trade in trades {
        let mut idx = ((trade.price - price_min) / bin_size).floor() as usize;
        // The max price lands exactly on the upper boundary; fold it into
        // the last bin.
        if idx >= bin_count {
            idx = bin_count - 1;
        }
        volumes[idx] += trade.volume;
    }

    let total_volume: f64 = volumes.iter().sum();
    if total_volume <= 0.0 {
        return Ok(None);
    }

    // POC: max volume, lowest-priced bin on ties.
    let mut poc_idx = 0usize;
    for (idx, &vol) in volumes.iter().enumerate() {
        if vol > volumes[poc_idx] {
            poc_idx = idx;
        }
    }

    // Expand outward from POC toward the larger adjacent bin until the value
    // area holds 70 % of volume. Ties expand downward.
    let target = total_volume * VALUE_AREA_FRACTION;
    let mut accumulated = volumes[poc_idx];
    let mut low_idx = poc_idx;
    let mut high_idx = poc_idx;

    while accumulated < target && (low_idx > 0 || high_idx < bin_count - 1) {
        let below = if low_idx > 0 { volumes[low_idx - 1] } else { f64::NEG_INFINITY };
        let above = if high_idx < bin_count - 1 {
            volumes[high_idx + 1]
        } else {
            f64::NEG_INFINITY
        };

        if below >= above && low_idx > 0 {
            low_idx -= 1;
            accumulated += volumes[low_idx];
        } else {
            high_idx += 1;
            accumulated += volumes[high_idx];
        }
    }

    let bin_edge = |idx: usize| price_min + idx as f64 * bin_size;
    let poc = bin_edge(poc_idx) + bin_size / 2.0;
    let val = bin_edge(low_idx);
    let vah = bin_edge(high_idx + 1);

    if !(val <= poc && poc <= vah) {
        return Err(CalcError::InvariantViolation(format!(
            "value area out of order: VAL={val} POC={poc} VAH={vah}"
        )));
    }

    Ok(Some(VolumeProfile {
        poc,
        vah,
        val,
        window_sec,
        trade_count: trades.len(),
    }))
}
