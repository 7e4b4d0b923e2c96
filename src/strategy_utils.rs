use crate::market_data::PriceView;
use crate::models::WeightVector;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Scale weights in place so they sum to one. Left untouched when the sum
/// is zero or negative.
pub fn normalize_weights(weights: &mut WeightVector) {
    let total: f64 = weights.values().sum();
    if total > 0.0 {
        for value in weights.values_mut() {
            *value /= total;
        }
    }
}

/// Drift-band rebalance check shared by the bundled strategies. An asset
/// missing from the current allocation always triggers.
pub fn drift_exceeded(
    current: &WeightVector,
    target: &WeightVector,
    assets: &[String],
    drift_band: f64,
) -> bool {
    for asset in assets {
        if !current.contains_key(asset) {
            return true;
        }
    }
    for asset in assets {
        let current_weight = current.get(asset).copied().unwrap_or(0.0);
        let target_weight = target.get(asset).copied().unwrap_or(0.0);
        if (current_weight - target_weight).abs() > drift_band {
            return true;
        }
    }
    false
}

/// Row-aligned daily returns for `symbols` over the last `lookback` rows of
/// the view. A row contributes only when every symbol is quoted on both ends
/// of the day, mirroring a joint percent-change with incomplete rows dropped.
pub fn aligned_returns(view: &PriceView<'_>, symbols: &[String], lookback: usize) -> Vec<Vec<f64>> {
    let dates = view.dates();
    if dates.len() < 2 || symbols.is_empty() {
        return Vec::new();
    }
    let start = dates.len().saturating_sub(lookback);
    let mut rows = Vec::new();
    for window in dates[start..].windows(2) {
        let previous = view.prices_on(window[0]);
        let current = view.prices_on(window[1]);
        let mut row = Vec::with_capacity(symbols.len());
        let mut complete = true;
        for symbol in symbols {
            match (previous.get(symbol), current.get(symbol)) {
                (Some(prev), Some(curr)) if *prev != 0.0 => row.push((curr - prev) / prev),
                _ => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            rows.push(row);
        }
    }
    rows
}

/// Annualized sample covariance matrix of aligned return rows.
pub fn covariance_matrix(rows: &[Vec<f64>], n_assets: usize) -> Vec<Vec<f64>> {
    let n = rows.len();
    let mut cov = vec![vec![0.0; n_assets]; n_assets];
    if n < 2 {
        return cov;
    }
    let mut means = vec![0.0; n_assets];
    for row in rows {
        for (i, value) in row.iter().enumerate() {
            means[i] += value;
        }
    }
    for mean in means.iter_mut() {
        *mean /= n as f64;
    }
    for i in 0..n_assets {
        for j in i..n_assets {
            let mut sum = 0.0;
            for row in rows {
                sum += (row[i] - means[i]) * (row[j] - means[j]);
            }
            let value = sum / (n as f64 - 1.0) * TRADING_DAYS_PER_YEAR;
            cov[i][j] = value;
            cov[j][i] = value;
        }
    }
    cov
}

/// sqrt(w' C w); zero when the quadratic form degenerates.
pub fn portfolio_volatility(weights: &[f64], cov: &[Vec<f64>]) -> f64 {
    let mut quad = 0.0;
    for (i, wi) in weights.iter().enumerate() {
        for (j, wj) in weights.iter().enumerate() {
            quad += wi * wj * cov[i][j];
        }
    }
    if quad > 0.0 {
        quad.sqrt()
    } else {
        0.0
    }
}

/// Simple moving average of the last `period` values, or `None` when there
/// is not enough history.
pub fn simple_sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: f64 = values[values.len() - period..].iter().sum();
    Some(sum / period as f64)
}
