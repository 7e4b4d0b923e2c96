use crate::market_data::PriceView;
use crate::models::WeightVector;
use crate::param_utils::{get_param_f64_clamped, get_param_usize_at_least};
use crate::strategy::{Strategy, StrategyParams};
use crate::strategy_utils::{
    aligned_returns, covariance_matrix, drift_exceeded, normalize_weights, simple_sma,
};
use anyhow::{anyhow, Result};

const TREND_LOOKBACKS: [usize; 3] = [20, 60, 120];

/// Inflation-beta tilt around a TQQQ core: the diversifier sleeve is split
/// between commodities and gold by inverse volatility, then tilted toward
/// commodities when their trend is up across several lookbacks.
#[derive(Debug)]
pub struct EquityInflationBetaStrategy {
    name: String,
    assets: Vec<String>,
    drift_bands: f64,
    core_weight: f64,
    sleeve_weight: f64,
    cash_weight: f64,
    trend_weight: f64,
    rp_lookback: usize,
}

impl EquityInflationBetaStrategy {
    pub fn new(params: StrategyParams) -> Self {
        Self {
            name: "equity_inflation_beta".to_string(),
            assets: vec![
                "TQQQ".to_string(),
                "PDBC".to_string(),
                "IAU".to_string(),
                "SGOV".to_string(),
            ],
            drift_bands: get_param_f64_clamped(&params, "driftBands", 10.0, 0.0, 100.0),
            core_weight: get_param_f64_clamped(&params, "tqqqBaseWeight", 0.6, 0.0, 1.0),
            sleeve_weight: get_param_f64_clamped(&params, "sleeveWeight", 0.3, 0.0, 1.0),
            cash_weight: get_param_f64_clamped(&params, "cashWeight", 0.1, 0.0, 1.0),
            trend_weight: get_param_f64_clamped(&params, "trendWeight", 0.6, 0.0, 1.0),
            rp_lookback: get_param_usize_at_least(&params, "rpLookback", 60, 2),
        }
    }

    /// Average directional signal of commodities versus their moving
    /// averages, in [-1, 1]. Lookbacks without enough history abstain.
    fn trend_signal(&self, data: &PriceView<'_>) -> f64 {
        let closes = data.closes("PDBC");
        let Some(last) = closes.last().copied() else {
            return 0.0;
        };
        let mut signal = 0.0;
        let mut observed = 0usize;
        for lookback in TREND_LOOKBACKS {
            if let Some(sma) = simple_sma(&closes, lookback) {
                signal += if last > sma { 1.0 } else { -1.0 };
                observed += 1;
            }
        }
        if observed == 0 {
            0.0
        } else {
            signal / observed as f64
        }
    }

    /// Commodities' share of the diversifier sleeve: inverse-volatility
    /// parity between PDBC and IAU, trend-tilted, kept inside [0.1, 0.9].
    fn commodities_share(&self, data: &PriceView<'_>) -> f64 {
        let pair = ["PDBC".to_string(), "IAU".to_string()];
        let rows = aligned_returns(data, &pair, self.rp_lookback);
        let mut share = 0.5;
        if rows.len() >= 2 {
            let cov = covariance_matrix(&rows, 2);
            let commodities_vol = cov[0][0].max(0.0).sqrt();
            let gold_vol = cov[1][1].max(0.0).sqrt();
            if commodities_vol > 0.0 && gold_vol > 0.0 {
                let inv_commodities = 1.0 / commodities_vol;
                let inv_gold = 1.0 / gold_vol;
                share = inv_commodities / (inv_commodities + inv_gold);
            }
        }
        let tilt = 0.25 * self.trend_weight * self.trend_signal(data);
        (share + tilt).clamp(0.1, 0.9)
    }
}

impl Strategy for EquityInflationBetaStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn assets(&self) -> &[String] {
        &self.assets
    }

    fn calculate_weights(&self, data: &PriceView<'_>) -> Result<WeightVector> {
        for asset in &self.assets {
            if !data.has_symbol(asset) {
                return Err(anyhow!("Required asset {} not found in data", asset));
            }
        }

        let commodities_share = self.commodities_share(data);
        let mut weights = WeightVector::new();
        weights.insert("TQQQ".to_string(), self.core_weight);
        weights.insert(
            "PDBC".to_string(),
            self.sleeve_weight * commodities_share,
        );
        weights.insert(
            "IAU".to_string(),
            self.sleeve_weight * (1.0 - commodities_share),
        );
        weights.insert("SGOV".to_string(), self.cash_weight);
        normalize_weights(&mut weights);
        Ok(weights)
    }

    fn should_rebalance(&self, current: &WeightVector, target: &WeightVector) -> bool {
        drift_exceeded(current, target, &self.assets, self.drift_bands / 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::PriceTable;
    use chrono::{Duration, NaiveDate};
    use std::collections::BTreeMap;

    fn table_with_commodity_drift(days: usize, daily_drift: f64) -> PriceTable {
        let start: NaiveDate = "2022-06-01".parse().unwrap();
        let mut columns = BTreeMap::new();
        let specs: [(&str, f64, f64, f64); 4] = [
            ("TQQQ", 100.0, 0.02, 0.0),
            ("PDBC", 20.0, 0.004, daily_drift),
            ("IAU", 35.0, 0.004, 0.0),
            ("SGOV", 100.0, 0.0002, 0.0),
        ];
        for (symbol, base, amplitude, drift) in specs {
            let mut series = BTreeMap::new();
            let mut price = base;
            for offset in 0..days {
                let day = start + Duration::days(offset as i64);
                let swing = if offset % 2 == 0 { amplitude } else { -amplitude };
                price *= 1.0 + swing + drift;
                series.insert(day, price);
            }
            columns.insert(symbol.to_string(), series);
        }
        PriceTable::from_columns(&columns)
    }

    #[test]
    fn weights_cover_all_sleeves_and_sum_to_one() {
        let strategy = EquityInflationBetaStrategy::new(StrategyParams::new());
        let table = table_with_commodity_drift(150, 0.0);
        let weights = strategy.calculate_weights(&table.full_view()).unwrap();
        assert_eq!(weights.len(), 4);
        assert!((weights.values().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(weights["TQQQ"] > weights["PDBC"]);
    }

    #[test]
    fn rising_commodities_pull_the_sleeve_toward_pdbc() {
        let strategy = EquityInflationBetaStrategy::new(StrategyParams::new());
        let rising = table_with_commodity_drift(150, 0.002);
        let falling = table_with_commodity_drift(150, -0.002);
        let up = strategy.calculate_weights(&rising.full_view()).unwrap();
        let down = strategy.calculate_weights(&falling.full_view()).unwrap();
        assert!(up["PDBC"] > down["PDBC"]);
        assert!(up["IAU"] < down["IAU"]);
    }

    #[test]
    fn sparse_history_still_produces_a_full_allocation() {
        let strategy = EquityInflationBetaStrategy::new(StrategyParams::new());
        let table = table_with_commodity_drift(3, 0.0);
        let weights = strategy.calculate_weights(&table.full_view()).unwrap();
        assert_eq!(weights.len(), 4);
        assert!((weights.values().sum::<f64>() - 1.0).abs() < 1e-9);
        // No trend history: the sleeve splits evenly.
        assert!((weights["PDBC"] - weights["IAU"]).abs() < 1e-9);
    }

    #[test]
    fn missing_asset_is_an_error() {
        let strategy = EquityInflationBetaStrategy::new(StrategyParams::new());
        let table = table_with_commodity_drift(30, 0.0).select(&[
            "TQQQ".to_string(),
            "PDBC".to_string(),
            "SGOV".to_string(),
        ]);
        assert!(strategy.calculate_weights(&table.full_view()).is_err());
    }
}
