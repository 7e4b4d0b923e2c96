use crate::market_data::PriceView;
use crate::models::WeightVector;
use crate::param_utils::{get_param_f64, get_param_f64_clamped, get_param_usize_at_least};
use crate::strategy::{Strategy, StrategyParams};
use crate::strategy_utils::{
    aligned_returns, covariance_matrix, drift_exceeded, portfolio_volatility,
};
use anyhow::{anyhow, Result};

const MAX_VIEW_TILT: f64 = 0.1;

/// TQQQ-centric book with managed futures and gold for crisis alpha: a
/// risk-budgeted base allocation, a Black-Litterman style tilt on the equity
/// sleeve, and portfolio-level volatility targeting with a leverage cap.
/// The weights it returns may sum below one after targeting; the residual is
/// implicit cash.
#[derive(Debug)]
pub struct EquityCrisisAlphaStrategy {
    name: String,
    assets: Vec<String>,
    drift_bands: f64,
    tqqq_budget: f64,
    diversifier_budget: f64,
    cash_budget: f64,
    view_confidence: f64,
    view_expected_return: f64,
    volatility_target: f64,
    vol_lookback: usize,
    max_leverage: f64,
}

impl EquityCrisisAlphaStrategy {
    pub fn new(params: StrategyParams) -> Self {
        Self {
            name: "equity_crisis_alpha".to_string(),
            assets: vec![
                "TQQQ".to_string(),
                "DBMF".to_string(),
                "IAU".to_string(),
                "SGOV".to_string(),
            ],
            drift_bands: get_param_f64_clamped(&params, "driftBands", 10.0, 0.0, 100.0),
            tqqq_budget: get_param_f64_clamped(&params, "tqqqWeight", 0.6, 0.0, 1.0),
            diversifier_budget: get_param_f64_clamped(&params, "diversifierWeight", 0.3, 0.0, 1.0),
            cash_budget: get_param_f64_clamped(&params, "cashWeight", 0.1, 0.0, 1.0),
            view_confidence: get_param_f64_clamped(&params, "blViewConfidence", 0.7, 0.0, 1.0),
            view_expected_return: get_param_f64(&params, "blViewExpectedReturn", 0.12),
            volatility_target: get_param_f64(&params, "volatilityTarget", 0.15),
            vol_lookback: get_param_usize_at_least(&params, "volLookback", 60, 2),
            max_leverage: get_param_f64(&params, "maxLeverage", 3.0),
        }
    }

    fn base_weights(&self) -> WeightVector {
        let mut weights = WeightVector::new();
        weights.insert("TQQQ".to_string(), self.tqqq_budget);
        // The diversifier budget is split evenly between managed futures
        // and gold.
        weights.insert("DBMF".to_string(), self.diversifier_budget / 2.0);
        weights.insert("IAU".to_string(), self.diversifier_budget / 2.0);
        weights.insert("SGOV".to_string(), self.cash_budget);
        weights
    }

    /// Shift the equity sleeve by the view, paying for the tilt
    /// proportionally out of everything else.
    fn apply_view_tilt(&self, base: &WeightVector) -> WeightVector {
        let mut tilted = base.clone();
        let tilt = self.view_confidence * MAX_VIEW_TILT;
        let signed_tilt = if self.view_expected_return > 0.0 {
            tilt
        } else {
            -tilt
        };
        let equity_base = base.get("TQQQ").copied().unwrap_or(0.0);
        tilted.insert("TQQQ".to_string(), equity_base + signed_tilt);

        let other_total: f64 = base
            .iter()
            .filter(|(asset, _)| asset.as_str() != "TQQQ")
            .map(|(_, weight)| weight)
            .sum();
        if other_total > 0.0 && signed_tilt != 0.0 {
            for (asset, weight) in base {
                if asset == "TQQQ" {
                    continue;
                }
                let share = weight / other_total;
                tilted.insert(asset.clone(), weight - signed_tilt * share);
            }
        }
        tilted
    }

    fn apply_volatility_targeting(
        &self,
        weights: &WeightVector,
        rows: &[Vec<f64>],
    ) -> WeightVector {
        let recent_start = rows.len().saturating_sub(self.vol_lookback);
        let recent = &rows[recent_start..];
        if recent.len() < 2 {
            return weights.clone();
        }
        let cov = covariance_matrix(recent, self.assets.len());
        let weight_array: Vec<f64> = self
            .assets
            .iter()
            .map(|asset| weights.get(asset).copied().unwrap_or(0.0))
            .collect();
        let realized = portfolio_volatility(&weight_array, &cov);
        let mut scaled = weight_array;
        if realized > 0.0 {
            let scale = self.volatility_target / realized;
            for value in scaled.iter_mut() {
                *value *= scale;
            }
        }

        let gross: f64 = scaled.iter().map(|value| value.abs()).sum();
        if gross > self.max_leverage {
            let cap = self.max_leverage / gross;
            for value in scaled.iter_mut() {
                *value *= cap;
            }
        }

        self.assets
            .iter()
            .cloned()
            .zip(scaled.into_iter())
            .collect()
    }
}

impl Strategy for EquityCrisisAlphaStrategy {
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

        let rows = aligned_returns(data, &self.assets, data.len());
        let tilted = self.apply_view_tilt(&self.base_weights());
        if rows.len() < 2 {
            return Ok(tilted);
        }
        Ok(self.apply_volatility_targeting(&tilted, &rows))
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

    fn sample_table(days: usize) -> PriceTable {
        let start: NaiveDate = "2023-01-02".parse().unwrap();
        let mut columns = BTreeMap::new();
        let specs: [(&str, f64, f64); 4] = [
            ("TQQQ", 100.0, 0.03),
            ("DBMF", 30.0, 0.008),
            ("IAU", 40.0, 0.006),
            ("SGOV", 100.0, 0.0005),
        ];
        for (symbol, base, amplitude) in specs {
            let mut series = BTreeMap::new();
            let mut price = base;
            for offset in 0..days {
                let day = start + Duration::days(offset as i64);
                let swing = if offset % 2 == 0 { amplitude } else { -amplitude };
                price *= 1.0 + swing;
                series.insert(day, price);
            }
            columns.insert(symbol.to_string(), series);
        }
        PriceTable::from_columns(&columns)
    }

    #[test]
    fn bullish_view_tilts_into_the_equity_sleeve() {
        let strategy = EquityCrisisAlphaStrategy::new(StrategyParams::new());
        let base = strategy.base_weights();
        let tilted = strategy.apply_view_tilt(&base);
        assert!(tilted["TQQQ"] > base["TQQQ"]);
        assert!(tilted["DBMF"] < base["DBMF"]);
        // The tilt is budget-neutral before volatility targeting.
        let base_sum: f64 = base.values().sum();
        let tilted_sum: f64 = tilted.values().sum();
        assert!((base_sum - tilted_sum).abs() < 1e-12);
    }

    #[test]
    fn bearish_view_tilts_out_of_the_equity_sleeve() {
        let mut params = StrategyParams::new();
        params.insert("blViewExpectedReturn".to_string(), -0.10);
        let strategy = EquityCrisisAlphaStrategy::new(params);
        let base = strategy.base_weights();
        let tilted = strategy.apply_view_tilt(&base);
        assert!(tilted["TQQQ"] < base["TQQQ"]);
        assert!(tilted["IAU"] > base["IAU"]);
    }

    #[test]
    fn short_history_returns_the_tilted_base_book() {
        let strategy = EquityCrisisAlphaStrategy::new(StrategyParams::new());
        let table = sample_table(2);
        let weights = strategy.calculate_weights(&table.full_view()).unwrap();
        let tilted = strategy.apply_view_tilt(&strategy.base_weights());
        for (asset, weight) in &weights {
            assert!((weight - tilted[asset]).abs() < 1e-12);
        }
    }

    #[test]
    fn volatility_targeting_scales_the_whole_book() {
        let strategy = EquityCrisisAlphaStrategy::new(StrategyParams::new());
        let table = sample_table(120);
        let weights = strategy.calculate_weights(&table.full_view()).unwrap();
        // Every sleeve stays represented after scaling.
        for asset in strategy.assets() {
            assert!(weights.contains_key(asset));
        }
        let gross: f64 = weights.values().map(|w| w.abs()).sum();
        assert!(gross <= strategy.max_leverage + 1e-9);
        // Relative sleeve ordering survives uniform scaling.
        assert!(weights["TQQQ"] > weights["DBMF"]);
    }

    #[test]
    fn missing_asset_is_an_error() {
        let strategy = EquityCrisisAlphaStrategy::new(StrategyParams::new());
        let table = sample_table(30).select(&[
            "TQQQ".to_string(),
            "DBMF".to_string(),
            "IAU".to_string(),
        ]);
        assert!(strategy.calculate_weights(&table.full_view()).is_err());
    }
}
