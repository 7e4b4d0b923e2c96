use crate::market_data::PriceView;
use crate::models::WeightVector;
use crate::param_utils::{get_param_f64_clamped, get_param_usize_at_least};
use crate::strategy::{Strategy, StrategyParams};
use crate::strategy_utils::{drift_exceeded, normalize_weights};
use anyhow::{anyhow, Result};

/// Barbell of a leveraged equity core, a short-vol income sleeve and a tail
/// hedge, with cash absorbing whatever the drawdown trigger takes away from
/// the core.
#[derive(Debug)]
pub struct EquityVolBarbellStrategy {
    name: String,
    assets: Vec<String>,
    drift_bands: f64,
    core_weight: f64,
    short_vol_weight: f64,
    tail_hedge_weight: f64,
    cash_weight: f64,
    drawdown_threshold: f64,
    drawdown_scale: f64,
    drawdown_lookback: usize,
}

impl EquityVolBarbellStrategy {
    pub fn new(params: StrategyParams) -> Self {
        Self {
            name: "equity_vol_barbell".to_string(),
            assets: vec![
                "TQQQ".to_string(),
                "SVOL".to_string(),
                "TAIL".to_string(),
                "SGOV".to_string(),
            ],
            drift_bands: get_param_f64_clamped(&params, "driftBands", 10.0, 0.0, 100.0),
            core_weight: get_param_f64_clamped(&params, "tqqqBaseWeight", 0.7, 0.0, 1.0),
            short_vol_weight: get_param_f64_clamped(&params, "shortVolWeight", 0.15, 0.0, 1.0),
            tail_hedge_weight: get_param_f64_clamped(&params, "tailHedgeWeight", 0.1, 0.0, 1.0),
            cash_weight: get_param_f64_clamped(&params, "cashWeight", 0.05, 0.0, 1.0),
            drawdown_threshold: get_param_f64_clamped(
                &params,
                "maxDrawdownThreshold",
                0.15,
                0.0,
                1.0,
            ),
            drawdown_scale: get_param_f64_clamped(&params, "drawdownScaleFactor", 0.5, 0.0, 1.0),
            drawdown_lookback: get_param_usize_at_least(&params, "drawdownLookback", 120, 2),
        }
    }

    /// Core scaling factor from the equity sleeve's drawdown off its recent
    /// peak. 1.0 while the drawdown stays inside the threshold.
    fn drawdown_trigger(&self, data: &PriceView<'_>) -> f64 {
        let closes = data.closes("TQQQ");
        if closes.len() < 2 {
            return 1.0;
        }
        let window = &closes[closes.len().saturating_sub(self.drawdown_lookback)..];
        let peak = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let last = *window.last().expect("window is non-empty");
        if peak <= 0.0 {
            return 1.0;
        }
        let drawdown = last / peak - 1.0;
        if drawdown < -self.drawdown_threshold {
            self.drawdown_scale
        } else {
            1.0
        }
    }
}

impl Strategy for EquityVolBarbellStrategy {
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

        let scale = self.drawdown_trigger(data);
        let scaled_core = self.core_weight * scale;
        let freed = self.core_weight - scaled_core;

        let mut weights = WeightVector::new();
        weights.insert("TQQQ".to_string(), scaled_core);
        weights.insert("SVOL".to_string(), self.short_vol_weight);
        weights.insert("TAIL".to_string(), self.tail_hedge_weight);
        weights.insert("SGOV".to_string(), self.cash_weight + freed);
        normalize_weights(&mut weights);
        Ok(weights)
    }

    fn should_rebalance(&self, current: &WeightVector, target: &WeightVector) -> bool {
        drift_exceeded(current, target, &self.assets, self.drift_bands / 100.0)
    }
}
