use crate::market_data::PriceView;
use crate::models::WeightVector;
use crate::param_utils::{get_param_f64, get_param_f64_clamped, get_param_usize_at_least};
use crate::strategy::{Strategy, StrategyParams};
use crate::strategy_utils::{
    aligned_returns, covariance_matrix, drift_exceeded, normalize_weights, portfolio_volatility,
};
use anyhow::{anyhow, Result};

const MIN_RETURN_ROWS: usize = 10;
const MAX_SOLVER_ITERATIONS: usize = 200;
const SOLVER_TOLERANCE: f64 = 1e-10;

/// Risk parity allocation between leveraged equity and bond ETFs. Each asset
/// is sized so its contribution to portfolio risk matches the configured
/// risk budget, with a portfolio-level volatility cap on top.
#[derive(Debug)]
pub struct RiskParityStrategy {
    name: String,
    assets: Vec<String>,
    lookback_period: usize,
    drift_bands: f64,
    risk_budget: [f64; 2],
    volatility_target: f64,
    min_weight: f64,
    max_weight: f64,
}

impl RiskParityStrategy {
    pub fn new(params: StrategyParams) -> Self {
        let equity_budget = get_param_f64_clamped(&params, "riskBudgetEquity", 0.75, 0.0, 1.0);
        let bond_budget = get_param_f64_clamped(&params, "riskBudgetBond", 0.25, 0.0, 1.0);
        Self {
            name: "risk_parity".to_string(),
            assets: vec!["TQQQ".to_string(), "TMF".to_string()],
            lookback_period: get_param_usize_at_least(&params, "lookbackPeriod", 90, 2),
            drift_bands: get_param_f64_clamped(&params, "driftBands", 5.0, 0.0, 100.0),
            risk_budget: [equity_budget, bond_budget],
            volatility_target: get_param_f64(&params, "volatilityTarget", 0.15),
            min_weight: get_param_f64_clamped(&params, "minWeight", 0.01, 0.0, 1.0),
            max_weight: get_param_f64_clamped(&params, "maxWeight", 0.99, 0.0, 1.0),
        }
    }

    fn equal_weights(&self) -> WeightVector {
        let weight = 1.0 / self.assets.len() as f64;
        self.assets
            .iter()
            .map(|asset| (asset.clone(), weight))
            .collect()
    }

    /// Fixed-point iteration for the risk budgeting problem: each step moves
    /// weights toward budget / marginal-risk and renormalizes. Falls back to
    /// the equal-weight start when the covariance degenerates or the
    /// iteration fails to settle.
    fn solve_risk_parity(&self, cov: &[Vec<f64>], budget: &[f64]) -> Option<Vec<f64>> {
        let n = budget.len();
        let mut weights = vec![1.0 / n as f64; n];
        for _ in 0..MAX_SOLVER_ITERATIONS {
            let marginal: Vec<f64> = (0..n)
                .map(|i| (0..n).map(|j| cov[i][j] * weights[j]).sum())
                .collect();
            if marginal.iter().any(|m| !m.is_finite() || *m <= 0.0) {
                return None;
            }
            let mut updated: Vec<f64> = (0..n).map(|i| budget[i] / marginal[i]).collect();
            let total: f64 = updated.iter().sum();
            if !(total.is_finite() && total > 0.0) {
                return None;
            }
            for value in updated.iter_mut() {
                *value /= total;
            }
            // Damped step keeps the iteration from oscillating.
            let mut max_delta = 0.0f64;
            for i in 0..n {
                let next = 0.5 * (weights[i] + updated[i]);
                max_delta = max_delta.max((next - weights[i]).abs());
                weights[i] = next;
            }
            if max_delta < SOLVER_TOLERANCE {
                break;
            }
        }
        Some(weights)
    }
}

impl Strategy for RiskParityStrategy {
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

        let rows = aligned_returns(data, &self.assets, self.lookback_period);
        if rows.len() < MIN_RETURN_ROWS {
            return Ok(self.equal_weights());
        }

        let cov = covariance_matrix(&rows, self.assets.len());
        let budget_total: f64 = self.risk_budget.iter().sum();
        let budget: Vec<f64> = if budget_total > 0.0 {
            self.risk_budget.iter().map(|b| b / budget_total).collect()
        } else {
            vec![0.5, 0.5]
        };

        let solved = self
            .solve_risk_parity(&cov, &budget)
            .unwrap_or_else(|| vec![1.0 / self.assets.len() as f64; self.assets.len()]);

        let mut weights: WeightVector = self
            .assets
            .iter()
            .zip(solved.iter())
            .map(|(asset, weight)| {
                (
                    asset.clone(),
                    weight.clamp(self.min_weight, self.max_weight),
                )
            })
            .collect();

        // Scale the whole book down when realized volatility overshoots the
        // target, then restore the unit sum.
        let weight_array: Vec<f64> = self.assets.iter().map(|a| weights[a]).collect();
        let realized = portfolio_volatility(&weight_array, &cov);
        if realized > self.volatility_target && realized > 0.0 {
            let scale = self.volatility_target / realized;
            for value in weights.values_mut() {
                *value *= scale;
            }
        }
        normalize_weights(&mut weights);
        Ok(weights)
    }

    fn should_rebalance(&self, current: &WeightVector, target: &WeightVector) -> bool {
        drift_exceeded(current, target, &self.assets, self.drift_bands / 100.0)
    }
}
