use crate::models::PerformanceMetrics;
use statrs::statistics::Statistics;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Finite stand-in for ±infinity so every metrics record stays serializable
/// to formats that reject non-finite floats.
pub const NON_FINITE_SENTINEL: f64 = 999.0;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Percent-change series of a value trajectory. The undefined first
    /// observation and 0/0 entries are dropped; a nonzero jump off a zero
    /// base stays infinite and is sanitized downstream.
    pub fn daily_returns(values: &[f64]) -> Vec<f64> {
        values
            .windows(2)
            .map(|window| {
                let previous = window[0];
                let current = window[1];
                if previous == 0.0 && current == 0.0 {
                    f64::NAN
                } else {
                    (current - previous) / previous
                }
            })
            .filter(|value| !value.is_nan())
            .collect()
    }

    /// Derive the full metrics record from daily fractional returns and the
    /// first/last trajectory values. Pure and deterministic; an empty return
    /// series yields an all-zero record.
    pub fn calculate(returns: &[f64], initial_value: f64, final_value: f64) -> PerformanceMetrics {
        if returns.is_empty() {
            return PerformanceMetrics::zeroed();
        }
        let n = returns.len();

        let total_return = final_value / initial_value - 1.0;
        let annualized_return = if final_value.is_finite() && initial_value != 0.0 {
            (final_value / initial_value).powf(TRADING_DAYS_PER_YEAR / n as f64) - 1.0
        } else {
            0.0
        };

        let volatility = returns.to_vec().std_dev() * TRADING_DAYS_PER_YEAR.sqrt();
        let sharpe_ratio = if volatility.is_finite() && volatility > 0.0 {
            annualized_return / volatility
        } else {
            0.0
        };

        let max_drawdown = Self::max_drawdown(returns);
        let calmar_ratio = if max_drawdown.is_finite() && max_drawdown != 0.0 {
            annualized_return / max_drawdown.abs()
        } else {
            0.0
        };

        let win_rate = returns.iter().filter(|r| **r > 0.0).count() as f64 / n as f64;
        let avg_trade_return = returns.iter().sum::<f64>() / n as f64;

        let positive_sum: f64 = returns.iter().filter(|r| **r > 0.0).sum();
        let negative_sum: f64 = returns.iter().filter(|r| **r < 0.0).sum::<f64>().abs();
        let profit_factor = if negative_sum > 0.0 {
            positive_sum / negative_sum
        } else {
            NON_FINITE_SENTINEL
        };

        PerformanceMetrics {
            total_return: Self::sanitize(total_return),
            annualized_return: Self::sanitize(annualized_return),
            volatility: Self::sanitize(volatility),
            sharpe_ratio: Self::sanitize(sharpe_ratio),
            max_drawdown: Self::sanitize(max_drawdown),
            calmar_ratio: Self::sanitize(calmar_ratio),
            win_rate: Self::sanitize(win_rate),
            profit_factor: Self::sanitize(profit_factor),
            avg_trade_return: Self::sanitize(avg_trade_return),
            num_trades: n as i32,
        }
    }

    /// Most negative excursion of the compounded return path from its
    /// running maximum. Non-positive by construction, zero for a
    /// non-decreasing path.
    fn max_drawdown(returns: &[f64]) -> f64 {
        let mut cumulative = 1.0;
        let mut running_max = f64::NEG_INFINITY;
        let mut max_drawdown = 0.0f64;
        for value in returns {
            cumulative *= 1.0 + value;
            if cumulative > running_max {
                running_max = cumulative;
            }
            let drawdown = (cumulative - running_max) / running_max;
            if drawdown < max_drawdown {
                max_drawdown = drawdown;
            }
        }
        max_drawdown
    }

    fn sanitize(value: f64) -> f64 {
        if value == f64::INFINITY || value == f64::NEG_INFINITY {
            return NON_FINITE_SENTINEL;
        }
        if value.is_nan() {
            return 0.0;
        }
        value
    }
}
