use crate::error::EngineError;
use crate::market_data::PriceView;
use crate::models::WeightVector;
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};

pub type StrategyParams = HashMap<String, f64>;

/// An allocation strategy as the engine sees it: a target-weight function
/// over price history plus a rebalance trigger. The engine never looks
/// inside; everything else a strategy does is its own business.
pub trait Strategy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn assets(&self) -> &[String];
    /// Target weight per asset given the price history visible so far.
    fn calculate_weights(&self, data: &PriceView<'_>) -> Result<WeightVector>;
    /// Whether the gap between the live allocation and the target warrants
    /// trading today.
    fn should_rebalance(&self, current: &WeightVector, target: &WeightVector) -> bool;
}

pub type StrategyFactory = fn(StrategyParams) -> Box<dyn Strategy>;

/// Explicit name-to-factory table, built once by the host and passed by
/// reference into the engine. Registration is a plain function call; there
/// is no directory scanning and no global state.
pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// All bundled strategies.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("equity_crisis_alpha", |params| {
            Box::new(equity_crisis_alpha::EquityCrisisAlphaStrategy::new(params))
        });
        registry.register("equity_inflation_beta", |params| {
            Box::new(equity_inflation_beta::EquityInflationBetaStrategy::new(
                params,
            ))
        });
        registry.register("equity_vol_barbell", |params| {
            Box::new(equity_vol_barbell::EquityVolBarbellStrategy::new(params))
        });
        registry.register("risk_parity", |params| {
            Box::new(risk_parity::RiskParityStrategy::new(params))
        });
        registry
    }

    pub fn register(&mut self, name: &str, factory: StrategyFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(&self, name: &str, params: StrategyParams) -> Result<Box<dyn Strategy>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| EngineError::UnknownStrategy(name.to_string()))?;
        Ok(factory(params))
    }

    pub fn create_default(&self, name: &str) -> Result<Box<dyn Strategy>> {
        self.create(name, StrategyParams::new())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[path = "strategies/risk_parity.rs"]
pub mod risk_parity;

pub use risk_parity::RiskParityStrategy;

#[path = "strategies/equity_crisis_alpha.rs"]
pub mod equity_crisis_alpha;

pub use equity_crisis_alpha::EquityCrisisAlphaStrategy;

#[path = "strategies/equity_inflation_beta.rs"]
pub mod equity_inflation_beta;

pub use equity_inflation_beta::EquityInflationBetaStrategy;

#[path = "strategies/equity_vol_barbell.rs"]
pub mod equity_vol_barbell;

pub use equity_vol_barbell::EquityVolBarbellStrategy;
