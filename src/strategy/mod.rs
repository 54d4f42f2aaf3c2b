//! Strategy contract and construction.
//!
//! A strategy is anything that turns ticks into [`Signal`]s. The engine
//! drives strategies from its strategy worker, so implementations own their
//! rolling state and receive ticks by shared reference.
//!
//! Strategies are looked up by id in a [`StrategyFactory`] built by the
//! driver at startup; the factory hands each constructor the loaded
//! [`Config`] so there are no process-global registries.

pub mod mean_reversion;
pub mod stat_arbitrage;

pub use mean_reversion::MeanReversionStrategy;
pub use stat_arbitrage::{ExecutionMode, PairSpec, StatArbConfig, StatArbStrategy};

use crate::config::Config;
use crate::types::{Signal, Tick};
use std::collections::HashMap;

/// Uniform decision-component interface.
pub trait Strategy: Send {
    /// Strategy name for logs and reports.
    fn name(&self) -> &str;

    /// Process one tick and return zero or more signals. Called from the
    /// engine's strategy worker; must not block.
    fn process_tick(&mut self, tick: &Tick) -> Vec<Signal>;

    /// Called once by the engine before the first tick.
    fn initialize(&mut self) {}

    /// Called once by the engine after the last tick.
    fn shutdown(&mut self) {}

    /// Re-read keyed configuration. The default keeps whatever the
    /// strategy was constructed with; cores whose worker topology depends
    /// on the configuration (stat-arb) are fixed at construction.
    fn configure(&mut self, _config: &Config) {}

    /// Whether the engine should route ticks to this strategy.
    fn is_enabled(&self) -> bool {
        true
    }
}

type StrategyCtor = Box<dyn Fn(&Config) -> Box<dyn Strategy>>;

/// Construction-time strategy registry.
///
/// Owned by the driver; ids are matched case-insensitively so CLI input
/// like `--backtest StatArb ticks.csv` resolves.
pub struct StrategyFactory {
    creators: HashMap<String, StrategyCtor>,
}

impl StrategyFactory {
    pub fn new() -> Self {
        Self {
            creators: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        id: impl Into<String>,
        ctor: impl Fn(&Config) -> Box<dyn Strategy> + 'static,
    ) {
        self.creators.insert(id.into().to_lowercase(), Box::new(ctor));
    }

    /// Instantiate a strategy by id, or `None` for an unknown id.
    pub fn create(&self, id: &str, config: &Config) -> Option<Box<dyn Strategy>> {
        self.creators.get(&id.to_lowercase()).map(|ctor| ctor(config))
    }

    pub fn registered_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.creators.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for StrategyFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// The built-in strategy set.
///
/// `mode` selects between the deterministic (replay) and parallel (live /
/// throughput replay) variants of the stat-arb core.
pub fn default_factory(mode: ExecutionMode) -> StrategyFactory {
    let mut factory = StrategyFactory::new();
    factory.register("mean-reversion", |cfg| {
        Box::new(MeanReversionStrategy::from_config(cfg))
    });
    factory.register("stat-arb", move |cfg| {
        Box::new(StatArbStrategy::new(StatArbConfig::from_config(cfg), mode))
    });
    factory
}
