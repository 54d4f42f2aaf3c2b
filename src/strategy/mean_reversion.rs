//! Mean-reversion decision core.
//!
//! Per-symbol rolling z-score with multi-indicator confirmation: entries
//! need the Bollinger bands open (width over the mean above a floor), a
//! volume-oscillator extreme in the direction of the flow, the 200-period
//! EMA trend on the right side, an RSI extreme, and a live ATR (no entries
//! into a dead tape). Exits fire when the z-score comes back inside the
//! exit band.

use crate::config::Config;
use crate::math::{AverageTrueRange, Ema, RollingWindow, Rsi, VolumeOscillator};
use crate::strategy::Strategy;
use crate::types::{Signal, SignalKind, Tick};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct MeanReversionConfig {
    pub window: usize,
    pub entry_threshold: f64,
    pub exit_threshold: f64,
    pub bb_width_min: f64,
    pub volume_osc_gate: f64,
    pub rsi_buy_max: f64,
    pub rsi_sell_min: f64,
    /// Minimum ATR as a fraction of price; blocks entries when the tape
    /// stops moving.
    pub atr_floor_pct: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            window: 20,
            entry_threshold: 2.0,
            exit_threshold: 0.5,
            bb_width_min: 0.15,
            volume_osc_gate: 30.0,
            rsi_buy_max: 35.0,
            rsi_sell_min: 65.0,
            atr_floor_pct: 1e-4,
        }
    }
}

impl MeanReversionConfig {
    pub fn from_config(cfg: &Config) -> Self {
        let d = Self::default();
        Self {
            window: cfg.get_or("mean_reversion.window", d.window),
            entry_threshold: cfg.get_or("mean_reversion.entry_threshold", d.entry_threshold),
            exit_threshold: cfg.get_or("mean_reversion.exit_threshold", d.exit_threshold),
            bb_width_min: cfg.get_or("mean_reversion.bb_width_min", d.bb_width_min),
            volume_osc_gate: cfg.get_or("mean_reversion.volume_osc_gate", d.volume_osc_gate),
            rsi_buy_max: cfg.get_or("mean_reversion.rsi_buy_max", d.rsi_buy_max),
            rsi_sell_min: cfg.get_or("mean_reversion.rsi_sell_min", d.rsi_sell_min),
            atr_floor_pct: cfg.get_or("mean_reversion.atr_floor_pct", d.atr_floor_pct),
        }
    }
}

/// Rolling state for one symbol.
struct SymbolState {
    window: RollingWindow,
    trend: Ema,
    volume_osc: VolumeOscillator,
    atr: AverageTrueRange,
    rsi: Rsi,
}

impl SymbolState {
    fn new(window: usize) -> Self {
        Self {
            window: RollingWindow::new(window),
            trend: Ema::new(200),
            volume_osc: VolumeOscillator::new(14, 28),
            atr: AverageTrueRange::new(14),
            rsi: Rsi::new(14),
        }
    }
}

pub struct MeanReversionStrategy {
    name: String,
    config: MeanReversionConfig,
    symbols: HashMap<String, SymbolState>,
    enabled: bool,
}

impl MeanReversionStrategy {
    pub fn new(config: MeanReversionConfig) -> Self {
        Self {
            name: "MeanReversion".to_string(),
            config,
            symbols: HashMap::new(),
            enabled: true,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(MeanReversionConfig::from_config(cfg))
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Bollinger width relative to the mean: `(upper - lower) / mean`
    /// with bands at ±2σ.
    fn bb_width(window: &RollingWindow) -> f64 {
        let mean = window.mean();
        if mean.abs() < 1e-12 {
            return 0.0;
        }
        4.0 * window.std_dev() / mean.abs()
    }
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    /// Re-reading the configuration resets all rolling state; windows of
    /// a different size cannot be patched in place.
    fn configure(&mut self, config: &Config) {
        self.config = MeanReversionConfig::from_config(config);
        self.symbols.clear();
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn process_tick(&mut self, tick: &Tick) -> Vec<Signal> {
        let cfg = &self.config;
        let state = self
            .symbols
            .entry(tick.symbol.clone())
            .or_insert_with(|| SymbolState::new(cfg.window));

        // Indicators update on every tick regardless of whether the
        // window is ready; they warm up alongside it.
        let ema = state.trend.update(tick.price);
        let osc = state.volume_osc.update(tick.volume.max(0) as f64);
        let atr = state.atr.update(tick.price);
        let rsi = state.rsi.update(tick.price);

        state.window.push(tick.price);
        if !state.window.is_full() {
            return Vec::new();
        }

        let z = state.window.z_score(tick.price);
        let width = Self::bb_width(&state.window);
        let atr_alive = state.atr.is_warm() && atr >= cfg.atr_floor_pct * tick.price;

        let mut signals = Vec::new();
        if z <= -cfg.entry_threshold
            && width > cfg.bb_width_min
            && osc < -cfg.volume_osc_gate
            && tick.price > ema
            && rsi < cfg.rsi_buy_max
            && atr_alive
        {
            let strength = ((-z - cfg.entry_threshold) / 2.0).min(1.0);
            signals.push(Signal::new(
                &tick.symbol,
                SignalKind::Buy,
                strength,
                tick.price,
            ));
        } else if z >= cfg.entry_threshold
            && width > cfg.bb_width_min
            && osc > cfg.volume_osc_gate
            && tick.price < ema
            && rsi > cfg.rsi_sell_min
            && atr_alive
        {
            let strength = ((z - cfg.entry_threshold) / 2.0).min(1.0);
            signals.push(Signal::new(
                &tick.symbol,
                SignalKind::Sell,
                strength,
                tick.price,
            ));
        } else if z.abs() < cfg.exit_threshold {
            let strength = 1.0 - z.abs() / cfg.exit_threshold;
            signals.push(Signal::new(
                &tick.symbol,
                SignalKind::Exit,
                strength,
                tick.price,
            ));
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: &str, price: f64, volume: i32, ts: i64) -> Tick {
        Tick::new(symbol, price, volume, ts)
    }

    /// A relaxed config that lets unit tests drive entries without
    /// hundreds of warm-up ticks on the 200-EMA.
    fn test_config() -> MeanReversionConfig {
        MeanReversionConfig {
            window: 5,
            entry_threshold: 1.5,
            exit_threshold: 0.5,
            bb_width_min: 0.0,
            // Negative gate: a flat oscillator still passes both sides.
            volume_osc_gate: -1.0,
            rsi_buy_max: 101.0,
            rsi_sell_min: -1.0,
            atr_floor_pct: 0.0,
        }
    }

    #[test]
    fn no_signals_until_window_full() {
        let mut s = MeanReversionStrategy::new(test_config());
        for i in 0..4 {
            assert!(s
                .process_tick(&tick("AAPL", 100.0 + i as f64, 10, i))
                .is_empty());
        }
    }

    #[test]
    fn constant_prices_emit_exit_only() {
        // Flat series: z is exactly 0 once the window fills, which sits
        // inside the exit band.
        let mut s = MeanReversionStrategy::new(test_config());
        let mut last = Vec::new();
        for i in 0..10 {
            last = s.process_tick(&tick("AAPL", 100.0, 10, i));
        }
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].kind, SignalKind::Exit);
    }

    #[test]
    fn drop_below_band_emits_buy_above_trend() {
        let mut cfg = test_config();
        cfg.exit_threshold = 0.1;
        let mut s = MeanReversionStrategy::new(cfg);

        // Long ramp keeps price above the slow EMA, with enough jitter
        // for a nonzero band. Then a sharp dip relative to the recent
        // window while still above trend.
        let mut ts = 0;
        for i in 0..300 {
            let wiggle = if i % 2 == 0 { 0.4 } else { -0.4 };
            s.process_tick(&tick("AAPL", 100.0 + i as f64 * 0.05 + wiggle, 10, ts));
            ts += 1;
        }
        let dipped = s.process_tick(&tick("AAPL", 113.0, 10, ts));
        assert_eq!(dipped.len(), 1, "signals: {dipped:?}");
        assert_eq!(dipped[0].kind, SignalKind::Buy);
        assert!(dipped[0].strength > 0.0);
    }

    #[test]
    fn volume_gate_blocks_entry() {
        let mut cfg = test_config();
        cfg.volume_osc_gate = 30.0;
        cfg.exit_threshold = 0.1;
        let mut s = MeanReversionStrategy::new(cfg);

        // Same shape as the buy test, but steady volume keeps the
        // oscillator near zero, which fails the < -30 gate.
        let mut ts = 0;
        for i in 0..300 {
            let wiggle = if i % 2 == 0 { 0.4 } else { -0.4 };
            s.process_tick(&tick("AAPL", 100.0 + i as f64 * 0.05 + wiggle, 10, ts));
            ts += 1;
        }
        let dipped = s.process_tick(&tick("AAPL", 113.0, 10, ts));
        assert!(dipped.is_empty(), "signals: {dipped:?}");
    }

    #[test]
    fn neutral_band_produces_no_orders_state() {
        let mut s = MeanReversionStrategy::new(test_config());
        let mut ts = 0;
        // Mild oscillation: |z| stays between exit (0.5) and entry (1.5).
        for i in 0..50 {
            let p = if i % 2 == 0 { 100.8 } else { 99.2 };
            let signals = s.process_tick(&tick("AAPL", p, 10, ts));
            ts += 1;
            for sig in signals {
                assert_ne!(sig.kind, SignalKind::Buy);
                assert_ne!(sig.kind, SignalKind::Sell);
            }
        }
    }
}
