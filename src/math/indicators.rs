//! Streaming technical indicators used by the mean-reversion core.
//!
//! Everything here is incremental: one update per tick, O(1) state. The
//! feed carries trades only (no bars), so range-based indicators use the
//! tick-to-tick move as the true range.

/// Exponential moving average with the standard `2 / (n + 1)` smoothing.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1);
        Self {
            alpha: 2.0 / (period as f64 + 1.0),
            value: None,
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            None => x,
            Some(prev) => prev + self.alpha * (x - prev),
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Wilder's RSI over tick-to-tick price changes.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    avg_gain: f64,
    avg_loss: f64,
    last_price: Option<f64>,
    samples: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1);
        Self {
            period,
            avg_gain: 0.0,
            avg_loss: 0.0,
            last_price: None,
            samples: 0,
        }
    }

    /// Feed a price; returns the current RSI in `[0, 100]`.
    ///
    /// Reads 50 (neutral) until a full period of changes has been seen.
    pub fn update(&mut self, price: f64) -> f64 {
        let Some(last) = self.last_price.replace(price) else {
            return 50.0;
        };
        let change = price - last;
        let (gain, loss) = if change >= 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };

        if self.samples < self.period {
            // Simple average warm-up, then Wilder smoothing.
            self.avg_gain += gain;
            self.avg_loss += loss;
            self.samples += 1;
            if self.samples == self.period {
                self.avg_gain /= self.period as f64;
                self.avg_loss /= self.period as f64;
            }
            return 50.0;
        }

        let p = self.period as f64;
        self.avg_gain = (self.avg_gain * (p - 1.0) + gain) / p;
        self.avg_loss = (self.avg_loss * (p - 1.0) + loss) / p;
        self.value()
    }

    pub fn value(&self) -> f64 {
        if self.samples < self.period {
            return 50.0;
        }
        if self.avg_loss < 1e-12 {
            return 100.0;
        }
        let rs = self.avg_gain / self.avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }

    pub fn is_warm(&self) -> bool {
        self.samples >= self.period
    }
}

/// Average true range over tick-to-tick moves, Wilder-smoothed.
#[derive(Debug, Clone)]
pub struct AverageTrueRange {
    period: usize,
    atr: f64,
    last_price: Option<f64>,
    samples: usize,
}

impl AverageTrueRange {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1);
        Self {
            period,
            atr: 0.0,
            last_price: None,
            samples: 0,
        }
    }

    pub fn update(&mut self, price: f64) -> f64 {
        let Some(last) = self.last_price.replace(price) else {
            return 0.0;
        };
        let tr = (price - last).abs();
        if self.samples < self.period {
            self.atr += tr;
            self.samples += 1;
            if self.samples == self.period {
                self.atr /= self.period as f64;
            }
            return if self.samples == self.period {
                self.atr
            } else {
                0.0
            };
        }
        let p = self.period as f64;
        self.atr = (self.atr * (p - 1.0) + tr) / p;
        self.atr
    }

    pub fn value(&self) -> f64 {
        if self.samples < self.period {
            0.0
        } else {
            self.atr
        }
    }

    pub fn is_warm(&self) -> bool {
        self.samples >= self.period
    }
}

/// Percentage volume oscillator: fast EMA of volume vs slow EMA of volume.
///
/// Reads in roughly `[-100, +∞)`; the mean-reversion rules gate on ±30.
#[derive(Debug, Clone)]
pub struct VolumeOscillator {
    fast: Ema,
    slow: Ema,
}

impl VolumeOscillator {
    pub fn new(fast_period: usize, slow_period: usize) -> Self {
        assert!(fast_period < slow_period);
        Self {
            fast: Ema::new(fast_period),
            slow: Ema::new(slow_period),
        }
    }

    pub fn update(&mut self, volume: f64) -> f64 {
        let fast = self.fast.update(volume);
        let slow = self.slow.update(volume);
        if slow < 1e-12 {
            return 0.0;
        }
        (fast - slow) / slow * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_seeds_on_first_value() {
        let mut ema = Ema::new(10);
        assert_eq!(ema.update(5.0), 5.0);
    }

    #[test]
    fn ema_converges_to_constant_input() {
        let mut ema = Ema::new(5);
        for _ in 0..200 {
            ema.update(100.0);
        }
        assert!((ema.value().unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_is_neutral_during_warmup() {
        let mut rsi = Rsi::new(14);
        for i in 0..10 {
            assert_eq!(rsi.update(100.0 + i as f64), 50.0);
        }
        assert!(!rsi.is_warm());
    }

    #[test]
    fn rsi_saturates_on_monotonic_rise() {
        let mut rsi = Rsi::new(14);
        let mut last = 0.0;
        for i in 0..50 {
            last = rsi.update(100.0 + i as f64);
        }
        assert!(last > 95.0, "rsi {last}");
    }

    #[test]
    fn rsi_drops_on_monotonic_fall() {
        let mut rsi = Rsi::new(14);
        let mut last = 100.0;
        for i in 0..50 {
            last = rsi.update(100.0 - i as f64);
        }
        assert!(last < 5.0, "rsi {last}");
    }

    #[test]
    fn atr_tracks_constant_step() {
        let mut atr = AverageTrueRange::new(14);
        let mut v = 0.0;
        for i in 0..100 {
            v = atr.update(100.0 + i as f64 * 0.5);
        }
        assert!((v - 0.5).abs() < 1e-6, "atr {v}");
    }

    #[test]
    fn volume_oscillator_positive_on_volume_spike() {
        let mut osc = VolumeOscillator::new(14, 28);
        let mut v = 0.0;
        for _ in 0..100 {
            v = osc.update(100.0);
        }
        assert!(v.abs() < 1.0);
        for _ in 0..10 {
            v = osc.update(500.0);
        }
        assert!(v > 30.0, "oscillator {v}");
    }
}
