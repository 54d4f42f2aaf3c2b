//! Performance analysis over an equity curve and a closed-trade log.
//!
//! All annualization assumes 252 trading days per year and one equity
//! point per "day"; in replay mode the points are fill-sequence points,
//! so the annualized figures are comparable between runs of the same
//! data, not calendar-accurate.

/// A closed round-trip used for win-rate, profit-factor and MFE/MAE
/// statistics.
#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub symbol: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    /// Best unrealized profit seen while the trade was open.
    pub max_favorable: f64,
    /// Worst unrealized loss seen while the trade was open.
    pub max_adverse: f64,
    pub is_long: bool,
}

impl ClosedTrade {
    pub fn profit(&self) -> f64 {
        let per_unit = if self.is_long {
            self.exit_price - self.entry_price
        } else {
            self.entry_price - self.exit_price
        };
        per_unit * self.quantity
    }
}

/// The full metric set computed by [`PerformanceAnalyzer`].
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Max drawdown as a fraction of the peak.
    pub max_drawdown: f64,
    /// Longest run of consecutive non-peak points.
    pub max_drawdown_duration: f64,
    pub calmar_ratio: f64,
    pub volatility: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_mfe: f64,
    pub avg_mae: f64,
    pub beta: f64,
    pub alpha: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
}

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const EPS: f64 = 1e-6;

pub struct PerformanceAnalyzer {
    equity_curve: Vec<f64>,
    benchmark_curve: Vec<f64>,
    trades: Vec<ClosedTrade>,
    risk_free_rate: f64,
}

impl PerformanceAnalyzer {
    pub fn new(risk_free_rate: f64) -> Self {
        Self {
            equity_curve: Vec::new(),
            benchmark_curve: Vec::new(),
            trades: Vec::new(),
            risk_free_rate,
        }
    }

    pub fn add_equity_point(&mut self, equity: f64) {
        self.equity_curve.push(equity);
    }

    pub fn add_benchmark_point(&mut self, value: f64) {
        self.benchmark_curve.push(value);
    }

    pub fn add_trade(&mut self, trade: ClosedTrade) {
        self.trades.push(trade);
    }

    pub fn equity_curve(&self) -> &[f64] {
        &self.equity_curve
    }

    /// Simple returns `e_i / e_{i-1} - 1` of a curve.
    pub fn returns(curve: &[f64]) -> Vec<f64> {
        curve
            .windows(2)
            .filter(|w| w[0].abs() > EPS)
            .map(|w| w[1] / w[0] - 1.0)
            .collect()
    }

    pub fn sharpe_ratio(&self, returns: &[f64]) -> f64 {
        if returns.is_empty() {
            return 0.0;
        }
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
        let std = var.sqrt();
        if std < EPS {
            return 0.0;
        }
        (mean * TRADING_DAYS_PER_YEAR - self.risk_free_rate) / (std * TRADING_DAYS_PER_YEAR.sqrt())
    }

    pub fn sortino_ratio(&self, returns: &[f64]) -> f64 {
        if returns.is_empty() {
            return 0.0;
        }
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        if downside.is_empty() {
            return 0.0;
        }
        let dd = (downside.iter().map(|r| r * r).sum::<f64>() / downside.len() as f64).sqrt();
        if dd < EPS {
            return 0.0;
        }
        (mean * TRADING_DAYS_PER_YEAR - self.risk_free_rate) / (dd * TRADING_DAYS_PER_YEAR.sqrt())
    }

    /// Max drawdown (fraction of peak) and its duration in points.
    pub fn max_drawdown(curve: &[f64]) -> (f64, f64) {
        if curve.len() < 2 {
            return (0.0, 0.0);
        }
        let mut peak = curve[0];
        let mut max_dd = 0.0;
        let mut max_duration = 0.0f64;
        let mut current_duration = 0.0f64;
        for &point in &curve[1..] {
            if point > peak {
                peak = point;
                current_duration = 0.0;
            } else {
                current_duration += 1.0;
                if peak > EPS {
                    let dd = (peak - point) / peak;
                    if dd > max_dd {
                        max_dd = dd;
                    }
                }
                max_duration = max_duration.max(current_duration);
            }
        }
        (max_dd, max_duration)
    }

    pub fn calculate(&self) -> PerformanceMetrics {
        let mut m = PerformanceMetrics::default();
        if self.equity_curve.len() < 2 {
            m.total_trades = self.trades.len();
            return m;
        }

        let first = self.equity_curve[0];
        let last = *self.equity_curve.last().expect("nonempty curve");
        let returns = Self::returns(&self.equity_curve);

        m.total_return = if first.abs() > EPS { last / first - 1.0 } else { 0.0 };

        let years = self.equity_curve.len() as f64 / TRADING_DAYS_PER_YEAR;
        if years > 0.0 && 1.0 + m.total_return > 0.0 {
            m.annualized_return = (1.0 + m.total_return).powf(1.0 / years) - 1.0;
        }

        m.sharpe_ratio = self.sharpe_ratio(&returns);
        m.sortino_ratio = self.sortino_ratio(&returns);

        let (dd, duration) = Self::max_drawdown(&self.equity_curve);
        m.max_drawdown = dd;
        m.max_drawdown_duration = duration;
        m.calmar_ratio = if dd > EPS { m.annualized_return / dd } else { 0.0 };

        if !returns.is_empty() {
            let n = returns.len() as f64;
            let mean = returns.iter().sum::<f64>() / n;
            let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / n;
            m.volatility = var.sqrt() * TRADING_DAYS_PER_YEAR.sqrt();
        }

        self.trade_stats(&mut m);
        self.benchmark_stats(&mut m, &returns, years);
        m
    }

    fn trade_stats(&self, m: &mut PerformanceMetrics) {
        let mut gross_profit = 0.0;
        let mut gross_loss = 0.0;
        let mut total_mfe = 0.0;
        let mut total_mae = 0.0;
        let mut consecutive_wins = 0;
        let mut consecutive_losses = 0;

        for trade in &self.trades {
            let profit = trade.profit();
            if profit > 0.0 {
                m.winning_trades += 1;
                gross_profit += profit;
                consecutive_wins += 1;
                consecutive_losses = 0;
                m.max_consecutive_wins = m.max_consecutive_wins.max(consecutive_wins);
            } else {
                m.losing_trades += 1;
                gross_loss += -profit;
                consecutive_losses += 1;
                consecutive_wins = 0;
                m.max_consecutive_losses = m.max_consecutive_losses.max(consecutive_losses);
            }
            total_mfe += trade.max_favorable;
            total_mae += trade.max_adverse;
        }

        m.total_trades = self.trades.len();
        if m.total_trades > 0 {
            m.win_rate = m.winning_trades as f64 / m.total_trades as f64;
            m.avg_mfe = total_mfe / m.total_trades as f64;
            m.avg_mae = total_mae / m.total_trades as f64;
        }
        m.profit_factor = if gross_loss > EPS {
            gross_profit / gross_loss
        } else {
            0.0
        };
    }

    fn benchmark_stats(&self, m: &mut PerformanceMetrics, returns: &[f64], years: f64) {
        if self.benchmark_curve.len() != self.equity_curve.len() || self.benchmark_curve.len() < 2 {
            return;
        }
        let bench_returns = Self::returns(&self.benchmark_curve);
        if bench_returns.len() != returns.len() || returns.is_empty() {
            return;
        }

        let n = returns.len() as f64;
        let mean_x = returns.iter().sum::<f64>() / n;
        let mean_y = bench_returns.iter().sum::<f64>() / n;
        let covariance = returns
            .iter()
            .zip(bench_returns.iter())
            .map(|(x, y)| (x - mean_x) * (y - mean_y))
            .sum::<f64>()
            / n;
        let variance_y = bench_returns
            .iter()
            .map(|y| (y - mean_y) * (y - mean_y))
            .sum::<f64>()
            / n;
        if variance_y < EPS * EPS {
            return;
        }
        m.beta = covariance / variance_y;

        let bench_first = self.benchmark_curve[0];
        let bench_last = *self.benchmark_curve.last().expect("nonempty benchmark");
        if bench_first.abs() > EPS && years > 0.0 {
            let bench_total = bench_last / bench_first - 1.0;
            if 1.0 + bench_total > 0.0 {
                let bench_annualized = (1.0 + bench_total).powf(1.0 / years) - 1.0;
                m.alpha = m.annualized_return
                    - (self.risk_free_rate + m.beta * (bench_annualized - self.risk_free_rate));
            }
        }
    }
}

impl Default for PerformanceAnalyzer {
    fn default() -> Self {
        Self::new(0.0)
    }
}
