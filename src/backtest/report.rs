//! Run artifacts: the trade CSV and the self-contained HTML reports.

use super::{ReplayError, ReplayReport};
use crate::record::TradeRow;
use crate::types::OrderSide;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

/// Write `winter_trades.csv`: one row per fill, an empty row, then the
/// summary block. Used by both the replay and live drivers.
pub fn write_trades_csv(
    path: impl AsRef<Path>,
    rows: &[TradeRow],
    initial_balance: f64,
    final_balance: f64,
) -> Result<(), ReplayError> {
    let path = path.as_ref();
    let to_err = |source: std::io::Error| ReplayError::Report {
        path: path.display().to_string(),
        source,
    };
    let file = std::fs::File::create(path).map_err(to_err)?;
    let mut w = std::io::BufWriter::new(file);

    writeln!(w, "Time,Symbol,Side,Quantity,Price,Value,P&L,Z-Score").map_err(to_err)?;
    for row in rows {
        let pnl = match (row.side, row.pnl) {
            (OrderSide::Sell, Some(pnl)) => format!("{pnl:.2}"),
            _ => String::new(),
        };
        writeln!(
            w,
            "{},{},{},{},{:.2},{:.2},{},{:.4}",
            escape_csv_field(&row.time),
            escape_csv_field(&row.symbol),
            row.side,
            row.quantity,
            row.price,
            row.value,
            pnl,
            row.z_score,
        )
        .map_err(to_err)?;
    }

    writeln!(w).map_err(to_err)?;
    writeln!(w, "Summary").map_err(to_err)?;
    writeln!(w, "Initial Balance:,{initial_balance:.2}").map_err(to_err)?;
    writeln!(w, "Final Balance:,{final_balance:.2}").map_err(to_err)?;
    writeln!(w, "P&L:,{:.2}", final_balance - initial_balance).map_err(to_err)?;
    w.flush().map_err(to_err)
}

/// Quote a field when it holds separators or quotes.
fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// The main backtest report: equity curve with buy/sell markers plus the
/// metric grid. Self-contained except for the Chart.js CDN tag.
pub fn write_backtest_html(path: impl AsRef<Path>, report: &ReplayReport) -> Result<(), ReplayError> {
    let path = path.as_ref();
    let to_err = |source: std::io::Error| ReplayError::Report {
        path: path.display().to_string(),
        source,
    };

    let m = &report.metrics;
    let pnl = report.final_balance - report.initial_balance;

    // Thin the curve so huge runs stay renderable.
    let equity = &report.recording.equity;
    let step = (equity.len() / 2_000).max(1);
    let mut labels = String::from("[");
    let mut points = String::from("[");
    for (i, value) in equity.iter().enumerate().step_by(step) {
        if i > 0 {
            labels.push(',');
            points.push(',');
        }
        let _ = write!(labels, "{i}");
        let _ = write!(points, "{value:.2}");
    }
    labels.push(']');
    points.push(']');

    let (mut buys, mut sells) = (String::from("["), String::from("["));
    for (i, row) in report.recording.rows.iter().enumerate() {
        // Fill i produced equity point i+1.
        let target = match row.side {
            OrderSide::Buy => &mut buys,
            OrderSide::Sell => &mut sells,
        };
        if target.len() > 1 {
            target.push(',');
        }
        let _ = write!(
            target,
            "{{x:{},y:{:.2},symbol:'{}'}}",
            i + 1,
            report.recording.equity.get(i + 1).copied().unwrap_or(0.0),
            row.symbol
        );
    }
    buys.push(']');
    sells.push(']');

    let metric_boxes = [
        ("Initial Balance", format!("${:.2}", report.initial_balance), ""),
        ("Final Balance", format!("${:.2}", report.final_balance), ""),
        (
            "Total P&L",
            format!("${:.2} ({:.2}%)", pnl, m.total_return * 100.0),
            if pnl >= 0.0 { "positive" } else { "negative" },
        ),
        (
            "Annualized Return",
            format!("{:.2}%", m.annualized_return * 100.0),
            if m.annualized_return >= 0.0 { "positive" } else { "negative" },
        ),
        ("Sharpe Ratio", format!("{:.2}", m.sharpe_ratio), ""),
        ("Sortino Ratio", format!("{:.2}", m.sortino_ratio), ""),
        (
            "Max Drawdown",
            format!("{:.2}% ({} points)", m.max_drawdown * 100.0, m.max_drawdown_duration),
            "negative",
        ),
        ("Calmar Ratio", format!("{:.2}", m.calmar_ratio), ""),
        ("Volatility", format!("{:.2}%", m.volatility * 100.0), ""),
        ("Total Trades", format!("{}", report.trade_count), ""),
        ("Win Rate", format!("{:.2}%", m.win_rate * 100.0), ""),
        ("Profit Factor", format!("{:.2}", m.profit_factor), ""),
        ("Avg MFE", format!("${:.2}", m.avg_mfe), "positive"),
        ("Avg MAE", format!("${:.2}", m.avg_mae), "negative"),
        ("Max Consecutive Wins", format!("{}", m.max_consecutive_wins), ""),
        ("Max Consecutive Losses", format!("{}", m.max_consecutive_losses), ""),
    ];
    let mut boxes = String::new();
    for (title, value, class) in metric_boxes {
        let _ = write!(
            boxes,
            r#"<div class="metric-box"><div class="metric-title">{title}</div><div class="metric-value {class}">{value}</div></div>"#
        );
    }

    let html = format!(
        r##"<!DOCTYPE html>
<html>
<head>
<title>Winter Backtest Results</title>
<script src="https://cdn.jsdelivr.net/npm/chart.js"></script>
<style>
body {{ font-family: Arial, sans-serif; margin: 20px; background-color: #f5f5f5; }}
.container {{ max-width: 1200px; margin: 0 auto; background: white; padding: 20px; border-radius: 5px; box-shadow: 0 0 10px rgba(0,0,0,0.1); }}
.header {{ text-align: center; margin-bottom: 30px; }}
.chart-container {{ height: 500px; margin-bottom: 30px; }}
.metrics-container {{ display: flex; flex-wrap: wrap; justify-content: space-between; }}
.metric-box {{ width: 30%; margin-bottom: 20px; padding: 15px; border-radius: 5px; background: #f9f9f9; box-shadow: 0 0 5px rgba(0,0,0,0.05); }}
.metric-title {{ font-weight: bold; margin-bottom: 5px; color: #333; }}
.metric-value {{ font-size: 20px; color: #0066cc; }}
.positive {{ color: #00aa00; }}
.negative {{ color: #cc0000; }}
</style>
</head>
<body>
<div class="container">
<div class="header"><h1>Winter Backtest Results</h1><p>{ticks} ticks, {fills} fills</p></div>
<div class="chart-container"><canvas id="equityChart"></canvas></div>
<div class="metrics-container">{boxes}</div>
</div>
<script>
const ctx = document.getElementById("equityChart").getContext("2d");
new Chart(ctx, {{
  type: "line",
  data: {{
    labels: {labels},
    datasets: [
      {{ label: "Equity Curve", data: {points}, borderColor: "#0066cc",
         backgroundColor: "rgba(0,102,204,0.1)", borderWidth: 2, fill: true, tension: 0.1 }},
      {{ label: "Buys", data: {buys}, backgroundColor: "#00aa00", borderColor: "#00aa00",
         pointRadius: 4, showLine: false }},
      {{ label: "Sells", data: {sells}, backgroundColor: "#cc0000", borderColor: "#cc0000",
         pointRadius: 4, showLine: false }}
    ]
  }},
  options: {{
    responsive: true, maintainAspectRatio: false,
    plugins: {{ title: {{ display: true, text: "Equity Curve with Trade Markers" }} }},
    scales: {{ y: {{ beginAtZero: false, title: {{ display: true, text: "Equity ($)" }} }},
               x: {{ title: {{ display: true, text: "Fill Sequence" }} }} }}
  }}
}});
</script>
</body>
</html>
"##,
        ticks = report.ticks_fed,
        fills = report.recording.rows.len(),
    );

    std::fs::write(path, html).map_err(to_err)
}

/// Companion page: per-trade P&L bars next to the equity curve.
pub fn write_graphs_html(path: impl AsRef<Path>, report: &ReplayReport) -> Result<(), ReplayError> {
    let path = path.as_ref();
    let to_err = |source: std::io::Error| ReplayError::Report {
        path: path.display().to_string(),
        source,
    };

    let mut pnl_points = String::from("[");
    let mut pnl_colors = String::from("[");
    let mut first = true;
    for row in &report.recording.rows {
        let Some(pnl) = row.pnl else { continue };
        if !first {
            pnl_points.push(',');
            pnl_colors.push(',');
        }
        first = false;
        let _ = write!(pnl_points, "{pnl:.2}");
        let _ = write!(
            pnl_colors,
            "'{}'",
            if pnl >= 0.0 { "#00aa00" } else { "#cc0000" }
        );
    }
    pnl_points.push(']');
    pnl_colors.push(']');

    let equity = &report.recording.equity;
    let step = (equity.len() / 2_000).max(1);
    let mut labels = String::from("[");
    let mut points = String::from("[");
    for (i, value) in equity.iter().enumerate().step_by(step) {
        if i > 0 {
            labels.push(',');
            points.push(',');
        }
        let _ = write!(labels, "{i}");
        let _ = write!(points, "{value:.2}");
    }
    labels.push(']');
    points.push(']');

    let html = format!(
        r##"<!DOCTYPE html>
<html>
<head>
<title>Winter Trade Results</title>
<script src="https://cdn.jsdelivr.net/npm/chart.js"></script>
<style>
body {{ font-family: Arial, sans-serif; margin: 20px; background-color: #f5f5f5; }}
.container {{ max-width: 1200px; margin: 0 auto; background: white; padding: 20px; border-radius: 5px; }}
.chart-container {{ height: 400px; margin-bottom: 30px; }}
</style>
</head>
<body>
<div class="container">
<h1>Winter Trade Results</h1>
<div class="chart-container"><canvas id="equityChart"></canvas></div>
<div class="chart-container"><canvas id="pnlChart"></canvas></div>
</div>
<script>
new Chart(document.getElementById("equityChart").getContext("2d"), {{
  type: "line",
  data: {{ labels: {labels},
           datasets: [{{ label: "Equity", data: {points}, borderColor: "#0066cc",
                        borderWidth: 2, fill: false, tension: 0.1 }}] }},
  options: {{ responsive: true, maintainAspectRatio: false,
             plugins: {{ title: {{ display: true, text: "Equity Curve" }} }} }}
}});
new Chart(document.getElementById("pnlChart").getContext("2d"), {{
  type: "bar",
  data: {{ labels: {pnl_points}.map((_, i) => i + 1),
           datasets: [{{ label: "Per-Trade P&L", data: {pnl_points},
                        backgroundColor: {pnl_colors} }}] }},
  options: {{ responsive: true, maintainAspectRatio: false,
             plugins: {{ title: {{ display: true, text: "Realized P&L per Closed Trade" }} }} }}
}});
</script>
</body>
</html>
"##
    );

    std::fs::write(path, html).map_err(to_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::PerformanceMetrics;
    use crate::record::{RecorderSnapshot, TradeRow};

    fn sample_report() -> ReplayReport {
        ReplayReport {
            initial_balance: 10_000.0,
            final_balance: 10_100.0,
            trade_count: 2,
            ticks_fed: 2,
            metrics: PerformanceMetrics::default(),
            recording: RecorderSnapshot {
                rows: vec![
                    TradeRow {
                        time: "1".to_string(),
                        symbol: "AAPL".to_string(),
                        side: OrderSide::Buy,
                        quantity: 10,
                        price: 100.0,
                        value: 1_000.0,
                        pnl: None,
                        z_score: -2.1,
                    },
                    TradeRow {
                        time: "2".to_string(),
                        symbol: "AAPL".to_string(),
                        side: OrderSide::Sell,
                        quantity: 10,
                        price: 110.0,
                        value: 1_100.0,
                        pnl: Some(100.0),
                        z_score: 0.4,
                    },
                ],
                equity: vec![10_000.0, 10_000.0, 10_100.0],
                closed: Vec::new(),
            },
        }
    }

    #[test]
    fn trades_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("winter_trades.csv");
        let report = sample_report();
        write_trades_csv(
            &path,
            &report.recording.rows,
            report.initial_balance,
            report.final_balance,
        )
        .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "Time,Symbol,Side,Quantity,Price,Value,P&L,Z-Score");
        assert_eq!(lines[1], "1,AAPL,BUY,10,100.00,1000.00,,-2.1000");
        assert_eq!(lines[2], "2,AAPL,SELL,10,110.00,1100.00,100.00,0.4000");
        assert_eq!(lines[3], "");
        assert_eq!(lines[4], "Summary");
        assert_eq!(lines[5], "Initial Balance:,10000.00");
        assert_eq!(lines[6], "Final Balance:,10100.00");
        assert_eq!(lines[7], "P&L:,100.00");
    }

    #[test]
    fn csv_escaping() {
        assert_eq!(escape_csv_field("plain"), "plain");
        assert_eq!(escape_csv_field("a,b"), "\"a,b\"");
        assert_eq!(escape_csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn html_reports_are_self_contained_documents() {
        let dir = tempfile::tempdir().unwrap();
        let report = sample_report();

        let main = dir.path().join("backtest_report.html");
        write_backtest_html(&main, &report).unwrap();
        let contents = std::fs::read_to_string(&main).unwrap();
        assert!(contents.starts_with("<!DOCTYPE html>"));
        assert!(contents.contains("equityChart"));
        assert!(contents.contains("10100.00"));

        let graphs = dir.path().join("trade_result_graphs.html");
        write_graphs_html(&graphs, &report).unwrap();
        let contents = std::fs::read_to_string(&graphs).unwrap();
        assert!(contents.contains("pnlChart"));
        assert!(contents.contains("100.00"));
    }
}
