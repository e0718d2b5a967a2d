use chrono::DateTime;
use comfy_table::{
    modifiers::UTF8_ROUND_CORNERS, presets::UTF8_BORDERS_ONLY, Attribute, Cell, CellAlignment,
    Color, ContentArrangement, Table,
};

use crate::analysis::AnalysisReport;
use crate::engine::Scan;
use crate::models::{CandlePattern, Exchange, PatternType, Rating, ScreenResult};
use crate::tools::ToolResponse;

/// Brightness of a row relative to the leading row, never below 40%.
pub(crate) fn get_visibility_ratio(current: f64, top: f64) -> f64 {
    if top == 0.0 || !top.is_finite() {
        return 1.0;
    }
    (0.4 + 0.6 * (current / top)).clamp(0.4, 1.0)
}

/// What a screen's metric column holds, which decides its title and shading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenMetric {
    Change,
    Bandwidth,
}

impl ScreenMetric {
    pub fn for_tool(tool: &str) -> Self {
        match tool {
            "bollinger_scan" => ScreenMetric::Bandwidth,
            _ => ScreenMetric::Change,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ScreenMetric::Change => "Change (%)",
            ScreenMetric::Bandwidth => "Bandwidth",
        }
    }

    /// Row brightness. Moves are shaded by magnitude against the leading row;
    /// bandwidths by how far below the widest row they sit.
    pub(crate) fn ratios(self, results: &[ScreenResult]) -> Vec<f64> {
        match self {
            ScreenMetric::Change => {
                let top = results.first().map_or(1.0, |r| r.metric_value.abs());
                results
                    .iter()
                    .map(|r| get_visibility_ratio(r.metric_value.abs(), top))
                    .collect()
            }
            ScreenMetric::Bandwidth => {
                let widest = results.iter().map(|r| r.metric_value).fold(f64::MIN, f64::max);
                let tightest = results.first().map_or(widest, |r| r.metric_value);
                results
                    .iter()
                    .map(|r| get_visibility_ratio(widest - r.metric_value, widest - tightest))
                    .collect()
            }
        }
    }
}

pub(crate) fn format_timestamp(ts_ms: i64) -> String {
    let seconds = ts_ms.div_euclid(1000);
    let nanoseconds = (ts_ms.rem_euclid(1000) * 1_000_000) as u32;
    DateTime::from_timestamp(seconds, nanoseconds)
        .map(|dt| dt.format("%d-%m-%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown Time".to_string())
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            header
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
    table
}

fn shade(ratio: f64, max: f64) -> u8 {
    (max * ratio) as u8
}

fn footer(omitted: usize) -> String {
    if omitted == 0 {
        String::new()
    } else {
        format!("\n({omitted} symbols skipped: data unavailable)")
    }
}

pub fn screen_table(metric: ScreenMetric, scan: &Scan<ScreenResult>) -> String {
    if scan.results.is_empty() {
        return format!("No matches.{}", footer(scan.omitted));
    }
    let mut table = new_table(&["Rank", "Asset", "Timeframe", metric.title()]);
    if let Some(column) = table.column_mut(3) {
        column.set_cell_alignment(CellAlignment::Right);
    }

    for (row, ratio) in scan.results.iter().zip(metric.ratios(&scan.results)) {
        let cyan_val = shade(ratio, 255.0);
        let value_color = if row.metric_value < 0.0 {
            Color::Rgb { r: shade(ratio, 255.0), g: 0, b: 0 }
        } else {
            Color::Rgb { r: 0, g: shade(ratio, 255.0), b: 0 }
        };

        table.add_row(vec![
            Cell::new(row.rank).fg(Color::DarkGrey),
            Cell::new(&row.symbol).fg(Color::Rgb { r: 0, g: cyan_val, b: cyan_val }),
            Cell::new(row.timeframe).fg(Color::Grey),
            Cell::new(format!("{:.4}", row.metric_value)).fg(value_color),
        ]);
    }
    format!("{table}{}", footer(scan.omitted))
}

pub fn pattern_table(scan: &Scan<CandlePattern>) -> String {
    if scan.results.is_empty() {
        return format!("No patterns found.{}", footer(scan.omitted));
    }
    let mut table = new_table(&["Rank", "Asset", "Pattern", "Run", "Growth (%)", "Timeframes"]);

    let top = scan.results[0].growth_percent;
    for (i, found) in scan.results.iter().enumerate() {
        let ratio = get_visibility_ratio(found.growth_percent, top);
        let gray_val = shade(ratio, 150.0);
        let pattern_color = match found.pattern_type {
            PatternType::Bullish => Color::Green,
            PatternType::Bearish => Color::Red,
        };
        let timeframes = found
            .matched_timeframes
            .iter()
            .map(|tf| tf.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        table.add_row(vec![
            Cell::new(i + 1).fg(Color::DarkGrey),
            Cell::new(&found.symbol).fg(Color::Rgb { r: 0, g: shade(ratio, 255.0), b: shade(ratio, 255.0) }),
            Cell::new(found.pattern_type).fg(pattern_color),
            Cell::new(found.run_length).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2}%", found.growth_percent)).set_alignment(CellAlignment::Right),
            Cell::new(format!("({timeframes})")).fg(Color::Rgb { r: gray_val, g: gray_val, b: gray_val }),
        ]);
    }
    format!("{table}{}", footer(scan.omitted))
}

fn rating_color(rating: Rating) -> Color {
    match rating.value() {
        2 => Color::Green,
        1 => Color::DarkGreen,
        0 => Color::Grey,
        -1 => Color::DarkRed,
        _ => Color::Red,
    }
}

pub fn analysis_table(report: &AnalysisReport) -> String {
    let mut table = new_table(&["Field", "Value"]);
    let b = &report.bollinger;
    let patterns = if report.patterns.is_empty() {
        "none".to_string()
    } else {
        report
            .patterns
            .iter()
            .map(|p| format!("{} x{} ({:.2}%)", p.pattern_type, p.run_length, p.growth_percent))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let rows: Vec<(&str, Cell)> = vec![
        ("Asset", Cell::new(format!("{}:{}", report.exchange, report.symbol))),
        ("Bar", Cell::new(format!("{} {} UTC", report.timeframe, format_timestamp(report.timestamp)))),
        ("Close", Cell::new(report.close)),
        ("Change (%)", Cell::new(format!("{:.2}", report.percent_change))),
        ("Bollinger", Cell::new(format!("{:.4} / {:.4} / {:.4}", b.lower, b.middle, b.upper))),
        ("Bandwidth", Cell::new(format!("{:.4}", b.bandwidth))),
        ("RSI", Cell::new(format!("{:.2}", report.rsi))),
        ("Rating", Cell::new(report.rating).fg(rating_color(report.rating))),
        ("Patterns", Cell::new(patterns)),
    ];
    for (field, value) in rows {
        table.add_row(vec![Cell::new(field).fg(Color::DarkGrey), value]);
    }
    table.to_string()
}

pub fn exchange_table(exchanges: &[Exchange]) -> String {
    let mut table = new_table(&["Exchange", "Markets", "Timeframes"]);
    for exchange in exchanges {
        let timeframes = exchange
            .supported_timeframes
            .iter()
            .map(|tf| tf.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        table.add_row(vec![
            Cell::new(&exchange.name).fg(Color::Cyan),
            Cell::new(exchange.market_count).set_alignment(CellAlignment::Right),
            Cell::new(timeframes).fg(Color::Grey),
        ]);
    }
    table.to_string()
}

/// Table for any tool response; `tool` picks the metric column title.
pub fn render(tool: &str, response: &ToolResponse) -> String {
    match response {
        ToolResponse::Screen(scan) => screen_table(ScreenMetric::for_tool(tool), scan),
        ToolResponse::Patterns(scan) => pattern_table(scan),
        ToolResponse::Analysis(report) => analysis_table(report),
        ToolResponse::Exchanges(exchanges) => exchange_table(exchanges),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeframe::Timeframe;

    #[test]
    fn visibility_is_floored_and_capped() {
        assert_eq!(get_visibility_ratio(10.0, 10.0), 1.0);
        assert_eq!(get_visibility_ratio(0.0, 10.0), 0.4);
        assert_eq!(get_visibility_ratio(-5.0, 10.0), 0.4);
        assert_eq!(get_visibility_ratio(3.0, 0.0), 1.0);
    }

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(1_700_000_000_000), "14-11-2023 22:13:20");
    }

    #[test]
    fn screen_table_lists_rows_and_omissions() {
        let scan = Scan {
            results: vec![ScreenResult {
                symbol: "BTCUSDT".into(),
                exchange: "KUCOIN".into(),
                timeframe: Timeframe::Min15,
                metric_value: 2.5,
                rank: 1,
            }],
            omitted: 2,
        };
        let out = screen_table(ScreenMetric::Change, &scan);
        assert!(out.contains("BTCUSDT"));
        assert!(out.contains("2.5000"));
        assert!(out.contains("2 symbols skipped"));
        assert_eq!(
            screen_table(ScreenMetric::Bandwidth, &Scan { results: Vec::new(), omitted: 0 }),
            "No matches."
        );
    }

    fn row(symbol: &str, metric_value: f64, rank: usize) -> ScreenResult {
        ScreenResult {
            symbol: symbol.into(),
            exchange: "KUCOIN".into(),
            timeframe: Timeframe::Min15,
            metric_value,
            rank,
        }
    }

    #[test]
    fn squeezes_shade_tightest_brightest() {
        let rows = [row("EEEUSDT", 0.0, 1), row("BBBUSDT", 0.02, 2), row("CCCUSDT", 0.04, 3)];
        let ratios = ScreenMetric::for_tool("bollinger_scan").ratios(&rows);
        assert_eq!(ratios[0], 1.0);
        assert!(ratios[0] > ratios[1] && ratios[1] > ratios[2]);
        assert_eq!(ratios[2], 0.4);

        // identical bandwidths are all fully visible
        let flat = ScreenMetric::Bandwidth.ratios(&[row("A", 0.01, 1), row("B", 0.01, 2)]);
        assert_eq!(flat, [1.0, 1.0]);
    }

    #[test]
    fn moves_shade_by_magnitude() {
        let rows = [row("AAAUSDT", 5.0, 1), row("BBBUSDT", 1.0, 2)];
        let ratios = ScreenMetric::for_tool("top_gainers").ratios(&rows);
        assert_eq!(ratios[0], 1.0);
        assert!(ratios[1] < 1.0);
    }
}
