mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{EXCHANGE, FailingProvider, FlakyProvider, engine, engine_with, market_series, snapshot};
use market_screener::catalog::Catalog;
use market_screener::indicators::{IndicatorConfig, RatingConfig, bollinger, rating};
use market_screener::screening::Limit;
use market_screener::storage_utils::AppConfig;
use market_screener::{CandlePattern, Engine, PatternType, Rating, ScreenResult, ScreenerError, Timeframe};

fn screened(rows: &[ScreenResult]) -> Vec<&str> {
    rows.iter().map(|r| r.symbol.as_str()).collect()
}

fn matched(rows: &[CandlePattern]) -> Vec<&str> {
    rows.iter().map(|p| p.symbol.as_str()).collect()
}

#[tokio::test]
async fn gainers_are_sorted_and_truncated() {
    let engine = engine();
    let scan = engine
        .top_gainers(EXCHANGE, Timeframe::Min15, Limit::new(3).unwrap())
        .await
        .unwrap();

    assert_eq!(screened(&scan.results), ["AAAUSDT", "DDDUSDT", "ACCUSDT"]);
    assert_eq!(scan.results.iter().map(|r| r.rank).collect::<Vec<_>>(), [1, 2, 3]);
    assert_eq!(scan.results[0].metric_value, 5.0);
    assert_eq!(scan.results[0].exchange, "KUCOIN");
    assert_eq!(scan.omitted, 0);
}

#[tokio::test]
async fn losers_break_ties_by_symbol() {
    let scan = engine()
        .top_losers("kucoin", Timeframe::Min15, Limit::new(3).unwrap())
        .await
        .unwrap();
    // EEEUSDT and SHORTUSDT both moved 0%
    assert_eq!(screened(&scan.results), ["CCCUSDT", "EEEUSDT", "SHORTUSDT"]);
}

#[tokio::test]
async fn limit_larger_than_matches_is_not_an_error() {
    let scan = engine()
        .top_gainers(EXCHANGE, Timeframe::Min15, Limit::new(500).unwrap())
        .await
        .unwrap();
    assert_eq!(scan.results.len(), 10);
    assert!(scan.results.windows(2).all(|w| w[0].metric_value >= w[1].metric_value));
}

#[tokio::test]
async fn bollinger_scan_keeps_squeezes_tightest_first() {
    let scan = engine()
        .bollinger_scan(EXCHANGE, Timeframe::Min15, 0.04, Limit::DEFAULT)
        .await
        .unwrap();
    assert_eq!(screened(&scan.results), ["EEEUSDT", "BBBUSDT", "CCCUSDT"]);
    assert!(scan.results[0].metric_value.abs() < 1e-9);
    assert!(scan.results.iter().all(|r| r.metric_value < 0.04));
    // SHORTUSDT has 5 bars, fewer than the 20-bar window
    assert_eq!(scan.omitted, 1);
}

#[tokio::test]
async fn bollinger_threshold_must_be_positive() {
    for threshold in [0.0, -0.1, f64::NAN] {
        let err = engine()
            .bollinger_scan(EXCHANGE, Timeframe::Min15, threshold, Limit::DEFAULT)
            .await
            .unwrap_err();
        assert!(matches!(err, ScreenerError::InvalidParameter { name: "bbw_threshold", .. }));
    }
}

#[tokio::test]
async fn rating_filter_returns_exactly_the_matching_symbols() {
    let engine = engine();
    let indicators = IndicatorConfig::default();
    let rating_cfg = RatingConfig::default();

    for wanted in Rating::ALL {
        let expected: BTreeSet<String> = market_series()
            .iter()
            .filter(|s| s.timeframe() == Timeframe::Min15 && s.len() >= indicators.bollinger_period)
            .filter(|s| {
                let state = bollinger(s, indicators.bollinger_period, indicators.bollinger_mult).unwrap();
                rating(s, &state, &rating_cfg).unwrap() == wanted
            })
            .map(|s| s.symbol().to_string())
            .collect();

        let scan = engine
            .rating_filter(EXCHANGE, Timeframe::Min15, wanted, Limit::new(100).unwrap())
            .await
            .unwrap();
        let got: BTreeSet<String> = scan.results.iter().map(|r| r.symbol.clone()).collect();
        assert!(!expected.is_empty(), "no fixture symbol rates {wanted}");
        assert_eq!(got, expected, "rating {wanted}");
        assert!(scan.results.windows(2).all(|w| w[0].metric_value >= w[1].metric_value));
    }
}

#[tokio::test]
async fn breakout_rates_strong_buy() {
    let scan = engine()
        .rating_filter(EXCHANGE, Timeframe::Min15, Rating::StrongBuy, Limit::DEFAULT)
        .await
        .unwrap();
    let found = screened(&scan.results);
    assert!(found.contains(&"AAAUSDT"));
    assert!(found.contains(&"DDDUSDT"));
}

#[tokio::test]
async fn middle_ratings_are_screened() {
    let engine = engine();
    let buy = engine
        .rating_filter(EXCHANGE, Timeframe::Min15, Rating::Buy, Limit::DEFAULT)
        .await
        .unwrap();
    assert_eq!(screened(&buy.results), ["MIDUSDT"]);
    let sell = engine
        .rating_filter(EXCHANGE, Timeframe::Min15, Rating::Sell, Limit::DEFAULT)
        .await
        .unwrap();
    assert_eq!(screened(&sell.results), ["LOWUSDT"]);
}

#[tokio::test]
async fn consecutive_bullish_scan() {
    let scan = engine()
        .consecutive_candles_scan(EXCHANGE, Timeframe::Min15, PatternType::Bullish, 3, 2.0, Limit::DEFAULT)
        .await
        .unwrap();
    assert_eq!(matched(&scan.results), ["ACCUSDT", "RUNUSDT"]);
    assert_eq!(scan.results[0].run_length, 3);
    assert_eq!(scan.results[0].growth_percent, 7.0);
    assert_eq!(scan.results[1].run_length, 29);
    assert_eq!(scan.results[1].matched_timeframes, [Timeframe::Min15]);
}

#[tokio::test]
async fn consecutive_bearish_scan() {
    let scan = engine()
        .consecutive_candles_scan(EXCHANGE, Timeframe::Min15, PatternType::Bearish, 1, 2.0, Limit::DEFAULT)
        .await
        .unwrap();
    assert_eq!(matched(&scan.results), ["CCCUSDT"]);
    assert_eq!(scan.results[0].pattern_type, PatternType::Bearish);
}

#[tokio::test]
async fn advanced_pattern_is_confirmed_on_higher_timeframes() {
    let scan = engine()
        .advanced_candle_pattern(EXCHANGE, Timeframe::Min15, 3, 50.0, Limit::DEFAULT)
        .await
        .unwrap();
    assert_eq!(scan.results.len(), 1);
    let found = &scan.results[0];
    assert_eq!(found.symbol, "ACCUSDT");
    assert_eq!(found.pattern_type, PatternType::Bullish);
    assert_eq!(found.growth_percent, 300.0);
    // 1h closes up; there is no 4h data, which only skips that timeframe
    assert_eq!(found.matched_timeframes, [Timeframe::Min15, Timeframe::Hour1]);
}

#[tokio::test]
async fn pattern_parameters_are_validated() {
    let engine = engine();
    assert!(matches!(
        engine
            .consecutive_candles_scan(EXCHANGE, Timeframe::Min15, PatternType::Bullish, 0, 2.0, Limit::DEFAULT)
            .await,
        Err(ScreenerError::InvalidParameter { name: "candle_count", .. })
    ));
    assert!(matches!(
        engine
            .advanced_candle_pattern(EXCHANGE, Timeframe::Min15, 1, 10.0, Limit::DEFAULT)
            .await,
        Err(ScreenerError::InvalidParameter { name: "pattern_length", .. })
    ));
}

#[tokio::test]
async fn unknown_exchange_and_unsupported_timeframe_are_rejected() {
    let engine = engine();
    assert!(matches!(
        engine.top_gainers("NOWHERE", Timeframe::Min15, Limit::DEFAULT).await,
        Err(ScreenerError::InvalidParameter { name: "exchange", .. })
    ));
    assert!(matches!(
        engine.top_gainers(EXCHANGE, Timeframe::Month1, Limit::DEFAULT).await,
        Err(ScreenerError::InvalidParameter { name: "timeframe", .. })
    ));
}

#[tokio::test]
async fn one_failing_symbol_is_omitted() {
    let engine = engine_with(Arc::new(FlakyProvider {
        inner: snapshot(),
        broken: "AAAUSDT",
    }));
    let scan = engine
        .top_gainers(EXCHANGE, Timeframe::Min15, Limit::new(2).unwrap())
        .await
        .unwrap();
    assert_eq!(screened(&scan.results), ["DDDUSDT", "ACCUSDT"]);
    assert_eq!(scan.omitted, 1);
}

#[tokio::test]
async fn total_failure_is_data_unavailable() {
    let provider = Arc::new(FailingProvider::new(&["AAAUSDT", "BBBUSDT"]));
    let engine = engine_with(provider.clone());
    let err = engine
        .top_gainers(EXCHANGE, Timeframe::Min15, Limit::DEFAULT)
        .await
        .unwrap_err();
    assert!(matches!(err, ScreenerError::DataUnavailable { .. }));
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn empty_universe_is_an_empty_result() {
    let engine = engine_with(Arc::new(FailingProvider::new(&[])));
    let scan = engine
        .top_gainers(EXCHANGE, Timeframe::Min15, Limit::DEFAULT)
        .await
        .unwrap();
    assert!(scan.results.is_empty());
    assert_eq!(scan.omitted, 0);
}

#[tokio::test]
async fn result_order_does_not_depend_on_concurrency() {
    let mut serial = AppConfig::default();
    serial.scan.concurrency = 1;
    let serial = Engine::new(Arc::new(snapshot()), Arc::new(Catalog::builtin()), serial.engine_config());
    let parallel = engine();

    let a = serial.top_gainers(EXCHANGE, Timeframe::Min15, Limit::DEFAULT).await.unwrap();
    let b = parallel.top_gainers(EXCHANGE, Timeframe::Min15, Limit::DEFAULT).await.unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn analysis_reports_indicators_and_patterns() {
    let report = engine()
        .coin_analysis("KUCOIN:accusdt", EXCHANGE, Timeframe::Min15)
        .await
        .unwrap();
    assert_eq!(report.symbol, "ACCUSDT");
    assert_eq!(report.close, 107.0);
    assert_eq!(report.percent_change, 4.0 * 100.0 / 103.0);
    assert!(report.bollinger.upper >= report.bollinger.middle);
    assert_eq!(report.signal, report.rating.label());
    // bullish run of three plus the accelerating bodies
    assert_eq!(report.patterns.len(), 2);
    assert!(report.patterns.iter().all(|p| p.pattern_type == PatternType::Bullish));
}

#[tokio::test]
async fn analysis_failures_are_typed() {
    let engine = engine();
    assert!(matches!(
        engine.coin_analysis("NOPEUSDT", EXCHANGE, Timeframe::Min15).await,
        Err(ScreenerError::SymbolNotFound { .. })
    ));
    assert!(matches!(
        engine.coin_analysis("SHORTUSDT", EXCHANGE, Timeframe::Min15).await,
        Err(ScreenerError::InsufficientData { required: 20, available: 5 })
    ));
}

#[tokio::test]
async fn analysis_surfaces_provider_outage() {
    let engine = engine_with(Arc::new(FailingProvider::new(&["BTCUSDT"])));
    assert!(matches!(
        engine.coin_analysis("BTCUSDT", EXCHANGE, Timeframe::Hour1).await,
        Err(ScreenerError::DataUnavailable { .. })
    ));
}

#[test]
fn exchanges_are_listed_by_name() {
    let names: Vec<String> = engine()
        .exchanges_list()
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, ["BINANCE", "BYBIT", "KUCOIN"]);

    let empty = Engine::new(
        Arc::new(snapshot()),
        Arc::new(Catalog::new(Vec::new())),
        AppConfig::default().engine_config(),
    );
    assert!(matches!(empty.exchanges_list(), Err(ScreenerError::CatalogUnavailable(_))));
}
