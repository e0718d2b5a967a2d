//! Immutable exchange catalog, loaded once at startup and shared by reference.

use tracing::{info, warn};

use crate::errors::ScreenerError;
use crate::models::Exchange;
use crate::storage_utils::AsyncStorageManager;
use crate::timeframe::Timeframe;

pub const CATALOG_FILE: &str = "exchanges";

#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    exchanges: Vec<Exchange>,
}

impl Catalog {
    /// Normalizes names to upper case and orders entries by name.
    pub fn new(exchanges: Vec<Exchange>) -> Self {
        let mut exchanges: Vec<Exchange> = exchanges
            .into_iter()
            .map(|mut e| {
                e.name = e.name.trim().to_ascii_uppercase();
                e.supported_timeframes.sort();
                e.supported_timeframes.dedup();
                e
            })
            .collect();
        exchanges.sort_by(|a, b| a.name.cmp(&b.name));
        exchanges.dedup_by(|a, b| a.name == b.name);
        Self { exchanges }
    }

    /// The exchanges a live data source exists for. Market counts are the
    /// USDT spot listings at the time of writing; `fetch` refreshes them.
    pub fn builtin() -> Self {
        let all = Timeframe::ALL.to_vec();
        let no_monthly: Vec<Timeframe> = Timeframe::ALL
            .into_iter()
            .filter(|tf| *tf != Timeframe::Month1)
            .collect();
        Self::new(vec![
            Exchange {
                name: "BINANCE".to_string(),
                supported_timeframes: all.clone(),
                market_count: 410,
            },
            Exchange {
                name: "BYBIT".to_string(),
                supported_timeframes: all,
                market_count: 520,
            },
            Exchange {
                name: "KUCOIN".to_string(),
                supported_timeframes: no_monthly,
                market_count: 900,
            },
        ])
    }

    /// Reads `exchanges.json` from storage. A missing file means the builtin
    /// catalog; an unreadable one is `CatalogUnavailable`.
    pub async fn load(storage: &AsyncStorageManager) -> Result<Self, ScreenerError> {
        if !storage.exists(CATALOG_FILE).await {
            info!("no stored exchange catalog, using builtin entries");
            return Ok(Self::builtin());
        }
        match storage.load::<Vec<Exchange>>(CATALOG_FILE).await {
            Ok(entries) => Ok(Self::new(entries)),
            Err(e) => {
                warn!(error = %e, "stored exchange catalog is unreadable");
                Err(ScreenerError::CatalogUnavailable(e.to_string()))
            }
        }
    }

    pub async fn save(&self, storage: &AsyncStorageManager) -> anyhow::Result<()> {
        storage.save(CATALOG_FILE, &self.exchanges).await
    }

    pub fn list_exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    /// Case-insensitive lookup.
    pub fn find(&self, name: &str) -> Option<&Exchange> {
        let name = name.trim();
        self.exchanges
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Copy of the catalog with `exchange`'s market count replaced.
    pub fn with_market_count(&self, exchange: &str, market_count: u32) -> Self {
        let mut exchanges = self.exchanges.clone();
        if let Some(entry) = exchanges
            .iter_mut()
            .find(|e| e.name.eq_ignore_ascii_case(exchange))
        {
            entry.market_count = market_count;
        }
        Self { exchanges }
    }
}
