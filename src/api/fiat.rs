use std::collections::HashMap;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use crate::cache::CachedResult;
use crate::errors::Result;
use crate::model::currency::CurrencyCode;
use crate::model::monetary::MonetaryAmount;
use crate::net::http::{HttpClient, RequestOptions};
use crate::net::retry::{query_json, RetryPolicy, RetryStatus};

/// Source of fiat cross-rates. The production implementation goes to the
/// network; tests inject a static table.
pub trait FiatRateSource: Send + Sync {
    /// `None` when the source does not know the pair.
    fn fetch_rate(&self, from: CurrencyCode, to: CurrencyCode) -> Result<Option<f64>>;
}

/// Static in-memory table of rates.
#[derive(Default)]
pub struct StaticRateSource {
    rates: HashMap<(CurrencyCode, CurrencyCode), f64>,
}

impl StaticRateSource {
    pub fn with_rate(mut self, from: &str, to: &str, rate: f64) -> Self {
        self.rates.insert((from.into(), to.into()), rate);
        self
    }
}

impl FiatRateSource for StaticRateSource {
    fn fetch_rate(&self, from: CurrencyCode, to: CurrencyCode) -> Result<Option<f64>> {
        if let Some(rate) = self.rates.get(&(from, to)) {
            return Ok(Some(*rate));
        }
        // Derive the reverse rate when only one direction is configured.
        Ok(self.rates.get(&(to, from)).map(|rate| 1.0 / rate))
    }
}

#[derive(Deserialize, Default)]
struct RatesAnswer {
    #[serde(default)]
    result: String,
    #[serde(default)]
    rates: HashMap<String, f64>,
}

/// Rate source backed by a public exchange-rate HTTP API serving one base
/// currency per query.
pub struct HttpRateSource {
    http: Mutex<HttpClient>,
}

impl HttpRateSource {
    pub fn new(http: HttpClient) -> Self {
        HttpRateSource {
            http: Mutex::new(http),
        }
    }
}

impl FiatRateSource for HttpRateSource {
    fn fetch_rate(&self, from: CurrencyCode, to: CurrencyCode) -> Result<Option<f64>> {
        let mut http = self.http.lock();
        let endpoint = format!("/v6/latest/{from}");
        let answer: RatesAnswer = query_json(
            &mut http,
            &endpoint,
            &RequestOptions::get(),
            RetryPolicy::default(),
            |answer: &RatesAnswer| {
                if answer.result == "success" {
                    RetryStatus::Accept
                } else {
                    RetryStatus::Reject
                }
            },
        )?;
        Ok(answer.rates.get(to.as_str()).copied())
    }
}

/// Converts between fiat currencies through cached cross-rates.
///
/// The per-pair rate cache lives behind its own lock (its vault) and is
/// persisted with the other caches.
pub struct FiatConverter {
    source: Box<dyn FiatRateSource>,
    ttl: TimeDelta,
    cache: Mutex<CachedResult<(CurrencyCode, CurrencyCode), f64>>,
}

impl FiatConverter {
    pub fn new(source: Box<dyn FiatRateSource>, ttl: Duration) -> Self {
        FiatConverter {
            source,
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            cache: Mutex::new(CachedResult::new(ttl)),
        }
    }

    /// Converts `amount` into `to`, or `None` when no rate is known.
    pub fn convert(
        &self,
        amount: MonetaryAmount,
        to: CurrencyCode,
    ) -> Result<Option<MonetaryAmount>> {
        let from = amount.currency();
        if from == to {
            return Ok(Some(amount));
        }
        let Some(rate) = self.rate(from, to)? else {
            return Ok(None);
        };
        let rate = MonetaryAmount::from_f64(rate, CurrencyCode::neutral())?;
        let converted = rate.checked_mul(amount.to_neutral())?.with_currency(to);
        Ok(Some(converted))
    }

    fn rate(&self, from: CurrencyCode, to: CurrencyCode) -> Result<Option<f64>> {
        let key = (from, to);
        let now = Utc::now();
        let mut cache = self.cache.lock();
        if let Some((rate, stamped_at)) = cache.retrieve(&key) {
            if now.signed_duration_since(stamped_at) < self.ttl {
                return Ok(Some(*rate));
            }
        }
        match self.source.fetch_rate(from, to)? {
            Some(rate) => {
                debug!("fiat rate {from}-{to} = {rate}");
                cache.insert(key, rate);
                Ok(Some(rate))
            }
            // An unknown pair is not cached: a later configuration or
            // source update may start serving it.
            None => Ok(None),
        }
    }

    pub fn dump_cache(&self) -> serde_json::Value {
        self.cache.lock().dump()
    }

    pub fn load_cache(&self, snapshot: &serde_json::Value) {
        self.cache.lock().load(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> FiatConverter {
        FiatConverter::new(
            Box::new(
                StaticRateSource::default()
                    .with_rate("EUR", "KRW", 1444.94)
                    .with_rate("USD", "KRW", 1344.0),
            ),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn converts_with_known_rate() {
        let converter = converter();
        let won = converter.convert("10 EUR".into(), "KRW".into()).unwrap().unwrap();
        assert_eq!(won, "14449.4 KRW".into());
    }

    #[test]
    fn derives_reverse_rate() {
        let converter = converter();
        let eur = converter
            .convert("1444.94 KRW".into(), "EUR".into())
            .unwrap()
            .unwrap();
        // Reverse of the configured rate, computed through doubles.
        assert!((eur.to_f64() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn identity_conversion() {
        let converter = converter();
        assert_eq!(
            converter.convert("5 USD".into(), "USD".into()).unwrap(),
            Some("5 USD".into())
        );
    }

    #[test]
    fn unknown_pair_yields_none() {
        let converter = converter();
        assert_eq!(converter.convert("1 EUR".into(), "JPY".into()).unwrap(), None);
    }

    #[test]
    fn snapshot_round_trip() {
        let converter = converter();
        converter.convert("1 EUR".into(), "KRW".into()).unwrap();
        let snapshot = converter.dump_cache();

        let empty = FiatConverter::new(
            Box::new(StaticRateSource::default()),
            Duration::from_secs(3600),
        );
        empty.load_cache(&snapshot);
        let won = empty.convert("10 EUR".into(), "KRW".into()).unwrap().unwrap();
        assert_eq!(won, "14449.4 KRW".into());
    }
}
