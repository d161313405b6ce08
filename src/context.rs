use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::{ExchangeError, Result};
use crate::metrics::MetricsSink;
use crate::model::currency::CurrencyCode;
use crate::model::monetary::MonetaryAmount;
use crate::model::wallet::WalletAllowlist;

/// Abstraction over a content source, so tests can inject static strings
/// where production reads files from the data directory.
pub trait Reader {
    /// Full content, or an empty string when the source does not exist.
    fn read_all(&self) -> String;
}

pub struct FileReader(pub PathBuf);

impl Reader for FileReader {
    fn read_all(&self) -> String {
        std::fs::read_to_string(&self.0).unwrap_or_default()
    }
}

pub struct StaticReader(pub &'static str);

impl Reader for StaticReader {
    fn read_all(&self) -> String {
        self.0.to_string()
    }
}

/// Fee side applied to a trade leg.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FeeType {
    Maker,
    Taker,
}

/// Per-venue tunables read from `exchangeconfig.json`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
    pub public_query_min_interval_ms: u64,
    pub private_query_min_interval_ms: u64,
    pub maker_fee_bps: i64,
    pub taker_fee_bps: i64,
    /// Allows placing real orders when the venue cannot simulate.
    pub place_simulate_real_order: bool,
    /// Validate deposit wallets against the trusted address list.
    pub validate_deposit_addresses: bool,
    /// Quote currencies tried in priority order by smart buy and sell.
    pub preferred_payment_currencies: Vec<String>,
}

impl Default for VenueConfig {
    fn default() -> Self {
        VenueConfig {
            public_query_min_interval_ms: 200,
            private_query_min_interval_ms: 500,
            maker_fee_bps: 10,
            taker_fee_bps: 20,
            place_simulate_real_order: false,
            validate_deposit_addresses: false,
            preferred_payment_currencies: ["USDT", "USD", "EUR", "KRW", "BTC"]
                .map(str::to_string)
                .to_vec(),
        }
    }
}

impl VenueConfig {
    pub fn public_min_interval(&self) -> Duration {
        Duration::from_millis(self.public_query_min_interval_ms)
    }

    pub fn private_min_interval(&self) -> Duration {
        Duration::from_millis(self.private_query_min_interval_ms)
    }

    /// Nets a gross traded amount of the given fee side.
    pub fn apply_fee(&self, amount: MonetaryAmount, fee_type: FeeType) -> MonetaryAmount {
        let fee_bps = match fee_type {
            FeeType::Maker => self.maker_fee_bps,
            FeeType::Taker => self.taker_fee_bps,
        };
        let keep_ratio = MonetaryAmount::new(10_000 - fee_bps, CurrencyCode::neutral(), 4);
        keep_ratio
            .checked_mul(amount)
            .unwrap_or(amount)
    }
}

/// API key material of one venue account.
#[derive(Clone, Debug, Deserialize)]
pub struct ApiCredentials {
    pub key: String,
    pub secret: String,
    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Deserialize, Default)]
struct SecretsFile {
    #[serde(flatten)]
    venues: BTreeMap<String, BTreeMap<String, ApiCredentials>>,
}

const DEFAULT_CURRENCY_ALIASES: &str = r#"{
  "XBT": "BTC",
  "XXBT": "BTC",
  "XDG": "DOGE",
  "XETH": "ETH",
  "ZEUR": "EUR",
  "ZUSD": "USD",
  "ZKRW": "KRW"
}"#;

const DEFAULT_STABLECOINS: &str = r#"{
  "USDT": "USD",
  "USDC": "USD",
  "BUSD": "USD",
  "TUSD": "USD",
  "DAI": "USD",
  "EURT": "EUR"
}"#;

const DEFAULT_CURRENCY_PREFIXES: &str = r#"{
  "ARBITRUM ": "ARB/",
  "OPTIMISM ": "OPT/",
  "POLYGON ": "POL/"
}"#;

const DEFAULT_FIATS: [&str; 10] = [
    "EUR", "USD", "KRW", "GBP", "JPY", "CHF", "CAD", "AUD", "TRY", "BRL",
];

/// Shared normalization and configuration context, passed by reference to
/// every component needing it. There is deliberately no global state.
pub struct AppContext {
    currency_aliases: HashMap<String, CurrencyCode>,
    currency_prefixes: Vec<(String, String)>,
    stablecoins: HashMap<CurrencyCode, CurrencyCode>,
    fiats: BTreeSet<CurrencyCode>,
    venue_configs: BTreeMap<String, VenueConfig>,
    data_dir: PathBuf,
    metrics: Option<MetricsSink>,
    proxy: Option<String>,
}

impl AppContext {
    /// Loads every configuration file from `data_dir`, falling back to the
    /// built-in defaults for missing or empty files.
    pub fn load(data_dir: impl Into<PathBuf>, metrics: Option<MetricsSink>) -> Result<Self> {
        let data_dir = data_dir.into();
        let aliases = FileReader(data_dir.join("currencyacronyms.json"));
        let stablecoins = FileReader(data_dir.join("stablecoins.json"));
        let prefixes = FileReader(data_dir.join("currencyprefixes.json"));
        let venues = FileReader(data_dir.join("exchangeconfig.json"));
        Self::from_readers(data_dir, metrics, &aliases, &stablecoins, &prefixes, &venues)
    }

    pub fn from_readers(
        data_dir: PathBuf,
        metrics: Option<MetricsSink>,
        aliases_reader: &dyn Reader,
        stablecoins_reader: &dyn Reader,
        prefixes_reader: &dyn Reader,
        venue_config_reader: &dyn Reader,
    ) -> Result<Self> {
        let mut currency_aliases = HashMap::new();
        for source in [DEFAULT_CURRENCY_ALIASES.to_string(), aliases_reader.read_all()] {
            for (alias, standard) in read_string_map(&source)? {
                currency_aliases.insert(alias.to_ascii_uppercase(), CurrencyCode::new(&standard)?);
            }
        }

        let mut stablecoins = HashMap::new();
        for source in [DEFAULT_STABLECOINS.to_string(), stablecoins_reader.read_all()] {
            for (stable, fiat) in read_string_map(&source)? {
                stablecoins.insert(CurrencyCode::new(&stable)?, CurrencyCode::new(&fiat)?);
            }
        }

        let mut currency_prefixes: Vec<(String, String)> = Vec::new();
        for source in [
            DEFAULT_CURRENCY_PREFIXES.to_string(),
            prefixes_reader.read_all(),
        ] {
            for (prefix, acronym) in read_string_map(&source)? {
                currency_prefixes.push((prefix.to_ascii_uppercase(), acronym));
            }
        }
        // Longest prefix first so the most specific one matches.
        currency_prefixes.sort_by(|lhs, rhs| rhs.0.len().cmp(&lhs.0.len()));

        let venue_configs = {
            let raw = venue_config_reader.read_all();
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        };

        let fiats = DEFAULT_FIATS.iter().map(|code| CurrencyCode::from(*code)).collect();

        debug!(
            "loaded context with {} aliases, {} stablecoins, {} prefixes",
            currency_aliases.len(),
            stablecoins.len(),
            currency_prefixes.len()
        );

        let proxy = match std::env::var("CROSSCEX_PROXY") {
            Ok(raw) => {
                url::Url::parse(&raw).map_err(|err| {
                    ExchangeError::InvalidArgument(format!("bad CROSSCEX_PROXY '{raw}': {err}"))
                })?;
                Some(raw)
            }
            Err(_) => None,
        };

        Ok(AppContext {
            currency_aliases,
            currency_prefixes,
            stablecoins,
            fiats,
            venue_configs,
            data_dir,
            metrics,
            proxy,
        })
    }

    /// Maps a venue-specific currency string to its standard code,
    /// resolving aliases (XBT -> BTC) and known prefixes
    /// ("ARBITRUM FOO" -> "ARB/FOO").
    pub fn standardize_currency(&self, raw: &str) -> Result<CurrencyCode> {
        let upper = raw.trim().to_ascii_uppercase();
        for (prefix, acronym) in &self.currency_prefixes {
            if let Some(rest) = upper.strip_prefix(prefix.as_str()) {
                return CurrencyCode::new(&format!("{acronym}{rest}"));
            }
        }
        if let Some(standard) = self.currency_aliases.get(&upper) {
            return Ok(*standard);
        }
        CurrencyCode::new(&upper)
    }

    /// Associated fiat when the currency is a configured stablecoin.
    pub fn stablecoin_fiat(&self, maybe_stablecoin: CurrencyCode) -> Option<CurrencyCode> {
        self.stablecoins.get(&maybe_stablecoin).copied()
    }

    pub fn is_fiat(&self, cur: CurrencyCode) -> bool {
        self.fiats.contains(&cur)
    }

    pub fn fiats(&self) -> &BTreeSet<CurrencyCode> {
        &self.fiats
    }

    pub fn stablecoins(&self) -> &HashMap<CurrencyCode, CurrencyCode> {
        &self.stablecoins
    }

    pub fn venue_config(&self, venue: &str) -> VenueConfig {
        self.venue_configs.get(venue).cloned().unwrap_or_default()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn metrics(&self) -> Option<&MetricsSink> {
        self.metrics.as_ref()
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Credentials per venue, in file order: `secrets.json` maps venue name
    /// to a map of account name to key material.
    pub fn load_credentials(&self) -> BTreeMap<String, BTreeMap<String, ApiCredentials>> {
        let raw = FileReader(self.data_dir.join("secrets.json")).read_all();
        if raw.trim().is_empty() {
            return BTreeMap::new();
        }
        match serde_json::from_str::<SecretsFile>(&raw) {
            Ok(secrets) => secrets.venues,
            Err(err) => {
                warn!("ignoring malformed secrets.json: {err}");
                BTreeMap::new()
            }
        }
    }

    /// Trusted deposit addresses, empty when the file is absent.
    pub fn load_wallet_allowlist(&self) -> WalletAllowlist {
        let raw = FileReader(self.data_dir.join("trustedaddresses.json")).read_all();
        if raw.trim().is_empty() {
            return WalletAllowlist::default();
        }
        match serde_json::from_str(&raw) {
            Ok(allowlist) => allowlist,
            Err(err) => {
                warn!("ignoring malformed trustedaddresses.json: {err}");
                WalletAllowlist::default()
            }
        }
    }

    /// Static withdrawal fees for venues without a live endpoint.
    pub fn load_static_withdrawal_fees(
        &self,
        venue: &str,
    ) -> HashMap<CurrencyCode, MonetaryAmount> {
        let raw = FileReader(self.data_dir.join("withdrawfees.json")).read_all();
        if raw.trim().is_empty() {
            return HashMap::new();
        }
        let parsed: std::result::Result<BTreeMap<String, BTreeMap<String, String>>, _> =
            serde_json::from_str(&raw);
        let Ok(all_fees) = parsed else {
            warn!("ignoring malformed withdrawfees.json");
            return HashMap::new();
        };
        let mut fees = HashMap::new();
        if let Some(per_currency) = all_fees.get(venue) {
            for (cur, fee) in per_currency {
                match (CurrencyCode::new(cur), MonetaryAmount::parse(fee)) {
                    (Ok(cur), Ok(fee)) => {
                        fees.insert(cur, fee.with_currency(cur));
                    }
                    _ => warn!("ignoring bad withdraw fee entry {cur}: {fee}"),
                }
            }
        }
        fees
    }
}

fn read_string_map(raw: &str) -> Result<Vec<(String, String)>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let map: BTreeMap<String, String> = serde_json::from_str(raw).map_err(|err| {
        ExchangeError::InvalidArgument(format!("malformed configuration object: {err}"))
    })?;
    Ok(map.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> AppContext {
        AppContext::from_readers(
            PathBuf::from("/nonexistent"),
            None,
            &StaticReader(r#"{"XXDG": "DOGE"}"#),
            &StaticReader(r#"{"UST": "USD"}"#),
            &StaticReader("{}"),
            &StaticReader("{}"),
        )
        .unwrap()
    }

    #[test]
    fn standardizes_aliases() {
        let ctx = test_context();
        assert_eq!(ctx.standardize_currency("XBT").unwrap(), "BTC".into());
        assert_eq!(ctx.standardize_currency("xbt").unwrap(), "BTC".into());
        assert_eq!(ctx.standardize_currency("XXDG").unwrap(), "DOGE".into());
        assert_eq!(ctx.standardize_currency("ETH").unwrap(), "ETH".into());
    }

    #[test]
    fn standardizes_prefixes() {
        let ctx = test_context();
        assert_eq!(
            ctx.standardize_currency("ARBITRUM FOO").unwrap(),
            "ARB/FOO".into()
        );
    }

    #[test]
    fn stablecoin_lookup_merges_defaults_and_file() {
        let ctx = test_context();
        assert_eq!(ctx.stablecoin_fiat("USDT".into()), Some("USD".into()));
        assert_eq!(ctx.stablecoin_fiat("UST".into()), Some("USD".into()));
        assert_eq!(ctx.stablecoin_fiat("BTC".into()), None);
    }

    #[test]
    fn fiat_set_contains_majors() {
        let ctx = test_context();
        assert!(ctx.is_fiat("EUR".into()));
        assert!(ctx.is_fiat("KRW".into()));
        assert!(!ctx.is_fiat("USDT".into()));
    }

    #[test]
    fn venue_config_defaults() {
        let ctx = test_context();
        let config = ctx.venue_config("binance");
        assert_eq!(config.maker_fee_bps, 10);
        assert!(!config.place_simulate_real_order);
    }

    #[test]
    fn fee_application() {
        let config = VenueConfig::default();
        let net = config.apply_fee("1000 EUR".into(), FeeType::Maker);
        assert_eq!(net, "999 EUR".into());
        let net = config.apply_fee("1000 EUR".into(), FeeType::Taker);
        assert_eq!(net, "998 EUR".into());
    }

    #[test]
    fn loads_configuration_files_from_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("currencyacronyms.json"),
            r#"{"XXDG": "DOGE"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("exchangeconfig.json"),
            r#"{"kraken": {"maker_fee_bps": 16}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("withdrawfees.json"),
            r#"{"kraken": {"BTC": "0.0005"}}"#,
        )
        .unwrap();

        let ctx = AppContext::load(dir.path(), None).unwrap();
        assert_eq!(ctx.standardize_currency("XXDG").unwrap(), "DOGE".into());
        assert_eq!(ctx.venue_config("kraken").maker_fee_bps, 16);
        // Unlisted venues fall back to defaults.
        assert_eq!(ctx.venue_config("binance").maker_fee_bps, 10);
        let fees = ctx.load_static_withdrawal_fees("kraken");
        assert_eq!(fees[&CurrencyCode::from("BTC")], "0.0005 BTC".into());
        assert!(ctx.load_static_withdrawal_fees("upbit").is_empty());
    }
}
