use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::currency::CurrencyCode;
use crate::model::monetary::MonetaryAmount;

/// Per-venue description of a currency: how the venue names it and what it
/// allows on it.
///
/// Identity is the standard code alone, so a set of these is keyed by
/// currency whatever the per-venue statuses are.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CurrencyExchange {
    pub standard_code: CurrencyCode,
    pub venue_code: CurrencyCode,
    pub alt_code: CurrencyCode,
    pub can_deposit: bool,
    pub can_withdraw: bool,
    pub is_fiat: bool,
}

impl CurrencyExchange {
    /// A currency the venue names exactly like the standard code, with
    /// unknown deposit / withdraw statuses mapped to unavailable.
    pub fn from_standard(code: CurrencyCode) -> Self {
        CurrencyExchange {
            standard_code: code,
            venue_code: code,
            alt_code: code,
            can_deposit: false,
            can_withdraw: false,
            is_fiat: false,
        }
    }
}

impl PartialEq for CurrencyExchange {
    fn eq(&self, other: &Self) -> bool {
        self.standard_code == other.standard_code
    }
}

impl Eq for CurrencyExchange {}

impl PartialOrd for CurrencyExchange {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CurrencyExchange {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.standard_code.cmp(&other.standard_code)
    }
}

/// A deposit destination on a venue account.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Wallet {
    pub venue: String,
    pub account_name: String,
    pub currency: CurrencyCode,
    pub address: String,
    pub tag: Option<String>,
}

impl Wallet {
    /// Checks this wallet against a trusted allowlist mapping
    /// `venue -> currency -> (address, optional tag)`. An empty allowlist
    /// accepts everything; a listed venue/currency must match exactly.
    pub fn is_trusted_by(&self, allowlist: &WalletAllowlist) -> bool {
        let Some(per_currency) = allowlist.venues.get(&self.venue) else {
            return allowlist.venues.is_empty();
        };
        match per_currency.get(&self.currency) {
            Some(entry) => {
                entry.address == self.address
                    && entry.tag.as_deref().unwrap_or_default()
                        == self.tag.as_deref().unwrap_or_default()
            }
            None => false,
        }
    }
}

impl fmt::Display for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} wallet of {}_{}, address {}{}]",
            self.currency,
            self.venue,
            self.account_name,
            self.address,
            self.tag
                .as_deref()
                .map(|tag| format!(", tag {tag}"))
                .unwrap_or_default()
        )
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// On-disk allowlist of trusted deposit addresses.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct WalletAllowlist {
    #[serde(flatten)]
    pub venues: BTreeMap<String, BTreeMap<CurrencyCode, AllowlistEntry>>,
}

/// A withdrawal accepted by the source venue.
#[derive(Clone, PartialEq, Debug)]
pub struct InitiatedWithdrawInfo {
    pub withdraw_id: String,
    pub gross_amount: MonetaryAmount,
    pub receiving_wallet: Wallet,
    pub initiated_time: DateTime<Utc>,
}

/// Source-side view of a withdrawal in flight.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct SentWithdrawInfo {
    pub net_amount: Option<MonetaryAmount>,
    pub fee: Option<MonetaryAmount>,
    pub is_sent: bool,
}

/// Terminal state of a cross-venue withdrawal.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct DeliveredWithdrawInfo {
    pub initiated: bool,
    pub sent: bool,
    /// Net amount observed on the destination, zero until delivery.
    pub received: Option<MonetaryAmount>,
    pub withdraw_id: Option<String>,
}

impl DeliveredWithdrawInfo {
    pub fn not_initiated() -> Self {
        DeliveredWithdrawInfo::default()
    }

    pub fn is_delivered(&self) -> bool {
        self.received.is_some_and(|amount| !amount.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet() -> Wallet {
        Wallet {
            venue: "kraken".into(),
            account_name: "main".into(),
            currency: "XRP".into(),
            address: "rG1QQv2nh2gr7RCZ1P8YYcBUKCCN633jCn".into(),
            tag: Some("1234".into()),
        }
    }

    #[test]
    fn empty_allowlist_trusts_everything() {
        assert!(wallet().is_trusted_by(&WalletAllowlist::default()));
    }

    #[test]
    fn allowlist_matches_address_and_tag() {
        let wallet = wallet();
        let mut allowlist = WalletAllowlist::default();
        allowlist.venues.insert(
            "kraken".into(),
            BTreeMap::from([(
                CurrencyCode::from("XRP"),
                AllowlistEntry {
                    address: wallet.address.clone(),
                    tag: wallet.tag.clone(),
                },
            )]),
        );
        assert!(wallet.is_trusted_by(&allowlist));

        allowlist.venues.get_mut("kraken").unwrap().insert(
            CurrencyCode::from("XRP"),
            AllowlistEntry {
                address: "other-address".into(),
                tag: None,
            },
        );
        assert!(!wallet.is_trusted_by(&allowlist));
    }

    #[test]
    fn listed_venue_without_currency_is_untrusted() {
        let mut allowlist = WalletAllowlist::default();
        allowlist.venues.insert("kraken".into(), BTreeMap::new());
        assert!(!wallet().is_trusted_by(&allowlist));
    }
}
