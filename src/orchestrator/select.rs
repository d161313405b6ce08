use std::fmt;
use std::str::FromStr;

use crate::errors::{ExchangeError, Result};
use crate::venues::VenueKind;

/// Reference to a venue or to one specific account on it, parsed from
/// `venue` or `venue_account` (e.g. `kraken`, `binance_user1`).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ExchangeName {
    pub venue: VenueKind,
    pub account: Option<String>,
}

impl ExchangeName {
    pub fn venue_only(venue: VenueKind) -> Self {
        ExchangeName {
            venue,
            account: None,
        }
    }
}

impl fmt::Display for ExchangeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.account {
            Some(account) => write!(f, "{}_{account}", self.venue),
            None => write!(f, "{}", self.venue),
        }
    }
}

impl FromStr for ExchangeName {
    type Err = ExchangeError;

    fn from_str(input: &str) -> Result<Self> {
        let input = input.trim();
        match input.split_once('_') {
            Some((venue, account)) if !account.is_empty() => Ok(ExchangeName {
                venue: venue.parse()?,
                account: Some(account.to_string()),
            }),
            _ => Ok(ExchangeName {
                venue: input.parse()?,
                account: None,
            }),
        }
    }
}

/// Ordering of the selection result.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum SelectionOrder {
    /// Canonical venue order, whatever the caller asked.
    #[default]
    Initial,
    /// The caller's order, used to express preference lists.
    Selection,
}

/// Behavior when the name list is empty.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum AccountFilter {
    /// Keep venues without any configured account.
    #[default]
    Any,
    /// Drop accountless venues on an empty selection.
    WithAccountWhenEmpty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_venue_and_account() {
        let name: ExchangeName = "binance_user1".parse().unwrap();
        assert_eq!(name.venue, VenueKind::Binance);
        assert_eq!(name.account.as_deref(), Some("user1"));

        let name: ExchangeName = "kraken".parse().unwrap();
        assert_eq!(name.venue, VenueKind::Kraken);
        assert_eq!(name.account, None);
    }

    #[test]
    fn display_round_trips() {
        for raw in ["binance_user1", "upbit"] {
            let name: ExchangeName = raw.parse().unwrap();
            assert_eq!(name.to_string(), raw);
        }
    }

    #[test]
    fn rejects_unknown_venue() {
        assert!("huobbi".parse::<ExchangeName>().is_err());
    }
}
