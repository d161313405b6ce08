pub mod binance;
pub mod bithumb;
pub mod huobi;
pub mod kraken;
pub mod kucoin;
pub mod signing;
pub mod upbit;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::api::private::VenuePrivateApi;
use crate::api::public::VenuePublicApi;
use crate::context::{ApiCredentials, AppContext};
use crate::errors::{ExchangeError, Result};

/// The supported venues, in the crate's canonical order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum VenueKind {
    Binance,
    Bithumb,
    Huobi,
    Kraken,
    Kucoin,
    Upbit,
}

impl VenueKind {
    pub const ALL: [VenueKind; 6] = [
        VenueKind::Binance,
        VenueKind::Bithumb,
        VenueKind::Huobi,
        VenueKind::Kraken,
        VenueKind::Kucoin,
        VenueKind::Upbit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            VenueKind::Binance => "binance",
            VenueKind::Bithumb => "bithumb",
            VenueKind::Huobi => "huobi",
            VenueKind::Kraken => "kraken",
            VenueKind::Kucoin => "kucoin",
            VenueKind::Upbit => "upbit",
        }
    }
}

impl fmt::Display for VenueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VenueKind {
    type Err = ExchangeError;

    fn from_str(input: &str) -> Result<Self> {
        let lower = input.trim().to_ascii_lowercase();
        VenueKind::ALL
            .into_iter()
            .find(|kind| kind.name() == lower)
            .ok_or_else(|| {
                let closest = VenueKind::ALL
                    .into_iter()
                    .min_by_key(|kind| levenshtein(&lower, kind.name()))
                    .map(VenueKind::name)
                    .unwrap_or_default();
                ExchangeError::InvalidArgument(format!(
                    "unknown venue '{input}', did you mean '{closest}'?"
                ))
            })
    }
}

/// Classic two-row Levenshtein distance, used only to suggest venue names.
fn levenshtein(lhs: &str, rhs: &str) -> usize {
    let rhs_len = rhs.chars().count();
    let mut previous: Vec<usize> = (0..=rhs_len).collect();
    let mut current = vec![0; rhs_len + 1];
    for (row, lhs_char) in lhs.chars().enumerate() {
        current[0] = row + 1;
        for (col, rhs_char) in rhs.chars().enumerate() {
            let substitution_cost = usize::from(lhs_char != rhs_char);
            current[col + 1] = (previous[col] + substitution_cost)
                .min(previous[col + 1] + 1)
                .min(current[col] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[rhs_len]
}

/// Builds the public adapter of a venue.
pub fn build_public(kind: VenueKind, ctx: Arc<AppContext>) -> Result<Box<dyn VenuePublicApi>> {
    Ok(match kind {
        VenueKind::Binance => Box::new(binance::BinancePublic::new(ctx)?),
        VenueKind::Bithumb => Box::new(bithumb::BithumbPublic::new(ctx)?),
        VenueKind::Huobi => Box::new(huobi::HuobiPublic::new(ctx)?),
        VenueKind::Kraken => Box::new(kraken::KrakenPublic::new(ctx)?),
        VenueKind::Kucoin => Box::new(kucoin::KucoinPublic::new(ctx)?),
        VenueKind::Upbit => Box::new(upbit::UpbitPublic::new(ctx)?),
    })
}

/// Builds the private adapter of one venue account.
pub fn build_private(
    kind: VenueKind,
    ctx: Arc<AppContext>,
    account_name: String,
    credentials: ApiCredentials,
) -> Result<Box<dyn VenuePrivateApi>> {
    Ok(match kind {
        VenueKind::Binance => {
            Box::new(binance::BinancePrivate::new(ctx, account_name, credentials)?)
        }
        VenueKind::Bithumb => {
            Box::new(bithumb::BithumbPrivate::new(ctx, account_name, credentials)?)
        }
        VenueKind::Huobi => Box::new(huobi::HuobiPrivate::new(ctx, account_name, credentials)?),
        VenueKind::Kraken => Box::new(kraken::KrakenPrivate::new(ctx, account_name, credentials)?),
        VenueKind::Kucoin => Box::new(kucoin::KucoinPrivate::new(ctx, account_name, credentials)?),
        VenueKind::Upbit => Box::new(upbit::UpbitPrivate::new(ctx, account_name, credentials)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_venues() {
        assert_eq!("binance".parse::<VenueKind>().unwrap(), VenueKind::Binance);
        assert_eq!("Kraken".parse::<VenueKind>().unwrap(), VenueKind::Kraken);
    }

    #[test]
    fn suggests_closest_venue() {
        let err = "krakn".parse::<VenueKind>().unwrap_err();
        assert!(err.to_string().contains("kraken"), "{err}");
        let err = "binanse".parse::<VenueKind>().unwrap_err();
        assert!(err.to_string().contains("binance"), "{err}");
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }
}
