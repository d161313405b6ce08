use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::model::currency::CurrencyCode;
use crate::model::market::Market;

/// Whether synthetic fiat legs may be spliced at the extremities of a path.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum MarketPathMode {
    /// Real venue markets only.
    #[default]
    Strict,
    /// Stablecoin aliases and fiat cross-rates may start or end the path,
    /// never appear in the middle.
    WithFiatConversionAtExtremity,
}

/// All inputs of a path search, borrowed from the caller.
pub struct PathSearch<'a> {
    pub markets: &'a BTreeSet<Market>,
    pub fiats: &'a BTreeSet<CurrencyCode>,
    pub stablecoins: &'a HashMap<CurrencyCode, CurrencyCode>,
    pub mode: MarketPathMode,
}

impl PathSearch<'_> {
    /// Fiat currency a node behaves as: itself when fiat, its alias when a
    /// configured stablecoin, nothing otherwise.
    fn fiat_of(&self, cur: CurrencyCode) -> Option<CurrencyCode> {
        if self.fiats.contains(&cur) {
            Some(cur)
        } else {
            self.stablecoins.get(&cur).copied()
        }
    }

    fn is_fiat_like(&self, cur: CurrencyCode) -> bool {
        self.fiat_of(cur).is_some()
    }

    /// Every currency reachable through real markets, in deterministic
    /// order, plus both path ends.
    fn universe(&self, from: CurrencyCode, to: CurrencyCode) -> BTreeSet<CurrencyCode> {
        let mut currencies: BTreeSet<CurrencyCode> = self
            .markets
            .iter()
            .flat_map(|market| [market.base(), market.quote()])
            .collect();
        currencies.insert(from);
        currencies.insert(to);
        currencies
    }

    /// Shortest sequence of markets whose composition converts `from` into
    /// `to`, breadth-first in number of legs, ties broken by the venue's
    /// market ordering. Empty when no path exists or `from == to`.
    pub fn find_markets_path(&self, from: CurrencyCode, to: CurrencyCode) -> Vec<Market> {
        if from == to {
            return Vec::new();
        }

        let splice_allowed = self.mode == MarketPathMode::WithFiatConversionAtExtremity;
        let mut parent: HashMap<CurrencyCode, (CurrencyCode, Market)> = HashMap::new();
        let mut queue = VecDeque::from([from]);

        let visit =
            |node: CurrencyCode,
             via: Market,
             reached: CurrencyCode,
             parent: &mut HashMap<CurrencyCode, (CurrencyCode, Market)>,
             queue: &mut VecDeque<CurrencyCode>| {
                if reached != from && !parent.contains_key(&reached) {
                    parent.insert(reached, (node, via));
                    queue.push_back(reached);
                }
            };

        while let Some(node) = queue.pop_front() {
            if node == to {
                break;
            }
            // Real market edges first, in venue-declared order.
            for market in self.markets {
                if let Some(reached) = market.opposite_of(node) {
                    visit(node, *market, reached, &mut parent, &mut queue);
                }
            }
            if splice_allowed && self.is_fiat_like(node) {
                // Terminal splice: a fiat-like node may convert straight
                // into a fiat-like target.
                if self.is_fiat_like(to) {
                    visit(
                        node,
                        Market::fiat_conversion(node, to),
                        to,
                        &mut parent,
                        &mut queue,
                    );
                }
                // Leading splice: the start may convert into any fiat-like
                // currency of the universe before touching real markets.
                if node == from {
                    for fiat_like in self
                        .universe(from, to)
                        .into_iter()
                        .filter(|cur| *cur != from && self.is_fiat_like(*cur))
                    {
                        visit(
                            node,
                            Market::fiat_conversion(from, fiat_like),
                            fiat_like,
                            &mut parent,
                            &mut queue,
                        );
                    }
                }
            }
        }

        // Walk back from the target.
        let mut path = Vec::new();
        let mut node = to;
        while node != from {
            let Some((previous, market)) = parent.get(&node) else {
                return Vec::new();
            };
            path.push(*market);
            node = *previous;
        }
        path.reverse();
        path
    }

    /// Ordered currency nodes visited by the shortest path, both ends
    /// included. `[from]` when `from == to`, empty when unreachable.
    pub fn find_currencies_path(&self, from: CurrencyCode, to: CurrencyCode) -> Vec<CurrencyCode> {
        if from == to {
            return vec![from];
        }
        let markets_path = self.find_markets_path(from, to);
        if markets_path.is_empty() {
            return Vec::new();
        }
        let mut currencies = Vec::with_capacity(markets_path.len() + 1);
        currencies.push(from);
        let mut current = from;
        for market in markets_path {
            match market.opposite_of(current) {
                Some(next) => {
                    currencies.push(next);
                    current = next;
                }
                None => return Vec::new(),
            }
        }
        currencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markets() -> BTreeSet<Market> {
        [
            Market::new("BTC", "EUR"),
            Market::new("XLM", "EUR"),
            Market::new("ETH", "EUR"),
            Market::new("ETH", "BTC"),
            Market::new("BTC", "KRW"),
            Market::new("USD", "EOS"),
            Market::new("SHIB", "ICP"),
            Market::new("AVAX", "ICP"),
            Market::new("AVAX", "USDT"),
        ]
        .into_iter()
        .collect()
    }

    fn fiats() -> BTreeSet<CurrencyCode> {
        ["EUR", "USD", "KRW", "GBP"].map(CurrencyCode::from).into_iter().collect()
    }

    fn stablecoins() -> HashMap<CurrencyCode, CurrencyCode> {
        HashMap::from([(CurrencyCode::from("USDT"), CurrencyCode::from("USD"))])
    }

    struct Fixture {
        markets: BTreeSet<Market>,
        fiats: BTreeSet<CurrencyCode>,
        stablecoins: HashMap<CurrencyCode, CurrencyCode>,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                markets: markets(),
                fiats: fiats(),
                stablecoins: stablecoins(),
            }
        }

        fn search(&self, mode: MarketPathMode) -> PathSearch<'_> {
            PathSearch {
                markets: &self.markets,
                fiats: &self.fiats,
                stablecoins: &self.stablecoins,
                mode,
            }
        }
    }

    #[test]
    fn crypto_only_paths() {
        let fixture = Fixture::new();
        let engine = fixture.search(MarketPathMode::Strict);
        assert_eq!(
            engine.find_markets_path("BTC".into(), "XLM".into()),
            vec![Market::new("BTC", "EUR"), Market::new("XLM", "EUR")]
        );
        assert_eq!(
            engine.find_markets_path("XLM".into(), "ETH".into()),
            vec![Market::new("XLM", "EUR"), Market::new("ETH", "EUR")]
        );
        assert_eq!(
            engine.find_markets_path("ETH".into(), "KRW".into()),
            vec![Market::new("ETH", "BTC"), Market::new("BTC", "KRW")]
        );
        assert_eq!(
            engine.find_markets_path("EUR".into(), "BTC".into()),
            vec![Market::new("BTC", "EUR")]
        );
        assert_eq!(
            engine.find_markets_path("SHIB".into(), "USDT".into()),
            vec![
                Market::new("SHIB", "ICP"),
                Market::new("AVAX", "ICP"),
                Market::new("AVAX", "USDT")
            ]
        );
    }

    #[test]
    fn unreachable_without_fiat_bridge() {
        let fixture = Fixture::new();
        let engine = fixture.search(MarketPathMode::Strict);
        assert_eq!(engine.find_markets_path("SHIB".into(), "KRW".into()), vec![]);
        assert_eq!(engine.find_markets_path("EUR".into(), "GBP".into()), vec![]);
    }

    #[test]
    fn same_currency_is_a_zero_length_path() {
        let fixture = Fixture::new();
        let engine = fixture.search(MarketPathMode::Strict);
        assert_eq!(engine.find_markets_path("BTC".into(), "BTC".into()), vec![]);
        assert_eq!(
            engine.find_currencies_path("BTC".into(), "BTC".into()),
            vec![CurrencyCode::from("BTC")]
        );
    }

    #[test]
    fn fiat_splice_at_the_end() {
        let fixture = Fixture::new();
        let engine = fixture.search(MarketPathMode::WithFiatConversionAtExtremity);
        assert_eq!(
            engine.find_markets_path("SHIB".into(), "KRW".into()),
            vec![
                Market::new("SHIB", "ICP"),
                Market::new("AVAX", "ICP"),
                Market::new("AVAX", "USDT"),
                Market::fiat_conversion("USDT", "KRW"),
            ]
        );
    }

    #[test]
    fn fiat_splice_at_the_beginning() {
        let fixture = Fixture::new();
        let engine = fixture.search(MarketPathMode::WithFiatConversionAtExtremity);
        assert_eq!(
            engine.find_markets_path("GBP".into(), "EOS".into()),
            vec![
                Market::fiat_conversion("GBP", "USD"),
                Market::new("USD", "EOS"),
            ]
        );
    }

    #[test]
    fn no_mid_path_fiat_conversion() {
        // EUR -> EOS would need a fiat cross in the middle of a crypto
        // path; the only legal route goes through the extremity rule:
        // EUR is the start, so EUR -> USD as the leading leg is allowed.
        let fixture = Fixture::new();
        let engine = fixture.search(MarketPathMode::WithFiatConversionAtExtremity);
        assert_eq!(
            engine.find_markets_path("EUR".into(), "EOS".into()),
            vec![
                Market::fiat_conversion("EUR", "USD"),
                Market::new("USD", "EOS"),
            ]
        );
        // BTC -> EOS has no fiat extremity on the BTC side and EOS is not
        // fiat: no splice anywhere, hence no path.
        assert_eq!(engine.find_markets_path("BTC".into(), "EOS".into()), vec![]);
    }

    #[test]
    fn currencies_path_follows_markets() {
        let fixture = Fixture::new();
        let engine = fixture.search(MarketPathMode::Strict);
        assert_eq!(
            engine.find_currencies_path("BTC".into(), "XLM".into()),
            ["BTC", "EUR", "XLM"].map(CurrencyCode::from).to_vec()
        );
        assert_eq!(
            engine.find_currencies_path("ETH".into(), "KRW".into()),
            ["ETH", "BTC", "KRW"].map(CurrencyCode::from).to_vec()
        );
        assert_eq!(
            engine.find_currencies_path("EUR".into(), "BTC".into()),
            ["EUR", "BTC"].map(CurrencyCode::from).to_vec()
        );
        assert_eq!(engine.find_currencies_path("SHIB".into(), "KRW".into()), vec![]);
    }

    #[test]
    fn consecutive_markets_share_one_currency() {
        let fixture = Fixture::new();
        let engine = fixture.search(MarketPathMode::Strict);
        let path = engine.find_markets_path("SHIB".into(), "USDT".into());
        assert!(path.first().unwrap().contains("SHIB".into()));
        assert!(path.last().unwrap().contains("USDT".into()));
        for legs in path.windows(2) {
            let shared = [legs[0].base(), legs[0].quote()]
                .into_iter()
                .filter(|cur| legs[1].contains(*cur))
                .count();
            assert_eq!(shared, 1);
        }
    }
}
