mod common;

use crosscex::model::currency::CurrencyCode;
use crosscex::model::market::Market;
use crosscex::orchestrator::ExchangeName;
use crosscex::venues::VenueKind;

use common::{exchange, orchestrator, MockPrivate, MockPublic};

fn two_venue_orchestrator() -> crosscex::orchestrator::Orchestrator {
    let binance_markets = [Market::new("BTC", "EUR"), Market::new("ETH", "BTC")];
    let kraken_markets = [Market::new("BTC", "EUR"), Market::new("XLM", "EUR")];
    orchestrator(vec![
        exchange(
            VenueKind::Binance,
            MockPublic::new(VenueKind::Binance, binance_markets)
                .with_book(Market::new("BTC", "EUR"), "30000 EUR"),
            vec![MockPrivate::new(VenueKind::Binance, "main", &[("BTC", "1.5")])],
        ),
        exchange(
            VenueKind::Kraken,
            MockPublic::new(VenueKind::Kraken, kraken_markets)
                .with_book(Market::new("BTC", "EUR"), "30010 EUR"),
            vec![
                MockPrivate::new(VenueKind::Kraken, "first", &[("BTC", "0.2")]),
                MockPrivate::new(VenueKind::Kraken, "second", &[("EUR", "1000")]),
            ],
        ),
    ])
}

#[test]
fn health_check_covers_each_venue_once() {
    let orchestrator = two_venue_orchestrator();
    let results = orchestrator.health_check(&[]).unwrap();
    let labels: Vec<&str> = results.iter().map(|(label, _)| label.as_str()).collect();
    assert_eq!(labels, ["binance", "kraken"]);
    assert!(results.iter().all(|(_, healthy)| *healthy));
}

#[test]
fn fan_out_preserves_selection_order() {
    let orchestrator = two_venue_orchestrator();
    let names: Vec<ExchangeName> = vec![
        "kraken".parse().unwrap(),
        "binance".parse().unwrap(),
    ];
    let results = orchestrator.health_check(&names).unwrap();
    let labels: Vec<&str> = results.iter().map(|(label, _)| label.as_str()).collect();
    assert_eq!(labels, ["kraken", "binance"]);
}

#[test]
fn markets_filtered_by_currency() {
    let orchestrator = two_venue_orchestrator();
    let results = orchestrator
        .markets(Some("XLM".into()), None, &[])
        .unwrap();
    let kraken_markets = &results
        .iter()
        .find(|(label, _)| label == "kraken")
        .unwrap()
        .1;
    assert_eq!(kraken_markets.len(), 1);
    assert!(kraken_markets.contains(&Market::new("XLM", "EUR")));
    let binance_markets = &results
        .iter()
        .find(|(label, _)| label == "binance")
        .unwrap()
        .1;
    assert!(binance_markets.is_empty());
}

#[test]
fn unknown_exchange_reference_is_an_invalid_argument() {
    let orchestrator = two_venue_orchestrator();
    let names = vec![ExchangeName {
        venue: VenueKind::Upbit,
        account: None,
    }];
    assert!(matches!(
        orchestrator.health_check(&names),
        Err(crosscex::ExchangeError::InvalidArgument(_))
    ));
}

#[test]
fn balance_is_aggregated_per_currency() {
    let orchestrator = two_venue_orchestrator();
    let (per_exchange, total) = orchestrator.balance(&[], None).unwrap();
    // Three accounts, each with one currency.
    assert_eq!(per_exchange.len(), 3);
    assert_eq!(
        per_exchange
            .iter()
            .map(|(label, _)| label.as_str())
            .collect::<Vec<_>>(),
        ["binance_main", "kraken_first", "kraken_second"]
    );
    assert_eq!(total[&CurrencyCode::from("BTC")].amount, "1.7 BTC".into());
    assert_eq!(total[&CurrencyCode::from("EUR")].amount, "1000 EUR".into());
}

#[test]
fn balance_with_equivalent_currency() {
    let orchestrator = two_venue_orchestrator();
    let (_, total) = orchestrator.balance(&[], Some("EUR".into())).unwrap();
    let btc = &total[&CurrencyCode::from("BTC")];
    // 1.5 BTC at binance mid 30000 and 0.2 BTC at kraken mid 30010, with
    // the default 0.1% maker fee netted per venue.
    let equivalent = btc.equivalent.expect("BTC should have an EUR equivalent");
    assert!(equivalent > "50000 EUR".into() && equivalent < "51100 EUR".into());
}

#[test]
fn deposit_info_returns_one_wallet_per_account() {
    let orchestrator = two_venue_orchestrator();
    let wallets = orchestrator.deposit_info("BTC".into(), &[]).unwrap();
    assert_eq!(wallets.len(), 3);
    assert!(wallets
        .iter()
        .all(|(_, wallet)| wallet.currency == "BTC".into()));
}

#[test]
fn account_selection_targets_one_account() {
    let orchestrator = two_venue_orchestrator();
    let names: Vec<ExchangeName> = vec!["kraken_second".parse().unwrap()];
    let (per_exchange, _) = orchestrator.balance(&names, None).unwrap();
    assert_eq!(per_exchange.len(), 1);
    assert_eq!(per_exchange[0].0, "kraken_second");
}
