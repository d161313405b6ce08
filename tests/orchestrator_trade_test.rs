mod common;

use crosscex::model::market::Market;
use crosscex::model::trade::{PriceStrategy, TradeOptions};
use crosscex::orchestrator::{ExchangeName, WithdrawMode, WithdrawOptions};
use crosscex::venues::VenueKind;

use common::{exchange, orchestrator, MockPrivate, MockPublic};

fn taker_options() -> TradeOptions {
    TradeOptions {
        price_strategy: PriceStrategy::Taker,
        ..Default::default()
    }
}

#[test]
fn smart_sell_splits_across_accounts() {
    let market = Market::new("BTC", "EUR");
    let orchestrator = orchestrator(vec![exchange(
        VenueKind::Binance,
        MockPublic::new(VenueKind::Binance, [market]).with_book(market, "30000 EUR"),
        vec![
            MockPrivate::new(VenueKind::Binance, "acct1", &[("BTC", "15")]),
            MockPrivate::new(VenueKind::Binance, "acct2", &[("BTC", "0.5")]),
        ],
    )]);

    let results = orchestrator
        .trade(
            "16 BTC".into(),
            false,
            "EUR".into(),
            &[],
            &taker_options(),
        )
        .unwrap();

    // Two trades, returned in selection order: 15 BTC on acct1 and the
    // remaining 0.5 BTC on acct2.
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "binance_acct1");
    assert_eq!(results[0].1.from, "15 BTC".into());
    assert_eq!(results[1].0, "binance_acct2");
    assert_eq!(results[1].1.from, "0.5 BTC".into());
    assert!(results.iter().all(|(_, traded)| traded.to.is_positive()));
}

#[test]
fn trade_skips_accounts_without_a_path() {
    let market = Market::new("BTC", "EUR");
    let orchestrator = orchestrator(vec![
        exchange(
            VenueKind::Binance,
            MockPublic::new(VenueKind::Binance, [market]).with_book(market, "30000 EUR"),
            vec![MockPrivate::new(VenueKind::Binance, "main", &[("BTC", "1")])],
        ),
        exchange(
            VenueKind::Upbit,
            // No market able to convert BTC to EUR on this venue.
            MockPublic::new(VenueKind::Upbit, [Market::new("XLM", "KRW")]),
            vec![MockPrivate::new(VenueKind::Upbit, "main", &[("BTC", "4")])],
        ),
    ]);

    let results = orchestrator
        .trade("2 BTC".into(), false, "EUR".into(), &[], &taker_options())
        .unwrap();

    let binance = results.iter().find(|(label, _)| label == "binance_main").unwrap();
    let upbit = results.iter().find(|(label, _)| label == "upbit_main").unwrap();
    assert_eq!(binance.1.from, "1 BTC".into());
    assert!(upbit.1.is_zero());
}

#[test]
fn percentage_trade_applies_to_each_balance() {
    let market = Market::new("BTC", "EUR");
    let orchestrator = orchestrator(vec![exchange(
        VenueKind::Binance,
        MockPublic::new(VenueKind::Binance, [market]).with_book(market, "30000 EUR"),
        vec![MockPrivate::new(VenueKind::Binance, "main", &[("BTC", "2")])],
    )]);

    let results = orchestrator
        .trade("25 BTC".into(), true, "EUR".into(), &[], &taker_options())
        .unwrap();
    assert_eq!(results[0].1.from, "0.5 BTC".into());
}

#[test]
fn trade_into_same_currency_is_rejected() {
    let market = Market::new("BTC", "EUR");
    let orchestrator = orchestrator(vec![exchange(
        VenueKind::Binance,
        MockPublic::new(VenueKind::Binance, [market]).with_book(market, "30000 EUR"),
        vec![MockPrivate::new(VenueKind::Binance, "main", &[("BTC", "1")])],
    )]);
    assert!(matches!(
        orchestrator.trade("1 BTC".into(), false, "BTC".into(), &[], &taker_options()),
        Err(crosscex::ExchangeError::InvalidArgument(_))
    ));
}

#[test]
fn multi_leg_trade_follows_the_path() {
    // No direct XLM-EUR market: the path goes through BTC.
    let xlm_btc = Market::new("XLM", "BTC");
    let btc_eur = Market::new("BTC", "EUR");
    let orchestrator = orchestrator(vec![exchange(
        VenueKind::Kraken,
        MockPublic::new(VenueKind::Kraken, [xlm_btc, btc_eur])
            .with_book(xlm_btc, "0.000017 BTC")
            .with_book(btc_eur, "30000 EUR"),
        vec![MockPrivate::new(VenueKind::Kraken, "main", &[("XLM", "50000")])],
    )]);

    let results = orchestrator
        .trade(
            "50000 XLM".into(),
            false,
            "EUR".into(),
            &[],
            &taker_options(),
        )
        .unwrap();
    let traded = &results[0].1;
    assert_eq!(traded.from, "50000 XLM".into());
    assert_eq!(traded.to.currency(), "EUR".into());
    assert!(traded.to.is_positive());
}

#[test]
fn withdraw_refused_when_source_cannot_withdraw() {
    let market = Market::new("XRP", "EUR");
    let mut kraken_public = MockPublic::new(VenueKind::Kraken, [market]);
    kraken_public.set_withdraw_enabled("XRP".into(), false);
    let kraken_account = MockPrivate::new(VenueKind::Kraken, "main", &[("XRP", "2000")]);
    let binance_account = MockPrivate::new(VenueKind::Binance, "main", &[]);

    let orchestrator = orchestrator(vec![
        exchange(VenueKind::Kraken, kraken_public, vec![kraken_account]),
        exchange(
            VenueKind::Binance,
            MockPublic::new(VenueKind::Binance, [market]),
            vec![binance_account],
        ),
    ]);

    let delivered = orchestrator
        .withdraw(
            "1000 XRP".into(),
            false,
            &"kraken_main".parse().unwrap(),
            &"binance_main".parse().unwrap(),
            &WithdrawOptions::default(),
        )
        .unwrap();

    // Refused before anything was launched: nothing initiated, nothing
    // sent, nothing received.
    assert!(!delivered.initiated);
    assert!(!delivered.sent);
    assert!(!delivered.is_delivered());
}

#[test]
fn withdraw_to_same_account_is_rejected() {
    let market = Market::new("XRP", "EUR");
    let orchestrator = orchestrator(vec![exchange(
        VenueKind::Kraken,
        MockPublic::new(VenueKind::Kraken, [market]),
        vec![MockPrivate::new(VenueKind::Kraken, "main", &[("XRP", "2000")])],
    )]);
    let name: ExchangeName = "kraken_main".parse().unwrap();
    assert!(matches!(
        orchestrator.withdraw(
            "10 XRP".into(),
            false,
            &name,
            &name,
            &WithdrawOptions::default()
        ),
        Err(crosscex::ExchangeError::InvalidArgument(_))
    ));
}

#[test]
fn withdraw_delivers_synchronously() {
    let market = Market::new("XRP", "EUR");
    let source = MockPrivate::new(VenueKind::Kraken, "main", &[("XRP", "2000")]);
    let destination = MockPrivate::new(VenueKind::Binance, "main", &[]);
    destination.deposits.lock().push(crosscex::model::trade::Deposit {
        id: "dep-1".into(),
        amount: "1000 XRP".into(),
        time: chrono::Utc::now(),
        is_settled: true,
    });

    let orchestrator = orchestrator(vec![
        exchange(
            VenueKind::Kraken,
            MockPublic::new(VenueKind::Kraken, [market]),
            vec![source],
        ),
        exchange(
            VenueKind::Binance,
            MockPublic::new(VenueKind::Binance, [market]),
            vec![destination],
        ),
    ]);

    let delivered = orchestrator
        .withdraw(
            "1000 XRP".into(),
            false,
            &"kraken_main".parse().unwrap(),
            &"binance_main".parse().unwrap(),
            &WithdrawOptions {
                mode: WithdrawMode::Synchronous,
                poll_period: std::time::Duration::from_millis(10),
                timeout: std::time::Duration::from_secs(5),
            },
        )
        .unwrap();

    assert!(delivered.initiated && delivered.sent);
    assert_eq!(delivered.received, Some("1000 XRP".into()));
}

#[test]
fn dust_sweeper_sells_residual_balance() {
    let market = Market::new("XLM", "BTC");
    let orchestrator = orchestrator(vec![exchange(
        VenueKind::Kraken,
        MockPublic::new(VenueKind::Kraken, [market]).with_book(market, "0.000017 BTC"),
        vec![MockPrivate::new(VenueKind::Kraken, "main", &[("XLM", "125")])],
    )]);

    let results = orchestrator.dust_sweeper("XLM".into(), &[]).unwrap();
    let result = &results[0].1;
    assert!(!result.trades.is_empty());
    assert!(result.final_balance.is_zero());
}

#[test]
fn simulated_trade_returns_theoretical_amounts() {
    let market = Market::new("BTC", "EUR");
    let orchestrator = orchestrator(vec![exchange(
        VenueKind::Binance,
        MockPublic::new(VenueKind::Binance, [market]).with_book(market, "30000 EUR"),
        vec![MockPrivate::new(VenueKind::Binance, "main", &[("BTC", "1")])],
    )]);
    let options = TradeOptions {
        price_strategy: PriceStrategy::Taker,
        is_simulation: true,
        ..Default::default()
    };
    let results = orchestrator
        .trade("1 BTC".into(), false, "EUR".into(), &[], &options)
        .unwrap();
    let traded = &results[0].1;
    assert_eq!(traded.from, "1 BTC".into());
    // Theoretical fill at the taker price (best bid, one tick under mid).
    assert_eq!(traded.to, "29999.9 EUR".into());
}
