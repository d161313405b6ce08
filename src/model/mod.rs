pub mod currency;
pub mod market;
pub mod monetary;
pub mod orderbook;
pub mod trade;
pub mod wallet;

pub use currency::CurrencyCode;
pub use market::{Market, MarketType};
pub use monetary::{MonetaryAmount, RoundMode};
pub use orderbook::{MarketOrderBook, OrderBookLine, DEFAULT_DEPTH};
pub use trade::{
    Deposit, Order, OrderId, OrderInfo, OrdersConstraints, PlaceOrderInfo, PriceStrategy,
    PublicTrade, TimeoutAction, TradeInfo, TradeOptions, TradeSide, TradedAmounts,
    TransferConstraints, Withdraw,
};
pub use wallet::{
    CurrencyExchange, DeliveredWithdrawInfo, InitiatedWithdrawInfo, SentWithdrawInfo, Wallet,
    WalletAllowlist,
};
