pub mod fiat;
pub mod path;
pub mod private;
pub mod public;

pub use fiat::{FiatConverter, FiatRateSource, HttpRateSource, StaticRateSource};
pub use path::{MarketPathMode, PathSearch};
pub use private::{BalanceMap, VenuePrivateApi};
pub use public::{
    compute_avg_order_price, compute_limit_order_price, convert_at_average_price,
    determine_market_from_string, find_currencies_path, find_markets_path, retrieve_market,
    retrieve_market_from_set, side_of, CurrencyExchangeSet, MarketOrderBookMap, MarketPriceMap,
    MarketSet, VenuePublicApi, WithdrawalFeeMap, DEFAULT_NB_LAST_TRADES,
};
