use std::collections::BTreeMap;

use crate::errors::Result;
use crate::model::currency::CurrencyCode;
use crate::model::monetary::MonetaryAmount;
use crate::model::trade::{
    Deposit, Order, OrderInfo, OrdersConstraints, PlaceOrderInfo, TradeInfo, TransferConstraints,
    Withdraw,
};
use crate::model::wallet::{InitiatedWithdrawInfo, SentWithdrawInfo, Wallet};

pub type BalanceMap = BTreeMap<CurrencyCode, MonetaryAmount>;

/// Capability set of account-scoped operations; the account identity is
/// implied by the instance.
///
/// All write operations are serialized per account by the adapter's vault
/// lock, which keeps nonce-ordered signing schemes happy.
pub trait VenuePrivateApi: Send + Sync {
    /// Lowercase venue name this account belongs to.
    fn venue(&self) -> &'static str;

    /// Configured name of the account, unique per venue.
    fn account_name(&self) -> &str;

    fn validate_api_key(&self) -> Result<bool>;

    /// Available balance per currency; zero balances are omitted.
    fn account_balance(&self) -> Result<BalanceMap>;

    fn deposit_wallet(&self, cur: CurrencyCode) -> Result<Wallet>;

    /// Whether the venue can create a deposit address on demand when none
    /// exists yet.
    fn can_generate_deposit_address(&self) -> bool {
        true
    }

    fn opened_orders(&self, filter: &OrdersConstraints) -> Result<Vec<Order>>;

    fn closed_orders(&self, filter: &OrdersConstraints) -> Result<Vec<Order>>;

    /// Returns the number of cancelled orders.
    fn cancel_orders(&self, filter: &OrdersConstraints) -> Result<usize>;

    fn recent_deposits(&self, filter: &TransferConstraints) -> Result<Vec<Deposit>>;

    fn recent_withdraws(&self, filter: &TransferConstraints) -> Result<Vec<Withdraw>>;

    /// Places an order spending `from`; `volume` and `price` are already
    /// rounded to the venue's expectations.
    fn place_order(
        &self,
        from: MonetaryAmount,
        volume: MonetaryAmount,
        price: MonetaryAmount,
        info: &TradeInfo,
    ) -> Result<PlaceOrderInfo>;

    fn cancel_order(&self, order_id: &str, info: &TradeInfo) -> Result<OrderInfo>;

    fn query_order_info(&self, order_id: &str, info: &TradeInfo) -> Result<OrderInfo>;

    fn launch_withdraw(
        &self,
        gross_amount: MonetaryAmount,
        destination: &Wallet,
    ) -> Result<InitiatedWithdrawInfo>;

    fn is_withdraw_successfully_sent(
        &self,
        initiated: &InitiatedWithdrawInfo,
    ) -> Result<SentWithdrawInfo>;

    /// Net amount observed on the destination account for this withdrawal,
    /// `None` while nothing arrived yet.
    fn query_withdraw_delivery(
        &self,
        initiated: &InitiatedWithdrawInfo,
        sent: &SentWithdrawInfo,
    ) -> Result<Option<MonetaryAmount>>;

    /// Consistent snapshot of this adapter's cache vault.
    fn dump_caches(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    fn load_caches(&self, _snapshot: &serde_json::Value) {}
}
