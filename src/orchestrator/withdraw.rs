use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::errors::{ExchangeError, Result};
use crate::model::monetary::MonetaryAmount;
use crate::model::wallet::DeliveredWithdrawInfo;

use super::{AccountFilter, ExchangeName, Orchestrator, SelectionOrder};

/// Whether the call returns at send confirmation or blocks until the funds
/// land on the destination.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum WithdrawMode {
    #[default]
    Synchronous,
    Asynchronous,
}

#[derive(Clone, Debug)]
pub struct WithdrawOptions {
    pub mode: WithdrawMode,
    pub poll_period: Duration,
    pub timeout: Duration,
}

impl Default for WithdrawOptions {
    fn default() -> Self {
        WithdrawOptions {
            mode: WithdrawMode::Synchronous,
            poll_period: Duration::from_secs(5),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl Orchestrator {
    /// Moves `gross_amount` from one account to another venue's account.
    ///
    /// Refuses a same-account transfer; when the source cannot withdraw the
    /// currency or the destination cannot deposit it, returns an
    /// uninitiated [`DeliveredWithdrawInfo`] rather than failing.
    pub fn withdraw(
        &self,
        gross_amount: MonetaryAmount,
        is_percentage: bool,
        from_name: &ExchangeName,
        to_name: &ExchangeName,
        options: &WithdrawOptions,
    ) -> Result<DeliveredWithdrawInfo> {
        if from_name == to_name {
            return Err(ExchangeError::InvalidArgument(format!(
                "cannot withdraw from {from_name} to itself"
            )));
        }
        let cur = gross_amount.currency();
        let source = self.single_account(from_name)?;
        let destination = self.single_account(to_name)?;
        let source_exchange = self.exchange_of(source);
        let destination_exchange = self.exchange_of(destination);
        let source_account = self.account_or_err(source)?;
        let destination_account = self.account_or_err(destination)?;

        // Availability checks on both sides first.
        let source_currencies = source_exchange.public.tradable_currencies()?;
        let can_withdraw = source_currencies
            .iter()
            .find(|currency| currency.standard_code == cur)
            .is_some_and(|currency| currency.can_withdraw);
        if !can_withdraw {
            warn!("{}: withdrawals of {cur} are disabled", source_exchange.name());
            return Ok(DeliveredWithdrawInfo::not_initiated());
        }
        let destination_currencies = destination_exchange.public.tradable_currencies()?;
        let can_deposit = destination_currencies
            .iter()
            .find(|currency| currency.standard_code == cur)
            .is_some_and(|currency| currency.can_deposit);
        if !can_deposit {
            warn!(
                "{}: deposits of {cur} are disabled",
                destination_exchange.name()
            );
            return Ok(DeliveredWithdrawInfo::not_initiated());
        }

        let gross_amount = if is_percentage {
            let balance = source_account.api.account_balance()?;
            let available = balance
                .get(&cur)
                .copied()
                .unwrap_or_else(|| MonetaryAmount::zero(cur));
            available
                .to_neutral()
                .checked_mul(gross_amount.to_neutral())?
                .checked_div(MonetaryAmount::from_int(100, cur))?
                .with_currency(cur)
        } else {
            gross_amount
        };
        if !gross_amount.is_positive() {
            return Err(ExchangeError::InvalidArgument(format!(
                "nothing to withdraw ({gross_amount})"
            )));
        }

        // Resolve and vet the destination wallet.
        let wallet = destination_account.api.deposit_wallet(cur)?;
        let destination_config = self.context().venue_config(destination_exchange.name());
        if destination_config.validate_deposit_addresses {
            let allowlist = self.context().load_wallet_allowlist();
            if !wallet.is_trusted_by(&allowlist) {
                return Err(ExchangeError::InvalidArgument(format!(
                    "destination wallet {wallet} is not in the trusted address list"
                )));
            }
        }

        let initiated = source_account.api.launch_withdraw(gross_amount, &wallet)?;
        info!(
            "withdraw {gross_amount} from {from_name} to {to_name} initiated, id {}",
            initiated.withdraw_id
        );
        let deadline = Instant::now() + options.timeout;

        // Source side: wait for the funds to leave.
        let mut sent = source_account.api.is_withdraw_successfully_sent(&initiated)?;
        while !sent.is_sent {
            if Instant::now() >= deadline {
                return Err(ExchangeError::Timeout(format!(
                    "withdraw {} still not sent by {from_name}",
                    initiated.withdraw_id
                )));
            }
            std::thread::sleep(options.poll_period);
            sent = source_account.api.is_withdraw_successfully_sent(&initiated)?;
        }
        info!(
            "withdraw {} sent by {from_name} (net {})",
            initiated.withdraw_id,
            sent.net_amount.unwrap_or_else(|| MonetaryAmount::zero(cur))
        );

        let mut delivered = DeliveredWithdrawInfo {
            initiated: true,
            sent: true,
            received: None,
            withdraw_id: Some(initiated.withdraw_id.clone()),
        };
        if options.mode == WithdrawMode::Asynchronous {
            return Ok(delivered);
        }

        // Destination side: wait for a non-zero net amount to land.
        loop {
            if let Some(received) = destination_account
                .api
                .query_withdraw_delivery(&initiated, &sent)?
            {
                if !received.is_zero() {
                    info!("withdraw {} delivered: {received}", initiated.withdraw_id);
                    delivered.received = Some(received);
                    return Ok(delivered);
                }
            }
            if Instant::now() >= deadline {
                return Err(ExchangeError::Timeout(format!(
                    "withdraw {} sent but not observed on {to_name}",
                    initiated.withdraw_id
                )));
            }
            std::thread::sleep(options.poll_period);
        }
    }

    /// Resolves a reference that must denote exactly one private account.
    fn single_account(&self, name: &ExchangeName) -> Result<super::Selected> {
        let selected = self.select(
            std::slice::from_ref(name),
            SelectionOrder::Selection,
            AccountFilter::WithAccountWhenEmpty,
        )?;
        match selected.as_slice() {
            [] => Err(ExchangeError::InvalidArgument(format!(
                "no account matches {name}"
            ))),
            [only] => Ok(*only),
            _ => Err(ExchangeError::InvalidArgument(format!(
                "{name} is ambiguous, several accounts match; use venue_account"
            ))),
        }
    }
}
