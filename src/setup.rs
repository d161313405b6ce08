use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::api::fiat::{FiatConverter, HttpRateSource};
use crate::context::AppContext;
use crate::errors::Result;
use crate::net::http::{HttpClient, HttpClientConfig};
use crate::net::url_picker::BestUrlPicker;
use crate::orchestrator::{Exchange, ExchangeAccount, Orchestrator};
use crate::venues::{build_private, build_public, VenueKind};

const FIAT_RATES_URL: &str = "https://open.er-api.com";
const FIAT_RATES_TTL: Duration = Duration::from_secs(4 * 3600);

/// Builds the orchestrator over every supported venue, wiring private
/// accounts for the credentials found in the data directory. A venue whose
/// private adapter cannot be built keeps its public side; the broken
/// account is skipped with a warning.
pub fn bootstrap(ctx: Arc<AppContext>, nb_threads: usize) -> Result<Orchestrator> {
    let fiat_http = HttpClient::new(
        BestUrlPicker::single(FIAT_RATES_URL),
        HttpClientConfig {
            min_interval: Duration::from_millis(500),
            proxy: ctx.proxy().map(str::to_string),
            timeout: None,
        },
        ctx.metrics().cloned(),
    )?;
    let fiat_converter = Arc::new(FiatConverter::new(
        Box::new(HttpRateSource::new(fiat_http)),
        FIAT_RATES_TTL,
    ));

    let credentials = ctx.load_credentials();
    let mut exchanges = Vec::with_capacity(VenueKind::ALL.len());
    for kind in VenueKind::ALL {
        let public = build_public(kind, Arc::clone(&ctx))?;
        let mut accounts = Vec::new();
        if let Some(venue_accounts) = credentials.get(kind.name()) {
            for (account_name, account_credentials) in venue_accounts {
                match build_private(
                    kind,
                    Arc::clone(&ctx),
                    account_name.clone(),
                    account_credentials.clone(),
                ) {
                    Ok(api) => accounts.push(ExchangeAccount {
                        name: account_name.clone(),
                        api,
                    }),
                    Err(err) => warn!("skipping account {kind}_{account_name}: {err}"),
                }
            }
        }
        exchanges.push(Exchange {
            kind,
            public,
            accounts,
        });
    }
    Orchestrator::new(ctx, fiat_converter, exchanges, nb_threads)
}
