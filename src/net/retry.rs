use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{error, warn};

use crate::errors::{ExchangeError, Result};
use crate::net::http::{HttpClient, RequestOptions};

/// Verdict of the application-level acceptance predicate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RetryStatus {
    Accept,
    Reject,
}

/// What to do once every allowed attempt was rejected.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ExhaustedPolicy {
    #[default]
    ReturnDefault,
    Raise,
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_retries: u32,
    pub on_exhausted: ExhaustedPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_retries: 3,
            on_exhausted: ExhaustedPolicy::ReturnDefault,
        }
    }
}

impl RetryPolicy {
    pub fn raising(max_retries: u32) -> Self {
        RetryPolicy {
            max_retries,
            on_exhausted: ExhaustedPolicy::Raise,
            ..Default::default()
        }
    }
}

/// Queries an endpoint, decodes the body as JSON and loops while the
/// caller-supplied predicate rejects the value.
///
/// Transport failures and JSON parse failures are rejections like any
/// other: they consume an attempt and trigger the backoff sleep. The delay
/// is multiplied after each rejected attempt.
pub fn query_json<T>(
    http: &mut HttpClient,
    endpoint: &str,
    opts: &RequestOptions,
    policy: RetryPolicy,
    accept: impl Fn(&T) -> RetryStatus,
) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let mut opts = opts.clone();
    query_json_with(http, endpoint, &mut opts, policy, accept, |_| {})
}

/// Same as [`query_json`], with a hook run before every attempt to refresh
/// mutable request parts (typically a nonce or timestamp).
pub fn query_json_with<T>(
    http: &mut HttpClient,
    endpoint: &str,
    opts: &mut RequestOptions,
    policy: RetryPolicy,
    accept: impl Fn(&T) -> RetryStatus,
    mut update_opts: impl FnMut(&mut RequestOptions),
) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let mut sleeping_time = policy.initial_delay;
    let mut last_error: Option<ExchangeError> = None;

    for nb_retries in 0..=policy.max_retries {
        if nb_retries != 0 {
            warn!(
                "query error on {endpoint}, retry {nb_retries}/{} after {sleeping_time:?}",
                policy.max_retries
            );
            std::thread::sleep(sleeping_time);
            sleeping_time = sleeping_time.mul_f64(policy.backoff_multiplier);
        }

        update_opts(opts);

        let body = match http.query(endpoint, opts) {
            Ok(body) => body,
            Err(err) => {
                last_error = Some(err);
                continue;
            }
        };
        match serde_json::from_str::<T>(&body) {
            Ok(value) => {
                if accept(&value) == RetryStatus::Accept {
                    return Ok(value);
                }
                last_error = Some(ExchangeError::Transport(format!(
                    "response of {endpoint} rejected by acceptance predicate"
                )));
            }
            Err(err) => {
                let prefix: String = body.chars().take(20).collect();
                error!("error reading json content '{prefix}...': {err}");
                last_error = Some(ExchangeError::Parse(err.to_string()));
            }
        }
    }

    match policy.on_exhausted {
        ExhaustedPolicy::ReturnDefault => {
            error!("too many query errors on {endpoint}, returning default value");
            Ok(T::default())
        }
        ExhaustedPolicy::Raise => Err(last_error.unwrap_or_else(|| {
            ExchangeError::Transport(format!("too many query errors on {endpoint}"))
        })),
    }
}
