use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::errors::{ExchangeError, Result};
use crate::metrics::MetricsSink;
use crate::net::flatkv::PostData;
use crate::net::url_picker::BestUrlPicker;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const USER_AGENT: &str = concat!("crosscex/", env!("CARGO_PKG_VERSION"));

/// Per-request options: method, ordered body, ordered headers.
///
/// On GET and DELETE the post data is appended to the URL as a query
/// string; on POST it is the body, either form-encoded or as a JSON
/// document when `json_body` is set.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub post_data: PostData,
    pub json_body: bool,
    pub headers: Vec<(String, String)>,
    pub verbose: bool,
}

impl RequestOptions {
    pub fn get() -> Self {
        RequestOptions {
            method: HttpMethod::Get,
            ..Default::default()
        }
    }

    pub fn post() -> Self {
        RequestOptions {
            method: HttpMethod::Post,
            ..Default::default()
        }
    }

    pub fn delete() -> Self {
        RequestOptions {
            method: HttpMethod::Delete,
            ..Default::default()
        }
    }

    pub fn with_post_data(mut self, post_data: PostData) -> Self {
        self.post_data = post_data;
        self
    }

    pub fn with_json_body(mut self) -> Self {
        self.json_body = true;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// Construction-time settings of an [`HttpClient`].
#[derive(Clone, Debug, Default)]
pub struct HttpClientConfig {
    /// Minimum spacing enforced between two requests of this client.
    pub min_interval: Duration,
    /// Optional proxy URL, applied to every request of this client.
    pub proxy: Option<String>,
    /// Hard timeout of a single request.
    pub timeout: Option<Duration>,
}

/// One HTTP handle per (venue, api class), owning connection state.
///
/// Not thread-safe: callers serialize access, which the vault lock of the
/// owning adapter already does.
pub struct HttpClient {
    client: reqwest::blocking::Client,
    picker: BestUrlPicker,
    min_interval: Duration,
    last_query_time: Option<Instant>,
    metrics: Option<MetricsSink>,
}

impl HttpClient {
    pub fn new(
        picker: BestUrlPicker,
        config: HttpClientConfig,
        metrics: Option<MetricsSink>,
    ) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout.unwrap_or(Duration::from_secs(10)));
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|err| ExchangeError::InvalidArgument(format!("bad proxy URL: {err}")))?,
            );
        }
        debug!(
            "initialize http client for {} with min spacing {:?}",
            picker.next_base_url(),
            config.min_interval
        );
        Ok(HttpClient {
            client: builder.build()?,
            picker,
            min_interval: config.min_interval,
            last_query_time: None,
            metrics,
        })
    }

    /// Base URL the next query will target, for introspection and logging.
    pub fn next_base_url(&self) -> &'static str {
        self.picker.next_base_url()
    }

    /// Performs one request and returns the raw response body.
    ///
    /// Transport-level failures (connect, TLS, timeout) surface as
    /// [`ExchangeError::Transport`]; the body is returned as-is otherwise,
    /// whatever the HTTP status, since protocol errors are judged at the
    /// application layer.
    pub fn query(&mut self, endpoint: &str, opts: &RequestOptions) -> Result<String> {
        let base_url_pos = self.picker.next_base_url_pos();
        let mut url = String::from(self.picker.base_url(base_url_pos));
        url.push_str(endpoint);

        let is_query_string =
            opts.method != HttpMethod::Post && !opts.post_data.is_empty();
        if is_query_string {
            url.push('?');
            url.push_str(opts.post_data.as_str());
        }

        let mut request = match opts.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };
        if opts.method == HttpMethod::Post && !opts.post_data.is_empty() {
            request = if opts.json_body {
                request
                    .header("Content-Type", "application/json")
                    .body(opts.post_data.to_json().to_string())
            } else {
                request
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .body(opts.post_data.as_str().to_string())
            };
        }
        for (key, value) in &opts.headers {
            request = request.header(key, value);
        }

        self.enforce_min_interval();

        if opts.verbose {
            info!("{} {} {}", opts.method, url, opts.post_data);
        } else {
            debug!("{} {}", opts.method, url);
        }

        let start = Instant::now();
        let response = request
            .send()
            .map_err(|err| ExchangeError::Transport(format!("{} {url}: {err}", opts.method)))?;
        let body = response
            .text()
            .map_err(|err| ExchangeError::Transport(format!("{} {url}: {err}", opts.method)))?;
        let duration_ms = start.elapsed().as_millis() as u32;

        self.picker.store_response_time(base_url_pos, duration_ms);
        if let Some(metrics) = &self.metrics {
            metrics.record_request(opts.method.as_str(), f64::from(duration_ms));
        }
        trace!("response of {url} in {duration_ms} ms: {body}");

        Ok(body)
    }

    fn enforce_min_interval(&mut self) {
        let now = Instant::now();
        if self.min_interval > Duration::ZERO {
            if let Some(last) = self.last_query_time {
                let elapsed = now.duration_since(last);
                if elapsed < self.min_interval {
                    let sleeping_time = self.min_interval - elapsed;
                    debug!("wait {sleeping_time:?} before performing query");
                    std::thread::sleep(sleeping_time);
                }
            }
        }
        self.last_query_time = Some(Instant::now());
    }
}
