//! HTTP client with rate limiting for the genre lookup services.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting to stay within public API quotas
//! * Consistent timeouts and headers
//!
//! # Rate Limiting
//!
//! The public lookup services are shared, free resources that ban clients
//! which hammer them. The client allows a small burst and then spaces out
//! requests to one per second, which satisfies the strictest of them
//! (MusicBrainz).
//!
//! # Example
//!
//! ```rust
//! use auraplay::http::Client;
//!
//! let client = Client::new(&config)?;
//! let request = client.get(url);
//! let response = client.execute(request).await?;
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    header::{HeaderValue, ACCEPT, ACCEPT_LANGUAGE},
    Method, Url,
};

use crate::{config::Config, error::Result};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Unlimited request client for special cases.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Interval at which one request is replenished.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(1);

    /// Requests that may be sent back to back before throttling starts.
    const RATE_LIMIT_BURST: u32 = 3;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads. Callers additionally
    /// time-box whole lookups.
    const READ_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        // Not having `Accept-Language` set is non-fatal.
        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(lang) = HeaderValue::from_str(&config.app_lang) {
            headers.insert(ACCEPT_LANGUAGE, lang);
        }
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .default_headers(headers)
            .user_agent(&config.user_agent);

        let quota = Quota::with_period(Self::RATE_LIMIT_INTERVAL)
            .expect("quota time interval is zero")
            .allow_burst(NonZeroU32::new(Self::RATE_LIMIT_BURST).expect("burst is zero"));

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a GET request.
    #[must_use]
    pub fn get(&self, url: Url) -> reqwest::Request {
        reqwest::Request::new(Method::GET, url)
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the server responds with a
    /// non-success status.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| {
            self.unlimited
                .execute(request)
                .and_then(|response| async move { response.error_for_status() })
                .map_err(Into::into)
        })
    }
}
