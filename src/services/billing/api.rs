use crate::cache::directory::CustomerSource;
use crate::error::TurnstileError;
use crate::model::{Customer, CustomerPage};
use reqwest::{header, Client};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
const ACCEPT_HEADER: &str = "application/vnd.billing+json;version=1";

/// Client for the billing provider's REST API.
#[derive(Clone)]
pub struct BillingApi {
    client: Client,
    base_url: String,
    api_key: String,
}

impl BillingApi {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Fetch one page of the customer listing, retrying transient failures
    /// with exponential backoff. Client errors are not retried.
    async fn get_customers(&self, count: u32, offset: u32) -> Result<Vec<Customer>, TurnstileError> {
        let url = format!("{}/customers", self.base_url);
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            let start = Instant::now();

            debug!(
                count,
                offset,
                attempt = attempt + 1,
                "Requesting customer page"
            );

            let result = self
                .client
                .get(&url)
                .query(&[("count", count), ("offset", offset)])
                .header(
                    header::AUTHORIZATION,
                    format!("Token token={}", self.api_key),
                )
                .header(header::ACCEPT, ACCEPT_HEADER)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    let elapsed = start.elapsed();

                    if status.is_success() {
                        let page: CustomerPage = resp.json().await.map_err(TurnstileError::from)?;
                        debug!(
                            records = page.customers.len(),
                            offset,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Customer page received"
                        );
                        return Ok(page.customers);
                    } else if status.is_server_error() {
                        debug!(
                            status = %status,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Server error, will retry"
                        );
                        last_error = Some(TurnstileError::Upstream(format!("HTTP {}", status)));
                    } else {
                        debug!(
                            status = %status,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Client error, not retrying"
                        );
                        return Err(TurnstileError::Upstream(format!("HTTP {}", status)));
                    }
                }
                Err(e) => {
                    debug!(
                        error = %e,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Request failed"
                    );
                    last_error = Some(TurnstileError::from(e));
                }
            }

            if attempt < MAX_RETRIES - 1 {
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = MAX_RETRIES,
                    backoff_ms = backoff,
                    "Customer page request failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| TurnstileError::Upstream("Request failed after retries".into())))
    }
}

impl CustomerSource for BillingApi {
    async fn fetch_page(&self, count: u32, offset: u32) -> Result<Vec<Customer>, TurnstileError> {
        self.get_customers(count, offset).await
    }
}
