use reqwest::{header::RETRY_AFTER, Client, Response, StatusCode};
use reqwest_retry::{default_on_request_success, Retryable};
use serde_json::Value;
use slog::{debug, Logger};
use std::time::Duration;

use crate::FetchError;

/// Shared HTTP client for every adapter and observation source. Retries are
/// not done here; the caller owns the policy.
pub struct JsonFetcher {
    logger: Logger,
    client: Client,
}

impl JsonFetcher {
    pub fn new(logger: Logger, user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { logger, client })
    }

    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        accept: &str,
    ) -> Result<Value, FetchError> {
        debug!(self.logger, "requesting: {}", url);
        let response = self
            .client
            .get(url)
            .query(query)
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await
            .map_err(classify_send_error)?;

        let response = check_status(response).await?;
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("error reading body of {}: {}", url, e)))?;

        serde_json::from_str(&body)
            .map_err(|e| FetchError::Fatal(format!("invalid json from {}: {}", url, e)))
    }
}

async fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited {
            retry_after: retry_after(&response),
        });
    }

    match default_on_request_success(&response) {
        None => Ok(response),
        Some(Retryable::Transient) => Err(FetchError::Transient(format!(
            "{} from {}",
            status,
            response.url()
        ))),
        Some(Retryable::Fatal) => {
            let url = response.url().to_string();
            let body = response.text().await.unwrap_or_default();
            Err(FetchError::Fatal(format!(
                "{} from {}: {}",
                status,
                url,
                truncate(&body, 200)
            )))
        }
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn classify_send_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        FetchError::Transient(format!("error sending request: {}", err))
    } else {
        FetchError::Fatal(format!("error sending request: {}", err))
    }
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
