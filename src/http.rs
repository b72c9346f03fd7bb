use std::time::Duration;

use tracing::{debug, error, warn};

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Build a ureq agent with a bounded global timeout.
#[inline]
pub fn agent_with_timeout(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// How a failed HTTP request should be reported to the caller after the
/// retry loop gives up.
#[derive(Debug)]
pub enum HttpFailure {
    /// 401/403 - the credential is wrong, retrying will not help
    Auth(u16),
    /// Other non-retryable client error
    Client(String),
    /// Transport failure or server error after exhausting retries
    Exhausted(String),
}

/// Run a request closure with bounded exponential-backoff retries.
///
/// Server errors (5xx) and transport failures are retried; auth failures and
/// other client errors are returned immediately.
#[inline]
pub fn request_with_retry<F>(attempts: u32, mut request_fn: F) -> Result<String, HttpFailure>
where
    F: FnMut() -> Result<String, ureq::Error>,
{
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        debug!("HTTP request attempt {}/{}", attempt, attempts);

        match request_fn() {
            Ok(response_text) => return Ok(response_text),
            Err(error) => {
                match &error {
                    ureq::Error::StatusCode(status) => {
                        if *status == 401 || *status == 403 {
                            warn!("Auth failure (status {}), not retrying", status);
                            return Err(HttpFailure::Auth(*status));
                        }
                        if *status < 500 && *status != 429 {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(HttpFailure::Client(format!("HTTP {}", status)));
                        }
                        warn!("Server error (status {}), attempt {}/{}", status, attempt, attempts);
                    }
                    ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_) => {
                        warn!("Transport error: {}, attempt {}/{}", error, attempt, attempts);
                    }
                    _ => {
                        warn!("Non-retryable error: {}", error);
                        return Err(HttpFailure::Client(error.to_string()));
                    }
                }

                last_error = error.to_string();

                if attempt < attempts {
                    let delay = Duration::from_millis(EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000);
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    error!("All {} attempts failed: {}", attempts, last_error);
    Err(HttpFailure::Exhausted(last_error))
}
