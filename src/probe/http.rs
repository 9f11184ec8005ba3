//! HTTP probe implementation.

use super::PingOutcome;
use std::time::Instant;

/// Run an HTTP GET against `address` and compare the response status with
/// `expected_status`. Any status is a response, never a transport error.
pub async fn run_http_probe(client: &reqwest::Client, address: &str, expected_status: u16) -> PingOutcome {
    let url = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let start = Instant::now();

    match client.get(&url).send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            let latency_ms = elapsed_ms(start);
            let success = status == expected_status;

            tracing::debug!("HTTP probe {}: {} in {:.2}ms", url, status, latency_ms);

            PingOutcome {
                success,
                status_code: Some(status),
                latency_ms,
                error_message: if success {
                    None
                } else {
                    Some(format!("Expected {}, got {}", expected_status, status))
                },
                players: None,
            }
        }
        Err(e) => {
            let message = if e.is_timeout() {
                format!("request timed out: {}", error_chain(&e))
            } else {
                error_chain(&e)
            };
            PingOutcome::failed(elapsed_ms(start), message)
        }
    }
}

/// Join an error and its sources into one message. reqwest's own `Display`
/// stops at "error sending request" and leaves the cause in the chain.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

pub(crate) fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
