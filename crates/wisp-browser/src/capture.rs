//! Network response capture.
//!
//! Subscribes to `Network.responseReceived` on the chat page, filters the
//! events through the endpoint classifier, pulls bodies with
//! `Network.getResponseBody`, and feeds the shared tracker. One task per page
//! keeps feeds in arrival order.

use crate::error::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams, RequestId,
};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use wisp_capture::ResponseTracker;

/// Bodies lag the responseReceived event; how often and how many times to
/// retry fetching one.
const BODY_RETRY_DELAY: Duration = Duration::from_millis(150);
const BODY_RETRIES: u32 = 5;

/// Start the capture task for a page.
///
/// Runs until the event stream closes; abort the handle to stop early.
pub async fn spawn_response_capture(
    page: &Page,
    tracker: Arc<Mutex<ResponseTracker>>,
) -> Result<JoinHandle<()>> {
    page.execute(EnableParams::default()).await?;
    let mut events = page.event_listener::<EventResponseReceived>().await?;
    let page = page.clone();

    Ok(tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let url = event.response.url.clone();
            if wisp_capture::classify(&url).is_none() {
                continue;
            }

            let status = event.response.status.clamp(0, u16::MAX as i64) as u16;
            let pending = !response_finished(status, event.response.headers.inner());
            tracing::info!(url, status, pending, "tracked API response");

            match fetch_body(&page, event.request_id.clone()).await {
                Ok(body) => {
                    let outcome = tracker.lock().feed(&url, status, &body, pending);
                    if let Some(outcome) = outcome {
                        tracing::debug!(
                            format = ?outcome.format,
                            chunks_valid = outcome.chunks_valid,
                            chunks_total = outcome.chunks_total,
                            is_complete = outcome.is_complete,
                            "response body decoded"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(url, error = %err, "failed to fetch response body");
                }
            }
        }
    }))
}

/// Non-200 statuses and `connection: close` mark the request as resolved.
fn response_finished(status: u16, headers: &serde_json::Value) -> bool {
    if status != 200 {
        return true;
    }
    headers
        .get("connection")
        .or_else(|| headers.get("Connection"))
        .and_then(|v| v.as_str())
        .is_some_and(|v| v.to_ascii_lowercase().contains("close"))
}

async fn fetch_body(page: &Page, request_id: RequestId) -> Result<String> {
    let mut last_err: Option<Error> = None;
    for _ in 0..BODY_RETRIES {
        tokio::time::sleep(BODY_RETRY_DELAY).await;
        match page
            .execute(GetResponseBodyParams::new(request_id.clone()))
            .await
        {
            Ok(response) => {
                let result = &response.result;
                if result.base64_encoded {
                    return match BASE64.decode(result.body.as_bytes()) {
                        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
                        Err(err) => Err(Error::Automation(format!(
                            "response body is not valid base64: {}",
                            err
                        ))),
                    };
                }
                return Ok(result.body.clone());
            }
            Err(err) => last_err = Some(err.into()),
        }
    }
    Err(last_err
        .unwrap_or_else(|| Error::Timeout("response body".to_string())))
}
