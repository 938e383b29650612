//! Connecting to a user-owned Chrome instance over remote debugging.

use crate::error::{Error, Result};
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;

/// The chat frontend this tool drives
pub const BASE_URL: &str = "https://grok.com";

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// A connection to an already-running Chrome.
///
/// The browser belongs to the user; dropping the session only stops the CDP
/// message pump, it never closes the browser.
pub struct BrowserSession {
    #[allow(dead_code)]
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl BrowserSession {
    /// Connect on the given remote-debugging port and attach to a grok.com
    /// tab, opening one if none exists.
    pub async fn connect(port: u16) -> Result<Self> {
        let version_url = format!("http://localhost:{}/json/version", port);
        tracing::info!(port, "connecting to Chrome");
        let info: VersionInfo = reqwest::get(&version_url).await?.json().await?;

        let (browser, mut handler) = Browser::connect(&info.web_socket_debugger_url).await?;
        let handler_task = tokio::spawn(async move {
            while handler.next().await.is_some() {}
        });

        let page = Self::find_chat_page(&browser).await?;
        Ok(Self {
            browser,
            page,
            handler_task,
        })
    }

    async fn find_chat_page(browser: &Browser) -> Result<Page> {
        for page in browser.pages().await? {
            if let Ok(Some(url)) = page.url().await {
                if url.contains("grok.com") {
                    tracing::info!(url, "found existing chat tab");
                    return Ok(page);
                }
            }
        }
        tracing::info!("no chat tab found, opening one");
        Ok(browser.new_page(BASE_URL).await?)
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Navigate to the chat frontend if the tab wandered off it
    pub async fn ensure_on_chat(&self) -> Result<()> {
        if let Ok(Some(url)) = self.page.url().await {
            if url.contains("grok.com") {
                return Ok(());
            }
        }
        self.page.goto(BASE_URL).await?;
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}
