//! The message send flow: composer fill, mode toggles, file upload, Enter.
//!
//! Selectors target the live grok.com markup and carry no stability
//! guarantee. Interaction goes through visible UI elements with small
//! randomized delays, and typing uses `insertText` so the page framework's
//! input emitters fire.

use crate::error::{Error, Result};
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;

const COMPOSER_SELECTOR: &str = r#"textarea[aria-label="Ask Grok anything"], textarea.w-full"#;
const NEW_CHAT_SELECTOR: &str = r#"a[href="/chat"]"#;
const FILE_INPUT_SELECTOR: &str = r#"input[type="file"]"#;

const SELECTOR_TIMEOUT: Duration = Duration::from_secs(30);
const SELECTOR_POLL: Duration = Duration::from_millis(250);

/// What to send and how
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub message: String,
    pub new_chat: bool,
    pub think_mode: bool,
    pub deep_search: bool,
    pub files: Vec<PathBuf>,
}

impl SendOptions {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Type the message into the composer and submit it.
pub async fn send_message(page: &Page, options: &SendOptions) -> Result<()> {
    // Hide the automation flag before touching anything else
    let _ = page
        .evaluate("Object.defineProperty(navigator, 'webdriver', {get: () => undefined})")
        .await;

    if options.new_chat {
        start_new_chat(page).await?;
    }

    if !options.files.is_empty() {
        upload_files(page, &options.files).await?;
    }

    tracing::info!(chars = options.message.len(), "sending message");
    let composer = wait_for_element(page, COMPOSER_SELECTOR).await?;
    composer.click().await?;
    jitter(300..900).await;

    let content = serde_json::to_string(&options.message)
        .map_err(|e| Error::Automation(e.to_string()))?;
    let script = format!(
        r#"(() => {{
            const el = document.querySelector('{COMPOSER_SELECTOR}');
            if (!el) return false;
            el.focus();
            document.execCommand('insertText', false, {content});
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            return true;
        }})()"#
    );
    let typed = page
        .evaluate(script)
        .await?
        .into_value::<bool>()
        .unwrap_or(false);
    if !typed {
        return Err(Error::MissingElement(COMPOSER_SELECTOR.to_string()));
    }
    jitter(500..1200).await;

    if options.think_mode && !toggle_mode_button(page, "Think").await? {
        tracing::warn!("could not find Think mode toggle");
    }
    if options.deep_search && !toggle_mode_button(page, "DeepSearch").await? {
        tracing::warn!("could not find DeepSearch mode toggle");
    }

    composer.press_key("Enter").await?;
    tracing::info!("message sent, waiting for response");
    Ok(())
}

/// Click the new-chat link unless the composer is already visible.
async fn start_new_chat(page: &Page) -> Result<()> {
    if page.find_element(COMPOSER_SELECTOR).await.is_ok() {
        return Ok(());
    }
    tracing::info!("starting new chat");
    let link = wait_for_element(page, NEW_CHAT_SELECTOR).await?;
    link.click().await?;
    sleep(Duration::from_secs(1)).await;
    Ok(())
}

/// Toggle a mode button identified by its label text. CSS cannot match on
/// text, so this walks the buttons in page context.
async fn toggle_mode_button(page: &Page, label: &str) -> Result<bool> {
    let script = format!(
        r#"(() => {{
            const button = Array.from(document.querySelectorAll('button'))
                .find(b => b.textContent.trim() === '{label}');
            if (!button) return false;
            button.click();
            return true;
        }})()"#
    );
    let clicked = page
        .evaluate(script)
        .await?
        .into_value::<bool>()
        .unwrap_or(false);
    if clicked {
        tracing::info!(label, "mode enabled");
        jitter(200..600).await;
    }
    Ok(clicked)
}

/// Attach files through the hidden file input.
async fn upload_files(page: &Page, files: &[PathBuf]) -> Result<()> {
    let paths: Vec<String> = files
        .iter()
        .map(|f| f.display().to_string())
        .collect();
    tracing::info!(?paths, "uploading files");

    let input = match page.find_element(FILE_INPUT_SELECTOR).await {
        Ok(input) => input,
        Err(_) => {
            // The input only exists once the attach dialog is open
            if !toggle_mode_button(page, "Select files").await? {
                return Err(Error::MissingElement(FILE_INPUT_SELECTOR.to_string()));
            }
            sleep(Duration::from_secs(1)).await;
            wait_for_element(page, FILE_INPUT_SELECTOR).await?
        }
    };

    let params = SetFileInputFilesParams::builder()
        .files(paths)
        .node_id(input.node_id)
        .build()
        .map_err(Error::Automation)?;
    page.execute(params).await?;
    sleep(Duration::from_secs(2)).await;

    // Close the dialog if it is still up
    let _ = page
        .evaluate(
            r#"(() => {
                const event = new KeyboardEvent('keydown', { key: 'Escape', bubbles: true });
                document.dispatchEvent(event);
            })()"#,
        )
        .await;
    Ok(())
}

/// Poll for a selector until it appears or the deadline passes.
pub async fn wait_for_element(
    page: &Page,
    selector: &str,
) -> Result<chromiumoxide::element::Element> {
    let deadline = tokio::time::Instant::now() + SELECTOR_TIMEOUT;
    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Ok(element);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Timeout(format!("selector {}", selector)));
        }
        sleep(SELECTOR_POLL).await;
    }
}

/// Randomized pause between UI steps.
async fn jitter(range: std::ops::Range<u64>) {
    let delay = {
        let mut rng = rand::rng();
        rand::Rng::random_range(&mut rng, range)
    };
    sleep(Duration::from_millis(delay)).await;
}
