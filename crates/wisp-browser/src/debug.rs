//! Page state dumps for troubleshooting selector drift.

use crate::error::Result;
use chromiumoxide::Page;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use std::path::{Path, PathBuf};

/// Write a PNG screenshot of the page into `dir`, returning the path.
pub async fn save_screenshot(page: &Page, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "wisp_page_{}.png",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    ));
    let bytes = page
        .screenshot(
            ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .full_page(true)
                .build(),
        )
        .await?;
    std::fs::write(&path, bytes)?;
    tracing::info!(path = %path.display(), "saved screenshot");
    Ok(path)
}

/// Write the page HTML into `dir`, returning the path.
pub async fn save_html(page: &Page, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "wisp_page_{}.html",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    ));
    let html = page.content().await?;
    std::fs::write(&path, html)?;
    tracing::info!(path = %path.display(), "saved page HTML");
    Ok(path)
}
