//! Chrome sessions over the DevTools protocol.
//!
//! Each session is its own browser process with a throwaway profile, and
//! downloads go straight into the requested directory without prompting.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::{NavigationError, PageSession, SessionConfig, SessionError, SessionLauncher};
use crate::models::Locator;

/// Launches a local Chrome/Chromium per session.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeLauncher;

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    fn name(&self) -> &'static str {
        "chrome"
    }

    async fn launch(
        &self,
        config: &SessionConfig,
        download_dir: &Path,
    ) -> Result<Box<dyn PageSession>, NavigationError> {
        // Chrome wants an absolute download path.
        let download_dir = std::fs::canonicalize(download_dir)?;
        let profile_dir = std::env::temp_dir().join(format!("statgrab-{}", Uuid::new_v4()));

        let mut builder = BrowserConfig::builder()
            .request_timeout(config.page_load_timeout())
            .user_data_dir(&profile_dir)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        if !config.headless {
            builder = builder.with_head();
        }
        if config.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(executable) = &config.chrome_executable {
            builder = builder.chrome_executable(executable);
        }
        let browser_config = builder.build().map_err(NavigationError::Launch)?;

        let (mut browser, mut handler) = match Browser::launch(browser_config).await {
            Ok(launched) => launched,
            Err(e) => {
                // Chrome may have written the profile before failing.
                remove_profile(&profile_dir).await;
                return Err(NavigationError::Launch(e.to_string()));
            }
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        match prepare_page(&browser, &download_dir).await {
            Ok(page) => {
                debug!("Chrome session started, downloads to {:?}", download_dir);
                Ok(Box::new(ChromeSession {
                    browser,
                    page,
                    handler_task,
                    profile_dir,
                }))
            }
            Err(message) => {
                // The browser is already running; release it before reporting.
                if let Err(e) = shutdown(&mut browser, handler_task, &profile_dir).await {
                    warn!("Failed to shut down half-started browser: {}", e);
                }
                Err(NavigationError::Launch(message))
            }
        }
    }
}

async fn prepare_page(browser: &Browser, download_dir: &Path) -> Result<Page, String> {
    let params = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::Allow)
        .download_path(download_dir.to_string_lossy().into_owned())
        .build()?;
    browser.execute(params).await.map_err(|e| e.to_string())?;

    browser
        .new_page("about:blank")
        .await
        .map_err(|e| e.to_string())
}

async fn shutdown(
    browser: &mut Browser,
    handler_task: JoinHandle<()>,
    profile_dir: &Path,
) -> Result<(), SessionError> {
    let closed = browser
        .close()
        .await
        .map_err(|e| SessionError::Protocol(e.to_string()));
    if closed.is_ok() {
        if let Err(e) = browser.wait().await {
            debug!("Waiting for browser exit failed: {}", e);
        }
    }
    handler_task.abort();

    remove_profile(profile_dir).await;
    closed.map(|_| ())
}

async fn remove_profile(profile_dir: &Path) {
    match tokio::fs::remove_dir_all(profile_dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!("Could not remove profile {:?}: {}", profile_dir, e),
    }
}

/// One Chrome process with a single page.
pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    profile_dir: PathBuf,
}

impl ChromeSession {
    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T, SessionError> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| SessionError::Protocol(e.to_string()))?
            .into_value()
            .map_err(|e| SessionError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl PageSession for ChromeSession {
    async fn goto(&self, url: &Url) -> Result<(), SessionError> {
        self.page
            .goto(url.as_str())
            .await
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        Ok(())
    }

    async fn is_present(&self, locator: &Locator) -> Result<bool, SessionError> {
        self.eval(presence_script(locator)).await
    }

    async fn click(&self, locator: &Locator) -> Result<(), SessionError> {
        if self.eval(click_script(locator)).await? {
            Ok(())
        } else {
            Err(SessionError::NotFound(locator.to_string()))
        }
    }

    async fn select_option(&self, locator: &Locator, text: &str) -> Result<(), SessionError> {
        let status: String = self.eval(select_script(locator, text)).await?;
        match status.as_str() {
            "ok" => Ok(()),
            "no-option" => Err(SessionError::NotFound(format!(
                "option '{}' in {}",
                text, locator
            ))),
            _ => Err(SessionError::NotFound(locator.to_string())),
        }
    }

    async fn selected_option(&self, locator: &Locator) -> Result<Option<String>, SessionError> {
        let text: String = self.eval(selected_script(locator)).await?;
        Ok((!text.is_empty()).then_some(text))
    }

    async fn wait_for_navigation(&self) -> Result<(), SessionError> {
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        Ok(())
    }

    async fn mark_page(&self) -> Result<(), SessionError> {
        let _: bool = self.eval(format!("window.{} = true", PAGE_MARKER)).await?;
        Ok(())
    }

    async fn page_marked(&self) -> Result<bool, SessionError> {
        self.eval(format!("window.{} === true", PAGE_MARKER)).await
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        let ChromeSession {
            mut browser,
            page,
            handler_task,
            profile_dir,
        } = *self;
        drop(page);
        shutdown(&mut browser, handler_task, &profile_dir).await
    }
}

/// Window property tagging a document that a new page load must replace.
const PAGE_MARKER: &str = "__statgrabPending";

/// JS string literal.
fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// JS expression evaluating to the element or null.
fn lookup_expr(locator: &Locator) -> String {
    match locator {
        Locator::Css(selector) => format!("document.querySelector({})", js_str(selector)),
        Locator::XPath(expression) => format!(
            "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            js_str(expression)
        ),
    }
}

fn presence_script(locator: &Locator) -> String {
    format!("({}) !== null", lookup_expr(locator))
}

fn click_script(locator: &Locator) -> String {
    format!(
        "(() => {{ const el = {}; if (!el) return false; el.click(); return true; }})()",
        lookup_expr(locator)
    )
}

fn select_script(locator: &Locator, text: &str) -> String {
    format!(
        "(() => {{ \
            const el = {}; \
            if (!el || !el.options) return 'missing'; \
            const opt = Array.from(el.options).find(o => o.text.trim() === {}); \
            if (!opt) return 'no-option'; \
            el.value = opt.value; \
            el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
            return 'ok'; \
        }})()",
        lookup_expr(locator),
        js_str(text)
    )
}

// Evaluates to '' rather than null: a null result carries no value to deserialize.
fn selected_script(locator: &Locator) -> String {
    format!(
        "(() => {{ \
            const el = {}; \
            if (!el || !el.options || el.selectedIndex < 0) return ''; \
            return el.options[el.selectedIndex].text.trim(); \
        }})()",
        lookup_expr(locator)
    )
}
