//! Page navigation: fetching one dataset year through the portal's UI.
//!
//! The batch only sees [`PageNavigator`]. The production implementation is
//! [`ProtocolNavigator`], which runs the download protocol over a
//! [`PageSession`] obtained from a [`SessionLauncher`]; Chrome sessions live
//! in [`chrome`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::models::{DatasetDescriptor, Locator};

pub mod chrome;
mod protocol;
mod wait;

pub use protocol::ProtocolNavigator;
pub use wait::WaitPolicy;

/// Steps of the download protocol, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    PageLoad,
    ContentMarker,
    SelectYear,
    ApplyYear,
    YearApplied,
    OptionsPanel,
    DownloadAffordance,
    FormatDialog,
    TabularFormat,
    Confirm,
    DownloadComplete,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::PageLoad => "page load",
            Step::ContentMarker => "page content",
            Step::SelectYear => "year selection",
            Step::ApplyYear => "year apply button",
            Step::YearApplied => "selected year to load",
            Step::OptionsPanel => "options panel",
            Step::DownloadAffordance => "download link",
            Step::FormatDialog => "format dialog",
            Step::TabularFormat => "tabular format option",
            Step::Confirm => "download confirmation",
            Step::DownloadComplete => "download to complete",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while fetching one dataset year.
#[derive(Debug, Error)]
pub enum NavigationError {
    #[error("Timed out waiting for {step}")]
    Timeout { step: Step },

    #[error("Element not found during {step}: {locator}")]
    ElementNotFound { step: Step, locator: String },

    #[error("Browser error during {step}: {message}")]
    Browser { step: Step, message: String },

    #[error("Failed to start browser session: {0}")]
    Launch(String),

    #[error("Invalid location {location}: {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NavigationError {
    /// Page-level hiccups that may well succeed on a later run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NavigationError::Timeout { .. }
                | NavigationError::ElementNotFound { .. }
                | NavigationError::Browser { .. }
        )
    }

    /// The step the error happened in, if it happened inside the protocol.
    pub fn step(&self) -> Option<Step> {
        match self {
            NavigationError::Timeout { step }
            | NavigationError::ElementNotFound { step, .. }
            | NavigationError::Browser { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Errors raised by a single session operation.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("element not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Protocol(String),
}

impl SessionError {
    pub(crate) fn at(self, step: Step) -> NavigationError {
        match self {
            SessionError::NotFound(locator) => NavigationError::ElementNotFound { step, locator },
            SessionError::Protocol(message) => NavigationError::Browser { step, message },
        }
    }
}

/// Browser session settings, passed explicitly to the navigator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Needed when running as root inside containers.
    #[serde(default)]
    pub no_sandbox: bool,

    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,

    #[serde(default = "default_page_load_timeout")]
    pub page_load_timeout_secs: u64,

    /// Upper bound for each "wait for element" step.
    #[serde(default = "default_element_timeout")]
    pub element_timeout_secs: u64,

    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval_ms: u64,
}

fn default_headless() -> bool {
    true
}

fn default_page_load_timeout() -> u64 {
    30
}

fn default_element_timeout() -> u64 {
    10
}

fn default_download_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    250
}

fn default_max_poll_interval() -> u64 {
    2000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            no_sandbox: false,
            chrome_executable: None,
            page_load_timeout_secs: default_page_load_timeout(),
            element_timeout_secs: default_element_timeout(),
            download_timeout_secs: default_download_timeout(),
            poll_interval_ms: default_poll_interval(),
            max_poll_interval_ms: default_max_poll_interval(),
        }
    }
}

/// Longest wait any single step may be configured with (one day).
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

impl SessionConfig {
    /// Check timeouts and polling bounds.
    pub fn validate(&self) -> Result<(), String> {
        let timeouts = [
            ("page_load_timeout_secs", self.page_load_timeout_secs),
            ("element_timeout_secs", self.element_timeout_secs),
            ("download_timeout_secs", self.download_timeout_secs),
        ];
        for (name, secs) in timeouts {
            if secs == 0 || secs > MAX_TIMEOUT_SECS {
                return Err(format!(
                    "{} must be between 1 and {} seconds, got {}",
                    name, MAX_TIMEOUT_SECS, secs
                ));
            }
        }

        if self.poll_interval_ms == 0 || self.poll_interval_ms > self.max_poll_interval_ms {
            return Err(format!(
                "poll_interval_ms must be between 1 and max_poll_interval_ms ({})",
                self.max_poll_interval_ms
            ));
        }
        if self.max_poll_interval_ms > MAX_TIMEOUT_SECS * 1000 {
            return Err(format!(
                "max_poll_interval_ms must be at most {}",
                MAX_TIMEOUT_SECS * 1000
            ));
        }

        Ok(())
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn element_wait(&self) -> WaitPolicy {
        self.wait_policy(Duration::from_secs(self.element_timeout_secs))
    }

    pub fn download_wait(&self) -> WaitPolicy {
        self.wait_policy(Duration::from_secs(self.download_timeout_secs))
    }

    fn wait_policy(&self, timeout: Duration) -> WaitPolicy {
        WaitPolicy::new(
            timeout,
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_millis(self.max_poll_interval_ms),
        )
    }
}

/// One live interactive session (a browser with a single page).
///
/// `close` consumes the session, so it can be released at most once.
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn goto(&self, url: &Url) -> Result<(), SessionError>;

    async fn is_present(&self, locator: &Locator) -> Result<bool, SessionError>;

    async fn click(&self, locator: &Locator) -> Result<(), SessionError>;

    /// Select the option of a `<select>` whose visible text is `text`.
    async fn select_option(&self, locator: &Locator, text: &str) -> Result<(), SessionError>;

    /// Visible text of the currently selected option, if the select exists.
    async fn selected_option(&self, locator: &Locator) -> Result<Option<String>, SessionError>;

    /// Wait for a navigation started by the previous action to finish.
    async fn wait_for_navigation(&self) -> Result<(), SessionError>;

    /// Tag the current document. The tag is lost once a new document loads.
    async fn mark_page(&self) -> Result<(), SessionError>;

    /// Whether the current document still carries the tag from [`mark_page`](Self::mark_page).
    async fn page_marked(&self) -> Result<bool, SessionError>;

    async fn close(self: Box<Self>) -> Result<(), SessionError>;
}

/// Starts fresh sessions that save downloads into a given directory.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn launch(
        &self,
        config: &SessionConfig,
        download_dir: &Path,
    ) -> Result<Box<dyn PageSession>, NavigationError>;
}

/// Capability to fetch one dataset year into `target_dir`.
///
/// On success the artifact named by the descriptor's template exists in
/// `target_dir`. On failure nothing, or a partial file, may be left behind.
#[async_trait]
pub trait PageNavigator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(
        &self,
        descriptor: &DatasetDescriptor,
        year: i32,
        target_dir: &Path,
    ) -> Result<(), NavigationError>;
}
