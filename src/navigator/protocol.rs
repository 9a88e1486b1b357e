//! The portal's download protocol, shared by every dataset page.

use std::panic::AssertUnwindSafe;
use std::path::Path;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    NavigationError, PageNavigator, PageSession, SessionConfig, SessionLauncher, Step, WaitPolicy,
};
use crate::models::{DatasetDescriptor, Locator, NavigationVariant};
use crate::storage;

/// Runs the download protocol in a fresh session per fetch:
///
/// 1. load the page (year in the query for year-encoded pages)
/// 2. wait for the content marker
/// 3. tag-selected pages: pick the year, apply it, wait for the reloaded page
/// 4. wait for the options panel, open the download dialog
/// 5. choose the tabular format and confirm
/// 6. wait for the artifact to land in the target directory
pub struct ProtocolNavigator<L> {
    launcher: L,
    config: SessionConfig,
}

impl<L: SessionLauncher> ProtocolNavigator<L> {
    pub fn new(launcher: L, config: SessionConfig) -> Self {
        Self { launcher, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    async fn run_protocol(
        &self,
        session: &dyn PageSession,
        descriptor: &DatasetDescriptor,
        year: i32,
        location: &Url,
        target_dir: &Path,
    ) -> Result<(), NavigationError> {
        let locators = &descriptor.locators;
        let element_wait = self.config.element_wait();

        debug!("Loading {}", location);
        tokio::time::timeout(self.config.page_load_timeout(), session.goto(location))
            .await
            .map_err(|_| NavigationError::Timeout {
                step: Step::PageLoad,
            })?
            .map_err(|e| e.at(Step::PageLoad))?;

        wait_for(session, &element_wait, &locators.content_marker, Step::ContentMarker).await?;

        if descriptor.variant == NavigationVariant::TagSelectedOnPage {
            let year_text = year.to_string();
            debug!("Selecting year {}", year_text);
            // Everything on the current page predates the apply; the tag tells
            // the reloaded document apart from it.
            session
                .mark_page()
                .await
                .map_err(|e| e.at(Step::SelectYear))?;
            session
                .select_option(&locators.year_select, &year_text)
                .await
                .map_err(|e| e.at(Step::SelectYear))?;
            session
                .click(&locators.apply_year)
                .await
                .map_err(|e| e.at(Step::ApplyYear))?;
            tokio::time::timeout(self.config.page_load_timeout(), session.wait_for_navigation())
                .await
                .map_err(|_| NavigationError::Timeout {
                    step: Step::ApplyYear,
                })?
                .map_err(|e| e.at(Step::ApplyYear))?;

            let select = &locators.year_select;
            let expected = year_text.as_str();
            let applied = element_wait
                .until(move || async move {
                    // Probe errors while the new document loads count as "not yet".
                    if !matches!(session.page_marked().await, Ok(false)) {
                        return false;
                    }
                    matches!(
                        session.selected_option(select).await,
                        Ok(Some(text)) if text.trim() == expected
                    )
                })
                .await;
            if !applied {
                return Err(NavigationError::Timeout {
                    step: Step::YearApplied,
                });
            }
        }

        wait_for(session, &element_wait, &locators.options_panel, Step::OptionsPanel).await?;
        session
            .click(&locators.download_link)
            .await
            .map_err(|e| e.at(Step::DownloadAffordance))?;

        wait_for(session, &element_wait, &locators.format_dialog, Step::FormatDialog).await?;
        session
            .click(&locators.tabular_option)
            .await
            .map_err(|e| e.at(Step::TabularFormat))?;
        session
            .click(&locators.confirm)
            .await
            .map_err(|e| e.at(Step::Confirm))?;

        let filename = descriptor.filename_for(year);
        let filename = filename.as_str();
        debug!("Waiting for {} in {:?}", filename, target_dir);
        let finished = self
            .config
            .download_wait()
            .until(move || async move { storage::download_finished(target_dir, filename) })
            .await;
        if !finished {
            return Err(NavigationError::Timeout {
                step: Step::DownloadComplete,
            });
        }

        Ok(())
    }
}

/// Poll until `locator` is present. Probe errors (e.g. mid-navigation) count as "not yet".
async fn wait_for(
    session: &dyn PageSession,
    policy: &WaitPolicy,
    locator: &Locator,
    step: Step,
) -> Result<(), NavigationError> {
    debug!("Waiting for {} ({})", step, locator);
    let present = policy
        .until(move || async move {
            match session.is_present(locator).await {
                Ok(present) => present,
                Err(e) => {
                    debug!("Probe for {} failed: {}", locator, e);
                    false
                }
            }
        })
        .await;

    if present {
        Ok(())
    } else {
        Err(NavigationError::Timeout { step })
    }
}

#[async_trait]
impl<L: SessionLauncher> PageNavigator for ProtocolNavigator<L> {
    fn name(&self) -> &'static str {
        self.launcher.name()
    }

    async fn fetch(
        &self,
        descriptor: &DatasetDescriptor,
        year: i32,
        target_dir: &Path,
    ) -> Result<(), NavigationError> {
        let location =
            descriptor
                .location_for(year)
                .map_err(|e| NavigationError::InvalidLocation {
                    location: descriptor.base_location.clone(),
                    reason: e.to_string(),
                })?;

        let session = self.launcher.launch(&self.config, target_dir).await?;
        let result = AssertUnwindSafe(self.run_protocol(
            session.as_ref(),
            descriptor,
            year,
            &location,
            target_dir,
        ))
        .catch_unwind()
        .await;

        if let Err(e) = session.close().await {
            warn!("Failed to release {} session: {}", self.launcher.name(), e);
        }

        // The session is released; let the caller see the panic.
        let result = match result {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        };

        if result.is_ok() {
            info!(
                "Downloaded {} for {}",
                descriptor.filename_for(year),
                descriptor.id
            );
        }
        result
    }
}
