//! Dataset descriptors: where a dataset lives and how its yearly files are named.

use serde::{Deserialize, Serialize};
use url::Url;

use super::YearRange;

/// Placeholder substituted with the year in filename templates.
pub const YEAR_PLACEHOLDER: &str = "{year}";

/// Period code the portal uses for a whole year (`2020` -> `202000`).
pub fn period_code(year: i32) -> String {
    format!("{}00", year)
}

/// Deterministic artifact name for a given year, e.g. `t15227{year}00.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilenameTemplate(String);

impl FilenameTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the template varies with the year. Without the placeholder
    /// every year would map to the same artifact.
    pub fn is_year_dependent(&self) -> bool {
        self.0.contains(YEAR_PLACEHOLDER)
    }

    pub fn render(&self, year: i32) -> String {
        self.0.replace(YEAR_PLACEHOLDER, &year.to_string())
    }
}

/// How the target year is chosen on the remote page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum NavigationVariant {
    /// The page loads with a default year; pick one from a `<select>` and apply.
    TagSelectedOnPage,

    /// The year is passed as a query parameter holding its period code.
    YearEncodedInLocation {
        #[serde(default = "default_year_param")]
        param: String,
    },
}

fn default_year_param() -> String {
    "t".to_string()
}

impl NavigationVariant {
    pub fn year_encoded() -> Self {
        NavigationVariant::YearEncodedInLocation {
            param: default_year_param(),
        }
    }
}

impl std::fmt::Display for NavigationVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NavigationVariant::TagSelectedOnPage => write!(f, "tag-selected-on-page"),
            NavigationVariant::YearEncodedInLocation { param } => {
                write!(f, "year-encoded-in-location ({}=)", param)
            }
        }
    }
}

/// Element locator on the remote page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locator {
    Css(String),
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Locator::XPath(expression.into())
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css:{}", s),
            Locator::XPath(s) => write!(f, "xpath:{}", s),
        }
    }
}

/// The handful of elements the download protocol touches.
///
/// Pages on the portal share the options panel and download dialog and
/// differ only in the container wrapping the title area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLocators {
    /// Present once the page content has rendered.
    pub content_marker: Locator,
    /// Year `<select>`, used by the tag-selected variant only.
    pub year_select: Locator,
    /// Button applying the selected year.
    pub apply_year: Locator,
    pub options_panel: Locator,
    pub download_link: Locator,
    pub format_dialog: Locator,
    pub tabular_option: Locator,
    pub confirm: Locator,
}

impl PageLocators {
    /// Locators for a page whose title area is the element `container` (e.g. `#Titular`).
    pub fn for_container(container: &str) -> Self {
        Self {
            content_marker: Locator::css(container),
            year_select: Locator::css(format!("{} select", container)),
            apply_year: Locator::css(format!("{} button", container)),
            options_panel: Locator::css("#Opcions"),
            download_link: Locator::css("#Opcions .download a"),
            format_dialog: Locator::css("#download"),
            tabular_option: Locator::xpath("//*[@id='download']//label[contains(text(), 'Tabular')]"),
            confirm: Locator::xpath("//*[@id='download']//a[contains(text(), 'Confirmar')]"),
        }
    }
}

impl Default for PageLocators {
    fn default() -> Self {
        Self::for_container("#Titular")
    }
}

/// Static description of one downloadable dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub id: String,

    #[serde(default)]
    pub title: String,

    /// Page URL without the year.
    pub base_location: String,

    pub filename: FilenameTemplate,

    pub years: YearRange,

    pub variant: NavigationVariant,

    #[serde(default)]
    pub locators: PageLocators,
}

impl DatasetDescriptor {
    /// Artifact filename for `year`.
    pub fn filename_for(&self, year: i32) -> String {
        self.filename.render(year)
    }

    /// Page location to load for `year`.
    pub fn location_for(&self, year: i32) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.base_location)?;
        if let NavigationVariant::YearEncodedInLocation { param } = &self.variant {
            url.query_pairs_mut().append_pair(param, &period_code(year));
        }
        Ok(url)
    }

    /// Expand the year range into tasks, ascending.
    pub fn tasks(&self) -> impl Iterator<Item = FetchTask<'_>> {
        self.years.iter().map(move |year| FetchTask {
            descriptor: self,
            year,
        })
    }

    /// Copy of this descriptor limited to an inclusive year window.
    pub fn with_year_window(&self, from: Option<i32>, to: Option<i32>) -> Self {
        Self {
            years: self.years.clip(from, to),
            ..self.clone()
        }
    }
}

/// One (dataset, year) unit of work.
#[derive(Debug, Clone, Copy)]
pub struct FetchTask<'a> {
    pub descriptor: &'a DatasetDescriptor,
    pub year: i32,
}

impl FetchTask<'_> {
    pub fn filename(&self) -> String {
        self.descriptor.filename_for(self.year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(variant: NavigationVariant) -> DatasetDescriptor {
        DatasetDescriptor {
            id: "test".to_string(),
            title: "Test dataset".to_string(),
            base_location: "https://example.com/pub/?id=x&n=999".to_string(),
            years: YearRange::exclusive(2020, 2022),
            filename: FilenameTemplate::new("t999{year}00.csv"),
            variant,
            locators: PageLocators::default(),
        }
    }

    #[test]
    fn test_filename_template_is_deterministic() {
        let template = FilenameTemplate::new("t999{year}00.csv");
        assert_eq!(template.render(2020), "t999202000.csv");
        assert_eq!(template.render(2020), template.render(2020));
        assert_ne!(template.render(2020), template.render(2021));
    }

    #[test]
    fn test_filename_template_without_placeholder() {
        assert!(FilenameTemplate::new("t999{year}00.csv").is_year_dependent());
        assert!(!FilenameTemplate::new("static.csv").is_year_dependent());
    }

    #[test]
    fn test_location_year_encoded() {
        let d = descriptor(NavigationVariant::year_encoded());
        let url = d.location_for(2021).unwrap();
        assert_eq!(url.as_str(), "https://example.com/pub/?id=x&n=999&t=202100");
    }

    #[test]
    fn test_location_tag_selected_is_unchanged() {
        let d = descriptor(NavigationVariant::TagSelectedOnPage);
        let url = d.location_for(2021).unwrap();
        assert_eq!(url.as_str(), "https://example.com/pub/?id=x&n=999");
    }

    #[test]
    fn test_location_invalid() {
        let mut d = descriptor(NavigationVariant::TagSelectedOnPage);
        d.base_location = "not a url".to_string();
        assert!(d.location_for(2021).is_err());
    }

    #[test]
    fn test_tasks_ascending() {
        let d = descriptor(NavigationVariant::TagSelectedOnPage);
        let tasks: Vec<(i32, String)> = d.tasks().map(|t| (t.year, t.filename())).collect();
        assert_eq!(
            tasks,
            vec![
                (2020, "t999202000.csv".to_string()),
                (2021, "t999202100.csv".to_string()),
            ]
        );
    }

    #[test]
    fn test_locators_for_container() {
        let locators = PageLocators::for_container("#TitolComp");
        assert_eq!(locators.content_marker, Locator::css("#TitolComp"));
        assert_eq!(locators.year_select, Locator::css("#TitolComp select"));
        assert_eq!(locators.apply_year, Locator::css("#TitolComp button"));
    }

    #[test]
    fn test_variant_serialization() {
        let json = serde_json::to_string(&NavigationVariant::year_encoded()).unwrap();
        assert_eq!(json, r#"{"kind":"year-encoded-in-location","param":"t"}"#);

        let parsed: NavigationVariant =
            serde_json::from_str(r#"{"kind":"tag-selected-on-page"}"#).unwrap();
        assert_eq!(parsed, NavigationVariant::TagSelectedOnPage);

        let parsed: NavigationVariant =
            serde_json::from_str(r#"{"kind":"year-encoded-in-location"}"#).unwrap();
        assert_eq!(parsed, NavigationVariant::year_encoded());
    }
}
