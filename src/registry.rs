//! Built-in dataset registry.
//!
//! The order here is the order the batch processes datasets in.

use thiserror::Error;

use crate::models::{
    DatasetDescriptor, FilenameTemplate, NavigationVariant, PageLocators, YearRange,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),
}

/// Datasets published on the statistics portal.
pub fn builtin() -> Vec<DatasetDescriptor> {
    vec![
        DatasetDescriptor {
            id: "population-density".to_string(),
            title: "Population density by county, area and province".to_string(),
            base_location: "https://www.idescat.cat/indicadors/?id=aec&n=15227".to_string(),
            years: YearRange::exclusive(2006, 2025),
            filename: FilenameTemplate::new("t15227{year}00.csv"),
            variant: NavigationVariant::TagSelectedOnPage,
            locators: PageLocators::for_container("#TitolComp"),
        },
        DatasetDescriptor {
            id: "municipal-waste".to_string(),
            title: "Municipal waste generation, total and per capita".to_string(),
            base_location: "https://www.idescat.cat/pub/?id=resmc&n=6997&geo=com".to_string(),
            years: YearRange::exclusive(2000, 2022),
            filename: FilenameTemplate::new("t6997com{year}00.csv"),
            variant: NavigationVariant::year_encoded(),
            locators: PageLocators::for_container("#Titular"),
        },
        DatasetDescriptor {
            id: "population-by-age-sex".to_string(),
            title: "Population on 1 January by sex and age group".to_string(),
            base_location: "https://www.idescat.cat/indicadors/?id=aec&n=15233&tema=XIFPO"
                .to_string(),
            years: YearRange::exclusive(1999, 2025),
            filename: FilenameTemplate::new("t15233{year}00.csv"),
            variant: NavigationVariant::year_encoded(),
            locators: PageLocators::for_container("#Titular"),
        },
    ]
}

/// Pick datasets by id, keeping registry order. An empty `ids` selects everything.
pub fn select(
    registry: &[DatasetDescriptor],
    ids: &[String],
) -> Result<Vec<DatasetDescriptor>, RegistryError> {
    if let Some(unknown) = ids.iter().find(|id| !registry.iter().any(|d| &d.id == *id)) {
        return Err(RegistryError::UnknownDataset(unknown.clone()));
    }

    Ok(registry
        .iter()
        .filter(|d| ids.is_empty() || ids.contains(&d.id))
        .cloned()
        .collect())
}
