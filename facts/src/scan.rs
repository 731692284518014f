//! Saved scans and their options.

use std::collections::BTreeSet;

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{Error, OptionalProduct, ProductName, ScanId, ScanType, SourceId};

/// The default upper bound on hosts inspected in parallel within one task.
pub const DEFAULT_MAX_CONCURRENCY: usize = 25;

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

/// Products to search for beyond the default locations.
#[derive(Clone, PartialEq, Eq, Debug, Default, TypedBuilder, Getters, Serialize, Deserialize)]
#[serde(default)]
#[getset(get = "pub")]
pub struct ExtendedProductSearch {
    /// Products for which the extended search runs.
    #[builder(default)]
    products: BTreeSet<OptionalProduct>,

    /// Absolute directories searched in addition to the defaults.
    #[builder(default)]
    search_directories: Vec<String>,
}

/// Options controlling how a scan runs.
#[derive(Clone, PartialEq, Eq, Debug, TypedBuilder, Getters, CopyGetters, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Upper bound on hosts handled in parallel within one task.
    #[builder(default = DEFAULT_MAX_CONCURRENCY)]
    #[serde(default = "default_max_concurrency")]
    #[getset(get_copy = "pub")]
    max_concurrency: usize,

    /// Products that are neither inspected nor fingerprinted.
    #[builder(default)]
    #[serde(default)]
    #[getset(get = "pub")]
    disabled_optional_products: BTreeSet<OptionalProduct>,

    /// Products searched for in additional locations.
    #[builder(default)]
    #[serde(default)]
    #[getset(get = "pub")]
    enabled_extended_product_search: ExtendedProductSearch,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ScanOptions {
    /// Reject option sets a scan cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_concurrency < 1 {
            return Err(Error::Validation {
                entity: "scan",
                field: "max_concurrency",
                reason: String::from("must be at least 1"),
            });
        }
        if let Some(dir) = self
            .enabled_extended_product_search
            .search_directories
            .iter()
            .find(|dir| !dir.starts_with('/'))
        {
            return Err(Error::Validation {
                entity: "scan",
                field: "search_directories",
                reason: format!("'{dir}' is not an absolute path"),
            });
        }
        Ok(())
    }

    /// Whether `product` should be detected.
    pub fn product_enabled(&self, product: ProductName) -> bool {
        !self
            .disabled_optional_products
            .iter()
            .any(|disabled| disabled.product() == product)
    }
}

/// A named, reusable scan configuration.
#[derive(Clone, PartialEq, Eq, Debug, TypedBuilder, Getters, CopyGetters, Serialize, Deserialize)]
pub struct Scan {
    /// Assigned by the store on insert.
    #[builder(default)]
    #[serde(default)]
    #[getset(get_copy = "pub")]
    pub(crate) id: ScanId,

    /// Unique, human readable name.
    #[builder(setter(into))]
    #[getset(get = "pub")]
    name: String,

    /// What the scan does.
    #[builder(default)]
    #[serde(default)]
    #[getset(get_copy = "pub")]
    scan_type: ScanType,

    /// Sources scanned, in order.
    #[getset(get = "pub")]
    sources: Vec<SourceId>,

    /// How the scan runs.
    #[builder(default)]
    #[serde(default)]
    #[getset(get = "pub")]
    options: ScanOptions,
}
