//! Paged, filtered views over per-host results of a job.

use std::{cmp::Ordering as CmpOrdering, str::FromStr};

use getset::CopyGetters;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use typed_builder::TypedBuilder;

use crate::{Error, HostStatus, InspectGroup, InspectResult, SourceId};

/// The default number of rows per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Fields results may be ordered by.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, EnumString, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderField {
    /// Host name.
    Name,

    /// Host status.
    Status,
}

/// An ordering over results, written `name`, `-name`, `status` or `-status`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Ordering {
    /// The field to order by.
    pub field: OrderField,

    /// Whether the order is reversed.
    pub descending: bool,
}

impl FromStr for Ordering {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (descending, field) = match s.strip_prefix('-') {
            Some(field) => (true, field),
            None => (false, s),
        };
        let field = OrderField::from_str(field).map_err(|_| Error::Validation {
            entity: "query",
            field: "ordering",
            reason: format!("cannot order by '{s}'"),
        })?;
        Ok(Self { field, descending })
    }
}

impl Ordering {
    pub(crate) fn compare(&self, a: (&str, HostStatus), b: (&str, HostStatus)) -> CmpOrdering {
        let ordering = match self.field {
            OrderField::Name => a.0.cmp(b.0).then(a.1.cmp(&b.1)),
            OrderField::Status => a.1.cmp(&b.1).then(a.0.cmp(b.0)),
        };
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// Filters, ordering, and paging for result queries.
#[derive(Clone, Eq, PartialEq, Debug, TypedBuilder, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct ResultQuery {
    /// Only results with this status.
    #[builder(default, setter(strip_option))]
    status: Option<HostStatus>,

    /// Only results from this source.
    #[builder(default, setter(strip_option))]
    source: Option<SourceId>,

    /// Result order; insertion order when unset.
    #[builder(default, setter(strip_option))]
    ordering: Option<Ordering>,

    /// Page to return, starting at 1.
    #[builder(default = 1)]
    page: usize,

    /// Rows per page.
    #[builder(default = DEFAULT_PAGE_SIZE)]
    page_size: usize,
}

impl Default for ResultQuery {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// One page of query results.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Page<T> {
    /// Total rows matching the query, across all pages.
    pub count: usize,

    /// This page's number.
    pub page: usize,

    /// Whether a following page exists.
    pub has_next: bool,

    /// Rows on this page.
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub(crate) fn paginate(rows: Vec<T>, query: &ResultQuery) -> Result<Self, Error> {
        if query.page == 0 || query.page_size == 0 {
            return Err(Error::Validation {
                entity: "query",
                field: "page",
                reason: String::from("page and page_size start at 1"),
            });
        }
        let count = rows.len();
        let skip = (query.page - 1).saturating_mul(query.page_size);
        let results = rows.into_iter().skip(skip).take(query.page_size).collect::<Vec<_>>();
        Ok(Self {
            count,
            page: query.page,
            has_next: skip.saturating_add(results.len()) < count,
            results,
        })
    }
}

/// An inspection result joined with the group it belongs to.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct InspectionEntry {
    /// The group the result belongs to.
    pub group: InspectGroup,

    /// The result.
    pub result: InspectResult,
}
