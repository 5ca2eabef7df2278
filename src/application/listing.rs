//! Cached list endpoints and the upstream paths they map to.

use serde::Deserialize;

use crate::cache::UpstreamPath;
use crate::domain::error::DomainError;
use crate::domain::pagination::{DEFAULT_LIMIT, DEFAULT_PAGE, PageRequest};
use crate::domain::text::SafeText;

use super::proxy::ProxyRequest;

const DEFAULT_ORDER: &str = "desc";
const INVALID_INTEGER: &str = "Input should be a valid integer";

/// Registry collections mirrored through the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Requests,
    News,
    Phones,
    RescuePoints,
}

impl Listing {
    pub const ALL: [Listing; 4] = [
        Listing::Requests,
        Listing::News,
        Listing::Phones,
        Listing::RescuePoints,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Listing::Requests => "/api/requests",
            Listing::News => "/api/news",
            Listing::Phones => "/api/phones",
            Listing::RescuePoints => "/api/rescue_points",
        }
    }

    pub fn default_sort(&self) -> &'static str {
        match self {
            Listing::Requests => "default",
            Listing::News => "timestamp",
            Listing::Phones | Listing::RescuePoints => "_id",
        }
    }

    /// Optional filters forwarded upstream, in query order.
    fn filters(&self) -> &'static [&'static str] {
        match self {
            Listing::Requests => &["status", "search", "region"],
            Listing::News | Listing::Phones | Listing::RescuePoints => &["search"],
        }
    }

    /// Validate caller parameters and build the cached read for this listing.
    ///
    /// Filters the listing does not support are ignored.
    pub fn request(&self, params: ListingParams) -> Result<ProxyRequest, DomainError> {
        let page = PageRequest::new(
            parse_number("page", params.page.as_deref(), DEFAULT_PAGE)?,
            parse_number("limit", params.limit.as_deref(), DEFAULT_LIMIT)?,
        )?;
        let sort_by = SafeText::parse(
            "sort_by",
            params.sort_by.unwrap_or_else(|| self.default_sort().to_string()),
        )?;
        let order = SafeText::parse(
            "order",
            params.order.unwrap_or_else(|| DEFAULT_ORDER.to_string()),
        )?;

        let mut path = UpstreamPath::new(self.path())
            .param("page", page.page())
            .param("limit", page.limit())
            .param("sort_by", sort_by)
            .param("order", order);

        for &name in self.filters() {
            let value = match name {
                "status" => params.status.as_ref(),
                "search" => params.search.as_ref(),
                "region" => params.region.as_ref(),
                _ => None,
            };
            let value = value
                .map(|value| SafeText::parse(name, value.as_str()))
                .transpose()?;
            path = path.optional_param(name, value);
        }

        Ok(ProxyRequest::get(path.render()).with_page(page))
    }
}

/// Query parameters as received, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub status: Option<String>,
    pub search: Option<String>,
    pub region: Option<String>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
}

fn parse_number(field: &'static str, raw: Option<&str>, default: u32) -> Result<u32, DomainError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .ok()
            // Negative values fall through to the range check.
            .and_then(|value| u32::try_from(value.max(0)).ok())
            .ok_or_else(|| DomainError::validation(field, INVALID_INTEGER)),
    }
}
