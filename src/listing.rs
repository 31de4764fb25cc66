//! Query-string parsing and pagination shared by the list pages.

use serde::Serialize;
use url::form_urlencoded;

use crate::error::{AppError, AppResult};

pub const PAGE_PARAM: &str = "page";

/// Raw query-string pairs of a list request, split into the parameters the
/// list understands and everything that must survive pagination.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pairs: Vec<(String, String)>,
}

impl ListParams {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Trimmed, non-empty value of a text parameter.
    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    }

    /// A boolean filter is active only when explicitly set to `1`.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).map(str::trim) == Some("1")
    }

    pub fn page(&self) -> Option<&str> {
        self.get(PAGE_PARAM)
    }

    /// Every parameter except `page`, re-encoded for pagination links.
    pub fn preserved_query(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, value) in &self.pairs {
            if name != PAGE_PARAM {
                serializer.append_pair(name, value);
            }
        }
        serializer.finish()
    }
}

/// Filters common to the incoming and outgoing registers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub query: Option<String>,
    pub urgent: bool,
    pub confidential: bool,
}

impl RecordFilter {
    pub fn from_params(params: &ListParams) -> Self {
        Self {
            query: params.text("q"),
            urgent: params.flag("urgent"),
            confidential: params.flag("conf"),
        }
    }

    pub fn like_pattern(&self) -> Option<String> {
        self.query.as_deref().map(contains_pattern)
    }
}

/// `ILIKE` pattern matching `needle` anywhere, with wildcards escaped.
pub fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    pub number: i64,
    pub num_pages: i64,
    pub count: i64,
    pub per_page: i64,
}

impl Paginator {
    /// Resolves the requested page. An empty result still has page 1; any
    /// other page outside `1..=num_pages`, or a non-numeric page, is a 404.
    pub fn resolve(count: i64, per_page: i64, requested: Option<&str>) -> AppResult<Self> {
        let per_page = per_page.max(1);
        let num_pages = if count == 0 {
            1
        } else {
            (count + per_page - 1) / per_page
        };

        let number = match requested.map(str::trim).filter(|raw| !raw.is_empty()) {
            None => 1,
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| AppError::not_found())?,
        };

        if number < 1 || number > num_pages {
            return Err(AppError::not_found());
        }

        Ok(Self {
            number,
            num_pages,
            count,
            per_page,
        })
    }

    pub fn offset(&self) -> i64 {
        (self.number - 1) * self.per_page
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }

    pub fn info(&self, params: &ListParams) -> PageInfo {
        let query_params = params.preserved_query();
        let link = |page: i64| {
            if query_params.is_empty() {
                format!("?{PAGE_PARAM}={page}")
            } else {
                format!("?{query_params}&{PAGE_PARAM}={page}")
            }
        };

        let has_next = self.number < self.num_pages;
        let has_previous = self.number > 1;
        PageInfo {
            number: self.number,
            num_pages: self.num_pages,
            count: self.count,
            per_page: self.per_page,
            has_next,
            has_previous,
            next_url: has_next.then(|| link(self.number + 1)),
            previous_url: has_previous.then(|| link(self.number - 1)),
            query_params,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PageInfo {
    pub number: i64,
    pub num_pages: i64,
    pub count: i64,
    pub per_page: i64,
    pub has_next: bool,
    pub has_previous: bool,
    pub next_url: Option<String>,
    pub previous_url: Option<String>,
    pub query_params: String,
}
