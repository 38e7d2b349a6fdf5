//! Paged listing of mock definitions.

use crate::error::{MockError, Result};
use crate::model::MockDefinition;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Field a page is sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Id,
    Path,
    Method,
    Version,
    Priority,
    StatusCode,
    DelayMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub direction: SortDirection,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: 20,
            sort_by: SortField::Id,
            direction: SortDirection::Asc,
        }
    }
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self {
            page,
            size,
            ..Self::default()
        }
    }

    pub fn sorted(mut self, sort_by: SortField, direction: SortDirection) -> Self {
        self.sort_by = sort_by;
        self.direction = direction;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(MockError::validation("page size must be positive"));
        }
        Ok(())
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total_elements: usize,
    pub total_pages: usize,
    pub first: bool,
    pub last: bool,
    pub number_of_elements: usize,
}

/// Optional filters for listing; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockFilter {
    /// Substring of the normalized path
    #[serde(default)]
    pub path: Option<String>,
    /// Exact method, case-insensitive
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl MockFilter {
    pub fn matches(&self, mock: &MockDefinition) -> bool {
        if let Some(path) = &self.path {
            if !mock.path.contains(path.as_str()) {
                return false;
            }
        }
        if let Some(method) = &self.method {
            if !mock.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        if let Some(active) = self.active {
            if mock.active != active {
                return false;
            }
        }
        true
    }
}

/// Whether `term` occurs in the path, method or response body.
pub fn matches_search(mock: &MockDefinition, term: &str) -> bool {
    term.is_empty()
        || mock.path.contains(term)
        || mock.method.contains(term)
        || mock.response_body.contains(term)
}

fn compare(a: &MockDefinition, b: &MockDefinition, field: SortField) -> Ordering {
    let primary = match field {
        SortField::Id => a.id.cmp(&b.id),
        SortField::Path => a.path.cmp(&b.path),
        SortField::Method => a.method.cmp(&b.method),
        SortField::Version => a.version.cmp(&b.version),
        SortField::Priority => a.priority.cmp(&b.priority),
        SortField::StatusCode => a.status_code.cmp(&b.status_code),
        SortField::DelayMs => a.delay_ms.cmp(&b.delay_ms),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

/// Sort `items` per the request and cut out the requested page.
pub fn paginate(
    mut items: Vec<MockDefinition>,
    request: PageRequest,
) -> Result<Page<MockDefinition>> {
    request.validate()?;

    items.sort_by(|a, b| {
        let ord = compare(a, b, request.sort_by);
        match request.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });

    let total_elements = items.len();
    let total_pages = total_elements.div_ceil(request.size);
    let content: Vec<_> = items
        .into_iter()
        .skip(request.page.saturating_mul(request.size))
        .take(request.size)
        .collect();

    Ok(Page {
        number_of_elements: content.len(),
        content,
        page: request.page,
        size: request.size,
        total_elements,
        total_pages,
        first: request.page == 0,
        last: request.page.saturating_add(1) >= total_pages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MockDraft, MockId, OwnerId};

    fn mock(id: u64, path: &str, priority: i32) -> MockDefinition {
        MockDraft::new(path, "GET", r#"{"ok":true}"#)
            .with_priority(priority)
            .into_new_mock(OwnerId(1))
            .unwrap()
            .into_definition(MockId(id), 1)
    }

    #[test]
    fn test_paginate_slices_and_reports_totals() {
        let items: Vec<_> = (1..=5).map(|i| mock(i, "/x", 0)).collect();

        let page = paginate(items.clone(), PageRequest::new(0, 2)).unwrap();
        assert_eq!(page.content.len(), 2);
        assert_eq!(page.total_elements, 5);
        assert_eq!(page.total_pages, 3);
        assert!(page.first);
        assert!(!page.last);

        let page = paginate(items, PageRequest::new(2, 2)).unwrap();
        assert_eq!(page.number_of_elements, 1);
        assert_eq!(page.content[0].id, MockId(5));
        assert!(page.last);
    }

    #[test]
    fn test_paginate_sorting() {
        let items = vec![mock(1, "/b", 5), mock(2, "/a", 10), mock(3, "/c", 1)];

        let page = paginate(
            items.clone(),
            PageRequest::new(0, 10).sorted(SortField::Priority, SortDirection::Desc),
        )
        .unwrap();
        let ids: Vec<_> = page.content.iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![2, 1, 3]);

        let page = paginate(
            items,
            PageRequest::new(0, 10).sorted(SortField::Path, SortDirection::Asc),
        )
        .unwrap();
        assert_eq!(page.content[0].path, "/a");
    }

    #[test]
    fn test_paginate_page_past_the_end() {
        let page = paginate(vec![], PageRequest::new(usize::MAX, 10)).unwrap();
        assert!(page.content.is_empty());
        assert!(page.last);
        assert!(!page.first);

        let items: Vec<_> = (1..=3).map(|i| mock(i, "/x", 0)).collect();
        let page = paginate(items, PageRequest::new(usize::MAX, usize::MAX)).unwrap();
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.number_of_elements, 0);
        assert!(page.last);
    }

    #[test]
    fn test_paginate_rejects_zero_size() {
        assert!(paginate(vec![], PageRequest::new(0, 0)).is_err());
    }

    #[test]
    fn test_filter_and_search() {
        let m = mock(1, "/api/users", 0);

        assert!(MockFilter::default().matches(&m));
        assert!(MockFilter {
            path: Some("users".to_string()),
            method: Some("get".to_string()),
            active: Some(true),
        }
        .matches(&m));
        assert!(!MockFilter {
            active: Some(false),
            ..MockFilter::default()
        }
        .matches(&m));

        assert!(matches_search(&m, "api"));
        assert!(matches_search(&m, "ok"));
        assert!(!matches_search(&m, "orders"));
    }
}
