use serde::{Deserialize, Serialize};

use crate::constants::{MAX_PAGE, MAX_PAGE_SIZE};

use super::{error::Error, form::Form};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PageContext<T> {
    pub count: i64,
    pub next: Option<i64>,
    pub previous: Option<i64>,
    pub results: Vec<T>,
}

impl<T> PageContext<T> {
    pub fn from_rows(results: Vec<T>, count: i64, request: &PageRequest) -> Self {
        let next = if request.offset().saturating_add(request.limit) < count {
            Some(request.page + 1)
        } else {
            None
        };
        let previous = if request.page > 1 {
            Some(request.page - 1)
        } else {
            None
        };

        Self {
            count,
            next,
            previous,
            results,
        }
    }
}

/// 1-based page number and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    pub fn new(page: i64, limit: i64) -> Self {
        Self {
            page: page.clamp(1, MAX_PAGE),
            limit: limit.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn from_form(form: &Form, default_limit: i64) -> Result<Self, Error> {
        let page = form.get_number("page")?.unwrap_or(1);
        let limit = form.get_number("limit")?.unwrap_or(default_limit);

        Ok(Self::new(page, limit))
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn middle_page_links_both_ways() {
        let page = PageContext::from_rows(vec![4, 5, 6], 10, &PageRequest::new(2, 3));
        assert_eq!(page.next, Some(3));
        assert_eq!(page.previous, Some(1));
        assert_eq!(page.count, 10);
    }

    #[test]
    fn last_page_has_no_next() {
        let page = PageContext::from_rows(vec![10], 10, &PageRequest::new(4, 3));
        assert_eq!(page.next, None);
        assert_eq!(page.previous, Some(3));
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(PageRequest::new(0, 0), PageRequest { page: 1, limit: 1 });
        assert_eq!(PageRequest::new(1, 1000).limit, MAX_PAGE_SIZE);
        assert_eq!(PageRequest::new(3, 6).offset(), 12);
    }

    #[test]
    fn huge_page_numbers_do_not_overflow() {
        let request = PageRequest::new(i64::MAX, MAX_PAGE_SIZE);
        assert_eq!(request.page, MAX_PAGE);
        assert!(request.offset() >= 0);

        let page = PageContext::from_rows(Vec::<i64>::new(), 3, &request);
        assert_eq!(page.next, None);
        assert_eq!(page.previous, Some(MAX_PAGE - 1));
    }

    #[test]
    fn page_past_the_end_keeps_count_and_previous() {
        let page = PageContext::from_rows(Vec::<i64>::new(), 3, &PageRequest::new(5, 2));
        assert_eq!(page.count, 3);
        assert_eq!(page.next, None);
        assert_eq!(page.previous, Some(4));
    }

    #[test]
    fn form_defaults_apply() {
        let form = Form::from_query("page=2").unwrap();
        assert_eq!(
            PageRequest::from_form(&form, 6).unwrap(),
            PageRequest { page: 2, limit: 6 }
        );
    }
}
