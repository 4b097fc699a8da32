//! Read-side order queries: filtered search and per-member statistics.

use chrono::{DateTime, Months, NaiveDate, TimeZone, Utc};
use common::{MemberId, Money};
use serde::Serialize;

use super::{OrderError, OrderStatus};

/// Page size used when a query does not name one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page a query may ask for.
pub const MAX_PAGE_SIZE: u32 = 100;

/// How far a search window reaches when only one end, or neither, is given.
const DEFAULT_WINDOW: Months = Months::new(6);

/// One page of results plus the number of matches across all pages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        Self {
            items,
            page: request.page,
            size: request.size,
            total,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total: self.total,
        }
    }
}

/// A zero-based page number and a page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    /// Fills in the default size and clamps it to `1..=MAX_PAGE_SIZE`.
    pub fn new(page: Option<u32>, size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(0),
            size: size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Search criteria as a caller states them.
///
/// `year` wins over `from`/`to`. A missing end is six months from the
/// other; with neither the window is the six months up to now.
#[derive(Debug, Clone, Default)]
pub struct OrderSearch {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub year: Option<i32>,
    pub status: Option<OrderStatus>,
    pub min_amount: Option<Money>,
    pub page: PageRequest,
}

impl OrderSearch {
    /// Pins the criteria to a concrete half-open window `[from, to)`.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<OrderFilter, OrderError> {
        let (from, to) = match self.year {
            Some(year) => (start_of_year(year)?, start_of_year(year.saturating_add(1))?),
            None => match (self.from, self.to) {
                (Some(from), Some(to)) => (from, to),
                (Some(from), None) => (from, shift(from, true)?),
                (None, Some(to)) => (shift(to, false)?, to),
                (None, None) => (shift(now, false)?, now),
            },
        };

        if from >= to {
            return Err(OrderError::InvalidSearch(
                "start of the period must be before its end".into(),
            ));
        }

        Ok(OrderFilter {
            from,
            to,
            status: self.status,
            min_amount: self.min_amount.unwrap_or_else(Money::zero),
            page: self.page,
        })
    }
}

/// Resolved search criteria a store evaluates.
///
/// Orders match when `from <= ordered_at < to`, the status matches if one
/// is given and `total_amount >= min_amount`. Results are newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFilter {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub status: Option<OrderStatus>,
    pub min_amount: Money,
    pub page: PageRequest,
}

/// Order totals for one member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberOrderStats {
    pub member_id: MemberId,
    pub email: String,
    pub order_count: u64,
    pub total_amount: Money,
    pub average_amount: f64,
    pub last_ordered_at: DateTime<Utc>,
}

/// Which members to report: those whose orders add up to at least
/// `min_amount`, biggest spenders first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsFilter {
    pub min_amount: Money,
    pub page: PageRequest,
}

impl StatsFilter {
    pub fn new(min_amount: Option<Money>, page: PageRequest) -> Self {
        Self {
            min_amount: min_amount.unwrap_or_else(Money::zero),
            page,
        }
    }
}

fn start_of_year(year: i32) -> Result<DateTime<Utc>, OrderError> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| OrderError::InvalidSearch(format!("year {year} is out of range")))
}

fn shift(at: DateTime<Utc>, forward: bool) -> Result<DateTime<Utc>, OrderError> {
    let shifted = if forward {
        at.checked_add_months(DEFAULT_WINDOW)
    } else {
        at.checked_sub_months(DEFAULT_WINDOW)
    };
    shifted.ok_or_else(|| OrderError::InvalidSearch("period is out of range".into()))
}
