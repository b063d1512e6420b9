//! Page/offset bookkeeping shared by list-producing operations.
//!
//! Performs no I/O. The only state is the current page number, which callers
//! own and persist.

use serde::{Deserialize, Serialize};

/// Offset/limit window for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    pub offset: u32,
    pub limit: u32,
}

/// Current page cursor with a fixed page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginator {
    page_size: u32,
    current_page: u32,
}

impl Paginator {
    /// Creates a cursor on page 1. A zero page size is treated as 1.
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            current_page: 1,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    /// Moves to `page_number` clamped into `[1, total_pages(total_count)]`.
    pub fn go_to(&mut self, page_number: u32, total_count: u64) -> u32 {
        self.current_page = clamp_page(page_number, total_count, self.page_size);
        self.current_page
    }

    pub fn window(&self) -> PageWindow {
        page(self.current_page, self.page_size)
    }
}

/// Offset/limit for a 1-based page number. Page 0 is read as page 1.
pub fn page(page_number: u32, page_size: u32) -> PageWindow {
    let page_size = page_size.max(1);
    let index = page_number.max(1) - 1;
    PageWindow {
        offset: index.saturating_mul(page_size),
        limit: page_size,
    }
}

/// `ceil(total_count / page_size)`, never less than 1.
pub fn total_pages(total_count: u64, page_size: u32) -> u32 {
    let page_size = u64::from(page_size.max(1));
    let pages = total_count.div_ceil(page_size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// Clamps a requested page number into `[1, total_pages]`.
pub fn clamp_page(page_number: u32, total_count: u64, page_size: u32) -> u32 {
    page_number.clamp(1, total_pages(total_count, page_size))
}

#[cfg(test)]
mod tests {
    use super::{clamp_page, page, total_pages, PageWindow, Paginator};

    #[test]
    fn total_pages_rounds_up_and_is_at_least_one() {
        assert_eq!(total_pages(95, 10), 10);
        assert_eq!(total_pages(100, 10), 10);
        assert_eq!(total_pages(101, 10), 11);
        assert_eq!(total_pages(0, 10), 1);
    }

    #[test]
    fn page_window_is_one_based() {
        assert_eq!(page(1, 10), PageWindow { offset: 0, limit: 10 });
        assert_eq!(page(3, 10), PageWindow { offset: 20, limit: 10 });
        assert_eq!(page(0, 10), PageWindow { offset: 0, limit: 10 });
    }

    #[test]
    fn clamp_page_bounds_both_ends() {
        assert_eq!(clamp_page(0, 95, 10), 1);
        assert_eq!(clamp_page(42, 95, 10), 10);
        assert_eq!(clamp_page(4, 0, 10), 1);
    }

    #[test]
    fn paginator_tracks_clamped_current_page() {
        let mut paginator = Paginator::new(10);
        assert_eq!(paginator.go_to(12, 35), 4);
        assert_eq!(paginator.window(), PageWindow { offset: 30, limit: 10 });
    }
}
