use serde::Serialize;
use utoipa::ToSchema;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: u32,
    pub page_size: u32,
}

impl PageParams {
    /// Page is 1-based; out-of-range values are clamped rather than rejected.
    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let page_size = page_size
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);
        Self { page, page_size }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }
}

impl Default for PageParams {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PageMeta {
    pub page: u32,
    pub page_size: u32,
    pub total_items: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, params: PageParams, total_items: i64) -> Self {
        let size = i64::from(params.page_size);
        let total_pages = if total_items == 0 { 0 } else { (total_items + size - 1) / size };
        let page = i64::from(params.page);

        Self {
            items,
            meta: PageMeta {
                page: params.page,
                page_size: params.page_size,
                total_items,
                total_pages,
                has_next: page < total_pages,
                has_prev: page > 1,
            },
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            meta: self.meta,
        }
    }
}
