//! Paging of REST search results.
//!
//! The SQL layer pages with plain LIMIT/OFFSET; this type owns the argument
//! parsing and the next/previous page arithmetic so handlers and link
//! builders agree on the numbers.

use std::fmt;

/// Page size used when `_count` is absent; also the upper bound any
/// request may ask for.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Query parameter names understood by the paging layer.
pub mod keys {
    /// Requested page size.
    pub const COUNT: &str = "_count";
    /// Result offset of the requested page.
    pub const OFFSET: &str = "__offset";
}

/// Rejections of malformed paging arguments; all map to a 400 at the
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PagingError {
    /// The value contains non-numeric trailing characters.
    #[error("trailing characters are not permitted in a numerical argument: {0}")]
    TrailingCharacters(&'static str),
    /// The value is negative.
    #[error("{0} can not be negative")]
    Negative(&'static str),
    /// Zero was given where it is not supported.
    #[error("{0} zero is not supported")]
    Zero(&'static str),
    /// The value is not a number at all.
    #[error("invalid numeric format in {0}")]
    NotANumber(&'static str),
}

/// Parsed `_count`/`__offset` pair with page arithmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingArgument {
    count: usize,
    offset: usize,
    total_search_matches: usize,
}

impl Default for PagingArgument {
    fn default() -> Self {
        Self {
            count: DEFAULT_PAGE_SIZE,
            offset: 0,
            total_search_matches: 0,
        }
    }
}

impl PagingArgument {
    /// Set the page size from its query-string value.
    ///
    /// Zero is rejected; values above [`DEFAULT_PAGE_SIZE`] are clamped.
    pub fn set_count(&mut self, value: &str) -> Result<(), PagingError> {
        let count = parse_number(value, keys::COUNT, false)?;
        self.count = count.min(DEFAULT_PAGE_SIZE);
        Ok(())
    }

    /// Set the offset from its query-string value; zero is permitted.
    pub fn set_offset(&mut self, value: &str) -> Result<(), PagingError> {
        self.offset = parse_number(value, keys::OFFSET, true)?;
        Ok(())
    }

    /// Record the total number of search matches reported by the handler.
    pub fn set_total_search_matches(&mut self, total: usize) {
        self.total_search_matches = total;
    }

    /// The effective page size.
    pub fn count(&self) -> usize {
        self.count
    }

    /// The effective offset.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether the request still uses the default page size.
    pub fn has_default_count(&self) -> bool {
        self.count == DEFAULT_PAGE_SIZE
    }

    /// Whether either argument deviates from its default.
    pub fn is_set(&self) -> bool {
        self.count != DEFAULT_PAGE_SIZE || self.offset > 0
    }

    /// There is a previous page exactly when the offset is non-zero.
    pub fn has_previous_page(&self) -> bool {
        self.offset > 0
    }

    /// There is a next page when matches extend beyond the current page.
    pub fn has_next_page(&self, total_search_matches: usize) -> bool {
        total_search_matches > self.offset + self.count
    }

    /// Offset carried by the `next` link.
    pub fn next_page_offset(&self) -> usize {
        self.offset + self.count
    }

    /// Offset of the last page, derived from the recorded total.
    pub fn offset_of_last_page(&self) -> usize {
        let full_pages = self.total_search_matches / self.count;
        let offset = full_pages * self.count;
        if offset == self.total_search_matches && offset >= self.count {
            offset - self.count
        } else {
            offset
        }
    }
}

impl fmt::Display for PagingArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_count={}&__offset={}", self.count, self.offset)
    }
}

fn parse_number(value: &str, field: &'static str, zero_allowed: bool) -> Result<usize, PagingError> {
    let trimmed = value.trim();
    if trimmed.starts_with('-') {
        return Err(PagingError::Negative(field));
    }
    if trimmed.is_empty() || !trimmed.bytes().next().is_some_and(|b| b.is_ascii_digit()) {
        return Err(PagingError::NotANumber(field));
    }
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PagingError::TrailingCharacters(field));
    }
    let number: usize = trimmed
        .parse()
        .map_err(|_| PagingError::NotANumber(field))?;
    if number == 0 && !zero_allowed {
        return Err(PagingError::Zero(field));
    }
    Ok(number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let paging = PagingArgument::default();
        assert_eq!(paging.count(), 50);
        assert_eq!(paging.offset(), 0);
        assert!(paging.has_default_count());
        assert!(!paging.is_set());
        assert!(!paging.has_previous_page());
    }

    #[test]
    fn exact_page_has_no_next_link() {
        let mut paging = PagingArgument::default();
        paging.set_count("50").unwrap();
        assert!(!paging.has_next_page(50));
    }

    #[test]
    fn one_extra_match_yields_next_link_at_50() {
        let mut paging = PagingArgument::default();
        paging.set_count("50").unwrap();
        assert!(paging.has_next_page(51));
        assert_eq!(paging.next_page_offset(), 50);
    }

    #[test]
    fn count_is_clamped_to_maximum() {
        let mut paging = PagingArgument::default();
        paging.set_count("500").unwrap();
        assert_eq!(paging.count(), 50);
    }

    #[test]
    fn count_zero_rejected_offset_zero_allowed() {
        let mut paging = PagingArgument::default();
        assert_eq!(paging.set_count("0"), Err(PagingError::Zero("_count")));
        assert_eq!(paging.set_offset("0"), Ok(()));
    }

    #[test]
    fn trailing_characters_rejected() {
        let mut paging = PagingArgument::default();
        assert_eq!(
            paging.set_count("25x"),
            Err(PagingError::TrailingCharacters("_count"))
        );
        assert_eq!(
            paging.set_offset("1 2"),
            Err(PagingError::TrailingCharacters("__offset"))
        );
    }

    #[test]
    fn negative_and_garbage_rejected() {
        let mut paging = PagingArgument::default();
        assert_eq!(paging.set_count("-1"), Err(PagingError::Negative("_count")));
        assert_eq!(
            paging.set_offset("abc"),
            Err(PagingError::NotANumber("__offset"))
        );
    }

    #[test]
    fn previous_page_follows_offset() {
        let mut paging = PagingArgument::default();
        paging.set_offset("50").unwrap();
        assert!(paging.has_previous_page());
        assert!(paging.is_set());
    }

    #[test]
    fn offset_of_last_page_for_partial_tail() {
        let mut paging = PagingArgument::default();
        paging.set_count("10").unwrap();
        paging.set_total_search_matches(25);
        assert_eq!(paging.offset_of_last_page(), 20);
    }

    #[test]
    fn offset_of_last_page_for_exact_multiple() {
        let mut paging = PagingArgument::default();
        paging.set_count("10").unwrap();
        paging.set_total_search_matches(30);
        assert_eq!(paging.offset_of_last_page(), 20);
    }
}
