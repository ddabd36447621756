//! Page range parsing
//!
//! Ranges use the familiar print-dialog syntax: `"1-3, 5, 8-10"`.
//! Page numbers are 1-based.

use std::collections::BTreeSet;

use crate::error::PdfError;

/// Parse a page range string into sorted unique page numbers.
///
/// Every group is checked against `page_count` before it is expanded.
pub fn parse_ranges(input: &str, page_count: u32) -> Result<Vec<u32>, PdfError> {
    let groups = parse_range_groups(input)?;
    validate_groups(&groups, page_count)?;

    let mut pages = BTreeSet::new();
    for (start, end) in groups {
        pages.extend(start..=end);
    }

    Ok(pages.into_iter().collect())
}

/// Parse a page range string keeping each comma-separated group as an
/// inclusive `(start, end)` pair, in input order
pub fn parse_range_groups(input: &str) -> Result<Vec<(u32, u32)>, PdfError> {
    let mut groups = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let group = if let Some((start, end)) = part.split_once('-') {
            let start = parse_page(start, "start")?;
            let end = parse_page(end, "end")?;

            if start > end {
                return Err(PdfError::InvalidRange(format!(
                    "Start {} > end {}",
                    start, end
                )));
            }
            (start, end)
        } else {
            let page = parse_page(part, "page")?;
            (page, page)
        };

        groups.push(group);
    }

    if groups.is_empty() {
        return Err(PdfError::InvalidRange("No pages specified".into()));
    }

    Ok(groups)
}

fn parse_page(token: &str, what: &str) -> Result<u32, PdfError> {
    let token = token.trim();
    let page: u32 = token
        .parse()
        .map_err(|_| PdfError::InvalidRange(format!("Invalid {}: {}", what, token)))?;

    if page == 0 {
        return Err(PdfError::InvalidRange(
            "Page numbers must be >= 1".into(),
        ));
    }

    Ok(page)
}

/// Ensure every page exists in a document with `page_count` pages
pub fn validate_pages(pages: &[u32], page_count: u32) -> Result<(), PdfError> {
    if pages.is_empty() {
        return Err(PdfError::InvalidRange("No pages specified".into()));
    }

    for &page in pages {
        if page == 0 || page > page_count {
            return Err(PdfError::InvalidRange(format!(
                "Page {} does not exist (document has {} pages)",
                page, page_count
            )));
        }
    }

    Ok(())
}

/// Ensure every `(start, end)` group lies within `1..=page_count`
pub fn validate_groups(groups: &[(u32, u32)], page_count: u32) -> Result<(), PdfError> {
    if groups.is_empty() {
        return Err(PdfError::InvalidRange("No pages specified".into()));
    }

    for &(start, end) in groups {
        if start == 0 || start > end {
            return Err(PdfError::InvalidRange(format!(
                "Invalid range {}-{}",
                start, end
            )));
        }
        if end > page_count {
            return Err(PdfError::InvalidRange(format!(
                "Page {} does not exist (document has {} pages)",
                end, page_count
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ranges_single() {
        assert_eq!(parse_ranges("5", 10).unwrap(), vec![5]);
    }

    #[test]
    fn test_parse_ranges_range() {
        assert_eq!(parse_ranges("1-3", 10).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_parse_ranges_complex() {
        let result = parse_ranges("1-3, 5, 8-10", 10).unwrap();
        assert_eq!(result, vec![1, 2, 3, 5, 8, 9, 10]);
    }

    #[test]
    fn test_parse_ranges_deduplicates() {
        assert_eq!(parse_ranges("1-3, 2-4", 10).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_parse_ranges_skips_empty_segments() {
        assert_eq!(parse_ranges("1,,3,", 10).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_parse_ranges_rejects_reversed() {
        assert!(matches!(
            parse_ranges("5-2", 10),
            Err(PdfError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_parse_ranges_rejects_zero() {
        assert!(parse_ranges("0-2", 10).is_err());
    }

    #[test]
    fn test_parse_ranges_rejects_garbage() {
        assert!(parse_ranges("one-two", 10).is_err());
        assert!(parse_ranges("", 10).is_err());
    }

    #[test]
    fn test_parse_ranges_rejects_pages_past_the_end() {
        assert!(matches!(
            parse_ranges("2-4", 3),
            Err(PdfError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_huge_range_is_rejected_without_expanding() {
        let started = std::time::Instant::now();
        let result = parse_ranges("1-4000000000", 12);

        assert!(matches!(result, Err(PdfError::InvalidRange(_))));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_validate_groups() {
        assert!(validate_groups(&[(1, 3), (5, 5)], 5).is_ok());
        assert!(validate_groups(&[(1, 6)], 5).is_err());
        assert!(validate_groups(&[(0, 1)], 5).is_err());
        assert!(validate_groups(&[(3, 2)], 5).is_err());
        assert!(validate_groups(&[], 5).is_err());
    }

    #[test]
    fn test_range_groups_keep_input_order() {
        let groups = parse_range_groups("8-10, 1-2, 5").unwrap();
        assert_eq!(groups, vec![(8, 10), (1, 2), (5, 5)]);
    }

    #[test]
    fn test_validate_pages() {
        assert!(validate_pages(&[1, 2, 3], 3).is_ok());
        assert!(validate_pages(&[4], 3).is_err());
        assert!(validate_pages(&[], 3).is_err());
    }
}
