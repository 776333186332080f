//! Numeric range extraction
//!
//! Regex-driven recognition of age, income and percentage expressions in the
//! raw query text: `25-34`, `25 to 34`, `over 100k`, `under $50,000`,
//! `age 18+`, `65 and older`, `top 10%`.
//!
//! Runs against the lowercased raw text (before punctuation stripping) so
//! `$`, `%` and `+` markers survive to act as field hints.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which record field a range most plausibly constrains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldHint {
    Age,
    Income,
    Percent,
    Unknown,
}

/// A structured numeric constraint extracted from the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub hint: FieldHint,
    pub low: Option<f64>,
    pub high: Option<f64>,
}

static RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$?(\d[\d,]*)(k)?\s*(?:-|–|\bto\b)\s*\$?(\d[\d,]*)(k)?")
        .expect("static range pattern")
});

static OVER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:over|above|more than|at least|exceeding)\s+\$?(\d[\d,]*)(k)?")
        .expect("static over pattern")
});

static UNDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:under|below|less than|at most)\s+\$?(\d[\d,]*)(k)?")
        .expect("static under pattern")
});

static PLUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d[\d,]*)(k)?\s*\+|\b(\d[\d,]*)(k)?\s+and\s+(?:older|over|up|above)")
        .expect("static plus pattern")
});

static PERCENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\btop\s+(\d{1,2})\s*(?:%|percent)|\b(\d{1,3})\s*(?:%|percent)")
        .expect("static percent pattern")
});

/// Extract numeric ranges from the lowercased raw query.
pub fn extract(text: &str) -> Vec<NumericRange> {
    let mut ranges = Vec::new();
    // Spans already claimed by an earlier pattern; later patterns skip them
    // so "25-34" does not also produce a bare "34" percent-style match.
    let mut claimed: Vec<(usize, usize)> = Vec::new();

    for caps in PERCENT.captures_iter(text) {
        let m = caps.get(0).map(|m| (m.start(), m.end()));
        let value = caps
            .get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| parse_number(m.as_str(), false));
        if let (Some(span), Some(value)) = (m, value) {
            claimed.push(span);
            ranges.push(NumericRange {
                hint: FieldHint::Percent,
                low: None,
                high: Some(value),
            });
        }
    }

    for caps in RANGE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let span = (whole.start(), whole.end());
        if overlaps(&claimed, span) {
            continue;
        }
        let low = caps.get(1).and_then(|m| parse_number(m.as_str(), caps.get(2).is_some()));
        let high = caps.get(3).and_then(|m| parse_number(m.as_str(), caps.get(4).is_some()));
        if let (Some(low), Some(high)) = (low, high) {
            if low <= high {
                claimed.push(span);
                let monetary = whole.as_str().contains('$') || caps.get(2).is_some() || caps.get(4).is_some();
                ranges.push(NumericRange {
                    hint: infer_hint(text, span, monetary, Some(low), Some(high)),
                    low: Some(low),
                    high: Some(high),
                });
            }
        }
    }

    for caps in OVER.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let span = (whole.start(), whole.end());
        if overlaps(&claimed, span) {
            continue;
        }
        if let Some(low) = caps.get(1).and_then(|m| parse_number(m.as_str(), caps.get(2).is_some())) {
            claimed.push(span);
            let monetary = whole.as_str().contains('$') || caps.get(2).is_some();
            ranges.push(NumericRange {
                hint: infer_hint(text, span, monetary, Some(low), None),
                low: Some(low),
                high: None,
            });
        }
    }

    for caps in UNDER.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let span = (whole.start(), whole.end());
        if overlaps(&claimed, span) {
            continue;
        }
        if let Some(high) = caps.get(1).and_then(|m| parse_number(m.as_str(), caps.get(2).is_some())) {
            claimed.push(span);
            let monetary = whole.as_str().contains('$') || caps.get(2).is_some();
            ranges.push(NumericRange {
                hint: infer_hint(text, span, monetary, None, Some(high)),
                low: None,
                high: Some(high),
            });
        }
    }

    for caps in PLUS.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let span = (whole.start(), whole.end());
        if overlaps(&claimed, span) {
            continue;
        }
        let low = caps
            .get(1)
            .map(|m| (m, caps.get(2).is_some()))
            .or_else(|| caps.get(3).map(|m| (m, caps.get(4).is_some())))
            .and_then(|(m, k)| parse_number(m.as_str(), k));
        if let Some(low) = low {
            claimed.push(span);
            let monetary = whole.as_str().contains('$')
                || caps.get(2).is_some()
                || caps.get(4).is_some();
            ranges.push(NumericRange {
                hint: infer_hint(text, span, monetary, Some(low), None),
                low: Some(low),
                high: None,
            });
        }
    }

    ranges
}

fn overlaps(claimed: &[(usize, usize)], span: (usize, usize)) -> bool {
    claimed.iter().any(|&(s, e)| span.0 < e && s < span.1)
}

fn parse_number(digits: &str, thousands: bool) -> Option<f64> {
    let cleaned: String = digits.chars().filter(|c| *c != ',').collect();
    let value: f64 = cleaned.parse().ok()?;
    Some(if thousands { value * 1000.0 } else { value })
}

/// Words near the match that disambiguate which field is constrained.
/// Compared against whole words only ("household" must not trip "old").
const AGE_CUES: [&str; 6] = ["age", "aged", "year", "years", "old", "older"];
const INCOME_CUES: [&str; 7] =
    ["income", "earn", "earning", "earnings", "salary", "household", "hh"];

fn infer_hint(
    text: &str,
    span: (usize, usize),
    monetary: bool,
    low: Option<f64>,
    high: Option<f64>,
) -> FieldHint {
    let window_start = text[..span.0].char_indices().rev().nth(30).map_or(0, |(i, _)| i);
    let window_end = (span.1 + 30).min(text.len());
    let window_end =
        (window_end..=text.len()).find(|&i| text.is_char_boundary(i)).unwrap_or(text.len());
    let words: Vec<&str> = text[window_start..window_end]
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    if words.iter().any(|w| AGE_CUES.contains(w)) {
        return FieldHint::Age;
    }
    if monetary || words.iter().any(|w| INCOME_CUES.contains(w)) {
        return FieldHint::Income;
    }
    // Small bounded values with no monetary marker read as ages
    let plausible_age = |v: f64| (1.0..=120.0).contains(&v);
    match (low, high) {
        (Some(l), Some(h)) if plausible_age(l) && plausible_age(h) => FieldHint::Age,
        (Some(l), None) if plausible_age(l) => FieldHint::Age,
        _ => FieldHint::Unknown,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hyphen_age_range() {
        let ranges = extract("adults 25-34 in cities");
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0], NumericRange {
            hint: FieldHint::Age,
            low: Some(25.0),
            high: Some(34.0),
        });
    }

    #[test]
    fn test_to_range() {
        let ranges = extract("aged 25 to 34");
        assert_eq!(ranges[0].hint, FieldHint::Age);
        assert_eq!(ranges[0].low, Some(25.0));
        assert_eq!(ranges[0].high, Some(34.0));
    }

    #[test]
    fn test_over_100k_is_income() {
        let ranges = extract("households earning over 100k");
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].hint, FieldHint::Income);
        assert_eq!(ranges[0].low, Some(100_000.0));
        assert_eq!(ranges[0].high, None);
    }

    #[test]
    fn test_under_dollar_amount() {
        let ranges = extract("income under $50,000");
        assert_eq!(ranges[0].hint, FieldHint::Income);
        assert_eq!(ranges[0].high, Some(50_000.0));
    }

    #[test]
    fn test_age_plus() {
        let ranges = extract("age 18+");
        assert_eq!(ranges[0].hint, FieldHint::Age);
        assert_eq!(ranges[0].low, Some(18.0));
        assert_eq!(ranges[0].high, None);
    }

    #[test]
    fn test_and_older() {
        let ranges = extract("65 and older");
        assert_eq!(ranges[0].hint, FieldHint::Age);
        assert_eq!(ranges[0].low, Some(65.0));
    }

    #[test]
    fn test_top_percent() {
        let ranges = extract("top 10% of earners");
        assert_eq!(ranges[0].hint, FieldHint::Percent);
        assert_eq!(ranges[0].high, Some(10.0));
    }

    #[test]
    fn test_no_numbers_no_ranges() {
        assert!(extract("environmentally conscious urban dwellers").is_empty());
    }

    #[test]
    fn test_dollar_range() {
        let ranges = extract("$50k-$75k household income");
        assert_eq!(ranges[0].hint, FieldHint::Income);
        assert_eq!(ranges[0].low, Some(50_000.0));
        assert_eq!(ranges[0].high, Some(75_000.0));
    }

    #[test]
    fn test_inverted_range_discarded() {
        assert!(extract("90 to 20").is_empty());
    }

    #[test]
    fn test_range_not_double_counted() {
        // The range pattern claims 25-34; no spurious open-ended match
        let ranges = extract("25-34");
        assert_eq!(ranges.len(), 1);
    }
}
