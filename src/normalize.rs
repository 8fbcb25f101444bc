// 🧹 Field Normalizers
// Dates, amounts, phone numbers and names arrive in whatever shape the
// spreadsheet had. These functions turn them into one canonical form.

use chrono::NaiveDate;

/// Day-first numeric formats (the default for Ugandan exports)
const DAY_FIRST_FORMATS: &[&str] = &["%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

/// Two-digit years; `%Y` would read "24" as year 24
const SHORT_YEAR_FORMATS: &[&str] = &["%d/%m/%y", "%d-%m-%y", "%d.%m.%y", "%d-%b-%y"];

/// Year-first numeric formats
const YEAR_FIRST_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Free-form fallbacks
const FREE_FORM_FORMATS: &[&str] = &[
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%B %d %Y",
    "%d-%b-%Y",
    "%e %b %Y",
];

pub const UGANDA_PREFIX: &str = "+256";

/// Parse a date in DD/MM/YYYY, YYYY-MM-DD or a free-form spelling.
///
/// DD/MM/YYYY wins over MM/DD/YYYY: `03/04/2024` is 3 April.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let first_is_year = s
        .get(..4)
        .map_or(false, |head| head.chars().all(|c| c.is_ascii_digit()));

    if first_is_year {
        for fmt in YEAR_FIRST_FORMATS {
            if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
                return Some(d);
            }
        }
        // ISO timestamp: "2024-01-15T08:30:00Z"
        if let Some(head) = s.get(..10) {
            if let Ok(d) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
                return Some(d);
            }
        }
    }

    let year_part = s.rsplit(['/', '-', '.']).next().unwrap_or("");
    if year_part.len() == 2 {
        for fmt in SHORT_YEAR_FORMATS {
            if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
                return Some(d);
            }
        }
    }

    for fmt in DAY_FIRST_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    // Free-form fallback is case-insensitive on month names
    for fmt in FREE_FORM_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    None
}

/// Parse a money amount: keep digits, '.' and a leading '-', default to 0.
pub fn parse_amount(raw: &str) -> f64 {
    let trimmed = raw.trim();
    let negative = trimmed.starts_with('-');

    let digits: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if digits.is_empty() {
        return 0.0;
    }

    match digits.parse::<f64>() {
        Ok(value) if negative => -value,
        Ok(value) => value,
        Err(_) => 0.0,
    }
}

/// Optional variant: `None` when the field carries no digits at all
pub fn parse_amount_opt(raw: &str) -> Option<f64> {
    if raw.chars().any(|c| c.is_ascii_digit()) {
        Some(parse_amount(raw))
    } else {
        None
    }
}

/// Canonical Uganda phone number. The result always starts with `+256`.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    let local = if let Some(rest) = digits.strip_prefix("256") {
        rest
    } else if let Some(rest) = digits.strip_prefix('0') {
        rest
    } else {
        digits.as_str()
    };

    format!("{}{}", UGANDA_PREFIX, local)
}

/// Split a full name: first token is the first name, the rest is the last name.
pub fn split_name(full_name: &str) -> (String, String) {
    let mut tokens = full_name.split_whitespace();

    let first = match tokens.next() {
        Some(t) => t.to_string(),
        None => return ("Unknown".to_string(), String::new()),
    };

    let last = tokens.collect::<Vec<_>>().join(" ");
    (first, last)
}

/// Normalize a free-text label to a lowercase status keyword
pub fn normalize_status(raw: &str) -> String {
    raw.trim().to_lowercase().replace([' ', '-'], "_")
}

/// "UGX 1,250,000" (whole shillings, thousands separators)
pub fn format_ugx(amount: f64) -> String {
    let rounded = amount.round() as i64;
    let digits = rounded.unsigned_abs().to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    if rounded < 0 {
        format!("UGX -{}", grouped)
    } else {
        format!("UGX {}", grouped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_day_first() {
        assert_eq!(parse_date("15/01/2024"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date("03/04/2024"), Some(ymd(2024, 4, 3)));
        assert_eq!(parse_date("15-01-2024"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date("15.01.2024"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date("15/01/24"), Some(ymd(2024, 1, 15)));
    }

    #[test]
    fn test_parse_year_first() {
        assert_eq!(parse_date("2024-01-15"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date("2024/01/15"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date("2024-01-15T08:30:00Z"), Some(ymd(2024, 1, 15)));
    }

    #[test]
    fn test_parse_free_form() {
        assert_eq!(parse_date("15 Jan 2024"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date("15 January 2024"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date("January 15, 2024"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date("15-Jan-2024"), Some(ymd(2024, 1, 15)));
    }

    #[test]
    fn test_parse_date_round_trip() {
        let date = ymd(2023, 11, 9);
        for rendered in [
            date.format("%d/%m/%Y").to_string(),
            date.format("%Y-%m-%d").to_string(),
            date.format("%d %B %Y").to_string(),
        ] {
            assert_eq!(parse_date(&rendered), Some(date), "failed on {}", rendered);
        }
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("   "), None);
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date("32/13/2024"), None);
    }

    #[test]
    fn test_parse_amount_strips_non_numeric() {
        assert_eq!(parse_amount("UGX 1,250,000"), 1_250_000.0);
        assert_eq!(parse_amount("  500.50 "), 500.5);
        assert_eq!(parse_amount("1 000 shs"), 1000.0);
        assert_eq!(parse_amount("-2,000"), -2000.0);
    }

    #[test]
    fn test_parse_amount_defaults_to_zero() {
        assert_eq!(parse_amount(""), 0.0);
        assert_eq!(parse_amount("N/A"), 0.0);
        assert_eq!(parse_amount("1.2.3"), 0.0);
        assert_eq!(parse_amount_opt("n/a"), None);
        assert_eq!(parse_amount_opt("0"), Some(0.0));
    }

    #[test]
    fn test_normalize_phone_always_prefixed() {
        assert_eq!(normalize_phone("0772123456"), "+256772123456");
        assert_eq!(normalize_phone("256772123456"), "+256772123456");
        assert_eq!(normalize_phone("+256 772 123 456"), "+256772123456");
        assert_eq!(normalize_phone("772-123-456"), "+256772123456");

        for raw in ["", "abc", "0", "+1 555 0100", "256"] {
            assert!(normalize_phone(raw).starts_with("+256"), "{}", raw);
        }
    }

    #[test]
    fn test_split_name() {
        assert_eq!(
            split_name("Jane Doe"),
            ("Jane".to_string(), "Doe".to_string())
        );
        assert_eq!(
            split_name("  Mary  Nakato Kizza "),
            ("Mary".to_string(), "Nakato Kizza".to_string())
        );
        assert_eq!(split_name("Cher"), ("Cher".to_string(), String::new()));
        assert_eq!(split_name(""), ("Unknown".to_string(), String::new()));
    }

    #[test]
    fn test_format_ugx() {
        assert_eq!(format_ugx(1_250_000.0), "UGX 1,250,000");
        assert_eq!(format_ugx(999.0), "UGX 999");
        assert_eq!(format_ugx(0.0), "UGX 0");
        assert_eq!(format_ugx(-1500.4), "UGX -1,500");
        // saturating cast at the extremes
        assert_eq!(format_ugx(-1e20), "UGX -9,223,372,036,854,775,808");
        assert_eq!(format_ugx(1e20), "UGX 9,223,372,036,854,775,807");
    }

    #[test]
    fn test_normalize_status() {
        assert_eq!(normalize_status(" In Progress "), "in_progress");
        assert_eq!(normalize_status("Written-Off"), "written_off");
    }
}
