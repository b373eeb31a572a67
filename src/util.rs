// Parsing and formatting helpers.
//
// All the forgiving handling of source cell text lives here so the rest of
// the code works with typed values only.
use chrono::{NaiveDate, NaiveDateTime};
use num_format::{Locale, ToFormattedString};

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M:%S"];

/// Parse a monetary or numeric cell.
///
/// - Trims whitespace and rejects text containing letters.
/// - `1.234,50` (Brazilian grouping) and a lone decimal comma (`12,5`) are
///   read as decimal commas.
/// - Otherwise commas are thousands separators (`1,234.50`).
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() || s.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let commas = s.matches(',').count();
    let normalized = match (s.rfind(','), s.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => s.replace('.', "").replace(',', "."),
        (Some(_), None) if commas == 1 => s.replace(',', "."),
        _ => s.replace(',', ""),
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse an integral count. Spreadsheets hand integers over as `2.0`, which
/// is accepted; `2.5` is not.
pub fn parse_i64_safe(s: Option<&str>) -> Option<i64> {
    let s = s?.trim();
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    let v = parse_f64_safe(Some(s))?;
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

pub fn parse_store_id(s: Option<&str>) -> Option<u32> {
    let v = parse_i64_safe(s)?;
    u32::try_from(v).ok()
}

pub fn parse_date_safe(s: Option<&str>) -> Option<NaiveDate> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .map(|dt| dt.date())
        })
}

/// Trimmed text, `None` when blank.
pub fn non_blank(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Format a value with a fixed number of decimals and the locale's
/// grouping and decimal separators (`1.234.567,89` for `pt`).
pub fn format_number(n: f64, decimals: usize, locale: &Locale) -> String {
    let neg = n.is_sign_negative() && n != 0.0;
    let s = format!("{:.*}", decimals, n.abs());
    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    // past u64 the digits are kept ungrouped
    let mut res = match int_part.parse::<u64>() {
        Ok(int_val) => int_val.to_formatted_string(locale),
        Err(_) => int_part.to_string(),
    };
    if let Some(frac) = frac_part {
        if decimals > 0 {
            res.push_str(locale.decimal());
            res.push_str(frac);
        }
    }
    // `-0.00` after rounding is just zero
    if neg && res.chars().any(|c| c.is_ascii_digit() && c != '0') {
        format!("{}{}", locale.minus_sign(), res)
    } else {
        res
    }
}

pub fn format_int<T>(n: T, locale: &Locale) -> String
where
    T: ToFormattedString,
{
    n.to_formatted_string(locale)
}

/// `DD/MM/YYYY`, the date style used in report text and subjects.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Turn a store name into a single safe path component.
pub fn path_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
