//! Human-readable byte sizes.

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Format a byte count with 1024 multipliers, e.g. `1536` -> `"1.50 KB"`.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", value, UNITS[unit])
}

/// Parse a size such as `"10 GB"`, `"512mb"` or `"1.5 TB"` into bytes.
///
/// Returns `None` for anything that is not a non-negative number followed by
/// an optional known unit.
pub fn parse_size(input: &str) -> Option<u64> {
    let input = input.trim();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);

    let number: f64 = number.parse().ok()?;
    let unit = unit.trim().to_ascii_uppercase();
    let exponent = if unit.is_empty() {
        0
    } else {
        UNITS.iter().position(|u| *u == unit)?
    };

    Some((number * 1024f64.powi(exponent as i32)) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(200 * 1024 * 1024), "200.00 MB");
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("10 GB"), Some(10 * 1024 * 1024 * 1024));
        assert_eq!(parse_size("512mb"), Some(512 * 1024 * 1024));
        assert_eq!(parse_size("1.5 KB"), Some(1536));
        assert_eq!(parse_size("42"), Some(42));
        assert_eq!(parse_size("ten GB"), None);
        assert_eq!(parse_size("10 PB"), None);
    }
}
