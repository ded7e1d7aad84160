//! This module provides common utility functions

/// Parse a program counter given as hexadecimal with or without `0x` prefix
///
/// Returns `None` if the string is not valid hexadecimal.
pub fn parse_pc(pc: &str) -> Option<u64> {
    let hex = pc.strip_prefix("0x").unwrap_or(pc);
    u64::from_str_radix(hex, 16).ok()
}

/// Format a program counter as lowercase hexadecimal with `0x` prefix
pub fn format_pc(pc: u64) -> String {
    format!("0x{pc:x}")
}

/// The percentage of `part` in `whole` guarding against a zero denominator
#[allow(clippy::cast_precision_loss)]
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0f64
    } else {
        (part as f64) / (whole as f64) * 100f64
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::with_prefix("0x1000", Some(0x1000))]
    #[case::without_prefix("1000", Some(0x1000))]
    #[case::zero("0x0", Some(0))]
    #[case::max("0xffffffffffffffff", Some(u64::MAX))]
    #[case::not_hex("0xzz", None)]
    #[case::empty("", None)]
    #[case::prefix_only("0x", None)]
    fn test_parse_pc(#[case] input: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_pc(input), expected);
    }

    #[rstest]
    #[case::zero(0, 100, 0f64)]
    #[case::half(1, 2, 50f64)]
    #[case::all(2, 2, 100f64)]
    #[case::zero_denominator(5, 0, 0f64)]
    fn test_percentage(#[case] part: u64, #[case] whole: u64, #[case] expected: f64) {
        assert!((percentage(part, whole) - expected).abs() < 1e-9);
    }

}
