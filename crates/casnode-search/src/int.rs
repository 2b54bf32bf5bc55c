//! Integer attribute values
//!
//! Numeric filters and numeric ordering treat attribute strings as
//! arbitrary-precision decimal integers: an optional sign followed by at least
//! one ASCII digit, nothing else.

use num_bigint::BigInt;

/// True if `s` is a decimal integer
#[must_use]
pub fn is_integer(s: &str) -> bool {
    let digits = s.strip_prefix(['+', '-']).unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a decimal integer of any size
#[must_use]
pub fn parse_int(s: &str) -> Option<BigInt> {
    if !is_integer(s) {
        return None;
    }
    BigInt::parse_bytes(s.as_bytes(), 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_integer() {
        for ok in ["0", "-1", "+42", "007", "123456789012345678901234567890"] {
            assert!(is_integer(ok), "{ok}");
        }
        for bad in ["", "-", "+", "1.5", "1e3", " 1", "1_000", "0x10", "--1", "abc"] {
            assert!(!is_integer(bad), "{bad}");
        }
    }

    #[test]
    fn test_parse_int_big() {
        let big = parse_int("340282366920938463463374607431768211456").unwrap();
        let small = parse_int("340282366920938463463374607431768211455").unwrap();
        assert!(small < big);
        assert_eq!(parse_int("+9"), parse_int("9"));
        assert!(parse_int("-10").unwrap() < parse_int("-9").unwrap());
        assert!(parse_int("1_0").is_none());
    }
}
