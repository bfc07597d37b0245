use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::rngs::OsRng;

/// Number of digits in a security code.
pub const CODE_LENGTH: usize = 6;
/// Default lifetime of a freshly generated code.
pub const DEFAULT_CODE_TTL_MINUTES: i64 = 10;
/// Leading digits left readable by [`mask`].
const VISIBLE_DIGITS: usize = 2;
const MASK_CHAR: char = '*';

/// Generates a uniformly random 6-digit code and its expiry.
pub fn generate(ttl: Duration) -> (String, DateTime<Utc>) {
    let value: u32 = OsRng.gen_range(0..1_000_000);
    (format!("{:06}", value), Utc::now() + ttl)
}

/// Format check only: exactly six ASCII digits.
pub fn validate(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

/// Display form for audit logs: `12****`. Anything that is not six
/// characters long comes back as `******`.
pub fn mask(code: &str) -> String {
    if code.chars().count() != CODE_LENGTH {
        return MASK_CHAR.to_string().repeat(CODE_LENGTH);
    }
    code.chars()
        .take(VISIBLE_DIGITS)
        .chain(std::iter::repeat_n(MASK_CHAR, CODE_LENGTH - VISIBLE_DIGITS))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_six_digits_and_expire_later() {
        for _ in 0..200 {
            let (code, expires_at) = generate(Duration::minutes(DEFAULT_CODE_TTL_MINUTES));
            assert!(validate(&code), "bad code {code}");
            assert!(expires_at > Utc::now() + Duration::minutes(9));
        }
    }

    #[test]
    fn validate_rejects_non_digits_and_wrong_length() {
        assert!(validate("000000"));
        assert!(validate("999999"));
        assert!(!validate("12345"));
        assert!(!validate("1234567"));
        assert!(!validate("12a456"));
        assert!(!validate("١٢٣٤٥٦"));
    }

    #[test]
    fn mask_keeps_two_leading_digits() {
        assert_eq!(mask("482913"), "48****");
        assert_eq!(mask("000000"), "00****");
        assert_eq!(mask("1234"), "******");
        assert_eq!(mask(""), "******");
    }
}
