//! Format checks shared by the intake and onboarding paths.

pub const MIN_PHONE_DIGITS: usize = 9;
pub const MAX_PHONE_DIGITS: usize = 15;

/// 9 to 15 digits with an optional leading `+`.
pub fn is_valid_phone(raw: &str) -> bool {
    let digits = raw.strip_prefix('+').unwrap_or(raw);
    (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
}

pub fn is_valid_email(raw: &str) -> bool {
    if raw.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = raw.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

pub fn is_blank(raw: &str) -> bool {
    raw.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::{is_valid_email, is_valid_phone};

    #[test]
    fn phone_accepts_optional_plus_and_nine_to_fifteen_digits() {
        assert!(is_valid_phone("+255712345678"));
        assert!(is_valid_phone("712345678"));
        assert!(is_valid_phone("123456789012345"));
        assert!(!is_valid_phone("12345678"));
        assert!(!is_valid_phone("1234567890123456"));
        assert!(!is_valid_phone("0712-345-678"));
        assert!(!is_valid_phone("++255712345678"));
        assert!(!is_valid_phone(""));
    }

    #[test]
    fn email_needs_local_part_and_dotted_domain() {
        assert!(is_valid_email("asha@example.co.tz"));
        assert!(!is_valid_email("asha@localhost"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("asha@@example.com"));
        assert!(!is_valid_email("asha @example.com"));
        assert!(!is_valid_email("asha@example."));
    }
}
