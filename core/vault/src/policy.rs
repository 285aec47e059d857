//! Password strength classification.
//!
//! Criteria are checked in a fixed order and the first unmet one decides the
//! verdict. Only the minimum length is a hard requirement; every later
//! criterion yields an accepted verdict carrying a recommendation.

use serde::Serialize;

/// Characters counted as special.
pub const SPECIAL_CHARACTERS: &str = " !\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Passwords shorter than this are rejected.
pub const MIN_LENGTH: usize = 8;

/// Passwords shorter than this are accepted with a recommendation.
pub const RECOMMENDED_LENGTH: usize = 20;

/// Minimum count of each character class for a strong password.
pub const MIN_CLASS_COUNT: usize = 2;

pub const MSG_TOO_SHORT: &str = "Passwords must be at least 8 characters long.";
pub const MSG_LENGTH: &str = "Passwords should be at least 20 characters long.";
pub const MSG_LOWERCASE: &str = "Passwords should have 2 or more lowercase letters (a-z).";
pub const MSG_UPPERCASE: &str = "Passwords should have 2 or more uppercase letters (A-Z).";
pub const MSG_DIGITS: &str = "Passwords should have 2 or more digits (0-9)";
pub const MSG_SPECIAL_PREFIX: &str = "Passwords should have 2 or more special characters: ";

/// Result of evaluating a password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordVerdict {
    /// Whether the password may be used at all.
    pub accepted: bool,
    /// First unmet criterion, empty when the password is strong.
    pub message: String,
}

impl PasswordVerdict {
    fn rejected(message: &str) -> Self {
        Self {
            accepted: false,
            message: message.to_string(),
        }
    }

    fn advisory(message: impl Into<String>) -> Self {
        Self {
            accepted: true,
            message: message.into(),
        }
    }

    /// Accepted with no recommendation left.
    pub fn is_strong(&self) -> bool {
        self.accepted && self.message.is_empty()
    }
}

/// The fixed password ladder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordPolicy;

impl PasswordPolicy {
    /// Classify `password`. Pure; no side effects.
    pub fn evaluate(password: &str) -> PasswordVerdict {
        let count = |pred: fn(char) -> bool| password.chars().filter(|&c| pred(c)).count();

        if password.chars().count() < MIN_LENGTH {
            PasswordVerdict::rejected(MSG_TOO_SHORT)
        } else if password.chars().count() < RECOMMENDED_LENGTH {
            PasswordVerdict::advisory(MSG_LENGTH)
        } else if count(|c| c.is_ascii_lowercase()) < MIN_CLASS_COUNT {
            PasswordVerdict::advisory(MSG_LOWERCASE)
        } else if count(|c| c.is_ascii_uppercase()) < MIN_CLASS_COUNT {
            PasswordVerdict::advisory(MSG_UPPERCASE)
        } else if count(|c| c.is_ascii_digit()) < MIN_CLASS_COUNT {
            PasswordVerdict::advisory(MSG_DIGITS)
        } else if count(|c| SPECIAL_CHARACTERS.contains(c)) < MIN_CLASS_COUNT {
            PasswordVerdict::advisory(special_message())
        } else {
            PasswordVerdict::advisory(String::new())
        }
    }
}

/// Recommendation for too few special characters, listing the set.
pub fn special_message() -> String {
    format!("{}{}", MSG_SPECIAL_PREFIX, SPECIAL_CHARACTERS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ladder_literals() {
        let cases = [
            ("pass", false, MSG_TOO_SHORT.to_string()),
            ("password", true, MSG_LENGTH.to_string()),
            ("PASSWORDPASSWORDPASS", true, MSG_LOWERCASE.to_string()),
            ("passwordpasswordpass", true, MSG_UPPERCASE.to_string()),
            ("PASSWORDPASSWORDpass", true, MSG_DIGITS.to_string()),
            ("PASSWORDpassword1234", true, special_message()),
            ("PASSWORDpassword12#$", true, String::new()),
        ];

        for (password, accepted, message) in cases {
            let verdict = PasswordPolicy::evaluate(password);
            assert_eq!(verdict.accepted, accepted, "{}", password);
            assert_eq!(verdict.message, message, "{}", password);
        }
    }

    #[test]
    fn test_long_lowercase_only_needs_uppercase() {
        let verdict = PasswordPolicy::evaluate("abcdefghijklmnopqrstu");
        assert!(verdict.accepted);
        assert_eq!(verdict.message, MSG_UPPERCASE);
    }

    #[test]
    fn test_space_counts_as_special() {
        assert!(PasswordPolicy::evaluate("AAbb11  xxxxxxxxxxxxxx").is_strong());
    }

    #[test]
    fn test_strong_flag() {
        assert!(PasswordPolicy::evaluate("PASSWORDpassword12#$").is_strong());
        assert!(!PasswordPolicy::evaluate("password").is_strong());
        assert!(!PasswordPolicy::evaluate("pass").is_strong());
    }

    proptest! {
        #[test]
        fn prop_short_passwords_rejected(password in "[ -~]{0,7}") {
            let verdict = PasswordPolicy::evaluate(&password);
            prop_assert!(!verdict.accepted);
            prop_assert_eq!(verdict.message, MSG_TOO_SHORT);
        }

        #[test]
        fn prop_eight_or_more_accepted(password in "[ -~]{8,64}") {
            prop_assert!(PasswordPolicy::evaluate(&password).accepted);
        }

        #[test]
        fn prop_medium_length_gets_length_advice(password in "[ -~]{8,19}") {
            prop_assert_eq!(PasswordPolicy::evaluate(&password).message, MSG_LENGTH);
        }

        #[test]
        fn prop_strong_prefix_stays_strong(tail in "[a-zA-Z0-9]{0,32}") {
            let password = format!("AAbb11##xxxxxxxxxxxx{}", tail);
            prop_assert!(PasswordPolicy::evaluate(&password).is_strong());
        }
    }
}
