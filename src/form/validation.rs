use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use super::{FormRecord, Subject, MESSAGE_MAX_CHARS, MESSAGE_MIN_CHARS};

pub static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

const MIN_NAME_CHARS: usize = 2;
const MIN_PHONE_DIGITS: usize = 10;
const MESSAGE_SEPARATOR: &str = "\n";

/// One failed field rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    NameTooShort,
    EmailMissing,
    EmailInvalid,
    PhoneInvalid,
    SubjectMissing,
    MessageTooShort,
    MessageTooLong,
}

impl Violation {
    pub fn field(self) -> &'static str {
        match self {
            Violation::NameTooShort => "name",
            Violation::EmailMissing | Violation::EmailInvalid => "email",
            Violation::PhoneInvalid => "phone",
            Violation::SubjectMissing => "subject",
            Violation::MessageTooShort | Violation::MessageTooLong => "message",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Violation::NameTooShort => "Name must be at least 2 characters",
            Violation::EmailMissing => "Email is required",
            Violation::EmailInvalid => "Please enter a valid email address",
            Violation::PhoneInvalid => "Please enter a valid phone number",
            Violation::SubjectMissing => "Please select a subject",
            Violation::MessageTooShort => "Message must be at least 10 characters",
            Violation::MessageTooLong => "Message must be at most 500 characters",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub message: String,
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    fn from_violations(violations: Vec<Violation>) -> Self {
        if violations.is_empty() {
            return ValidationResult {
                is_valid: true,
                message: "Valid".to_string(),
                violations,
            };
        }

        let message = violations
            .iter()
            .map(|v| v.description())
            .collect::<Vec<_>>()
            .join(MESSAGE_SEPARATOR);

        ValidationResult {
            is_valid: false,
            message,
            violations,
        }
    }

    #[cfg(test)]
    pub fn has(&self, violation: Violation) -> bool {
        self.violations.contains(&violation)
    }
}

/// Check every field rule and collect all violations.
pub fn validate(record: &FormRecord) -> ValidationResult {
    let mut violations = Vec::new();

    if record.name().chars().count() < MIN_NAME_CHARS {
        violations.push(Violation::NameTooShort);
    }

    if record.email().is_empty() {
        violations.push(Violation::EmailMissing);
    } else if !is_valid_email(record.email()) {
        violations.push(Violation::EmailInvalid);
    }

    if !record.phone().is_empty() && !is_valid_phone(record.phone()) {
        violations.push(Violation::PhoneInvalid);
    }

    if record.subject().parse::<Subject>().is_err() {
        violations.push(Violation::SubjectMissing);
    }

    let message_chars = record.message().chars().count();
    if message_chars < MESSAGE_MIN_CHARS {
        violations.push(Violation::MessageTooShort);
    } else if message_chars > MESSAGE_MAX_CHARS {
        violations.push(Violation::MessageTooLong);
    }

    ValidationResult::from_violations(violations)
}

fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

fn is_valid_phone(phone: &str) -> bool {
    phone.chars().filter(char::is_ascii_digit).count() >= MIN_PHONE_DIGITS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FormInput;

    fn record(name: &str, email: &str, phone: &str, subject: &str, message: &str) -> FormRecord {
        FormRecord::capture(&FormInput {
            name: name.to_string(),
            email: email.to_string(),
            phone: Some(phone.to_string()),
            subject: subject.to_string(),
            message: message.to_string(),
        })
    }

    fn valid_with_message(message: &str) -> FormRecord {
        record("Jo", "a@b.co", "", "General", message)
    }

    #[test]
    fn minimal_record_is_valid() {
        let result = validate(&record("Jo", "a@b.co", "", "General", "1234567890"));
        assert!(result.is_valid);
        assert!(result.violations.is_empty());
        assert_eq!(result.message, "Valid");
    }

    #[test]
    fn all_violations_are_collected() {
        let result = validate(&record("J", "bad", "123", "", "short"));
        assert!(!result.is_valid);
        assert!(result.has(Violation::NameTooShort));
        assert!(result.has(Violation::EmailInvalid));
        assert!(result.has(Violation::SubjectMissing));
        assert!(result.has(Violation::MessageTooShort));
        // "123" is a non-empty phone with too few digits.
        assert!(result.has(Violation::PhoneInvalid));
        assert_eq!(result.violations.len(), 5);
        assert_eq!(result.message.lines().count(), 5);
    }

    #[test]
    fn four_violations_when_phone_is_blank() {
        let result = validate(&record("J", "bad", "", "", "short"));
        assert_eq!(
            result.violations,
            vec![
                Violation::NameTooShort,
                Violation::EmailInvalid,
                Violation::SubjectMissing,
                Violation::MessageTooShort,
            ]
        );
    }

    #[test]
    fn short_names_are_rejected() {
        for name in ["", "J", "  J  ", "é"] {
            let result = validate(&record(name, "a@b.co", "", "General", "1234567890"));
            assert!(result.has(Violation::NameTooShort), "name {name:?}");
        }
        let result = validate(&record("Jé", "a@b.co", "", "General", "1234567890"));
        assert!(!result.has(Violation::NameTooShort));
    }

    #[test]
    fn email_shape() {
        for bad in ["bad", "a@b", "@b.co", "a@.co", "a b@c.de", "a@b@c.de", "a@b."] {
            let result = validate(&record("Jo", bad, "", "General", "1234567890"));
            assert!(result.has(Violation::EmailInvalid), "email {bad:?}");
        }
        for good in ["a@b.co", "first.last@mail.example.org", "x+tag@y.z"] {
            let result = validate(&record("Jo", good, "", "General", "1234567890"));
            assert!(result.is_valid, "email {good:?}");
        }
    }

    #[test]
    fn empty_email_is_missing_not_invalid() {
        let result = validate(&record("Jo", "  ", "", "General", "1234567890"));
        assert!(result.has(Violation::EmailMissing));
        assert!(!result.has(Violation::EmailInvalid));
    }

    #[test]
    fn phone_counts_digits_only() {
        let ok = ["(555) 123-4567", "+1 555 123 4567", "5551234567"];
        for phone in ok {
            let result = validate(&record("Jo", "a@b.co", phone, "General", "1234567890"));
            assert!(!result.has(Violation::PhoneInvalid), "phone {phone:?}");
        }
        let bad = ["123", "555-1234", "(555) 123-456", "phone"];
        for phone in bad {
            let result = validate(&record("Jo", "a@b.co", phone, "General", "1234567890"));
            assert!(result.has(Violation::PhoneInvalid), "phone {phone:?}");
        }
    }

    #[test]
    fn unknown_subject_is_rejected() {
        let result = validate(&record("Jo", "a@b.co", "", "Complaints", "1234567890"));
        assert!(result.has(Violation::SubjectMissing));
        let result = validate(&record("Jo", "a@b.co", "", "support", "1234567890"));
        assert!(result.is_valid);
    }

    #[test]
    fn message_length_boundaries() {
        assert!(validate(&valid_with_message(&"x".repeat(10))).is_valid);
        assert!(validate(&valid_with_message(&"x".repeat(9))).has(Violation::MessageTooShort));
        assert!(validate(&valid_with_message(&"x".repeat(500))).is_valid);
        assert!(validate(&valid_with_message(&"x".repeat(501))).has(Violation::MessageTooLong));
    }

    #[test]
    fn overlong_message_reports_inclusive_limit() {
        let result = validate(&valid_with_message(&"x".repeat(501)));
        assert_eq!(result.violations, vec![Violation::MessageTooLong]);
        assert_eq!(result.message, "Message must be at most 500 characters");
    }

    #[test]
    fn message_length_counts_characters_not_bytes() {
        assert!(validate(&valid_with_message(&"ü".repeat(500))).is_valid);
    }
}
