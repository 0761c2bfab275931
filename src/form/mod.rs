//! Contact form record
//!
//! A `FormInput` is whatever the surface collected (raw field values). A
//! `FormRecord` is the trimmed, timestamped snapshot that gets validated and
//! sent. Records are never mutated after construction.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub(crate) mod cli;
mod validation;

pub use validation::{validate, ValidationResult};

/// Maximum message length accepted by validation.
pub const MESSAGE_MAX_CHARS: usize = 500;
/// Minimum message length accepted by validation.
pub const MESSAGE_MIN_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    General,
    Support,
    Feedback,
    Sales,
    Partnership,
    Other,
}

impl Subject {
    pub const ALL: [Subject; 6] = [
        Subject::General,
        Subject::Support,
        Subject::Feedback,
        Subject::Sales,
        Subject::Partnership,
        Subject::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Subject::General => "General",
            Subject::Support => "Support",
            Subject::Feedback => "Feedback",
            Subject::Sales => "Sales",
            Subject::Partnership => "Partnership",
            Subject::Other => "Other",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Subject::General => "General questions or comments.",
            Subject::Support => "Help with something that is not working.",
            Subject::Feedback => "Suggestions and opinions.",
            Subject::Sales => "Pricing, plans, or purchasing.",
            Subject::Partnership => "Collaboration and business proposals.",
            Subject::Other => "Anything else.",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Subject {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Subject::ALL
            .into_iter()
            .find(|subject| subject.label().eq_ignore_ascii_case(needle))
            .ok_or(())
    }
}

/// Raw field values as supplied by the UI surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
}

/// The payload forwarded to the spreadsheet endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormRecord {
    #[serde(serialize_with = "serialize_iso_millis")]
    timestamp: DateTime<Utc>,
    name: String,
    email: String,
    phone: String,
    subject: String,
    message: String,
}

impl FormRecord {
    /// Snapshot the input at the current instant.
    pub fn capture(input: &FormInput) -> Self {
        Self::capture_at(input, Utc::now())
    }

    pub fn capture_at(input: &FormInput, timestamp: DateTime<Utc>) -> Self {
        FormRecord {
            timestamp,
            name: input.name.trim().to_string(),
            email: input.email.trim().to_string(),
            phone: input
                .phone
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            // Unknown selections stay as typed so validation can reject them.
            subject: match input.subject.parse::<Subject>() {
                Ok(subject) => subject.label().to_string(),
                Err(()) => input.subject.clone(),
            },
            message: input.message.trim().to_string(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn phone(&self) -> &str {
        &self.phone
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

fn serialize_iso_millis<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// How close a message is to the length limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthLevel {
    Normal,
    Warning,
    Critical,
}

pub fn length_hint(chars: usize) -> LengthLevel {
    match chars {
        0..=300 => LengthLevel::Normal,
        301..=450 => LengthLevel::Warning,
        _ => LengthLevel::Critical,
    }
}
