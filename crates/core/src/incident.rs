//! Incident record: the atomic unit of the corpus.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Matches an incident id (e.g. `JSP-1234`) anywhere inside free text,
/// anchored by word boundaries. Extraction is first-match, not equality.
pub static INCIDENT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([A-Za-z]{2,10}-\d{1,10})\b").expect("valid incident id regex"));

/// Email-shaped contact identifier.
static RESOLVED_BY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid contact regex"));

const MIN_TITLE_LEN: usize = 10;
const MIN_DESCRIPTION_LEN: usize = 50;
const MIN_RESOLUTION_LEN: usize = 20;

/// Extract the first incident id from free text, normalised to upper case.
pub fn extract_incident_id(text: &str) -> Option<String> {
    INCIDENT_ID_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_uppercase())
}

/// Incident category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Payment,
    Refund,
    Settlement,
    Webhook,
    Authentication,
    Infrastructure,
    Integration,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Payment => "payment",
            Category::Refund => "refund",
            Category::Settlement => "settlement",
            Category::Webhook => "webhook",
            Category::Authentication => "authentication",
            Category::Infrastructure => "infrastructure",
            Category::Integration => "integration",
        }
    }
}

/// Incident priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

/// A resolved production incident.
///
/// The `id` is the primary key in both the dense and sparse indices and is
/// immutable once the record is admitted to the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Opaque stable identifier, `PREFIX-digits` shaped.
    pub id: String,
    /// Short human summary.
    pub title: String,
    /// Free-text problem statement.
    pub description: String,
    /// Free-text fix.
    pub resolution: String,
    /// Short labels; at least one.
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Email-shaped contact identifier of the resolver.
    pub resolved_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl Incident {
    /// The text the dense and sparse indices are built from.
    pub fn training_text(&self) -> String {
        format!(
            "{}. {}. Resolution: {}",
            self.title, self.description, self.resolution
        )
    }

    /// Text used for entity extraction: indexed text plus tags.
    pub fn entity_text(&self) -> String {
        let mut text = self.training_text();
        if !self.tags.is_empty() {
            text.push_str(". ");
            text.push_str(&self.tags.join(" "));
        }
        text
    }

    /// Validate the record against the corpus schema.
    ///
    /// Invalid records must never touch any index, so this is checked before
    /// admission rather than on read.
    pub fn validate(&self) -> Result<()> {
        let id_ok = INCIDENT_ID_RE
            .find(&self.id)
            .map(|m| m.as_str().len() == self.id.len())
            .unwrap_or(false);
        if !id_ok {
            return Err(Error::Schema(format!(
                "id {:?} does not match the PREFIX-digits pattern",
                self.id
            )));
        }
        if self.title.trim().len() < MIN_TITLE_LEN {
            return Err(Error::Schema(format!(
                "title must be at least {MIN_TITLE_LEN} characters"
            )));
        }
        if self.description.trim().len() < MIN_DESCRIPTION_LEN {
            return Err(Error::Schema(format!(
                "description must be at least {MIN_DESCRIPTION_LEN} characters"
            )));
        }
        if self.resolution.trim().len() < MIN_RESOLUTION_LEN {
            return Err(Error::Schema(format!(
                "resolution must be at least {MIN_RESOLUTION_LEN} characters"
            )));
        }
        if self.tags.iter().filter(|t| !t.trim().is_empty()).count() == 0 {
            return Err(Error::Schema("at least one tag is required".into()));
        }
        if !RESOLVED_BY_RE.is_match(self.resolved_by.trim()) {
            return Err(Error::Schema(format!(
                "resolved_by {:?} is not email-shaped",
                self.resolved_by
            )));
        }
        Ok(())
    }
}

/// Feedback on a single query result. Append-only; never applied live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: String,
    pub query: String,
    pub result_id: String,
    /// 1..=5.
    pub rating: u8,
    pub helpful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Caller-submitted feedback, before an id and timestamp are assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSubmission {
    pub query: String,
    pub result_id: String,
    pub rating: u8,
    pub helpful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_text: Option<String>,
}

impl FeedbackSubmission {
    pub fn validate(&self) -> Result<()> {
        if !(1..=5).contains(&self.rating) {
            return Err(Error::Input(format!(
                "rating must be between 1 and 5, got {}",
                self.rating
            )));
        }
        if self.result_id.trim().is_empty() {
            return Err(Error::Input("result_id is required".into()));
        }
        Ok(())
    }
}
