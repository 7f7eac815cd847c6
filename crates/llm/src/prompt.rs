//! Query sanitisation and the grounded prompt template.

use once_cell::sync::Lazy;
use regex::Regex;

use incident_core::{Error, Incident, Result};

/// Hard ceiling on raw input; anything longer is rejected outright.
const MAX_RAW_LEN: usize = 2000;
/// Queries are truncated to this length after injection stripping.
const MAX_QUERY_LEN: usize = 500;
/// Per-incident description/resolution budget inside the context.
const MAX_SECTION_LEN: usize = 500;

/// Injection-shaped substrings stripped from user input before it reaches a
/// prompt. Matching is case-insensitive.
static INJECTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)ignore\s+(all\s+)?previous\s+instructions",
        r"(?i)disregard\s+(all\s+)?(prior|previous)\s+(instructions|context)",
        r"(?i)you\s+are\s+now\s+[^.!?]*",
        r"(?i)\bsystem\s*:",
        r"(?i)\bassistant\s*:",
        r"(?i)<\|?im_start\|?>",
        r"(?i)<\|?im_end\|?>",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid injection pattern"))
    .collect()
});

/// A query after sanitisation. The raw text is retained for audit.
#[derive(Debug, Clone)]
pub struct SanitizedQuery {
    pub raw: String,
    pub sanitized: String,
}

/// Trim, bound, and strip injection shapes from raw user input.
pub fn sanitize_query(text: &str) -> Result<SanitizedQuery> {
    let raw = text.to_string();
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return Err(Error::Input("query must not be empty".into()));
    }
    if trimmed.len() > MAX_RAW_LEN {
        return Err(Error::Input(format!(
            "query exceeds {MAX_RAW_LEN} characters"
        )));
    }

    let mut sanitized = trimmed.to_string();
    for pattern in INJECTION_PATTERNS.iter() {
        if pattern.is_match(&sanitized) {
            tracing::warn!("stripped injection-shaped substring from query");
            sanitized = pattern.replace_all(&sanitized, " ").into_owned();
        }
    }

    let mut sanitized = sanitized.split_whitespace().collect::<Vec<_>>().join(" ");
    if sanitized.len() > MAX_QUERY_LEN {
        sanitized = truncate_on_char_boundary(&sanitized, MAX_QUERY_LEN);
    }

    if sanitized.trim().is_empty() {
        return Err(Error::Input(
            "query is empty after sanitisation".into(),
        ));
    }

    Ok(SanitizedQuery { raw, sanitized })
}

fn truncate_on_char_boundary(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// One incident rendered into the context window.
#[derive(Debug, Clone)]
pub struct ContextBlock {
    pub id: String,
    pub title: String,
    pub description: String,
    pub resolution: String,
}

impl ContextBlock {
    pub fn from_incident(incident: &Incident) -> Self {
        Self {
            id: incident.id.clone(),
            title: incident.title.clone(),
            description: truncate_on_char_boundary(&incident.description, MAX_SECTION_LEN),
            resolution: truncate_on_char_boundary(&incident.resolution, MAX_SECTION_LEN),
        }
    }
}

const INSTRUCTIONS: &str = "\
You are an incident-intelligence assistant for a payments platform. Answer \
the question using ONLY the resolved incidents provided below.

Rules:
- Every factual claim must cite the id of the incident it comes from in square brackets.
- Do not use any knowledge beyond the provided incidents.
- If the incidents do not support an answer, reply exactly: \
\"The provided incidents do not contain enough evidence to answer this.\" and stop.
- Prefer the resolution sections when suggesting a fix.";

/// Typed prompt with named slots. The generator is never handed the query
/// without the surrounding context and instructions.
#[derive(Debug, Clone)]
pub struct GroundedPrompt {
    pub instructions: &'static str,
    pub context: Vec<ContextBlock>,
    pub question: String,
}

impl GroundedPrompt {
    pub fn new(query: &SanitizedQuery) -> Self {
        Self {
            instructions: INSTRUCTIONS,
            context: Vec::new(),
            question: query.sanitized.clone(),
        }
    }

    pub fn push_incident(&mut self, incident: &Incident) {
        self.context.push(ContextBlock::from_incident(incident));
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(1024);
        out.push_str(self.instructions);
        out.push_str("\n\n## Resolved incidents\n");
        for block in &self.context {
            out.push_str(&format!(
                "\n[{id}] {title}\nProblem: {description}\nResolution: {resolution}\n",
                id = block.id,
                title = block.title,
                description = block.description,
                resolution = block.resolution,
            ));
        }
        out.push_str("\n## Question\n");
        out.push_str(&self.question);
        out
    }
}
