//! Semantic validation of retrieved candidate sets.
//!
//! The validator exists to keep the generator away from weakly-related
//! incidents: a candidate set is only admitted when either the hybrid score
//! is decisively strong or the topical overlap with the query clears the
//! composite floor.

use std::sync::Arc;

use incident_core::{EntitySet, IncidentReader, RefusalReason, RetrievalCandidate};

use crate::entities::EntityExtractor;

const DOMAIN_WEIGHT: f32 = 0.5;
const ENTITY_WEIGHT: f32 = 0.3;
const INTENT_WEIGHT: f32 = 0.2;

/// Verbs that signal a troubleshooting intent.
const TROUBLE_VERBS: &[&str] = &[
    "fail", "failed", "failing", "stuck", "error", "errors", "timeout", "timing", "blocked",
    "down", "broken", "declined", "dropped", "reset", "crash", "unable",
];

/// Coarse topical theme of a query or an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DomainTheme {
    Payments,
    Refunds,
    Settlement,
    Webhooks,
    Authentication,
    Infrastructure,
    Unknown,
}

impl DomainTheme {
    const KEYWORDS: &'static [(DomainTheme, &'static [&'static str])] = &[
        (
            DomainTheme::Payments,
            &["payment", "payments", "upi", "transaction", "card", "checkout", "collect", "mandate"],
        ),
        (
            DomainTheme::Refunds,
            &["refund", "refunds", "chargeback", "reversal"],
        ),
        (
            DomainTheme::Settlement,
            &["settlement", "payout", "reconciliation", "settle"],
        ),
        (
            DomainTheme::Webhooks,
            &["webhook", "webhooks", "callback", "notification"],
        ),
        (
            DomainTheme::Authentication,
            &["auth", "authentication", "login", "token", "oauth", "ssl", "certificate"],
        ),
        (
            DomainTheme::Infrastructure,
            &["timeout", "latency", "server", "database", "queue", "connection", "outage"],
        ),
    ];

    fn from_category(category: incident_core::Category) -> Self {
        use incident_core::Category;
        match category {
            Category::Payment => DomainTheme::Payments,
            Category::Refund => DomainTheme::Refunds,
            Category::Settlement => DomainTheme::Settlement,
            Category::Webhook => DomainTheme::Webhooks,
            Category::Authentication => DomainTheme::Authentication,
            Category::Infrastructure | Category::Integration => DomainTheme::Infrastructure,
        }
    }

    fn classify(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered.split_whitespace().collect();

        let mut best = DomainTheme::Unknown;
        let mut best_hits = 0usize;
        // Table order breaks ties, so classification is deterministic.
        for (theme, keywords) in Self::KEYWORDS {
            let hits = words
                .iter()
                .filter(|w| {
                    let trimmed = w.trim_matches(|c: char| !c.is_alphanumeric());
                    keywords.contains(&trimmed)
                })
                .count();
            if hits > best_hits {
                best = *theme;
                best_hits = hits;
            }
        }
        best
    }

    /// 1.0 identical, 0.5 adjacent, 0.0 unrelated.
    fn affinity(self, other: Self) -> f32 {
        use DomainTheme::*;
        if self == Unknown || other == Unknown {
            return 0.0;
        }
        if self == other {
            return 1.0;
        }
        const ADJACENT: &[(DomainTheme, DomainTheme)] = &[
            (Payments, Refunds),
            (Payments, Settlement),
            (Refunds, Settlement),
            (Payments, Infrastructure),
            (Webhooks, Infrastructure),
            (Authentication, Infrastructure),
            (Payments, Authentication),
        ];
        if ADJACENT
            .iter()
            .any(|(a, b)| (*a == self && *b == other) || (*a == other && *b == self))
        {
            0.5
        } else {
            0.0
        }
    }
}

/// Validator thresholds.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Fused score that admits a set on its own.
    pub strong_fused_threshold: f32,
    /// Composite relevance floor for the semantic branch.
    pub composite_floor: f32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            strong_fused_threshold: 0.8,
            composite_floor: 0.3,
        }
    }
}

/// Validation verdict over a candidate set.
#[derive(Debug, Clone)]
pub struct Validation {
    pub admitted: bool,
    pub top_fused: f32,
    pub best_composite: f32,
    pub reason: Option<RefusalReason>,
}

/// Topical admissibility gate between retrieval and generation.
pub struct SemanticValidator {
    reader: Arc<dyn IncidentReader>,
    extractor: Arc<EntityExtractor>,
    config: ValidatorConfig,
}

impl SemanticValidator {
    pub fn new(
        reader: Arc<dyn IncidentReader>,
        extractor: Arc<EntityExtractor>,
        config: ValidatorConfig,
    ) -> Self {
        Self {
            reader,
            extractor,
            config,
        }
    }

    /// Decide whether `candidates` (ordered, best first) may reach the
    /// generator for `query`.
    ///
    /// `floor` is the caller's confidence floor (router-derived, or the
    /// request override): an extra bar the strongest signal must clear on
    /// top of the two-branch rule.
    pub fn validate(
        &self,
        query: &str,
        candidates: &[RetrievalCandidate],
        floor: f32,
    ) -> Validation {
        if candidates.is_empty() {
            return Validation {
                admitted: false,
                top_fused: 0.0,
                best_composite: 0.0,
                reason: Some(RefusalReason::NoCandidates),
            };
        }

        let query_theme = DomainTheme::classify(query);
        let query_entities = self.extractor.extract(query);
        let troubleshooting = is_troubleshooting(query);

        let best_composite = candidates
            .iter()
            .map(|c| self.composite(c, query_theme, &query_entities, troubleshooting))
            .fold(0.0f32, f32::max);

        let top_fused = candidates[0].fused_score;

        // Two-branch rule: a decisive hybrid match carries a weak theme
        // signal, and a strong theme carries a moderate hybrid score.
        let evidence = top_fused >= self.config.strong_fused_threshold
            || best_composite >= self.config.composite_floor;
        let admitted = evidence && top_fused.max(best_composite) >= floor;

        Validation {
            admitted,
            top_fused,
            best_composite,
            reason: (!admitted).then_some(RefusalReason::InsufficientSemanticOverlap),
        }
    }

    fn composite(
        &self,
        candidate: &RetrievalCandidate,
        query_theme: DomainTheme,
        query_entities: &EntitySet,
        troubleshooting: bool,
    ) -> f32 {
        let Some(incident) = self.reader.get(&candidate.incident_id) else {
            return 0.0;
        };

        let candidate_theme = incident
            .category
            .map(DomainTheme::from_category)
            .unwrap_or_else(|| DomainTheme::classify(&incident.entity_text()));

        let domain_match = query_theme.affinity(candidate_theme);

        let candidate_entities = self.extractor.extract(&incident.entity_text());
        let entity_overlap =
            query_entities.overlap(&candidate_entities) as f32 / query_entities.len().max(1) as f32;

        let intent_alignment = if troubleshooting && !incident.resolution.trim().is_empty() {
            1.0
        } else {
            0.0
        };

        DOMAIN_WEIGHT * domain_match
            + ENTITY_WEIGHT * entity_overlap
            + INTENT_WEIGHT * intent_alignment
    }
}

fn is_troubleshooting(query: &str) -> bool {
    let lowered = query.to_lowercase();
    lowered
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .any(|w| TROUBLE_VERBS.contains(&w))
}
