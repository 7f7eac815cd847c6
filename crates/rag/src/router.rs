//! Rule-based query routing.
//!
//! Classification never touches the generative provider: the router stays
//! cheap, offline-testable and free of feedback loops with the request
//! concurrency limits.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use incident_core::{extract_incident_id, IncidentReader, QueryComplexity};

use crate::entities::EntityExtractor;

/// Seed anchor terms for the payments-incident domain. The live set grows
/// with tags harvested from the corpus.
const SEED_ANCHORS: &[&str] = &[
    "payment", "payments", "transaction", "upi", "card", "netbanking", "wallet", "refund",
    "chargeback", "settlement", "payout", "reconciliation", "webhook", "callback", "gateway",
    "mandate", "subscription", "timeout", "latency", "failure", "declined", "error", "ssl",
    "certificate", "api", "incident", "outage", "retry", "queue",
];

/// Phrases and markers that flag an analytical, multi-incident question.
const COMPLEXITY_INDICATORS: &[&str] = &[
    "why",
    "how often",
    "how frequently",
    "pattern",
    "patterns",
    "root cause",
    "trend",
    "trends",
    "correlate",
    "correlation",
    "compare",
    "across",
    "recurring",
    "most common",
];

/// Routing outcome: complexity plus the derived retrieval parameters.
///
/// `confidence_floor` is the admission floor downstream validation applies
/// unless the caller overrides it per request.
#[derive(Debug, Clone)]
pub struct RouterDecision {
    pub complexity: QueryComplexity,
    /// Set iff `complexity == ExactId`.
    pub exact_id: Option<String>,
    pub top_k: usize,
    pub confidence_floor: f32,
}

/// Deterministic query classifier.
pub struct QueryRouter {
    reader: Arc<dyn IncidentReader>,
    extractor: Arc<EntityExtractor>,
    anchors: RwLock<HashSet<String>>,
    /// Floor assigned to non-exact queries; exact-id lookups keep their own.
    default_floor: f32,
}

impl QueryRouter {
    pub fn new(reader: Arc<dyn IncidentReader>, extractor: Arc<EntityExtractor>) -> Self {
        let router = Self {
            reader,
            extractor,
            anchors: RwLock::new(SEED_ANCHORS.iter().map(|a| a.to_string()).collect()),
            default_floor: QueryComplexity::Simple.confidence_floor(),
        };
        router.refresh_anchors();
        router
    }

    /// Override the configured default floor for non-exact queries.
    pub fn with_default_floor(mut self, floor: f32) -> Self {
        self.default_floor = floor.clamp(0.0, 1.0);
        self
    }

    fn decision(&self, complexity: QueryComplexity) -> RouterDecision {
        let confidence_floor = match complexity {
            QueryComplexity::ExactId => complexity.confidence_floor(),
            _ => self.default_floor,
        };
        RouterDecision {
            complexity,
            exact_id: None,
            top_k: complexity.top_k(),
            confidence_floor,
        }
    }

    /// Merge the corpus tag vocabulary into the anchor set. Call after
    /// ingest; anchors only grow, so stale calls are harmless.
    pub fn refresh_anchors(&self) {
        let tags = self.reader.tag_vocabulary();
        if tags.is_empty() {
            return;
        }
        let mut anchors = self.anchors.write();
        for tag in tags {
            anchors.insert(tag.to_lowercase());
        }
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.read().len()
    }

    /// Classify a sanitised query.
    pub fn classify(&self, text: &str) -> RouterDecision {
        // 1. Exact-id probe: first id-shaped token that the corpus knows.
        if let Some(id) = extract_incident_id(text) {
            if self.reader.contains(&id) {
                let mut decision = self.decision(QueryComplexity::ExactId);
                decision.exact_id = Some(id);
                return decision;
            }
        }

        let lowered = text.to_lowercase();

        // 2. Out-of-domain probe: no anchor term and no known entity.
        if !self.contains_anchor(&lowered) && self.extractor.extract(text).is_empty() {
            return self.decision(QueryComplexity::OutOfDomain);
        }

        // 3. Complexity split on question indicators.
        if self.indicator_count(&lowered) >= 1 {
            self.decision(QueryComplexity::Complex)
        } else {
            self.decision(QueryComplexity::Simple)
        }
    }

    fn contains_anchor(&self, lowered: &str) -> bool {
        let words: HashSet<&str> = lowered.split_whitespace().collect();
        let anchors = self.anchors.read();
        anchors.iter().any(|anchor| {
            if anchor.contains(' ') {
                lowered.contains(anchor.as_str())
            } else {
                words.contains(anchor.as_str())
                    // Plural subject of a known anchor still anchors.
                    || words.contains(format!("{anchor}s").as_str())
            }
        })
    }

    fn indicator_count(&self, lowered: &str) -> usize {
        let words: HashSet<&str> = lowered.split_whitespace().collect();
        let mut count = COMPLEXITY_INDICATORS
            .iter()
            .filter(|indicator| {
                if indicator.contains(' ') {
                    lowered.contains(**indicator)
                } else {
                    words.contains(**indicator)
                }
            })
            .count();

        // Pluralised anchors read as multi-incident subjects ("timeouts",
        // "failures across merchants").
        let anchors = self.anchors.read();
        if words.iter().any(|w| {
            w.len() > 3
                && w.ends_with('s')
                && anchors.contains(&w[..w.len() - 1])
                && !anchors.contains(*w)
        }) {
            count += 1;
        }

        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use incident_core::Incident;
    use std::collections::HashMap;

    struct FixedReader {
        incidents: HashMap<String, Incident>,
        tags: Vec<String>,
    }

    impl FixedReader {
        fn with_ids(ids: &[&str]) -> Self {
            let incidents = ids
                .iter()
                .map(|id| {
                    (
                        id.to_string(),
                        Incident {
                            id: id.to_string(),
                            title: "UPI timeout on Axis Bank".into(),
                            description: "UPI collect requests against Axis Bank began timing \
                                          out after the evening deploy window."
                                .into(),
                            resolution: "Rolled back the connector and drained the retry queue."
                                .into(),
                            tags: vec!["upi".into()],
                            created_at: Utc::now(),
                            resolved_by: "oncall@example.com".into(),
                            category: None,
                            priority: None,
                        },
                    )
                })
                .collect();
            Self {
                incidents,
                tags: vec!["upi".into(), "mandates".into()],
            }
        }
    }

    impl IncidentReader for FixedReader {
        fn get(&self, id: &str) -> Option<Incident> {
            self.incidents.get(id).cloned()
        }

        fn contains(&self, id: &str) -> bool {
            self.incidents.contains_key(id)
        }

        fn all_ids(&self) -> Vec<String> {
            self.incidents.keys().cloned().collect()
        }

        fn tag_vocabulary(&self) -> Vec<String> {
            self.tags.clone()
        }
    }

    fn router() -> QueryRouter {
        QueryRouter::new(
            Arc::new(FixedReader::with_ids(&["JSP-1052"])),
            Arc::new(EntityExtractor::default()),
        )
    }

    #[test]
    fn test_exact_id_direct() {
        let decision = router().classify("JSP-1052");
        assert_eq!(decision.complexity, QueryComplexity::ExactId);
        assert_eq!(decision.exact_id.as_deref(), Some("JSP-1052"));
        assert_eq!(decision.top_k, 1);
        assert!((decision.confidence_floor - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_exact_id_inside_prose() {
        let decision = router().classify("any update on JSP-1052 please");
        assert_eq!(decision.complexity, QueryComplexity::ExactId);
        assert_eq!(decision.exact_id.as_deref(), Some("JSP-1052"));
    }

    #[test]
    fn test_unknown_id_falls_through() {
        // Id-shaped but absent from the corpus: routed on content instead.
        let decision = router().classify("what happened in ABC-9999 payment run");
        assert_ne!(decision.complexity, QueryComplexity::ExactId);
    }

    #[test]
    fn test_out_of_domain() {
        let decision = router().classify("how to bake a cake");
        assert_eq!(decision.complexity, QueryComplexity::OutOfDomain);
        assert_eq!(decision.top_k, 0);
    }

    #[test]
    fn test_entity_alone_keeps_query_in_domain() {
        let decision = router().classify("anything new from pinelabs");
        assert_ne!(decision.complexity, QueryComplexity::OutOfDomain);
    }

    #[test]
    fn test_simple_vs_complex() {
        let simple = router().classify("UPI timeout");
        assert_eq!(simple.complexity, QueryComplexity::Simple);
        assert_eq!(simple.top_k, 3);

        let complex = router().classify("why do UPI payments fail at night");
        assert_eq!(complex.complexity, QueryComplexity::Complex);
        assert_eq!(complex.top_k, 8);

        let plural = router().classify("timeouts across gateway connectors");
        assert_eq!(plural.complexity, QueryComplexity::Complex);
    }

    #[test]
    fn test_default_floor_applies_to_non_exact_only() {
        let router = QueryRouter::new(
            Arc::new(FixedReader::with_ids(&["JSP-1052"])),
            Arc::new(EntityExtractor::default()),
        )
        .with_default_floor(0.5);

        let simple = router.classify("UPI timeout");
        assert!((simple.confidence_floor - 0.5).abs() < f32::EPSILON);

        // The exact-id floor is a property of the lookup, not the corpus.
        let exact = router.classify("JSP-1052");
        assert!((exact.confidence_floor - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_harvested_tags_anchor_queries() {
        let router = router();
        // "mandates" is only in the corpus tag vocabulary, not the seed set.
        let decision = router.classify("mandates stuck since morning");
        assert_ne!(decision.complexity, QueryComplexity::OutOfDomain);
    }
}
