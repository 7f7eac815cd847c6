//! Append-only feedback sink.
//!
//! Feedback is recorded for later training sweeps, never applied to
//! retrieval within the same request. Writers append under a short write
//! lock; readers clone snapshots.

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use incident_core::{Feedback, FeedbackSubmission, Result};

#[derive(Default)]
pub struct FeedbackSink {
    entries: RwLock<Vec<Feedback>>,
}

impl FeedbackSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and append one submission; returns the assigned feedback id.
    pub fn record(&self, submission: FeedbackSubmission) -> Result<String> {
        submission.validate()?;

        let feedback = Feedback {
            id: Uuid::new_v4().to_string(),
            query: submission.query,
            result_id: submission.result_id,
            rating: submission.rating,
            helpful: submission.helpful,
            feedback_text: submission.feedback_text,
            created_at: Utc::now(),
        };

        let id = feedback.id.clone();
        tracing::info!(
            feedback_id = %id,
            result_id = %feedback.result_id,
            rating = feedback.rating,
            "feedback recorded"
        );
        self.entries.write().push(feedback);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn all(&self) -> Vec<Feedback> {
        self.entries.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(rating: u8) -> FeedbackSubmission {
        FeedbackSubmission {
            query: "UPI timeout".into(),
            result_id: "JSP-1000".into(),
            rating,
            helpful: true,
            feedback_text: Some("resolution applied cleanly".into()),
        }
    }

    #[test]
    fn test_record_assigns_unique_ids() {
        let sink = FeedbackSink::new();
        let a = sink.record(submission(5)).unwrap();
        let b = sink.record(submission(4)).unwrap();

        assert_ne!(a, b);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_invalid_rating_rejected() {
        let sink = FeedbackSink::new();
        assert!(sink.record(submission(0)).is_err());
        assert!(sink.record(submission(6)).is_err());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_entries_are_immutable_snapshots() {
        let sink = FeedbackSink::new();
        sink.record(submission(3)).unwrap();

        let mut snapshot = sink.all();
        snapshot.clear();
        assert_eq!(sink.len(), 1);
    }
}
