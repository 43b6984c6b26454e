use futures::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::classifier::UrlClassifier;
use super::error::FetchError;
use super::fetcher::ImageFetcher;
use super::model::{Candidate, FetchResult, FieldMap, FieldOutcome, FieldValue, Record};

/// Updated field map of one record plus what happened to each candidate field.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRewrite {
    pub fields: FieldMap,
    pub outcomes: Vec<FieldOutcome>,
}

impl RecordRewrite {
    /// True when at least one field now points at a local copy.
    pub fn changed(&self) -> bool {
        self.outcomes.iter().any(FieldOutcome::is_success)
    }
}

pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

/// Rewrites the remote image fields of exactly one record.
///
/// Distinct URLs of the record are fetched concurrently, up to `concurrency` at once.
#[derive(Clone)]
pub struct FieldRewriter {
    classifier: UrlClassifier,
    fetcher: Arc<dyn ImageFetcher>,
    concurrency: usize,
}

impl FieldRewriter {
    pub fn new(classifier: UrlClassifier, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            classifier,
            fetcher,
            concurrency: DEFAULT_FETCH_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn classifier(&self) -> &UrlClassifier {
        &self.classifier
    }

    /// Scalar fields that should be migrated, in field-map order.
    pub fn candidates(&self, fields: &FieldMap) -> Vec<Candidate> {
        fields
            .iter()
            .filter_map(|(name, value)| {
                let raw = value.as_scalar()?.trim();
                self.classifier
                    .is_remote_image_candidate(raw)
                    .then(|| Candidate {
                        field_name: name.clone(),
                        original_url: raw.to_string(),
                    })
            })
            .collect()
    }

    pub async fn rewrite(&self, record: &Record) -> RecordRewrite {
        let rewrite = self.rewrite_fields(&record.fields).await;
        if !rewrite.outcomes.is_empty() {
            debug!(
                record_id = record.id,
                candidates = rewrite.outcomes.len(),
                migrated = rewrite.outcomes.iter().filter(|o| o.is_success()).count(),
                "record rewritten"
            );
        }
        rewrite
    }

    /// Rewrite a bare field map, e.g. a submission that has not been stored yet.
    pub async fn rewrite_fields(&self, fields: &FieldMap) -> RecordRewrite {
        let candidates = self.candidates(fields);

        // Same URL in several fields of one record is fetched once.
        let mut distinct: Vec<&str> = Vec::new();
        for candidate in &candidates {
            if !distinct.contains(&candidate.original_url.as_str()) {
                distinct.push(&candidate.original_url);
            }
        }
        let fetched: HashMap<String, FetchResult> = stream::iter(distinct)
            .map(|url| async move { (url.to_string(), self.fetch_local(url).await) })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut updated = fields.clone();
        let mut outcomes = Vec::new();
        for candidate in candidates {
            let result = match fetched.get(&candidate.original_url) {
                Some(result) => result.clone(),
                None => continue,
            };

            match result {
                Ok(stored) => {
                    if let Some(slot) = updated.get_mut(&candidate.field_name) {
                        *slot = FieldValue::Scalar(stored.url.clone());
                    }
                    outcomes.push(FieldOutcome::migrated(candidate, stored.url));
                }
                Err(err) => {
                    warn!(
                        field = %candidate.field_name,
                        url = %candidate.original_url,
                        reason = ?err.reason(),
                        error = %err,
                        "image not migrated; keeping original value"
                    );
                    outcomes.push(FieldOutcome::failed(candidate, &err));
                }
            }
        }

        RecordRewrite {
            fields: updated,
            outcomes,
        }
    }

    /// Fetch one URL and make sure the stored copy is recognised as local, otherwise
    /// the next pass would pick the rewritten value up as a remote candidate again.
    async fn fetch_local(&self, url: &str) -> FetchResult {
        let stored = self.fetcher.fetch(url).await?;
        if self.classifier.is_local_reference(&stored.url) {
            Ok(stored)
        } else {
            Err(FetchError::Storage(format!(
                "stored url {} does not contain the local marker {:?}",
                stored.url,
                self.classifier.local_marker()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::error::{FailureReason, FetchError};
    use crate::migration::testing::ScriptedFetcher;
    use serde_json::json;

    fn record(id: i64, raw: serde_json::Value) -> Record {
        Record::new(id, serde_json::from_value(raw).unwrap())
    }

    fn rewriter(fetcher: Arc<ScriptedFetcher>) -> FieldRewriter {
        FieldRewriter::new(UrlClassifier::default(), fetcher)
    }

    #[tokio::test]
    async fn rewrites_only_remote_image_scalars() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .ok("http://ext.example/cat.jpg", "https://me.test/uploads/cat.jpg"),
        );
        let r = rewriter(fetcher.clone());
        let rec = record(
            1,
            json!({
                "name": "Ada",
                "photo": "  http://ext.example/cat.jpg ",
                "local": "/uploads/already-local.png",
                "gallery": ["http://ext.example/dog.jpg"],
                "empty": null,
                "age": 36
            }),
        );

        let out = r.rewrite(&rec).await;

        assert!(out.changed());
        assert_eq!(fetcher.calls(), vec!["http://ext.example/cat.jpg"]);
        assert_eq!(
            out.fields["photo"],
            FieldValue::Scalar("https://me.test/uploads/cat.jpg".into())
        );
        assert_eq!(out.fields["name"], rec.fields["name"]);
        assert_eq!(out.fields["local"], rec.fields["local"]);
        assert_eq!(out.fields["gallery"], rec.fields["gallery"]);
        let keys: Vec<_> = out.fields.keys().cloned().collect();
        let original: Vec<_> = rec.fields.keys().cloned().collect();
        assert_eq!(keys, original);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_original_value() {
        let fetcher = Arc::new(ScriptedFetcher::default().err(
            "http://ext.example/cat.jpg",
            FetchError::Network("404 Not Found".into()),
        ));
        let r = rewriter(fetcher);
        let rec = record(1, json!({"photo": "http://ext.example/cat.jpg"}));

        let out = r.rewrite(&rec).await;

        assert!(!out.changed());
        assert_eq!(out.fields, rec.fields);
        assert_eq!(out.outcomes.len(), 1);
        assert_eq!(out.outcomes[0].reason, Some(FailureReason::Network));
        assert_eq!(out.outcomes[0].original_url, "http://ext.example/cat.jpg");
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .ok("https://ext.example/a.png", "https://me.test/uploads/a.png"),
        );
        let r = rewriter(fetcher.clone());
        let rec = record(7, json!({"a": "https://ext.example/a.png", "b": "text"}));

        let first = r.rewrite(&rec).await;
        let again = r
            .rewrite(&Record::new(rec.id, first.fields.clone()))
            .await;

        assert_eq!(again.fields, first.fields);
        assert!(again.outcomes.is_empty());
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_urls_fetch_once() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .ok("https://ext.example/a.png", "https://me.test/uploads/a.png"),
        );
        let r = rewriter(fetcher.clone());
        let rec = record(
            2,
            json!({"front": "https://ext.example/a.png", "back": "https://ext.example/a.png"}),
        );

        let out = r.rewrite(&rec).await;

        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(out.outcomes.len(), 2);
        assert_eq!(out.fields["front"], out.fields["back"]);
    }

    #[tokio::test]
    async fn stored_url_outside_local_marker_is_a_storage_failure() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .ok("https://ext.example/a.png", "https://cdn.test/media/a.png"),
        );
        let r = rewriter(fetcher);
        let rec = record(3, json!({"pic": "https://ext.example/a.png"}));

        let out = r.rewrite(&rec).await;

        assert!(!out.changed());
        assert_eq!(out.fields, rec.fields);
        assert_eq!(out.outcomes.len(), 1);
        assert_eq!(out.outcomes[0].reason, Some(FailureReason::Storage));
    }

    #[tokio::test]
    async fn distinct_urls_are_all_fetched_with_bounded_concurrency() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .ok("https://ext.example/a.png", "https://me.test/uploads/a.png")
                .ok("https://ext.example/b.png", "https://me.test/uploads/b.png")
                .ok("https://ext.example/c.png", "https://me.test/uploads/c.png"),
        );
        let r = rewriter(fetcher.clone()).with_concurrency(2);
        let rec = record(
            4,
            json!({
                "a": "https://ext.example/a.png",
                "b": "https://ext.example/b.png",
                "c": "https://ext.example/c.png",
                "again": "https://ext.example/a.png"
            }),
        );

        let out = r.rewrite(&rec).await;

        assert_eq!(fetcher.calls().len(), 3);
        assert_eq!(out.outcomes.len(), 4);
        assert!(out.outcomes.iter().all(FieldOutcome::is_success));
        assert_eq!(
            out.fields["c"],
            FieldValue::Scalar("https://me.test/uploads/c.png".into())
        );
        assert_eq!(out.fields["again"], out.fields["a"]);
    }

    #[test]
    fn candidates_follow_field_order() {
        let r = rewriter(Arc::new(ScriptedFetcher::default()));
        let fields: FieldMap = serde_json::from_value(json!({
            "z": "https://ext.example/z.gif",
            "a": "https://ext.example/a.bmp",
            "m": "https://ext.example/m.txt"
        }))
        .unwrap();
        let names: Vec<_> = r
            .candidates(&fields)
            .into_iter()
            .map(|c| c.field_name)
            .collect();
        assert_eq!(names, vec!["z", "a"]);
    }
}
