use std::time::Instant;

use corpusforge_core::{Document, PipelineError, Result};
use serde::{Deserialize, Serialize};

use crate::step::{AggregateSpec, Aggregator, StepConfig, Transform};

/// One step's statistics, matching `spec.md` §3's "Step statistic"
/// record `{name, pages_in, pages_out, removed, kept, split, errors,
/// secs, secs_per_page, workers}`: `secs` is the sum of per-document
/// call latencies, distinct from `total_secs`, the wall-clock of the
/// whole step; `secs_per_page` is `secs` averaged over `pages_in`, and
/// `workers` is the configured fan-out width the step ran with (`1` for
/// the in-process sequential path this crate implements).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStats {
    pub name: String,
    pub pages_in: usize,
    pub pages_out: usize,
    pub errors: usize,
    pub removed: usize,
    pub kept: usize,
    pub split: usize,
    pub secs: f64,
    pub secs_per_page: f64,
    pub workers: usize,
    pub total_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<serde_json::Value>,
}

/// Runs one mapper step over `docs` sequentially, classifying each
/// invocation's output length per the classification law (`0 →
/// removed`, `1 → kept`, `≥2 → split`) and tallying per-document
/// exceptions into `errors`. When `step.safe` is false, the first
/// mapper error is propagated immediately instead of being counted and
/// skipped. If every input document errors, the step is fatal
/// regardless of `safe`.
pub fn run_step(shard: &str, step: &StepConfig, docs: &[Document]) -> Result<(Vec<Document>, StepStats)> {
    let mapper = step.kind.build();
    let name = step.kind.name().to_string();
    let total_start = Instant::now();

    let mut out = Vec::with_capacity(docs.len());
    let mut stats = StepStats {
        name: name.clone(),
        pages_in: docs.len(),
        pages_out: 0,
        errors: 0,
        removed: 0,
        kept: 0,
        split: 0,
        secs: 0.0,
        secs_per_page: 0.0,
        // No subprocess fan-out is implemented (the per-shard pool of
        // W workers `spec.md` §4.5 describes is modeled abstractly,
        // per the Non-goals); every step runs on a single in-process
        // worker.
        workers: 1,
        total_secs: 0.0,
        aggregate: None,
    };

    for doc in docs {
        let call_start = Instant::now();
        let result = mapper.call(doc);
        if step.profile {
            stats.secs += call_start.elapsed().as_secs_f64();
        }
        match result {
            Ok(mut produced) => {
                match produced.len() {
                    0 => stats.removed += 1,
                    1 => stats.kept += 1,
                    _ => stats.split += 1,
                }
                out.append(&mut produced);
            }
            Err(e) => {
                stats.errors += 1;
                if !step.safe {
                    return Err(e);
                }
            }
        }
    }

    stats.pages_out = out.len();
    stats.total_secs = total_start.elapsed().as_secs_f64();
    stats.secs_per_page = if stats.pages_in > 0 { stats.secs / stats.pages_in as f64 } else { 0.0 };

    if stats.pages_in > 0 && stats.errors == stats.pages_in {
        return Err(PipelineError::FatalShard {
            shard: shard.to_string(),
            step: name,
            reason: "all documents errored on this step".to_string(),
        });
    }

    if let Some(spec) = &step.aggregate {
        stats.aggregate = Some(run_aggregate(spec, &out));
    }

    Ok((out, stats))
}

/// A minimal post-step reduction: counts documents carrying a non-null
/// `spec.field`, optionally lowercasing string values before counting.
/// Sufficient to exercise the aggregation code path end to end; richer
/// aggregators mirror the mapper-library non-goal.
fn run_aggregate(spec: &AggregateSpec, docs: &[Document]) -> serde_json::Value {
    let mut count = 0usize;
    for doc in docs {
        if let Some(value) = doc.get(&spec.field) {
            let present = match (value.as_str(), &spec.transform) {
                (Some(text), Some(Transform::ToLowercase)) => !text.to_lowercase().is_empty(),
                (Some(text), None) => !text.is_empty(),
                (None, _) => !value.is_null(),
            };
            if present {
                count += 1;
            }
        }
    }
    match spec.aggregator {
        Aggregator::Count => serde_json::json!({ spec.output_field.clone(): count }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::MapperKind;

    fn step(kind: MapperKind) -> StepConfig {
        StepConfig {
            kind,
            safe: true,
            profile: false,
            aggregate: None,
        }
    }

    #[test]
    fn classification_law_holds_across_removed_kept_split() {
        let docs = vec![
            Document::with_text("short"),
            Document::with_text("x\n\ny"),
            Document::with_text("a fine paragraph of reasonable length"),
        ];
        let cfg = step(MapperKind::SplitOnBlankLine);
        let (out, stats) = run_step("shard-0", &cfg, &docs).unwrap();
        assert_eq!(stats.split, 1);
        assert_eq!(stats.kept, 2);
        assert_eq!(stats.removed, 0);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn length_filter_counts_removed_documents() {
        let docs = vec![Document::with_text("hi"), Document::with_text("a longer document")];
        let cfg = step(MapperKind::LengthFilter { min: 5 });
        let (out, stats) = run_step("shard-0", &cfg, &docs).unwrap();
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.kept, 1);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn safe_mode_counts_errors_without_propagating() {
        let docs = vec![Document::with_text("a"), Document::with_text("b")];
        let mut cfg = step(MapperKind::AlwaysError);
        cfg.safe = true;
        // All docs error, which is itself the fatal case — use a mix
        // instead by running length_filter over one doc that survives
        // isn't possible for always_error, so assert the fatal path.
        let err = run_step("shard-0", &cfg, &docs).unwrap_err();
        assert!(matches!(err, PipelineError::FatalShard { .. }));
    }

    #[test]
    fn unsafe_mode_propagates_first_error_immediately() {
        let docs = vec![Document::with_text("a")];
        let mut cfg = step(MapperKind::AlwaysError);
        cfg.safe = false;
        let err = run_step("shard-0", &cfg, &docs).unwrap_err();
        assert!(matches!(err, PipelineError::Mapper { .. }));
    }

    #[test]
    fn total_secs_is_whole_step_wallclock_not_call_sum() {
        let docs = vec![Document::with_text("hello world")];
        let mut cfg = step(MapperKind::Uppercase);
        cfg.profile = true;
        let (_out, stats) = run_step("shard-0", &cfg, &docs).unwrap();
        assert!(stats.total_secs >= stats.secs);
    }

    #[test]
    fn aggregate_counts_non_null_field_values() {
        let mut doc_a = Document::with_text("a");
        doc_a.0.insert("lang".to_string(), serde_json::Value::from("EN"));
        let mut doc_b = Document::with_text("b");
        doc_b.0.insert("lang".to_string(), serde_json::Value::Null);

        let mut cfg = step(MapperKind::Uppercase);
        cfg.aggregate = Some(AggregateSpec {
            aggregator: Aggregator::Count,
            transform: Some(Transform::ToLowercase),
            field: "lang".to_string(),
            output_field: "lang_count".to_string(),
        });

        let (_out, stats) = run_step("shard-0", &cfg, &[doc_a, doc_b]).unwrap();
        assert_eq!(stats.aggregate, Some(serde_json::json!({ "lang_count": 1 })));
    }
}
