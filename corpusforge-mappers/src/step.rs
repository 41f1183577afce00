use corpusforge_core::PipelineError;
use serde::{Deserialize, Serialize};

use crate::mapper::{AlwaysError, LengthFilter, Mapper, SplitOnBlankLine, Uppercase};

/// The closed sum type over every mapper this registry knows how to
/// build, keyed by `func` name. Per the REDESIGN FLAG against dynamic
/// `**kwargs` dispatch, an unrecognised `func` or a malformed argument
/// shape fails to deserialize — caught at config-load time rather than
/// at first invocation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "func", rename_all = "snake_case")]
pub enum MapperKind {
    LengthFilter { min: usize },
    SplitOnBlankLine,
    Uppercase,
    AlwaysError,
}

impl MapperKind {
    pub fn build(&self) -> Box<dyn Mapper> {
        match self {
            MapperKind::LengthFilter { min } => Box::new(LengthFilter { min: *min }),
            MapperKind::SplitOnBlankLine => Box::new(SplitOnBlankLine),
            MapperKind::Uppercase => Box::new(Uppercase),
            MapperKind::AlwaysError => Box::new(AlwaysError),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MapperKind::LengthFilter { .. } => "length_filter",
            MapperKind::SplitOnBlankLine => "split_on_blank_line",
            MapperKind::Uppercase => "uppercase",
            MapperKind::AlwaysError => "always_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregator {
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    ToLowercase,
}

/// Post-step reduction over a document field, e.g. counting how many
/// documents carry a non-null `lang` field. Intentionally minimal —
/// richer aggregators mirror the mapper-library non-goal.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AggregateSpec {
    pub aggregator: Aggregator,
    #[serde(default)]
    pub transform: Option<Transform>,
    pub field: String,
    pub output_field: String,
}

fn default_safe() -> bool {
    true
}

/// One mapper invocation entry in a parsed pipeline: which mapper to
/// build, whether to catch its errors per-document (`_safe`, default
/// true), whether to record per-call wall-clock (`_profile`), and an
/// optional post-step aggregation (`_aggregate`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StepConfig {
    #[serde(flatten)]
    pub kind: MapperKind,
    #[serde(rename = "_safe", default = "default_safe")]
    pub safe: bool,
    #[serde(rename = "_profile", default)]
    pub profile: bool,
    #[serde(rename = "_aggregate", default)]
    pub aggregate: Option<AggregateSpec>,
}

/// A cross-shard operation name recognised by the executor's
/// short-circuit branch. The executor hands `(shard_files,
/// base_output_path, args)` to the caller and halts; it never builds a
/// mapper for these.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GlobalStep {
    pub func: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// The fixed set of global function names. `dedup_placeholder` is the
/// only member — enough to exercise the short-circuit path without
/// implementing real cross-shard deduplication (`spec.md` §1
/// Non-goals).
pub const GLOBAL_FUNCTIONS: &[&str] = &["dedup_placeholder"];

/// One entry in a configured pipeline: a literal `"commit"` marker, a
/// global-function short-circuit, or an ordinary mapper invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Commit,
    Global(GlobalStep),
    Mapper(StepConfig),
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) if s == "commit" => Ok(Step::Commit),
            serde_json::Value::String(other) => Err(serde::de::Error::custom(format!(
                "unknown step literal '{other}', expected \"commit\""
            ))),
            serde_json::Value::Object(map) => {
                let func = map
                    .get("func")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| serde::de::Error::custom("step object missing 'func'"))?;
                if GLOBAL_FUNCTIONS.contains(&func) {
                    let global: GlobalStep = serde_json::from_value(serde_json::Value::Object(map))
                        .map_err(serde::de::Error::custom)?;
                    Ok(Step::Global(global))
                } else {
                    let step: StepConfig = serde_json::from_value(serde_json::Value::Object(map))
                        .map_err(serde::de::Error::custom)?;
                    Ok(Step::Mapper(step))
                }
            }
            other => Err(serde::de::Error::custom(format!(
                "step must be \"commit\" or a mapper object, got {other:?}"
            ))),
        }
    }
}

impl Step {
    pub fn parse_pipeline(yaml: &str) -> corpusforge_core::Result<Vec<Step>> {
        serde_yaml::from_str(yaml).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Config files may hold one pipeline per dataset, keyed by source
    /// name, instead of a single flat step list. If the document's root
    /// is a mapping, `source_name` selects the pipeline within it; a
    /// root sequence is treated as an already-selected single pipeline,
    /// matching `original_source/ray_processing/process.py`'s
    /// `config_data[source_name]` lookup.
    pub fn parse_pipeline_for_source(yaml: &str, source_name: &str) -> corpusforge_core::Result<Vec<Step>> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(|e| PipelineError::Config(e.to_string()))?;
        let steps_value = match value {
            serde_yaml::Value::Mapping(ref map) => map
                .get(source_name)
                .ok_or_else(|| PipelineError::Config(format!("source '{source_name}' not found in pipeline config")))?
                .clone(),
            sequence => sequence,
        };
        serde_yaml::from_value(steps_value).map_err(|e| PipelineError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commit_literal() {
        let steps = Step::parse_pipeline("- commit").unwrap();
        assert_eq!(steps, vec![Step::Commit]);
    }

    #[test]
    fn parses_mapper_step_with_args() {
        let steps = Step::parse_pipeline("- func: length_filter\n  min: 10").unwrap();
        assert_eq!(
            steps,
            vec![Step::Mapper(StepConfig {
                kind: MapperKind::LengthFilter { min: 10 },
                safe: true,
                profile: false,
                aggregate: None,
            })]
        );
    }

    #[test]
    fn parses_global_step() {
        let steps = Step::parse_pipeline("- func: dedup_placeholder\n  args:\n    window: 5").unwrap();
        match &steps[0] {
            Step::Global(g) => assert_eq!(g.func, "dedup_placeholder"),
            other => panic!("expected global step, got {other:?}"),
        }
    }

    #[test]
    fn selects_named_source_from_a_keyed_config() {
        let yaml = "dcnlp_pool:\n  - func: uppercase\nother_pool:\n  - func: length_filter\n    min: 5\n";
        let steps = Step::parse_pipeline_for_source(yaml, "dcnlp_pool").unwrap();
        assert_eq!(
            steps,
            vec![Step::Mapper(StepConfig {
                kind: MapperKind::Uppercase,
                safe: true,
                profile: false,
                aggregate: None,
            })]
        );
    }

    #[test]
    fn missing_source_in_a_keyed_config_is_a_config_error() {
        let yaml = "dcnlp_pool:\n  - func: uppercase\n";
        let err = Step::parse_pipeline_for_source(yaml, "nonexistent").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn a_flat_sequence_is_used_as_is_regardless_of_source_name() {
        let steps = Step::parse_pipeline_for_source("- commit", "anything").unwrap();
        assert_eq!(steps, vec![Step::Commit]);
    }

    #[test]
    fn rejects_unknown_mapper_func_at_parse_time() {
        let err = Step::parse_pipeline("- func: not_a_real_mapper").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn parses_step_with_safe_and_aggregate_overrides() {
        let yaml = "- func: uppercase\n  _safe: false\n  _profile: true\n  _aggregate:\n    aggregator: count\n    transform: to_lowercase\n    field: lang\n    output_field: lang_count\n";
        let steps = Step::parse_pipeline(yaml).unwrap();
        match &steps[0] {
            Step::Mapper(cfg) => {
                assert!(!cfg.safe);
                assert!(cfg.profile);
                assert_eq!(
                    cfg.aggregate,
                    Some(AggregateSpec {
                        aggregator: Aggregator::Count,
                        transform: Some(Transform::ToLowercase),
                        field: "lang".to_string(),
                        output_field: "lang_count".to_string(),
                    })
                );
            }
            other => panic!("expected mapper step, got {other:?}"),
        }
    }
}
