use corpusforge_core::{Document, PipelineError, Result};
use corpusforge_mappers::StepStats;
use serde::{Deserialize, Serialize};

/// One entry in a shard's stats JSONL file. Per `spec.md` §6, every
/// entry is a flat JSON object whose `name` field is either one of the
/// three reserved bracketing markers (`process_setup`, `commit`,
/// `process_finished`) or, for an ordinary step entry, the mapper's own
/// function name — `StepStats` already carries that as its `name`
/// field, so a step entry serializes as exactly that struct with no
/// extra wrapper. Dispatch on deserialize reads the same `name` value to
/// tell a bracket marker from a step entry, matching the "all others are
/// step names" reservation.
#[derive(Debug, Clone, PartialEq)]
pub enum StatRecord {
    ProcessSetup { graceful_continuation: bool },
    Step(StepStats),
    Commit,
    ProcessFinished { pages_in: usize, pages_out: usize },
}

const NAME_PROCESS_SETUP: &str = "process_setup";
const NAME_COMMIT: &str = "commit";
const NAME_PROCESS_FINISHED: &str = "process_finished";

impl Serialize for StatRecord {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            StatRecord::ProcessSetup { graceful_continuation } => {
                let mut map = serde_json::Map::new();
                map.insert("name".to_string(), serde_json::Value::String(NAME_PROCESS_SETUP.to_string()));
                map.insert("graceful_continuation".to_string(), serde_json::Value::Bool(*graceful_continuation));
                map.serialize(serializer)
            }
            StatRecord::Step(stats) => stats.serialize(serializer),
            StatRecord::Commit => {
                let mut map = serde_json::Map::new();
                map.insert("name".to_string(), serde_json::Value::String(NAME_COMMIT.to_string()));
                map.serialize(serializer)
            }
            StatRecord::ProcessFinished { pages_in, pages_out } => {
                let mut map = serde_json::Map::new();
                map.insert("name".to_string(), serde_json::Value::String(NAME_PROCESS_FINISHED.to_string()));
                map.insert("pages_in".to_string(), serde_json::Value::from(*pages_in));
                map.insert("pages_out".to_string(), serde_json::Value::from(*pages_out));
                map.serialize(serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for StatRecord {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let name = value
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| serde::de::Error::custom("stats entry missing 'name'"))?;
        match name {
            NAME_PROCESS_SETUP => {
                let graceful_continuation = value
                    .get("graceful_continuation")
                    .and_then(|v| v.as_bool())
                    .ok_or_else(|| serde::de::Error::custom("process_setup entry missing 'graceful_continuation'"))?;
                Ok(StatRecord::ProcessSetup { graceful_continuation })
            }
            NAME_COMMIT => Ok(StatRecord::Commit),
            NAME_PROCESS_FINISHED => {
                let pages_in = value
                    .get("pages_in")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| serde::de::Error::custom("process_finished entry missing 'pages_in'"))? as usize;
                let pages_out = value
                    .get("pages_out")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| serde::de::Error::custom("process_finished entry missing 'pages_out'"))? as usize;
                Ok(StatRecord::ProcessFinished { pages_in, pages_out })
            }
            _ => {
                let stats: StepStats = serde_json::from_value(value).map_err(serde::de::Error::custom)?;
                Ok(StatRecord::Step(stats))
            }
        }
    }
}

pub fn to_document(record: &StatRecord) -> Document {
    let value = serde_json::to_value(record).expect("StatRecord always serializes");
    serde_json::from_value(value).expect("a serialized StatRecord is always a JSON object")
}

pub fn from_document(doc: &Document) -> Result<StatRecord> {
    let value = serde_json::to_value(doc).expect("Document always serializes");
    serde_json::from_value(value).map_err(|e| PipelineError::Codec {
        uri: String::new(),
        reason: format!("malformed stats entry: {e}"),
    })
}

/// `true` iff the prior run's last two entries were a process-end marker
/// immediately followed by a commit — a purely diagnostic signal that
/// the previous invocation exited cleanly after a final flush, surfaced
/// on the next run's setup record.
pub fn graceful_continuation(prior: &[StatRecord]) -> bool {
    if prior.len() < 2 {
        return false;
    }
    matches!(
        (&prior[prior.len() - 2], &prior[prior.len() - 1]),
        (StatRecord::ProcessFinished { .. }, StatRecord::Commit)
    )
}

/// The ordered list of mapper step names recorded as `Step` entries in a
/// prior stats file.
pub fn prior_step_names(prior: &[StatRecord]) -> Vec<String> {
    prior
        .iter()
        .filter_map(|r| match r {
            StatRecord::Step(s) => Some(s.name.clone()),
            _ => None,
        })
        .collect()
}

/// How many leading configured mapper steps are already satisfied by a
/// prior run's recorded step names. Per `spec.md` §4.5's resumption
/// oracle, a step is only ever skipped if the stored name at its
/// position matches the configured step's function name exactly; any
/// divergence is a fatal configuration error rather than a silent
/// restart from scratch, since it means the pipeline changed underneath
/// an in-progress checkpoint.
pub fn resolve_skip_count(shard: &str, prior_names: &[String], configured_names: &[String]) -> Result<usize> {
    if prior_names.len() > configured_names.len() {
        return Err(PipelineError::Config(format!(
            "shard {shard}: prior stats record {} steps but only {} are configured",
            prior_names.len(),
            configured_names.len()
        )));
    }
    for (i, (prior, configured)) in prior_names.iter().zip(configured_names.iter()).enumerate() {
        if prior != configured {
            return Err(PipelineError::Config(format!(
                "shard {shard}: step {i} in prior stats is '{prior}' but configured pipeline has '{configured}' \
                 at that position"
            )));
        }
    }
    Ok(prior_names.len())
}
