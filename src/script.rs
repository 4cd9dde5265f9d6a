//! Replay scripts: a JSON list of steps run against a [`Repository`], one
//! transaction per step. Used by the binary to drive the engine end to end.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Attributes, ResourceId};
use crate::history::{HistoryResult, MutationOptions};
use crate::repo::Repository;

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Create {
        kind: String,
        attributes: Attributes,
        #[serde(default = "yes")]
        history: bool,
    },
    Update {
        kind: String,
        id: ResourceId,
        changes: Attributes,
        #[serde(default)]
        patch: bool,
        #[serde(default = "yes")]
        history: bool,
    },
    Backup {
        kind: String,
        id: ResourceId,
    },
    Revert {
        kind: String,
        id: ResourceId,
        sequence: Option<u64>,
    },
    Fetch {
        kind: String,
        id: ResourceId,
    },
    History {
        kind: String,
        id: ResourceId,
    },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Backup { .. } => "backup",
            Self::Revert { .. } => "revert",
            Self::Fetch { .. } => "fetch",
            Self::History { .. } => "history",
        }
    }
}

/// Outcome of one step. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs every step in order. A failing step is reported and does not stop
/// the ones after it.
pub async fn run(repo: &Repository, steps: Vec<Step>) -> Vec<StepReport> {
    let mut reports = Vec::with_capacity(steps.len());
    for (idx, step) in steps.into_iter().enumerate() {
        let op = step.name();
        let report = match run_step(repo, step).await {
            Ok(result) => StepReport {
                step: idx + 1,
                op,
                result: Some(result),
                error: None,
            },
            Err(e) => {
                tracing::warn!(step = idx + 1, op, error = %e, "step failed");
                StepReport {
                    step: idx + 1,
                    op,
                    result: None,
                    error: Some(e.to_string()),
                }
            }
        };
        reports.push(report);
    }
    reports
}

async fn run_step(repo: &Repository, step: Step) -> HistoryResult<Value> {
    let history = repo.history();
    let value = match step {
        Step::Create {
            kind,
            attributes,
            history: record,
        } => {
            let options = MutationOptions {
                history: record,
                ..MutationOptions::default()
            };
            serde_json::to_value(repo.create(&kind, attributes, options).await?)?
        }
        Step::Update {
            kind,
            id,
            changes,
            patch,
            history: record,
        } => {
            let options = MutationOptions {
                history: record,
                patch,
                transacting: None,
            };
            serde_json::to_value(repo.update(&kind, &id, changes, options).await?)?
        }
        Step::Backup { kind, id } => serde_json::to_value(history.backup(&kind, &id, None).await?)?,
        Step::Revert { kind, id, sequence } => {
            Value::from(history.revert(&kind, &id, sequence, None).await?)
        }
        Step::Fetch { kind, id } => serde_json::to_value(repo.fetch(&kind, &id, None).await?)?,
        Step::History { kind, id } => serde_json::to_value(history.entries(&kind, &id, None).await?)?,
    };
    Ok(value)
}
