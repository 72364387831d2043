//! Trial observations produced by the task runner.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const TASK_CHOICE: &str = "choice";
pub const TASK_ADD: &str = "add";
pub const TASK_GAZE: &str = "gaze_perception";

/// A button index (touch layouts) or a key identifier (keyboard layouts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrialResponse {
    Index(i64),
    Key(String),
}

impl TrialResponse {
    pub fn is_index(&self, index: i64) -> bool {
        matches!(self, TrialResponse::Index(i) if *i == index)
    }

    pub fn is_key(&self, key: &str) -> bool {
        matches!(self, TrialResponse::Key(k) if k.eq_ignore_ascii_case(key))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Empty for records the trial library emits outside any task (instructions, rest screens).
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub response: Option<TrialResponse>,
    /// Response time in milliseconds; `null` when the trial timed out.
    #[serde(default)]
    pub rt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gaze: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,
    /// Anything else the trial library attached (stimulus, trial_index, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TrialRecord {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            response: None,
            rt: None,
            points: None,
            model: None,
            gaze: None,
            delay: None,
            extra: Map::new(),
        }
    }

    pub fn with_response(mut self, response: TrialResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_rt(mut self, rt: f64) -> Self {
        self.rt = Some(rt);
        self
    }

    pub fn with_points(mut self, points: i64) -> Self {
        self.points = Some(points);
        self
    }

    pub fn with_gaze(mut self, model: impl Into<String>, gaze: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self.gaze = Some(gaze.into());
        self
    }

    pub fn is_task(&self, task: &str) -> bool {
        self.task == task
    }
}

/// Ordered trial records for one session, in presentation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultSet(Vec<TrialRecord>);

impl ResultSet {
    pub fn new(records: Vec<TrialRecord>) -> Self {
        Self(records)
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrialRecord> {
        self.0.iter()
    }

    pub(crate) fn push(&mut self, record: TrialRecord) {
        self.0.push(record);
    }
}

impl From<Vec<TrialRecord>> for ResultSet {
    fn from(records: Vec<TrialRecord>) -> Self {
        Self(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_survive_in_extra() {
        let record: TrialRecord = serde_json::from_value(json!({
            "task": "gaze_perception",
            "response": "f",
            "rt": 512.5,
            "gaze": "L10",
            "trial_index": 7
        }))
        .unwrap();

        assert_eq!(record.response, Some(TrialResponse::Key("f".into())));
        assert_eq!(record.gaze.as_deref(), Some("L10"));
        assert_eq!(record.extra.get("trial_index"), Some(&json!(7)));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["trial_index"], json!(7));
    }

    #[test]
    fn null_rt_and_numeric_response() {
        let record: TrialRecord =
            serde_json::from_value(json!({"task": "choice", "response": 1, "rt": null})).unwrap();
        assert!(record.response.as_ref().unwrap().is_index(1));
        assert_eq!(record.rt, None);
    }

    #[test]
    fn record_without_task_is_kept() {
        let record: TrialRecord = serde_json::from_value(json!({
            "trial_type": "html-keyboard-response",
            "rt": 2100,
            "stimulus": "<h1>Gaze Perception Task</h1>"
        }))
        .unwrap();

        assert_eq!(record.task, "");
        assert!(!record.is_task(TASK_GAZE));
        assert_eq!(record.rt, Some(2100.0));
        assert!(record.extra.contains_key("trial_type"));
    }
}
