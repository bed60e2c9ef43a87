//! Lifecycle of tool calls announced mid-stream.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Started,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolExecution {
    pub id: String,
    pub tool: String,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub status: ToolStatus,
}

/// Executions of the current turn, in announcement order.
///
/// Ends are correlated by run id when the server supplies one. Without it the
/// first still-started execution of the same tool is closed. Two concurrent
/// calls to one tool that both lack run ids can therefore be closed in the
/// wrong order; the agent runner is expected to supply run ids.
#[derive(Debug, Clone, Default)]
pub struct ToolTracker {
    executions: Vec<ToolExecution>,
}

impl ToolTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a new execution. Its id is the server's run id unless that is
    /// missing or already taken, in which case a unique one is synthesized.
    pub fn start(
        &mut self,
        tool: String,
        input: Option<Value>,
        run_id: Option<String>,
    ) -> &ToolExecution {
        let id = match run_id {
            Some(id) if !id.is_empty() && !self.contains(&id) => id,
            _ => synthesize_id(&tool),
        };
        self.executions.push(ToolExecution {
            id,
            tool,
            input,
            output: None,
            status: ToolStatus::Started,
        });
        &self.executions[self.executions.len() - 1]
    }

    /// Closes the matching execution and attaches `output`. Returns `None`
    /// (and changes nothing) when no started execution matches.
    pub fn end(
        &mut self,
        tool: &str,
        output: Option<Value>,
        run_id: Option<&str>,
    ) -> Option<&ToolExecution> {
        let index = match run_id
            .filter(|id| !id.is_empty())
            .and_then(|id| self.executions.iter().position(|e| e.id == id))
        {
            // A known id never falls back to name matching, so a repeated
            // end event cannot close a different execution.
            Some(index) => {
                (self.executions[index].status == ToolStatus::Started).then_some(index)
            }
            None => self
                .executions
                .iter()
                .position(|e| e.tool == tool && e.status == ToolStatus::Started),
        }?;

        let execution = &mut self.executions[index];
        execution.status = ToolStatus::Ended;
        execution.output = output;
        Some(execution)
    }

    pub fn executions(&self) -> &[ToolExecution] {
        &self.executions
    }

    /// Executions still running, e.g. for per-tool "thinking" indicators.
    pub fn active(&self) -> impl Iterator<Item = &ToolExecution> {
        self.executions
            .iter()
            .filter(|e| e.status == ToolStatus::Started)
    }

    pub fn clear(&mut self) {
        self.executions.clear();
    }

    fn contains(&self, id: &str) -> bool {
        self.executions.iter().any(|e| e.id == id)
    }
}

fn synthesize_id(tool: &str) -> String {
    format!(
        "{tool}-{}-{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_and_end_by_run_id() {
        let mut tracker = ToolTracker::new();
        tracker.start("addExperience".to_string(), None, Some("r1".to_string()));

        let ended = tracker
            .end("addExperience", Some(json!({"success": true})), Some("r1"))
            .unwrap();
        assert_eq!(ended.id, "r1");
        assert_eq!(ended.status, ToolStatus::Ended);
        assert_eq!(ended.output, Some(json!({"success": true})));
        assert_eq!(tracker.active().count(), 0);
        assert_eq!(tracker.executions().len(), 1);
    }

    #[test]
    fn test_same_tool_without_run_ids_gets_distinct_ids() {
        let mut tracker = ToolTracker::new();
        let first = tracker.start("getResume".to_string(), None, None).id.clone();
        let second = tracker.start("getResume".to_string(), None, None).id.clone();

        assert_ne!(first, second);
        assert!(first.starts_with("getResume-"));
        assert_eq!(tracker.active().count(), 2);
    }

    #[test]
    fn test_end_without_run_id_closes_first_started_of_that_tool() {
        let mut tracker = ToolTracker::new();
        tracker.start("updateSummary".to_string(), None, None);
        tracker.start("getResume".to_string(), None, None);
        tracker.start("getResume".to_string(), None, None);

        tracker.end("getResume", Some(json!(1)), None).unwrap();

        let statuses: Vec<_> = tracker.executions().iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![ToolStatus::Started, ToolStatus::Ended, ToolStatus::Started]
        );

        tracker.end("getResume", Some(json!(2)), None).unwrap();
        assert_eq!(tracker.executions()[2].output, Some(json!(2)));
        assert!(tracker.end("getResume", None, None).is_none());
    }

    #[test]
    fn test_unknown_run_id_falls_back_to_tool_name() {
        let mut tracker = ToolTracker::new();
        tracker.start("listResumes".to_string(), None, None);

        let ended = tracker.end("listResumes", None, Some("late-id")).unwrap();
        assert_eq!(ended.status, ToolStatus::Ended);
    }

    #[test]
    fn test_end_transitions_exactly_once() {
        let mut tracker = ToolTracker::new();
        tracker.start("addExperience".to_string(), None, Some("r1".to_string()));
        tracker.start("addExperience".to_string(), None, Some("r2".to_string()));

        assert!(tracker.end("addExperience", Some(json!("a")), Some("r1")).is_some());
        // A duplicate end for r1 must not close r2.
        assert!(tracker.end("addExperience", Some(json!("b")), Some("r1")).is_none());

        assert_eq!(tracker.executions()[0].output, Some(json!("a")));
        assert_eq!(tracker.executions()[1].status, ToolStatus::Started);
    }

    #[test]
    fn test_unmatched_end_is_dropped() {
        let mut tracker = ToolTracker::new();
        tracker.start("getResume".to_string(), None, Some("r1".to_string()));
        assert!(tracker.end("updateSkills", None, None).is_none());
        assert_eq!(tracker.active().count(), 1);
    }

    #[test]
    fn test_duplicate_run_id_on_start_is_not_reused() {
        let mut tracker = ToolTracker::new();
        tracker.start("getResume".to_string(), None, Some("r1".to_string()));
        let second = tracker
            .start("getResume".to_string(), None, Some("r1".to_string()))
            .id
            .clone();
        assert_ne!(second, "r1");
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ToolStatus::Ended).unwrap(), json!("ended"));
    }
}
