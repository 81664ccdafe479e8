use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use weft_core::state::StateStore;
use weft_core::types::RunId;

/// Record of a single unit invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    /// Which unit ran.
    pub unit: String,
    /// The key its output was written under.
    pub output_key: String,
    /// Whether the backend produced a value for that key.
    pub wrote_value: bool,
    /// Invocation time in milliseconds.
    pub elapsed_ms: u64,
    /// When the invocation completed.
    pub completed_at: DateTime<Utc>,
}

/// Result of one pipeline run: the final state plus per-unit records in
/// execution order (parallel branches are recorded in branch order).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub records: Vec<UnitRecord>,
    pub state: StateStore,
    pub total_elapsed_ms: u64,
}

impl RunReport {
    /// The final value under `key`, if any.
    pub fn output(&self, key: &str) -> Option<&serde_json::Value> {
        self.state.get(key)
    }

    /// The final string value under `key`, if any.
    pub fn output_str(&self, key: &str) -> Option<&str> {
        self.state.get_str(key)
    }

    /// How many times `unit` was invoked during the run.
    pub fn invocations(&self, unit: &str) -> usize {
        self.records.iter().filter(|r| r.unit == unit).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_accessors() {
        let mut state = StateStore::new();
        state.set_str("final_blog", "Bees!");

        let report = RunReport {
            run_id: RunId::new(),
            records: vec![
                UnitRecord {
                    unit: "Critic".into(),
                    output_key: "critique".into(),
                    wrote_value: true,
                    elapsed_ms: 3,
                    completed_at: Utc::now(),
                },
                UnitRecord {
                    unit: "Critic".into(),
                    output_key: "critique".into(),
                    wrote_value: true,
                    elapsed_ms: 2,
                    completed_at: Utc::now(),
                },
            ],
            state,
            total_elapsed_ms: 9,
        };

        assert_eq!(report.output_str("final_blog"), Some("Bees!"));
        assert_eq!(report.output("missing"), None);
        assert_eq!(report.invocations("Critic"), 2);
        assert_eq!(report.invocations("Writer"), 0);
    }
}
