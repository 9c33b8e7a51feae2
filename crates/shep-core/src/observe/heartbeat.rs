use std::sync::Arc;

use chrono::Utc;

use super::Writer;
use crate::run::RunRepository;
use crate::workflow::Node;

/// Marks the run record with the node that is starting, so status readers
/// see progress and heartbeat age.
pub struct Heartbeat {
    run_id: String,
    runs: Option<Arc<dyn RunRepository>>,
    writer: Writer,
}

impl Heartbeat {
    pub(crate) fn new(run_id: &str, runs: Option<Arc<dyn RunRepository>>, writer: Writer) -> Self {
        Self {
            run_id: run_id.to_string(),
            runs,
            writer,
        }
    }

    pub fn report_node_start(&self, node: Node) {
        let Some(runs) = self.runs.clone() else {
            return;
        };
        let run_id = self.run_id.clone();
        let at = Utc::now();
        self.writer.submit("heartbeat", move || {
            runs.update_heartbeat(&run_id, &format!("node:{node}"), at)
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Db;
    use crate::observe::{RunContext, Sinks};
    use crate::run::{AgentRunRecord, RunRepository, RunRequest, SqliteRunRepository};
    use crate::workflow::Node;
    use std::sync::Arc;

    #[tokio::test]
    async fn node_start_updates_result_and_heartbeat() {
        let runs = Arc::new(SqliteRunRepository::new(Db::open_in_memory().unwrap()));
        let rec = AgentRunRecord::pending(RunRequest {
            feature_id: "f".into(),
            repository_path: "/r".into(),
            spec_dir: "/s".into(),
            worktree_path: None,
            approval_gates: None,
            push: false,
            open_pr: false,
        });
        runs.create(&rec).unwrap();

        let ctx = RunContext::new(
            rec.id.clone(),
            Sinks {
                runs: Some(runs.clone()),
                ..Default::default()
            },
        );
        ctx.heartbeat.report_node_start(Node::Research);
        ctx.drain().await;

        let got = runs.find_by_id(&rec.id).unwrap().unwrap();
        assert_eq!(got.result.as_deref(), Some("node:research"));
        assert!(got.last_heartbeat.is_some());
    }
}
