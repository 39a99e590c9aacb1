//! C7 — Conductor: workflow graph execution, a closed edge-condition
//! mini-language, pheromone trails, and the blackboard bridge (§4.7).

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

use crate::blackboard::Blackboard;
use crate::knowledge::types::{
    ConductorDecision, NodeExecStatus, NodeExecution, RunStatus, Trail, WorkflowRun,
};
use crate::knowledge::KnowledgeStore;
use crate::types::error::ConductorError;
use crate::types::{FindingType, Importance};

pub mod condition;

const START_NODE: &str = "__start__";
const END_NODE: &str = "__end__";

/// External callback the conductor fires per node (§6 "NodeExecutor").
/// `(node_id, context) -> (result_text, result_dict)`; may fail, in which
/// case the conductor records the node as failed and continues.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, node_id: &str, context: &serde_json::Value) -> Result<(String, serde_json::Value), String>;
}

pub struct Conductor {
    store: Arc<KnowledgeStore>,
}

impl Conductor {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }

    /// `run_workflow(name, input)` (§4.7 "Execution").
    pub async fn run_workflow(
        &self,
        workflow_name: &str,
        input: serde_json::Value,
        executor: &dyn NodeExecutor,
    ) -> Result<WorkflowRun, ConductorError> {
        let workflow = self
            .store
            .get_workflow(workflow_name)
            .await?
            .ok_or_else(|| ConductorError::WorkflowNotFound(workflow_name.to_string()))?;
        let _ = &workflow;

        let run_id = uuid::Uuid::new_v4().to_string();
        let mut run = WorkflowRun {
            id: run_id.clone(),
            workflow: workflow_name.to_string(),
            status: RunStatus::Running,
            phase: "init".to_string(),
            input: input.clone(),
            context: input,
            total_nodes: 0,
            completed_nodes: 0,
            failed_nodes: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.insert_workflow_run(&run).await?;
        self.log_decision(&run_id, "start_run", None, serde_json::json!({ "workflow": workflow_name })).await?;

        let mut frontier: Vec<String> = self
            .store
            .list_edges_from(workflow_name, START_NODE)
            .await?
            .into_iter()
            .map(|e| e.to_node)
            .collect();
        let mut completed: HashSet<String> = HashSet::new();

        while !frontier.is_empty() {
            let batch: Vec<String> = frontier
                .drain(..)
                .filter(|n| n != END_NODE && !completed.contains(n))
                .collect();
            if batch.is_empty() {
                break;
            }

            let mut next_candidates: HashSet<String> = HashSet::new();
            for node_id in &batch {
                if node_id == START_NODE {
                    return Err(ConductorError::ReservedNodeId(node_id.clone()));
                }
                self.execute_node(&mut run, node_id, executor).await?;
                completed.insert(node_id.clone());

                for edge in self.store.list_edges_from(workflow_name, node_id).await? {
                    if condition::evaluate(edge.condition.as_deref(), &run.context) {
                        next_candidates.insert(edge.to_node);
                    }
                }
            }
            frontier = next_candidates.into_iter().filter(|n| !completed.contains(n)).collect();
        }

        run.status = RunStatus::Completed;
        run.phase = "completed".to_string();
        run.updated_at = Utc::now();
        self.store.update_workflow_run(&run).await?;

        Ok(run)
    }

    async fn execute_node(&self, run: &mut WorkflowRun, node_id: &str, executor: &dyn NodeExecutor) -> Result<(), ConductorError> {
        let prompt_hash = short_hash(&format!("{}:{}", node_id, run.context));
        let mut execution = NodeExecution {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run.id.clone(),
            node_id: node_id.to_string(),
            status: NodeExecStatus::Running,
            prompt_hash,
            result_text: None,
            result_json: None,
            findings_json: None,
            files_modified: vec![],
            duration_ms: None,
            token_count: None,
            error_type: None,
            error_message: None,
            retry_count: 0,
            created_at: Utc::now(),
        };
        self.store.insert_node_execution(&execution).await?;
        run.total_nodes += 1;

        let started = std::time::Instant::now();
        match executor.execute(node_id, &run.context).await {
            Ok((text, result)) => {
                execution.status = NodeExecStatus::Completed;
                execution.result_text = Some(text);
                execution.result_json = Some(result.clone());
                execution.duration_ms = Some(started.elapsed().as_millis() as u64);
                run.completed_nodes += 1;
                if let serde_json::Value::Object(map) = result {
                    if let serde_json::Value::Object(ctx) = &mut run.context {
                        for (k, v) in map {
                            ctx.insert(k, v);
                        }
                    }
                }
            }
            Err(reason) => {
                execution.status = NodeExecStatus::Failed;
                execution.error_type = Some("exception".to_string());
                execution.error_message = Some(reason.clone());
                execution.duration_ms = Some(started.elapsed().as_millis() as u64);
                run.failed_nodes += 1;
                self.log_decision(&run.id, "node_failed", Some(node_id.to_string()), serde_json::json!({ "reason": reason })).await?;
            }
        }
        self.store.update_node_execution(&execution).await?;
        self.store.update_workflow_run(run).await?;
        Ok(())
    }

    async fn log_decision(&self, run_id: &str, decision_type: &str, node_id: Option<String>, detail: serde_json::Value) -> Result<(), ConductorError> {
        let row = ConductorDecision {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            decision_type: decision_type.to_string(),
            node_id,
            detail,
            created_at: Utc::now(),
        };
        self.store.insert_conductor_decision(&row).await?;
        Ok(())
    }

    /// `lay_trail` (§4.7 "Pheromone trails").
    #[allow(clippy::too_many_arguments)]
    pub async fn lay_trail(
        &self,
        run_id: &str,
        location: &str,
        scent: &str,
        strength: f64,
        agent_id: Option<String>,
        node_id: Option<String>,
        message: Option<String>,
        tags: Vec<String>,
        ttl_hours: i64,
    ) -> Result<(), ConductorError> {
        let trail = Trail {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            location: location.to_string(),
            scent: scent.to_string(),
            strength: strength.clamp(0.0, 1.0),
            agent_id,
            node_id,
            message,
            tags,
            expires_at: Utc::now() + chrono::Duration::hours(ttl_hours),
            created_at: Utc::now(),
        };
        self.store.insert_trail(&trail).await?;
        Ok(())
    }

    pub async fn decay_trails(&self, rate: f64) -> Result<(), ConductorError> {
        self.store.decay_trails(rate, Utc::now()).await?;
        Ok(())
    }

    pub async fn get_trails(&self, location: Option<&str>) -> Result<Vec<Trail>, ConductorError> {
        Ok(self.store.get_trails(location).await?)
    }

    pub async fn get_hot_spots(&self, limit: usize) -> Result<Vec<(String, f64)>, ConductorError> {
        Ok(self.store.get_hot_spots(limit).await?)
    }

    /// `sync_findings_to_blackboard(run_id)`: replays completed-node
    /// findings as blackboard findings (§4.7 "Blackboard bridge").
    pub async fn sync_findings_to_blackboard(&self, run_id: &str, blackboard: &Blackboard) -> Result<usize, ConductorError> {
        let executions = self.store.list_node_executions(run_id).await?;
        let mut synced = 0;
        for exec in executions {
            if exec.status != NodeExecStatus::Completed {
                continue;
            }
            let Some(findings) = exec.findings_json else { continue };
            let Some(items) = findings.as_array() else { continue };
            for item in items {
                let content = item.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string();
                if content.is_empty() {
                    continue;
                }
                blackboard
                    .add_finding(
                        &format!("conductor:{run_id}"),
                        FindingType::Discovery,
                        &content,
                        vec![],
                        Importance::Normal,
                        vec![],
                        None,
                    )
                    .map_err(|e| ConductorError::NodeFailed {
                        node_id: exec.node_id.clone(),
                        reason: e.to_string(),
                    })?;
                synced += 1;
            }
        }
        Ok(synced)
    }

    /// `sync_trails_to_blackboard(run_id)`: promotes each top hot-spot to a
    /// blackboard finding, importance derived from total strength.
    pub async fn sync_trails_to_blackboard(&self, run_id: &str, blackboard: &Blackboard, top_n: usize) -> Result<usize, ConductorError> {
        let hot_spots = self.get_hot_spots(top_n).await?;
        let mut synced = 0;
        for (location, total_strength) in hot_spots {
            let importance = if total_strength >= 2.0 {
                Importance::High
            } else if total_strength >= 1.0 {
                Importance::Normal
            } else {
                Importance::Low
            };
            blackboard
                .add_finding(
                    &format!("conductor:{run_id}"),
                    FindingType::Trail,
                    &format!("hot spot: {location} (strength {total_strength:.2})"),
                    vec![location],
                    importance,
                    vec![],
                    None,
                )
                .map_err(|e| ConductorError::NodeFailed {
                    node_id: "hot_spot_sync".to_string(),
                    reason: e.to_string(),
                })?;
            synced += 1;
        }
        Ok(synced)
    }
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::types::{Workflow, WorkflowEdge};

    struct EchoExecutor;

    #[async_trait]
    impl NodeExecutor for EchoExecutor {
        async fn execute(&self, node_id: &str, _context: &serde_json::Value) -> Result<(String, serde_json::Value), String> {
            Ok((format!("ran {node_id}"), serde_json::json!({ node_id: true })))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl NodeExecutor for FailingExecutor {
        async fn execute(&self, node_id: &str, _context: &serde_json::Value) -> Result<(String, serde_json::Value), String> {
            Err(format!("{node_id} boom"))
        }
    }

    async fn seed_linear_workflow(store: &KnowledgeStore, name: &str) {
        store
            .upsert_workflow(&Workflow {
                name: name.to_string(),
                nodes: serde_json::json!([]),
                config: serde_json::json!({}),
            })
            .await
            .unwrap();
        store
            .insert_workflow_edge(&WorkflowEdge {
                workflow: name.to_string(),
                from_node: START_NODE.to_string(),
                to_node: "a".to_string(),
                condition: None,
                priority: 0,
            })
            .await
            .unwrap();
        store
            .insert_workflow_edge(&WorkflowEdge {
                workflow: name.to_string(),
                from_node: "a".to_string(),
                to_node: "b".to_string(),
                condition: None,
                priority: 0,
            })
            .await
            .unwrap();
        store
            .insert_workflow_edge(&WorkflowEdge {
                workflow: name.to_string(),
                from_node: "b".to_string(),
                to_node: END_NODE.to_string(),
                condition: None,
                priority: 0,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn run_workflow_executes_linear_chain_to_completion() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        seed_linear_workflow(&store, "wf1").await;
        let conductor = Conductor::new(store);

        let run = conductor.run_workflow("wf1", serde_json::json!({}), &EchoExecutor).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.completed_nodes, 2);
        assert_eq!(run.failed_nodes, 0);
    }

    #[tokio::test]
    async fn failing_node_is_recorded_but_run_still_completes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        seed_linear_workflow(&store, "wf2").await;
        let conductor = Conductor::new(store);

        let run = conductor.run_workflow("wf2", serde_json::json!({}), &FailingExecutor).await.unwrap();
        assert_eq!(run.failed_nodes, 2);
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn trail_decay_below_floor_is_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let conductor = Conductor::new(store);
        conductor.lay_trail("r1", "src/lib.rs", "investigate", 0.02, None, None, None, vec![], 24).await.unwrap();
        conductor.decay_trails(0.5).await.unwrap();
        let trails = conductor.get_trails(None).await.unwrap();
        assert!(trails.is_empty());
    }

    #[tokio::test]
    async fn unknown_workflow_returns_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let conductor = Conductor::new(store);
        let err = conductor.run_workflow("nope", serde_json::json!({}), &EchoExecutor).await.unwrap_err();
        assert!(matches!(err, ConductorError::WorkflowNotFound(_)));
    }
}
