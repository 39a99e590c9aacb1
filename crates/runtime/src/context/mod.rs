//! C8 — Context Builder: tiered retrieval, token budgeting, and the
//! layered context assembly described in §4.8.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use crate::knowledge::types::BuildingQuery;
use crate::knowledge::KnowledgeStore;
use crate::types::error::ContextError;

const HARD_TOKEN_CAP: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Minimal,
    Standard,
    Deep,
}

impl Depth {
    /// (heuristics, learnings, decisions, invariants, assumptions, spikes, recent)
    fn limits(self) -> (usize, usize, usize, usize, usize, usize, usize) {
        match self {
            Depth::Minimal => (0, 0, 0, 0, 0, 0, 0),
            Depth::Standard => (10, 10, 5, 5, 5, 5, 5),
            Depth::Deep => (25, 25, 10, 10, 10, 10, 10),
        }
    }

    fn summary_truncate(self) -> usize {
        match self {
            Depth::Minimal | Depth::Standard => 100,
            Depth::Deep => 200,
        }
    }
}

pub struct BuildRequest {
    pub task: String,
    pub domain: Option<String>,
    pub tags: Vec<String>,
    pub max_tokens: usize,
    pub depth: Depth,
    pub project_name: Option<String>,
    pub project_root: Option<String>,
    pub project_domains: Vec<String>,
    pub context_md: Option<String>,
    pub golden_rules: Option<String>,
    pub custom_golden_rules: Option<String>,
    pub always_load_categories: Vec<String>,
    pub session_id: Option<String>,
}

pub struct ContextBuilder {
    store: Arc<KnowledgeStore>,
}

fn approx_tokens(text: &str) -> usize {
    text.len() / 4
}

struct Budget {
    max_tokens: usize,
    used_chars: usize,
}

impl Budget {
    fn new(max_tokens: usize) -> Self {
        Self { max_tokens, used_chars: 0 }
    }

    fn remaining_tokens(&self) -> usize {
        self.max_tokens.saturating_sub(self.used_chars / 4)
    }

    fn exhausted(&self) -> bool {
        self.remaining_tokens() == 0
    }

    fn push(&mut self, out: &mut String, text: &str) {
        self.used_chars += text.len();
        out.push_str(text);
    }
}

impl ContextBuilder {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }

    pub async fn build(&self, req: BuildRequest) -> Result<String, ContextError> {
        if req.max_tokens > HARD_TOKEN_CAP {
            return Err(ContextError::TokenBudgetExceeded(req.max_tokens));
        }
        let started = std::time::Instant::now();
        let result = self.build_inner(&req).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, body) = match &result {
            Ok(text) => ("success".to_string(), text.clone()),
            Err(_) => ("error".to_string(), String::new()),
        };
        let summary: String = req.task.chars().take(50).collect();
        let _ = self
            .store
            .audit_query(&BuildingQuery {
                id: uuid::Uuid::new_v4().to_string(),
                query_type: "context_build".to_string(),
                session_id: req.session_id.clone(),
                agent_id: None,
                filters: serde_json::json!({
                    "domain": req.domain,
                    "tags": req.tags,
                    "max_tokens": req.max_tokens,
                    "depth": format!("{:?}", req.depth),
                }),
                results_returned: body.len() as u32,
                duration_ms,
                status,
                error: result.as_ref().err().map(|e| e.to_string()),
                created_at: Utc::now(),
            })
            .await;

        if let Ok(domain) = self.resolve_domain(&req).await {
            let _ = self.record_build_metrics(&domain).await;
        }

        result
    }

    async fn resolve_domain(&self, req: &BuildRequest) -> Result<String, ContextError> {
        if let Some(d) = &req.domain {
            return Ok(d.clone());
        }
        Ok(req.project_domains.first().cloned().unwrap_or_else(|| "general".to_string()))
    }

    async fn record_build_metrics(&self, domain: &str) -> Result<(), ContextError> {
        let heuristics = self.store.list_heuristics_by_domain(domain, Some("active")).await?;
        let avg_confidence = if heuristics.is_empty() {
            0.0
        } else {
            heuristics.iter().map(|h| h.confidence_ema).sum::<f64>() / heuristics.len() as f64
        };
        let validated: u32 = heuristics.iter().map(|h| h.times_validated).sum();
        let violated: u32 = heuristics.iter().map(|h| h.times_violated).sum();
        let total = validated + violated;
        let violation_rate = if total == 0 { 0.0 } else { violated as f64 / total as f64 };

        for (name, value) in [
            ("avg_confidence", avg_confidence),
            ("validation_velocity", validated as f64),
            ("violation_rate", violation_rate),
            ("query_count", 1.0),
        ] {
            let _ = self
                .store
                .insert_metric_observation(&crate::knowledge::types::MetricObservation {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: name.to_string(),
                    value,
                    domain: Some(domain.to_string()),
                    metadata: None,
                    observed_at: Utc::now(),
                })
                .await;
        }
        Ok(())
    }

    async fn build_inner(&self, req: &BuildRequest) -> Result<String, ContextError> {
        let (h_lim, l_lim, d_lim, i_lim, a_lim, s_lim, r_lim) = req.depth.limits();
        let domain = self.resolve_domain(req).await?;
        let mut budget = Budget::new(req.max_tokens);
        let mut body = String::new();

        // Tier 0 — project context
        if let Some(name) = &req.project_name {
            let mut tier0 = String::new();
            tier0.push_str(&format!("## Project: {name}\n"));
            if let Some(root) = &req.project_root {
                tier0.push_str(&format!("Root: {root}\n"));
            }
            if !req.project_domains.is_empty() {
                tier0.push_str(&format!("Domains: {}\n", req.project_domains.join(", ")));
            }
            if let Some(md) = &req.context_md {
                let truncated: String = md.chars().take(2_000).collect();
                tier0.push_str(&truncated);
                tier0.push('\n');
            }
            budget.push(&mut body, &tier0);
        }

        // Tier 1 — golden rules
        let mut tier1 = String::new();
        if let Some(rules) = &req.golden_rules {
            let filtered = if req.depth == Depth::Minimal && !req.always_load_categories.is_empty() {
                filter_sections(rules, &req.always_load_categories)
            } else {
                rules.clone()
            };
            tier1.push_str(&filtered);
            tier1.push('\n');
        }
        if let Some(custom) = &req.custom_golden_rules {
            tier1.push_str(custom);
            tier1.push('\n');
        }
        budget.push(&mut body, &tier1);

        if req.depth == Depth::Minimal || budget.exhausted() {
            return Ok(build_header(req) + &body);
        }

        // Similar failures preamble
        let failures = self.store.list_learnings(None, None, 200).await?;
        let task_keywords = keyword_set(&req.task);
        let mut scored: Vec<(f64, &crate::knowledge::types::Learning)> = failures
            .iter()
            .filter(|l| matches!(l.learning_type, crate::knowledge::types::LearningType::Failure))
            .map(|l| (overlap_score(&task_keywords, &keyword_set(&l.summary)), l))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
        if !scored.is_empty() && !budget.exhausted() {
            let mut preamble = String::from("## Similar failures\n");
            for (_, l) in scored.into_iter().take(3) {
                preamble.push_str(&format!("- {}\n", l.title));
            }
            budget.push(&mut body, &preamble);
        }

        // Tier 2 — relevant knowledge
        if !budget.exhausted() {
            let heuristics = self.store.list_heuristics_by_domain(&domain, Some("active")).await?;
            let mut ranked: Vec<(f64, &crate::knowledge::types::Heuristic)> =
                heuristics.iter().map(|h| (relevance_score(h), h)).collect();
            ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
            if !ranked.is_empty() {
                let mut section = String::from("## Relevant heuristics\n");
                for (_, h) in ranked.into_iter().take(h_lim) {
                    section.push_str(&format!(
                        "- [{}] {} ({})\n",
                        h.domain,
                        truncate(&h.rule, req.depth.summary_truncate()),
                        h.confidence_ema
                    ));
                }
                budget.push(&mut body, &section);
            }
        }

        if !budget.exhausted() {
            let learnings = self.store.list_learnings(Some(&domain), req.tags.first().map(|s| s.as_str()), l_lim).await?;
            if !learnings.is_empty() {
                let mut section = String::from("## Learnings\n");
                for l in learnings {
                    section.push_str(&format!("- {}\n", truncate(&l.summary, req.depth.summary_truncate())));
                }
                budget.push(&mut body, &section);
            }
        }

        if !budget.exhausted() {
            let decisions = self.store.list_accepted_decisions(d_lim).await?;
            if !decisions.is_empty() {
                let mut section = String::from("## Accepted decisions\n");
                for d in decisions {
                    section.push_str(&format!("- {}: {}\n", d.title, truncate(&d.rationale, req.depth.summary_truncate())));
                }
                budget.push(&mut body, &section);
            }
        }

        if !budget.exhausted() {
            let invariants = self.store.list_active_or_violated_invariants(i_lim).await?;
            if !invariants.is_empty() {
                let mut section = String::from("## Invariants\n");
                for i in invariants {
                    section.push_str(&format!("- ({:?}) {}\n", i.severity, i.statement));
                }
                budget.push(&mut body, &section);
            }
        }

        if !budget.exhausted() {
            let assumptions = self.store.list_high_confidence_assumptions(0.6, a_lim).await?;
            if !assumptions.is_empty() {
                let mut section = String::from("## Assumptions\n");
                for a in assumptions {
                    section.push_str(&format!("- {}\n", a.assumption));
                }
                budget.push(&mut body, &section);
            }
            let challenged = self.store.list_challenged_assumptions(a_lim).await?;
            if !challenged.is_empty() {
                let mut section = String::from("## Warning: challenged assumptions\n");
                for a in challenged {
                    section.push_str(&format!("- {}\n", a.assumption));
                }
                budget.push(&mut body, &section);
            }
        }

        if !budget.exhausted() {
            let spikes = self.store.list_spike_reports(s_lim).await?;
            if !spikes.is_empty() {
                let mut section = String::from("## Spike reports\n");
                for s in spikes {
                    section.push_str(&format!("- {}\n", s.title));
                }
                budget.push(&mut body, &section);
            }
        }

        // Tier 3 — recent context
        if !budget.exhausted() {
            let recent = self.store.list_learnings(None, None, r_lim).await?;
            if !recent.is_empty() {
                let mut section = String::from("## Recent learnings\n");
                for l in recent {
                    if budget.exhausted() {
                        break;
                    }
                    section.push_str(&format!("- {}\n", truncate(&l.summary, req.depth.summary_truncate())));
                }
                budget.push(&mut body, &section);
            }
        }

        Ok(build_header(req) + &body)
    }
}

fn build_header(req: &BuildRequest) -> String {
    format!("# Context\nStatus: building\nTask: {}\n\n", req.task)
}

fn filter_sections(rules: &str, categories: &[String]) -> String {
    let mut out = String::new();
    let mut keep = false;
    for line in rules.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            keep = categories.iter().any(|c| heading.eq_ignore_ascii_case(c));
        }
        if keep {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn truncate(s: &str, n: usize) -> String {
    if s.chars().count() <= n {
        s.to_string()
    } else {
        s.chars().take(n).collect::<String>() + "..."
    }
}

fn keyword_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 2)
        .collect()
}

fn overlap_score(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    a.intersection(b).count() as f64
}

fn relevance_score(h: &crate::knowledge::types::Heuristic) -> f64 {
    let age_days = (Utc::now() - h.created_at).num_seconds() as f64 / 86_400.0;
    let recency = 0.5f64.powf(age_days / 7.0);
    let validation = (h.times_validated as f64).ln_1p();
    recency * 0.5 + validation * 0.3 + h.confidence_ema * 0.2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request(task: &str) -> BuildRequest {
        BuildRequest {
            task: task.to_string(),
            domain: Some("testing".to_string()),
            tags: vec![],
            max_tokens: 1000,
            depth: Depth::Standard,
            project_name: None,
            project_root: None,
            project_domains: vec![],
            context_md: None,
            golden_rules: None,
            custom_golden_rules: None,
            always_load_categories: vec![],
            session_id: None,
        }
    }

    #[tokio::test]
    async fn minimal_depth_returns_early_with_only_header_and_rules() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let builder = ContextBuilder::new(store);
        let mut req = base_request("fix the bug");
        req.depth = Depth::Minimal;
        req.golden_rules = Some("## Safety\nnever commit secrets\n".to_string());
        let out = builder.build(req).await.unwrap();
        assert!(out.contains("Safety"));
        assert!(!out.contains("Relevant heuristics"));
    }

    #[tokio::test]
    async fn token_budget_above_hard_cap_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let builder = ContextBuilder::new(store);
        let mut req = base_request("task");
        req.max_tokens = 60_000;
        let err = builder.build(req).await.unwrap_err();
        assert!(matches!(err, ContextError::TokenBudgetExceeded(_)));
    }

    #[tokio::test]
    async fn standard_depth_includes_relevant_heuristics() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        store
            .insert_heuristic(&crate::knowledge::types::Heuristic {
                id: "h1".to_string(),
                domain: "testing".to_string(),
                rule: "always mock network calls".to_string(),
                explanation: "".to_string(),
                confidence: 0.8,
                confidence_ema: 0.8,
                ema_alpha: 0.3,
                ema_warmup_remaining: 0,
                times_validated: 5,
                times_violated: 0,
                times_contradicted: 0,
                times_revived: 0,
                fraud_flags: 0,
                status: crate::types::HeuristicStatus::Active,
                is_golden: false,
                project_path: None,
                last_used_at: None,
                dormant_since: None,
                revival_conditions: vec![],
                update_count_today: 0,
                update_count_reset_date: Utc::now(),
                last_confidence_update: None,
                last_fraud_check: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        let builder = ContextBuilder::new(store);
        let out = builder.build(base_request("testing networking")).await.unwrap();
        assert!(out.contains("mock network calls"));
    }
}
