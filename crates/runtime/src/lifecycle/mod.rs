//! C4 — Lifecycle Engine: governs each heuristic's confidence trajectory
//! under hostile conditions while letting good heuristics recover (§4.4).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RateLimitConfig;
use crate::knowledge::types::{ConfidenceUpdate, Heuristic, HeuristicMerge, RevivalCondition};
use crate::knowledge::KnowledgeStore;
use crate::types::error::LifecycleError;
use crate::types::{HeuristicStatus, UpdateType};

const DECAY_HALF_LIFE_DAYS: i64 = 14;
const DECAY_FLOOR: f64 = 0.20;
const ARCHIVED_AFTER_DORMANT_DAYS: i64 = 90;
const DEPRECATION_CONTRADICTION_RATIO: f64 = 0.30;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "her", "was", "one", "our",
    "out", "day", "get", "has", "him", "his", "how", "man", "new", "now", "old", "see", "two",
    "way", "who", "boy", "did", "its", "let", "put", "say", "she", "too", "use", "with", "this",
    "that", "from", "have", "will", "when", "were",
];

#[derive(Debug, Clone)]
pub enum ConfidenceUpdateOutcome {
    Applied { new_confidence: f64, new_ema: f64 },
    RateLimited { reason: String },
}

pub struct DomainLimits {
    pub soft_limit: u32,
    pub hard_limit: u32,
    pub ceo_override_limit: Option<u32>,
}

impl Default for DomainLimits {
    fn default() -> Self {
        Self {
            soft_limit: 5,
            hard_limit: 10,
            ceo_override_limit: None,
        }
    }
}

impl DomainLimits {
    fn effective_limit(&self) -> u32 {
        self.ceo_override_limit.unwrap_or(self.hard_limit)
    }
}

pub struct ExpansionEligibility {
    pub eligible: bool,
    pub confidence_ok: bool,
    pub validations_ok: bool,
    pub novelty: f64,
    pub health: f64,
}

#[derive(Debug, Clone)]
pub struct MergeCandidate {
    pub ids: [String; 2],
    pub similarity: f64,
    pub auto_merge: bool,
}

/// Governs confidence trajectories, dormancy/revival, domain elasticity,
/// merges, and scheduled maintenance, following the teacher's pattern of a
/// thin engine wrapping a shared store handle.
pub struct LifecycleEngine {
    store: Arc<KnowledgeStore>,
    rate_limits: RateLimitConfig,
}

impl LifecycleEngine {
    pub fn new(store: Arc<KnowledgeStore>, rate_limits: RateLimitConfig) -> Self {
        Self { store, rate_limits }
    }

    /// `update_confidence(id, type, reason, session?, agent?, force=false)` (§4.4 step 1-4).
    pub async fn update_confidence(
        &self,
        heuristic_id: &str,
        update_type: UpdateType,
        session: Option<String>,
        agent: Option<String>,
        force: bool,
    ) -> Result<ConfidenceUpdateOutcome, LifecycleError> {
        let mut heuristic = self
            .store
            .get_heuristic(heuristic_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(heuristic_id.to_string()))?;

        if heuristic.is_golden && !force {
            // Golden heuristics are immune to automated confidence mutation,
            // but an explicit human-forced call may still proceed.
            return Err(LifecycleError::GoldenImmune(heuristic_id.to_string()));
        }

        if !force {
            if let Some(reason) = self.check_rate_limit(&heuristic).await? {
                return Ok(ConfidenceUpdateOutcome::RateLimited { reason });
            }
        }

        let old_confidence = heuristic.confidence;
        let total_apps = heuristic.times_validated + heuristic.times_violated + heuristic.times_contradicted;

        let raw_target = match update_type {
            UpdateType::Success => {
                heuristic.times_validated += 1;
                (old_confidence + 0.10 * (1.0 - old_confidence)).min(0.95)
            }
            UpdateType::Failure => {
                heuristic.times_violated += 1;
                (old_confidence - 0.10 * old_confidence).max(0.05)
            }
            UpdateType::Contradiction => {
                heuristic.times_contradicted += 1;
                (old_confidence - 0.15 * old_confidence).max(0.05)
            }
            UpdateType::Decay => (old_confidence * 0.92).max(0.05),
            UpdateType::Revival => old_confidence.max(0.35),
        };

        let bypass_smoothing = matches!(update_type, UpdateType::Decay | UpdateType::Revival);
        let alpha = self.pick_alpha(&heuristic, old_confidence, raw_target, total_apps);
        let new_ema = if bypass_smoothing {
            raw_target.clamp(0.05, 0.95)
        } else {
            (alpha * raw_target + (1.0 - alpha) * heuristic.confidence_ema).clamp(0.05, 0.95)
        };
        let smoothed_delta = new_ema - heuristic.confidence_ema;

        heuristic.confidence = new_ema;
        heuristic.confidence_ema = new_ema;
        if heuristic.ema_warmup_remaining > 0 {
            heuristic.ema_warmup_remaining -= 1;
        }
        heuristic.last_confidence_update = Some(Utc::now());
        heuristic.last_used_at = Some(Utc::now());
        heuristic.updated_at = Utc::now();

        self.store.update_heuristic(&heuristic).await?;

        let update = ConfidenceUpdate {
            id: uuid::Uuid::new_v4().to_string(),
            heuristic_id: heuristic_id.to_string(),
            old_confidence,
            new_confidence: new_ema,
            delta: new_ema - old_confidence,
            update_type,
            raw_target,
            smoothed_delta,
            alpha,
            session,
            agent,
            created_at: Utc::now(),
        };
        self.store.insert_confidence_update(&update).await?;

        self.apply_rate_based_deprecation(&mut heuristic).await?;

        // Fraud auto-check beyond §4.4 step 5 is invoked by the caller
        // (core handle), which owns both engines and can swallow failures
        // without this module depending on `fraud` directly.

        Ok(ConfidenceUpdateOutcome::Applied {
            new_confidence: new_ema,
            new_ema,
        })
    }

    async fn check_rate_limit(&self, heuristic: &Heuristic) -> Result<Option<String>, LifecycleError> {
        let since = Utc::now() - ChronoDuration::days(1);
        let updates_today = self.store.count_updates_today(&heuristic.id, since).await?;
        if updates_today >= self.rate_limits.max_updates_per_day as u64 {
            return Ok(Some(format!(
                "max_updates_per_day ({}) reached",
                self.rate_limits.max_updates_per_day
            )));
        }
        if let Some(last) = heuristic.last_confidence_update {
            let cooldown = ChronoDuration::minutes(self.rate_limits.cooldown_minutes);
            if Utc::now() - last < cooldown {
                return Ok(Some(format!(
                    "cooldown_minutes ({}) not yet elapsed",
                    self.rate_limits.cooldown_minutes
                )));
            }
        }
        Ok(None)
    }

    fn pick_alpha(&self, heuristic: &Heuristic, old_confidence: f64, raw_target: f64, total_apps: u32) -> f64 {
        let increasing = raw_target >= old_confidence;
        if heuristic.ema_warmup_remaining > 0 {
            return 0.30;
        }
        if old_confidence > 0.80 {
            return if increasing { 0.10 } else { 0.15 };
        }
        if old_confidence < 0.30 {
            return if increasing { 0.25 } else { 0.20 };
        }
        if total_apps >= 20 {
            if increasing { 0.15 } else { 0.20 }
        } else if increasing {
            0.20
        } else {
            0.25
        }
    }

    /// A heuristic is deprecated only if total_apps >= min_applications and
    /// the contradiction ratio exceeds 30%; count-based deprecation alone is
    /// forbidden (§4.4 "Rate-based deprecation").
    async fn apply_rate_based_deprecation(&self, heuristic: &mut Heuristic) -> Result<(), LifecycleError> {
        let total_apps = heuristic.times_validated + heuristic.times_violated + heuristic.times_contradicted;
        if heuristic.is_golden || total_apps < self.rate_limits.min_applications {
            return Ok(());
        }
        let ratio = heuristic.times_contradicted as f64 / total_apps as f64;
        if ratio > DEPRECATION_CONTRADICTION_RATIO && heuristic.status == HeuristicStatus::Active {
            heuristic.status = HeuristicStatus::Deprecated;
            heuristic.updated_at = Utc::now();
            self.store.update_heuristic(heuristic).await?;
        }
        Ok(())
    }

    /// `make_dormant` (§4.4 "Dormancy").
    pub async fn make_dormant(&self, heuristic_id: &str) -> Result<(), LifecycleError> {
        let mut heuristic = self
            .store
            .get_heuristic(heuristic_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(heuristic_id.to_string()))?;
        if heuristic.is_golden {
            return Err(LifecycleError::GoldenImmune(heuristic_id.to_string()));
        }

        heuristic.status = HeuristicStatus::Dormant;
        heuristic.dormant_since = Some(Utc::now());

        let keywords = extract_keywords(&heuristic.rule, 5);
        let mut conditions: Vec<RevivalCondition> = keywords
            .into_iter()
            .map(|kw| RevivalCondition {
                kind: "keyword".to_string(),
                value: kw,
            })
            .collect();
        conditions.push(RevivalCondition {
            kind: "time_period".to_string(),
            value: "90".to_string(),
        });
        heuristic.revival_conditions = conditions;
        heuristic.updated_at = Utc::now();

        self.store.update_heuristic(&heuristic).await
    }

    /// `revive_heuristic` (§4.4 "Dormancy").
    pub async fn revive_heuristic(&self, heuristic_id: &str) -> Result<(), LifecycleError> {
        let mut heuristic = self
            .store
            .get_heuristic(heuristic_id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(heuristic_id.to_string()))?;
        if heuristic.status != HeuristicStatus::Dormant {
            return Err(LifecycleError::InvalidTransition {
                from: heuristic.status,
                to: HeuristicStatus::Active,
            });
        }

        heuristic.confidence = heuristic.confidence.max(0.35);
        heuristic.confidence_ema = heuristic.confidence_ema.max(0.35);
        heuristic.status = HeuristicStatus::Active;
        heuristic.dormant_since = None;
        heuristic.times_revived += 1;
        heuristic.updated_at = Utc::now();
        self.store.update_heuristic(&heuristic).await?;

        let update = ConfidenceUpdate {
            id: uuid::Uuid::new_v4().to_string(),
            heuristic_id: heuristic_id.to_string(),
            old_confidence: heuristic.confidence,
            new_confidence: heuristic.confidence,
            delta: 0.0,
            update_type: UpdateType::Revival,
            raw_target: heuristic.confidence,
            smoothed_delta: 0.0,
            alpha: 0.0,
            session: None,
            agent: None,
            created_at: Utc::now(),
        };
        self.store.insert_confidence_update(&update).await
    }

    /// `check_revival_triggers(context)`: dormant heuristics whose keyword
    /// is a substring of the lowercased context, or whose time-period has
    /// elapsed, are eligible for revival.
    pub async fn check_revival_triggers(&self, context: &str) -> Result<Vec<String>, LifecycleError> {
        let context_lower = context.to_lowercase();
        let dormant = self.store.list_heuristics_by_status("dormant").await?;
        let mut eligible = Vec::new();

        for h in dormant {
            let mut hit = false;
            for condition in &h.revival_conditions {
                match condition.kind.as_str() {
                    "keyword" => {
                        if context_lower.contains(&condition.value) {
                            hit = true;
                        }
                    }
                    "time_period" => {
                        if let (Ok(days), Some(since)) = (condition.value.parse::<i64>(), h.dormant_since) {
                            if Utc::now() - since >= ChronoDuration::days(days) {
                                hit = true;
                            }
                        }
                    }
                    _ => {}
                }
            }
            if hit {
                eligible.push(h.id);
            }
        }
        Ok(eligible)
    }

    /// `can_add_heuristic` (§4.4 "Domain elasticity").
    pub async fn can_add_heuristic(&self, domain: &str, limits: &DomainLimits) -> Result<bool, LifecycleError> {
        let active = self.store.list_heuristics_by_domain(domain, Some("active")).await?;
        Ok((active.len() as u32) < limits.effective_limit())
    }

    /// `check_expansion_eligibility`, only enforced at/above the soft limit.
    pub async fn check_expansion_eligibility(
        &self,
        domain: &str,
        new_rule: &str,
        candidate_confidence: f64,
        candidate_validations: u32,
        limits: &DomainLimits,
    ) -> Result<ExpansionEligibility, LifecycleError> {
        let active = self.store.list_heuristics_by_domain(domain, Some("active")).await?;
        if (active.len() as u32) < limits.soft_limit {
            return Ok(ExpansionEligibility {
                eligible: true,
                confidence_ok: true,
                validations_ok: true,
                novelty: 1.0,
                health: 1.0,
            });
        }

        let novelty = novelty_score(new_rule, &active);
        let health = domain_health(&active);
        let confidence_ok = candidate_confidence >= 0.70;
        let validations_ok = candidate_validations >= 3;
        let novelty_ok = novelty >= 0.60;
        let health_ok = health >= 0.50;

        Ok(ExpansionEligibility {
            eligible: confidence_ok && validations_ok && novelty_ok && health_ok,
            confidence_ok,
            validations_ok,
            novelty,
            health,
        })
    }

    /// `find_merge_candidates(domain)`: every active pair with Jaccard
    /// similarity >= 0.40, split into auto-mergeable (>= 0.60) and
    /// manual-review tiers. Advisory only — `trigger_contraction` is the
    /// only caller that acts on a pair automatically, and it only acts on
    /// the auto-mergeable tier.
    pub async fn find_merge_candidates(&self, domain: &str) -> Result<Vec<MergeCandidate>, LifecycleError> {
        let heuristics = self.store.list_heuristics_by_domain(domain, Some("active")).await?;
        let mut candidates = Vec::new();
        for i in 0..heuristics.len() {
            if heuristics[i].is_golden {
                continue;
            }
            for j in (i + 1)..heuristics.len() {
                if heuristics[j].is_golden {
                    continue;
                }
                let kw1 = keyword_set(&heuristics[i].rule);
                let kw2 = keyword_set(&heuristics[j].rule);
                if kw1.is_empty() || kw2.is_empty() {
                    continue;
                }
                let similarity = jaccard(&kw1, &kw2);
                if similarity >= 0.40 {
                    candidates.push(MergeCandidate {
                        ids: [heuristics[i].id.clone(), heuristics[j].id.clone()],
                        similarity,
                        auto_merge: similarity >= 0.60,
                    });
                }
            }
        }
        candidates.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        Ok(candidates)
    }

    /// `merge`: combine >= 2 active heuristics in one domain into one.
    pub async fn merge(&self, heuristic_ids: &[String], strategy: &str) -> Result<Heuristic, LifecycleError> {
        if heuristic_ids.len() < 2 {
            return Err(LifecycleError::NotFound("merge requires at least 2 heuristics".to_string()));
        }
        let mut sources = Vec::new();
        for id in heuristic_ids {
            let h = self
                .store
                .get_heuristic(id)
                .await?
                .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;
            sources.push(h);
        }

        let total_validations: u32 = sources.iter().map(|h| h.times_validated.max(1)).sum();
        let weighted_confidence: f64 = sources
            .iter()
            .map(|h| h.confidence * h.times_validated.max(1) as f64)
            .sum::<f64>()
            / total_validations as f64;

        let mut merged = sources[0].clone();
        merged.id = uuid::Uuid::new_v4().to_string();
        merged.confidence = weighted_confidence;
        merged.confidence_ema = weighted_confidence;
        merged.times_validated = sources.iter().map(|h| h.times_validated).sum();
        merged.times_violated = sources.iter().map(|h| h.times_violated).sum();
        merged.times_contradicted = sources.iter().map(|h| h.times_contradicted).sum();
        merged.explanation = sources.iter().map(|h| h.explanation.as_str()).collect::<Vec<_>>().join("|");
        merged.created_at = Utc::now();
        merged.updated_at = Utc::now();
        self.store.insert_heuristic(&merged).await?;

        for source in &mut sources {
            source.status = HeuristicStatus::Archived;
            source.updated_at = Utc::now();
            self.store.update_heuristic(source).await?;
        }

        let merge_row = HeuristicMerge {
            id: uuid::Uuid::new_v4().to_string(),
            result_id: merged.id.clone(),
            source_ids: heuristic_ids.to_vec(),
            strategy: strategy.to_string(),
            created_at: Utc::now(),
        };
        self.store.insert_heuristic_merge(&merge_row).await?;

        Ok(merged)
    }

    /// Eviction score ordering for dormancy/contraction candidates, lowest
    /// first; golden heuristics are never included.
    pub fn eviction_score(&self, heuristic: &Heuristic, now: DateTime<Utc>) -> f64 {
        if heuristic.is_golden {
            return f64::MAX;
        }
        let recency_days = heuristic
            .last_used_at
            .map(|t| (now - t).num_days().max(0) as f64)
            .unwrap_or(365.0);
        let recency_factor = (1.0 / (1.0 + recency_days / 30.0)).clamp(0.01, 1.0);
        let total_apps = heuristic.times_validated + heuristic.times_violated + heuristic.times_contradicted;
        let usage_factor = (total_apps as f64 / 20.0).min(1.0).max(0.05);
        heuristic.confidence * recency_factor * usage_factor
    }

    /// `trigger_contraction`: may only run after `grace_period_days` have
    /// elapsed since `overflow_entered_at`.
    pub async fn trigger_contraction(
        &self,
        domain: &str,
        overflow_entered_at: DateTime<Utc>,
        grace_period_days: i64,
    ) -> Result<Vec<String>, LifecycleError> {
        let elapsed = Utc::now() - overflow_entered_at;
        if elapsed < ChronoDuration::days(grace_period_days) {
            return Ok(Vec::new());
        }
        let weeks_past_grace = ((elapsed - ChronoDuration::days(grace_period_days)).num_days() / 7).max(0);
        let target_removals = (weeks_past_grace * 2) as usize;
        if target_removals == 0 {
            return Ok(Vec::new());
        }

        let mut active = self.store.list_heuristics_by_domain(domain, Some("active")).await?;
        let mut removed = Vec::new();

        // First pass: merge pairs with Jaccard similarity >= 0.40 (auto-merge >= 0.60).
        let mut merged_ids: HashSet<String> = HashSet::new();
        'outer: for i in 0..active.len() {
            if removed.len() >= target_removals {
                break;
            }
            if merged_ids.contains(&active[i].id) {
                continue;
            }
            for j in (i + 1)..active.len() {
                if merged_ids.contains(&active[j].id) {
                    continue;
                }
                let sim = jaccard(&keyword_set(&active[i].rule), &keyword_set(&active[j].rule));
                if sim >= 0.60 {
                    let merged = self
                        .merge(&[active[i].id.clone(), active[j].id.clone()], "auto_contraction")
                        .await?;
                    merged_ids.insert(active[i].id.clone());
                    merged_ids.insert(active[j].id.clone());
                    removed.push(active[i].id.clone());
                    removed.push(active[j].id.clone());
                    let _ = merged;
                    if removed.len() >= target_removals {
                        break 'outer;
                    }
                }
            }
        }

        if removed.len() < target_removals {
            active.retain(|h| !merged_ids.contains(&h.id));
            active.sort_by(|a, b| {
                self.eviction_score(a, Utc::now())
                    .partial_cmp(&self.eviction_score(b, Utc::now()))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for h in active {
                if removed.len() >= target_removals {
                    break;
                }
                if h.is_golden {
                    continue;
                }
                self.make_dormant(&h.id).await?;
                removed.push(h.id);
            }
        }

        Ok(removed)
    }

    /// `run_maintenance` (§4.4): decay stale heuristics, enforce domain
    /// limits, archive long-dormant heuristics. Never deletes rows.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, LifecycleError> {
        let mut report = MaintenanceReport::default();
        let now = Utc::now();

        let active = self.store.list_heuristics_by_status("active").await?;
        for mut h in active {
            if h.is_golden {
                continue;
            }
            let stale = h
                .last_used_at
                .map(|t| now - t >= ChronoDuration::days(DECAY_HALF_LIFE_DAYS))
                .unwrap_or(true);
            if stale {
                h.confidence = (h.confidence * 0.92).max(0.0);
                h.confidence_ema = h.confidence;
                h.updated_at = now;
                if h.confidence < DECAY_FLOOR {
                    self.store.update_heuristic(&h).await?;
                    self.make_dormant(&h.id).await?;
                    report.decayed_to_dormant += 1;
                } else {
                    self.store.update_heuristic(&h).await?;
                    report.decayed += 1;
                }
            }
        }

        let dormant = self.store.list_heuristics_by_status("dormant").await?;
        for mut h in dormant {
            if h.is_golden {
                continue;
            }
            if let Some(since) = h.dormant_since {
                if now - since >= ChronoDuration::days(ARCHIVED_AFTER_DORMANT_DAYS) {
                    h.status = HeuristicStatus::Archived;
                    h.updated_at = now;
                    self.store.update_heuristic(&h).await?;
                    report.archived += 1;
                }
            }
        }

        Ok(report)
    }
}

#[derive(Debug, Default)]
pub struct MaintenanceReport {
    pub decayed: u32,
    pub decayed_to_dormant: u32,
    pub archived: u32,
}

fn keyword_set(rule: &str) -> HashSet<String> {
    extract_keywords(rule, usize::MAX).into_iter().collect()
}

fn extract_keywords(text: &str, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for token in text.to_lowercase().split(|c: char| !c.is_alphabetic()) {
        if token.len() < 3 || STOPWORDS.contains(&token) {
            continue;
        }
        if seen.insert(token.to_string()) {
            out.push(token.to_string());
            if out.len() >= max {
                break;
            }
        }
    }
    out
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Novelty = 1 - max Jaccard similarity against any existing active rule in
/// the domain; the first rule in a domain scores 1.0.
fn novelty_score(new_rule: &str, existing: &[Heuristic]) -> f64 {
    if existing.is_empty() {
        return 1.0;
    }
    let new_keywords = keyword_set(new_rule);
    let max_sim = existing
        .iter()
        .map(|h| jaccard(&new_keywords, &keyword_set(&h.rule)))
        .fold(0.0_f64, f64::max);
    1.0 - max_sim
}

fn domain_health(active: &[Heuristic]) -> f64 {
    if active.is_empty() {
        return 1.0;
    }
    active.iter().map(|h| h.confidence).sum::<f64>() / active.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;

    fn new_heuristic(id: &str, domain: &str, confidence: f64) -> Heuristic {
        let now = Utc::now();
        Heuristic {
            id: id.to_string(),
            domain: domain.to_string(),
            rule: "always validate user input before processing".to_string(),
            explanation: "prevents injection".to_string(),
            confidence,
            confidence_ema: confidence,
            ema_alpha: 0.2,
            ema_warmup_remaining: 0,
            times_validated: 0,
            times_violated: 0,
            times_contradicted: 0,
            times_revived: 0,
            fraud_flags: 0,
            status: HeuristicStatus::Active,
            is_golden: false,
            project_path: None,
            last_used_at: Some(now),
            dormant_since: None,
            revival_conditions: vec![],
            update_count_today: 0,
            update_count_reset_date: now,
            last_confidence_update: None,
            last_fraud_check: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn engine_with_store() -> (tempfile::TempDir, LifecycleEngine) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let engine = LifecycleEngine::new(store, RateLimitConfig::default());
        (tmp, engine)
    }

    #[tokio::test]
    async fn success_update_raises_confidence_and_records_audit_row() {
        let (_tmp, engine) = engine_with_store().await;
        let h = new_heuristic("h1", "rust", 0.5);
        engine.store.insert_heuristic(&h).await.unwrap();

        let outcome = engine
            .update_confidence("h1", UpdateType::Success, None, None, false)
            .await
            .unwrap();
        match outcome {
            ConfidenceUpdateOutcome::Applied { new_confidence, .. } => assert!(new_confidence > 0.5),
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_blocks_second_update_within_cooldown() {
        let (_tmp, engine) = engine_with_store().await;
        let h = new_heuristic("h1", "rust", 0.5);
        engine.store.insert_heuristic(&h).await.unwrap();

        engine.update_confidence("h1", UpdateType::Success, None, None, false).await.unwrap();
        let second = engine.update_confidence("h1", UpdateType::Success, None, None, false).await.unwrap();
        assert!(matches!(second, ConfidenceUpdateOutcome::RateLimited { .. }));
    }

    #[tokio::test]
    async fn golden_heuristic_rejects_automated_update() {
        let (_tmp, engine) = engine_with_store().await;
        let mut h = new_heuristic("h1", "rust", 0.5);
        h.is_golden = true;
        engine.store.insert_heuristic(&h).await.unwrap();

        let err = engine
            .update_confidence("h1", UpdateType::Failure, None, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::GoldenImmune(_)));
    }

    #[tokio::test]
    async fn make_dormant_then_revive_restores_confidence_floor() {
        let (_tmp, engine) = engine_with_store().await;
        let mut h = new_heuristic("h1", "rust", 0.1);
        h.rule = "avoid unsafe blocks in production code".to_string();
        engine.store.insert_heuristic(&h).await.unwrap();

        engine.make_dormant("h1").await.unwrap();
        let dormant = engine.store.get_heuristic("h1").await.unwrap().unwrap();
        assert_eq!(dormant.status, HeuristicStatus::Dormant);
        assert!(!dormant.revival_conditions.is_empty());

        engine.revive_heuristic("h1").await.unwrap();
        let revived = engine.store.get_heuristic("h1").await.unwrap().unwrap();
        assert_eq!(revived.status, HeuristicStatus::Active);
        assert!(revived.confidence >= 0.35);
    }

    #[tokio::test]
    async fn check_revival_triggers_matches_keyword_substring() {
        let (_tmp, engine) = engine_with_store().await;
        let mut h = new_heuristic("h1", "rust", 0.1);
        h.rule = "avoid unsafe blocks entirely".to_string();
        engine.store.insert_heuristic(&h).await.unwrap();
        engine.make_dormant("h1").await.unwrap();

        let eligible = engine.check_revival_triggers("please avoid unsafe code here").await.unwrap();
        assert_eq!(eligible, vec!["h1".to_string()]);
    }

    #[tokio::test]
    async fn merge_combines_counters_and_archives_sources() {
        let (_tmp, engine) = engine_with_store().await;
        let mut a = new_heuristic("a", "rust", 0.6);
        a.times_validated = 10;
        let mut b = new_heuristic("b", "rust", 0.8);
        b.times_validated = 5;
        engine.store.insert_heuristic(&a).await.unwrap();
        engine.store.insert_heuristic(&b).await.unwrap();

        let merged = engine.merge(&["a".to_string(), "b".to_string()], "manual").await.unwrap();
        assert_eq!(merged.times_validated, 15);

        let a_after = engine.store.get_heuristic("a").await.unwrap().unwrap();
        assert_eq!(a_after.status, HeuristicStatus::Archived);
    }

    #[test]
    fn eviction_score_treats_golden_heuristics_as_never_lowest() {
        let now = Utc::now();
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let engine = LifecycleEngine::new(store, RateLimitConfig::default());
        let mut golden = new_heuristic("g", "rust", 0.05);
        golden.is_golden = true;
        assert_eq!(engine.eviction_score(&golden, now), f64::MAX);
    }

    #[tokio::test]
    async fn find_merge_candidates_splits_auto_merge_from_manual_review() {
        let (_tmp, engine) = engine_with_store().await;
        let mut a = new_heuristic("a", "rust", 0.6);
        a.rule = "always validate user input before processing requests".to_string();
        let mut b = new_heuristic("b", "rust", 0.6);
        b.rule = "always validate user input before processing".to_string();
        let mut c = new_heuristic("c", "rust", 0.6);
        c.rule = "retry network calls with exponential backoff".to_string();
        engine.store.insert_heuristic(&a).await.unwrap();
        engine.store.insert_heuristic(&b).await.unwrap();
        engine.store.insert_heuristic(&c).await.unwrap();

        let candidates = engine.find_merge_candidates("rust").await.unwrap();
        assert!(candidates.iter().any(|c| c.auto_merge));
        assert!(!candidates.iter().any(|pair| pair.ids.contains(&"c".to_string())));
    }
}
