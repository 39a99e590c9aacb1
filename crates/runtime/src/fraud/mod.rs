//! C5 — Fraud Detector: three detectors plus Bayesian fusion, alert-only
//! response, outcome tracking, and a companion threshold tuner (§4.5).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::FraudConfig;
use crate::knowledge::types::{
    AnomalySignal, DomainBaseline, FraudOutcome, FraudReport, FraudSeverity, Heuristic,
    SessionContext, ThresholdRecommendation,
};
use crate::knowledge::KnowledgeStore;
use crate::types::error::FraudError;

const MIN_APPLICATIONS: u32 = 10;

#[derive(Debug, Clone)]
pub struct DetectorSignal {
    pub detector: &'static str,
    pub score: f64,
    pub severity: FraudSeverity,
    pub reason: String,
    pub evidence: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct FraudAssessment {
    pub heuristic_id: String,
    pub posterior: f64,
    pub classification: &'static str,
    pub signals: Vec<DetectorSignal>,
}

/// Runs the three detectors, fuses them via Bayesian updating, classifies,
/// and writes the alert-only response — never auto-quarantines (§4.5).
pub struct FraudDetector {
    store: Arc<KnowledgeStore>,
    config: FraudConfig,
    ceo_inbox: PathBuf,
}

impl FraudDetector {
    pub fn new(store: Arc<KnowledgeStore>, config: FraudConfig, elf_base: &std::path::Path) -> Self {
        Self {
            store,
            config,
            ceo_inbox: elf_base.join("ceo-inbox"),
        }
    }

    /// Runs a full fraud check for one heuristic and persists the outcome.
    /// Golden heuristics are always whitelisted and never flagged.
    pub async fn check_heuristic(&self, heuristic_id: &str) -> Result<Option<FraudAssessment>, FraudError> {
        let heuristic = self
            .store
            .get_heuristic(heuristic_id)
            .await?
            .ok_or_else(|| FraudError::NotFound(heuristic_id.to_string()))?;
        if heuristic.is_golden {
            return Ok(None);
        }

        let updates = self
            .store
            .query_confidence_history(heuristic_id, Utc::now() - ChronoDuration::days(60))
            .await?;
        let deltas = self
            .store
            .query_confidence_deltas(heuristic_id, Utc::now() - ChronoDuration::days(60))
            .await?;

        let mut signals = Vec::new();
        if let Some(s) = self.success_rate_anomaly(&heuristic).await? {
            signals.push(s);
        }
        if let Some(s) = self.temporal_manipulation(&updates) {
            signals.push(s);
        }
        if let Some(s) = self.unnatural_confidence_growth(&deltas) {
            signals.push(s);
        }

        let posterior = fuse_bayesian(&signals);
        let classification = self.classify(posterior);

        let report = FraudReport {
            id: uuid::Uuid::new_v4().to_string(),
            heuristic_id: heuristic_id.to_string(),
            fraud_score: posterior,
            classification: classification.to_string(),
            evidence: serde_json::json!({ "signal_count": signals.len() }),
            created_at: Utc::now(),
        };
        self.store.insert_fraud_report(&report).await?;
        for s in &signals {
            let row = AnomalySignal {
                id: uuid::Uuid::new_v4().to_string(),
                report_id: report.id.clone(),
                detector: s.detector.to_string(),
                score: s.score,
                severity: s.severity,
                reason: s.reason.clone(),
                evidence: s.evidence.clone(),
            };
            self.store.insert_anomaly_signal(&row).await?;
        }
        self.store.insert_fraud_response(&report.id, "alert").await?;

        if matches!(classification, "fraud_likely" | "fraud_confirmed") {
            self.write_ceo_inbox_alert(&report, &signals).await;
        }

        let mut updated = heuristic;
        updated.fraud_flags += 1;
        updated.last_fraud_check = Some(Utc::now());
        updated.updated_at = Utc::now();
        self.store.update_heuristic(&updated).await?;

        Ok(Some(FraudAssessment {
            heuristic_id: heuristic_id.to_string(),
            posterior,
            classification,
            signals,
        }))
    }

    /// Success-rate anomaly vs. the domain baseline (§4.5 bullet 1).
    async fn success_rate_anomaly(&self, h: &Heuristic) -> Result<Option<DetectorSignal>, FraudError> {
        let total_apps = h.times_validated + h.times_violated + h.times_contradicted;
        if total_apps < MIN_APPLICATIONS {
            return Ok(None);
        }
        let baseline = self.store.get_domain_baseline(&h.domain).await?;
        let Some(baseline) = baseline else { return Ok(None) };
        if baseline.sample_count < 3 || baseline.std_success_rate <= 0.0 {
            return Ok(None);
        }

        let rate = h.times_validated as f64 / total_apps as f64;
        let z = (rate - baseline.avg_success_rate) / baseline.std_success_rate;
        if z <= 2.5 {
            return Ok(None);
        }
        let severity = if z > 3.5 { FraudSeverity::High } else { FraudSeverity::Medium };
        Ok(Some(DetectorSignal {
            detector: "success_rate_anomaly",
            score: (z / 5.0).min(1.0),
            severity,
            reason: format!("success rate z-score {z:.2} exceeds 2.5"),
            evidence: serde_json::json!({ "z": z, "rate": rate, "baseline_avg": baseline.avg_success_rate }),
        }))
    }

    /// Temporal manipulation: cooldown-boundary clustering, off-hour
    /// clustering, and interval regularity (§4.5 bullet 2).
    fn temporal_manipulation(&self, updates: &[DateTime<Utc>]) -> Option<DetectorSignal> {
        let recent: Vec<&DateTime<Utc>> = updates
            .iter()
            .filter(|t| **t >= Utc::now() - ChronoDuration::days(30))
            .collect();
        if recent.len() < 5 {
            return None;
        }

        let mut sorted = recent.clone();
        sorted.sort();
        let intervals_minutes: Vec<f64> = sorted
            .windows(2)
            .map(|w| (*w[1] - *w[0]).num_seconds() as f64 / 60.0)
            .collect();
        if intervals_minutes.is_empty() {
            return None;
        }

        let cooldown_hits = intervals_minutes.iter().filter(|m| **m >= 60.0 && **m <= 65.0).count();
        let cooldown_fraction = cooldown_hits as f64 / intervals_minutes.len() as f64;

        let midnight_hits = sorted.iter().filter(|t| matches!(t.format("%H").to_string().parse::<u32>().unwrap_or(99), 0 | 1 | 23)).count();
        let expected_fraction = 3.0 / 24.0;
        let midnight_fraction = midnight_hits as f64 / sorted.len() as f64;

        let mean = intervals_minutes.iter().sum::<f64>() / intervals_minutes.len() as f64;
        let variance = intervals_minutes.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / intervals_minutes.len() as f64;
        let cv = if mean > 0.0 { variance.sqrt() / mean } else { 0.0 };
        let regularity_suspicion = (1.0 - cv / 0.5).max(0.0);

        let score = 0.4 * cooldown_fraction
            + 0.3 * ((midnight_fraction - expected_fraction) * 4.0).max(0.0)
            + 0.3 * regularity_suspicion;

        if score <= 0.5 {
            return None;
        }
        Some(DetectorSignal {
            detector: "temporal_manipulation",
            score: score.min(1.0),
            severity: if score > 0.75 { FraudSeverity::High } else { FraudSeverity::Medium },
            reason: "update timing clusters around the cooldown boundary or off-hours".to_string(),
            evidence: serde_json::json!({
                "cooldown_fraction": cooldown_fraction,
                "midnight_fraction": midnight_fraction,
                "coefficient_of_variation": cv,
            }),
        })
    }

    /// Unnatural confidence growth: monotonicity, slope, smoothness (§4.5 bullet 3).
    fn unnatural_confidence_growth(&self, deltas: &[(DateTime<Utc>, f64)]) -> Option<DetectorSignal> {
        let recent: Vec<&(DateTime<Utc>, f64)> =
            deltas.iter().filter(|(t, _)| *t >= Utc::now() - ChronoDuration::days(60)).collect();
        if recent.len() < 10 {
            return None;
        }

        let positive = recent.iter().filter(|(_, d)| *d > 0.0).count();
        let mono = positive as f64 / recent.len() as f64;

        let span_days = ((recent.last().unwrap().0 - recent.first().unwrap().0).num_seconds() as f64 / 86_400.0).max(1.0);
        let total_delta: f64 = recent.iter().map(|(_, d)| d).sum();
        let slope = total_delta / span_days;

        let mean = total_delta / recent.len() as f64;
        let variance = recent.iter().map(|(_, d)| (d - mean).powi(2)).sum::<f64>() / recent.len() as f64;
        let smoothness = if mean.abs() > f64::EPSILON { (1.0 - (variance.sqrt() / mean.abs()).min(1.0)).max(0.0) } else { 0.0 };

        let score = 0.3 * mono + 0.4 * (slope / 0.02).min(1.0) + 0.3 * smoothness;
        if score <= 0.5 {
            return None;
        }
        Some(DetectorSignal {
            detector: "unnatural_confidence_growth",
            score: score.min(1.0),
            severity: FraudSeverity::Medium,
            reason: "confidence growth pattern is suspiciously monotonic and smooth".to_string(),
            evidence: serde_json::json!({ "monotonicity": mono, "slope_per_day": slope, "smoothness": smoothness }),
        })
    }

    fn classify(&self, posterior: f64) -> &'static str {
        if posterior < self.config.clean_max {
            "clean"
        } else if posterior < self.config.suspicious_max {
            "suspicious"
        } else if posterior < self.config.fraud_likely_max {
            "fraud_likely"
        } else {
            "fraud_confirmed"
        }
    }

    async fn write_ceo_inbox_alert(&self, report: &FraudReport, signals: &[DetectorSignal]) {
        let Ok(()) = std::fs::create_dir_all(&self.ceo_inbox) else { return };
        let path = self
            .ceo_inbox
            .join(format!("fraud_alert_{}_{}.json", report.id, Utc::now().timestamp()));
        let body = serde_json::json!({
            "type": "FRAUD_ALERT",
            "report_id": report.id,
            "heuristic_id": report.heuristic_id,
            "classification": report.classification,
            "score": report.fraud_score,
            "signals": signals.iter().map(|s| s.detector.to_string()).collect::<Vec<_>>(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Ok(text) = serde_json::to_string_pretty(&body) {
            let _ = std::fs::write(path, text);
        }
    }

    /// `record_outcome(report_id, outcome, decided_by, notes?)` (§4.5 "Outcome tracking").
    pub async fn record_outcome(
        &self,
        report_id: &str,
        outcome: &str,
        decided_by: &str,
        notes: Option<String>,
    ) -> Result<(), FraudError> {
        let row = FraudOutcome {
            report_id: report_id.to_string(),
            outcome: outcome.to_string(),
            decided_by: decided_by.to_string(),
            notes,
            decided_at: Utc::now(),
        };
        self.store.record_outcome(&row).await?;
        Ok(())
    }

    /// Per-detector precision/recall-ish accuracy summary.
    pub async fn detector_accuracy(&self, detector: &str) -> Result<DetectorAccuracy, FraudError> {
        let (tp, fp, dismissed, pending) = self.store.fraud_accuracy_by_detector(detector).await?;
        let reviewed = tp + fp;
        let precision = if reviewed > 0 { tp as f64 / reviewed as f64 } else { 0.0 };
        Ok(DetectorAccuracy {
            true_positive: tp,
            false_positive: fp,
            dismissed,
            pending,
            precision,
            underperforming: reviewed >= 10 && precision < 0.5,
        })
    }

    /// Registers a session's context hash for application-selectivity
    /// analysis (§4.5 "Context hashing").
    pub async fn register_session_context(
        &self,
        session_id: &str,
        agent_id: &str,
        context_text: &str,
        heuristics_applied: Vec<String>,
    ) -> Result<(), FraudError> {
        let mut hasher = Sha256::new();
        hasher.update(context_text.as_bytes());
        let context_hash = hex::encode(hasher.finalize());
        let preview: String = context_text.chars().take(100).collect();

        let row = SessionContext {
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
            context_hash,
            preview,
            heuristics_applied,
            created_at: Utc::now(),
        };
        self.store.upsert_session_context(&row).await?;
        Ok(())
    }

    pub async fn cleanup_old_contexts(&self) -> Result<usize, FraudError> {
        let cutoff = Utc::now() - ChronoDuration::days(7);
        self.store.cleanup_old_contexts(cutoff).await.map_err(FraudError::Store)
    }

    /// `update_domain_baseline(domain)` (§4.5 "Baseline management").
    pub async fn update_domain_baseline(&self, domain: &str) -> Result<(), FraudError> {
        let heuristics = self.store.list_heuristics_by_domain(domain, Some("active")).await?;
        let eligible: Vec<&Heuristic> = heuristics
            .iter()
            .filter(|h| h.times_validated + h.times_violated + h.times_contradicted >= MIN_APPLICATIONS)
            .collect();
        if eligible.is_empty() {
            return Err(FraudError::InsufficientBaseline {
                reason: format!("no heuristics in domain '{domain}' meet min_applications"),
            });
        }

        let rates: Vec<f64> = eligible
            .iter()
            .map(|h| {
                let total = h.times_validated + h.times_violated + h.times_contradicted;
                h.times_validated as f64 / total as f64
            })
            .collect();
        let avg = rates.iter().sum::<f64>() / rates.len() as f64;
        let variance = rates.iter().map(|r| (r - avg).powi(2)).sum::<f64>() / rates.len() as f64;
        let std = variance.sqrt();

        let avg_update_frequency = eligible
            .iter()
            .map(|h| (h.times_validated + h.times_violated + h.times_contradicted) as f64)
            .sum::<f64>()
            / eligible.len() as f64;

        let previous = self.store.get_domain_baseline(domain).await?;
        let baseline = DomainBaseline {
            domain: domain.to_string(),
            avg_success_rate: avg,
            std_success_rate: std,
            sample_count: eligible.len() as u32,
            avg_update_frequency,
            updated_at: Utc::now(),
        };
        self.store.upsert_domain_baseline(&baseline).await?;

        if let Some(prev) = previous {
            if prev.avg_success_rate > 0.0 {
                let drift_pct = ((avg - prev.avg_success_rate) / prev.avg_success_rate * 100.0).abs();
                if drift_pct > 20.0 {
                    let severity = if drift_pct >= 50.0 {
                        "critical"
                    } else if drift_pct >= 35.0 {
                        "high"
                    } else {
                        "medium"
                    };
                    self.store.insert_baseline_drift_alert(domain, drift_pct, severity).await?;
                }
            }
        }
        Ok(())
    }

    /// Recommends a per-detector/per-level threshold achieving the target
    /// FPR; never auto-applies (§4.5 "Threshold Tuner"). Clamped to ±0.10
    /// per step and to the absolute per-level bounds.
    pub async fn recommend_threshold(
        &self,
        detector: &str,
        level: &str,
        current_value: f64,
    ) -> Result<ThresholdRecommendation, FraudError> {
        let (tp, fp, _, _) = self.store.fraud_accuracy_by_detector(detector).await?;
        let reviewed = tp + fp;
        let estimated_fpr = if reviewed > 0 { fp as f64 / reviewed as f64 } else { 0.0 };

        let (lo, hi, min_sep_next) = match level {
            "suspicious" => (0.10, 0.40, 0.10),
            "likely" => (0.30, 0.70, 0.15),
            "confirmed" => (0.60, 0.95, 0.0),
            _ => {
                return Err(FraudError::ThresholdRejected {
                    reason: format!("unknown classification level '{level}'"),
                })
            }
        };
        let _ = min_sep_next;

        let direction = if estimated_fpr > self.config.target_fpr { 0.05 } else { -0.05 };
        let mut recommended = current_value + direction;
        let max_step = 0.10;
        recommended = recommended.clamp(current_value - max_step, current_value + max_step);
        recommended = recommended.clamp(lo, hi);

        let rec = ThresholdRecommendation {
            id: uuid::Uuid::new_v4().to_string(),
            detector: detector.to_string(),
            level: level.to_string(),
            current_value,
            recommended_value: recommended,
            target_fpr: self.config.target_fpr,
            estimated_fpr,
            status: "pending".to_string(),
            created_at: Utc::now(),
        };
        self.store.insert_threshold_recommendation(&rec).await?;
        Ok(rec)
    }

    /// Requires a human-approved recommendation id; reversible via
    /// [`FraudDetector::rollback_threshold`].
    pub async fn apply_threshold_update(&self, recommendation_id: &str, applied_by: &str) -> Result<String, FraudError> {
        self.store
            .apply_threshold_update(recommendation_id, applied_by)
            .await
            .map_err(FraudError::Store)
    }

    /// Undoes a previously applied threshold update, identified by the
    /// history id `apply_threshold_update` returned.
    pub async fn rollback_threshold(&self, history_id: &str) -> Result<(), FraudError> {
        self.store.rollback_threshold(history_id).await.map_err(FraudError::Store)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetectorAccuracy {
    pub true_positive: u64,
    pub false_positive: u64,
    pub dismissed: u64,
    pub pending: u64,
    pub precision: f64,
    pub underperforming: bool,
}

/// Bayesian fusion: prior P(fraud)=0.05, likelihood ratio per signal
/// LR = (0.8·s)/(0.1·s) bounded, combined multiplicatively (§4.5 "Fusion").
fn fuse_bayesian(signals: &[DetectorSignal]) -> f64 {
    if signals.is_empty() {
        return 0.05;
    }
    let prior = 0.05_f64;
    let prior_odds = prior / (1.0 - prior);

    let combined_lr: f64 = signals
        .iter()
        .map(|s| {
            let numerator = 0.8 * s.score;
            let denominator = 0.1 * s.score;
            if denominator <= 0.0 {
                10.0
            } else {
                (numerator / denominator).min(10.0)
            }
        })
        .product();

    let posterior_odds = prior_odds * combined_lr;
    posterior_odds / (1.0 + posterior_odds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FraudConfig;
    use crate::types::HeuristicStatus;

    fn new_heuristic(id: &str, domain: &str) -> Heuristic {
        let now = Utc::now();
        Heuristic {
            id: id.to_string(),
            domain: domain.to_string(),
            rule: "rule".to_string(),
            explanation: "explanation".to_string(),
            confidence: 0.9,
            confidence_ema: 0.9,
            ema_alpha: 0.1,
            ema_warmup_remaining: 0,
            times_validated: 18,
            times_violated: 1,
            times_contradicted: 1,
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

    #[test]
    fn bayesian_fusion_with_no_signals_returns_prior() {
        assert!((fuse_bayesian(&[]) - 0.05).abs() < 1e-9);
    }

    #[test]
    fn bayesian_fusion_with_strong_signal_raises_posterior_above_prior() {
        let signals = vec![DetectorSignal {
            detector: "success_rate_anomaly",
            score: 0.9,
            severity: FraudSeverity::High,
            reason: "test".to_string(),
            evidence: serde_json::json!({}),
        }];
        assert!(fuse_bayesian(&signals) > 0.05);
    }

    #[tokio::test]
    async fn golden_heuristic_is_whitelisted_from_checks() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let mut h = new_heuristic("h1", "rust");
        h.is_golden = true;
        store.insert_heuristic(&h).await.unwrap();

        let detector = FraudDetector::new(store, FraudConfig::default(), tmp.path());
        let result = detector.check_heuristic("h1").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn success_rate_anomaly_fires_on_strong_outlier() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let h = new_heuristic("h1", "rust");
        store.insert_heuristic(&h).await.unwrap();
        store
            .upsert_domain_baseline(&DomainBaseline {
                domain: "rust".to_string(),
                avg_success_rate: 0.5,
                std_success_rate: 0.05,
                sample_count: 5,
                avg_update_frequency: 15.0,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let detector = FraudDetector::new(store, FraudConfig::default(), tmp.path());
        let assessment = detector.check_heuristic("h1").await.unwrap().unwrap();
        assert!(assessment.signals.iter().any(|s| s.detector == "success_rate_anomaly"));
    }

    #[tokio::test]
    async fn sparse_sporadic_deltas_do_not_trip_growth_detector() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let h = new_heuristic("h1", "rust");
        store.insert_heuristic(&h).await.unwrap();

        let detector = FraudDetector::new(store.clone(), FraudConfig::default(), tmp.path());
        for i in 0..12 {
            let delta = if i % 2 == 0 { 0.01 } else { -0.01 };
            store
                .insert_confidence_update(&crate::knowledge::types::ConfidenceUpdate {
                    id: uuid::Uuid::new_v4().to_string(),
                    heuristic_id: "h1".to_string(),
                    old_confidence: 0.5,
                    new_confidence: 0.5 + delta,
                    delta,
                    update_type: crate::types::UpdateType::Success,
                    raw_target: 0.5 + delta,
                    smoothed_delta: delta,
                    alpha: 0.3,
                    session: None,
                    agent: None,
                    created_at: Utc::now() - ChronoDuration::hours(i),
                })
                .await
                .unwrap();
        }

        let assessment = detector.check_heuristic("h1").await.unwrap().unwrap();
        assert!(!assessment.signals.iter().any(|s| s.detector == "unnatural_confidence_growth"));
    }

    #[tokio::test]
    async fn classification_thresholds_follow_config_bands() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let detector = FraudDetector::new(store, FraudConfig::default(), tmp.path());
        assert_eq!(detector.classify(0.05), "clean");
        assert_eq!(detector.classify(0.30), "suspicious");
        assert_eq!(detector.classify(0.60), "fraud_likely");
        assert_eq!(detector.classify(0.90), "fraud_confirmed");
    }
}
