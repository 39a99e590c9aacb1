//! C6 — Meta-Observer: rolling-window trend/anomaly analysis over recorded
//! metrics, with idempotent alerts and a bootstrap mode for cold starts
//! (§4.6).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;

use crate::config::MetaObserverConfig;
use crate::knowledge::types::{Alert, AlertState, MetricObservation};
use crate::knowledge::KnowledgeStore;
use crate::types::error::ObserverError;

const MIN_OBSERVATIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone)]
pub struct TrendResult {
    pub direction: TrendDirection,
    pub slope: f64,
    pub confidence: Confidence,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AnomalyResult {
    pub z_score: f64,
    pub is_anomaly: bool,
    pub severity: &'static str,
    pub reason: Option<String>,
}

pub struct MetaObserver {
    store: Arc<KnowledgeStore>,
    config: MetaObserverConfig,
}

impl MetaObserver {
    pub fn new(store: Arc<KnowledgeStore>, config: MetaObserverConfig) -> Self {
        Self { store, config }
    }

    pub async fn record(&self, name: &str, value: f64, domain: Option<String>, metadata: Option<serde_json::Value>) -> Result<(), ObserverError> {
        let row = MetricObservation {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            value,
            domain,
            metadata,
            observed_at: Utc::now(),
        };
        self.store.insert_metric_observation(&row).await?;
        Ok(())
    }

    async fn window(&self, name: &str, window_hours: i64) -> Result<Vec<MetricObservation>, ObserverError> {
        let since = Utc::now() - ChronoDuration::hours(window_hours);
        Ok(self.store.query_metric_observations(name, since).await?)
    }

    fn check_bounds(observations: &[MetricObservation], window_hours: i64) -> Result<(), ObserverError> {
        if observations.len() < MIN_OBSERVATIONS {
            return Err(ObserverError::InsufficientData {
                needed: MIN_OBSERVATIONS,
                have: observations.len(),
            });
        }
        let span_secs = (observations.last().unwrap().observed_at - observations.first().unwrap().observed_at).num_seconds();
        let needed_secs = (window_hours * 3600 / 10).max(3600);
        if span_secs < needed_secs {
            return Err(ObserverError::InsufficientTimeSpread { needed_secs, span_secs });
        }
        Ok(())
    }

    /// Least-squares trend over value-vs-index (§4.6 "Trend").
    pub async fn trend(&self, name: &str, window_hours: i64) -> Result<TrendResult, ObserverError> {
        let observations = self.window(name, window_hours).await?;
        Self::check_bounds(&observations, window_hours)?;

        let n = observations.len() as f64;
        let xs: Vec<f64> = (0..observations.len()).map(|i| i as f64).collect();
        let ys: Vec<f64> = observations.iter().map(|o| o.value).collect();
        let x_mean = xs.iter().sum::<f64>() / n;
        let y_mean = ys.iter().sum::<f64>() / n;

        let numerator: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - x_mean) * (y - y_mean)).sum();
        let denominator: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
        let slope = if denominator != 0.0 { numerator / denominator } else { 0.0 };
        let intercept = y_mean - slope * x_mean;

        let residual_ss: f64 = xs.iter().zip(&ys).map(|(x, y)| (y - (slope * x + intercept)).powi(2)).sum();
        let stderr = if n > 2.0 && denominator != 0.0 {
            (residual_ss / (n - 2.0) / denominator).sqrt()
        } else {
            f64::INFINITY
        };

        let t_stat = if stderr > 0.0 { slope / stderr } else { 0.0 };
        let p_value = approximate_two_sided_p(t_stat, (n - 2.0).max(1.0));

        let direction = if slope.abs() < 2.0 * stderr {
            TrendDirection::Stable
        } else if slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };

        let confidence = if p_value < 0.05 {
            Confidence::High
        } else if p_value < 0.10 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        Ok(TrendResult {
            direction,
            slope,
            confidence,
            reason: None,
        })
    }

    /// Robust anomaly detection via median ± MAD·1.4826 with a std fallback
    /// (§4.6 "Anomaly").
    pub async fn anomaly(&self, name: &str, baseline_window_hours: i64, current_window_hours: i64) -> Result<AnomalyResult, ObserverError> {
        let baseline = self.window(name, baseline_window_hours).await?;
        Self::check_bounds(&baseline, baseline_window_hours)?;
        let current = self.window(name, current_window_hours).await?;
        if current.is_empty() {
            return Err(ObserverError::InsufficientData { needed: 1, have: 0 });
        }

        let mut values: Vec<f64> = baseline.iter().map(|o| o.value).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let median = percentile_sorted(&values, 0.5);
        let mut abs_devs: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
        abs_devs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mad = percentile_sorted(&abs_devs, 0.5);

        let scale = if mad > 0.0 {
            mad * 1.4826
        } else {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
            var.sqrt()
        };

        let current_mean = current.iter().map(|o| o.value).sum::<f64>() / current.len() as f64;
        let z = if scale > 0.0 { (current_mean - median) / scale } else { 0.0 };

        let threshold = self.config.anomaly_z_threshold;
        let is_anomaly = z.abs() > threshold;
        let severity = if z.abs() > 4.0 {
            "critical"
        } else if is_anomaly {
            "warning"
        } else {
            "none"
        };

        Ok(AnomalyResult {
            z_score: z,
            is_anomaly,
            severity,
            reason: None,
        })
    }

    /// Idempotent alert upsert keyed by `(alert_type, metric_name)` in
    /// state `{new, active}` (§4.6 "Alerts").
    pub async fn raise_alert(
        &self,
        alert_type: &str,
        metric_name: &str,
        severity: &str,
        message: String,
        current_value: f64,
        baseline_value: Option<f64>,
    ) -> Result<Alert, ObserverError> {
        if let Some(mut existing) = self.store.get_live_alert(alert_type, metric_name).await? {
            existing.severity = severity.to_string();
            existing.message = message;
            existing.current_value = current_value;
            existing.baseline_value = baseline_value;
            existing.last_seen = Utc::now();
            self.store.update_alert(&existing).await?;
            return Ok(existing);
        }

        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            alert_type: alert_type.to_string(),
            metric_name: metric_name.to_string(),
            severity: severity.to_string(),
            message,
            current_value,
            baseline_value,
            state: AlertState::New,
            true_positive_count: 0,
            false_positive_count: 0,
            created_at: Utc::now(),
            last_seen: Utc::now(),
        };
        self.store.insert_alert(&alert).await?;
        Ok(alert)
    }

    pub async fn acknowledge_alert(&self, alert_id: &str) -> Result<(), ObserverError> {
        self.transition_alert(alert_id, AlertState::Ack).await
    }

    pub async fn resolve_alert(&self, alert_id: &str) -> Result<(), ObserverError> {
        self.transition_alert(alert_id, AlertState::Resolved).await
    }

    async fn transition_alert(&self, alert_id: &str, state: AlertState) -> Result<(), ObserverError> {
        let mut alert = self
            .store
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| ObserverError::NotFound(alert_id.to_string()))?;
        alert.state = state;
        alert.last_seen = Utc::now();
        self.store.update_alert(&alert).await?;
        Ok(())
    }

    /// `record_alert_outcome(alert_id, is_true_positive)` (§4.6
    /// "False-positive accounting"). Threshold auto-adjustment stays locked
    /// off; this only updates counters.
    pub async fn record_alert_outcome(&self, alert_id: &str, is_true_positive: bool) -> Result<(), ObserverError> {
        let mut alert = self
            .store
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| ObserverError::NotFound(alert_id.to_string()))?;
        if is_true_positive {
            alert.true_positive_count += 1;
        } else {
            alert.false_positive_count += 1;
        }
        self.store.update_alert(&alert).await?;
        Ok(())
    }

    /// `check_alerts`: bootstrap mode while total observations < 30, then
    /// the three standard alert conditions (§4.6).
    pub async fn check_alerts(&self, confidence_metric: &str, contradiction_metric: &str, validation_metric: &str) -> Result<Vec<Alert>, ObserverError> {
        let total = self.store.count_metric_observations(confidence_metric).await?;
        if (total as usize) < self.config.bootstrap_min_observations {
            let alert = self
                .raise_alert(
                    "bootstrap",
                    confidence_metric,
                    "info",
                    format!("bootstrap mode: {total}/{} observations collected", self.config.bootstrap_min_observations),
                    total as f64,
                    None,
                )
                .await?;
            return Ok(vec![alert]);
        }

        let mut alerts = Vec::new();

        // (i) sustained confidence decline.
        if let Ok(trend) = self.trend(confidence_metric, 24 * 7).await {
            if trend.direction == TrendDirection::Decreasing
                && matches!(trend.confidence, Confidence::High | Confidence::Medium)
                && trend.slope < -2e-4
            {
                let alert = self
                    .raise_alert(
                        "confidence_decline",
                        confidence_metric,
                        "warning",
                        format!("confidence trending down at slope {:.6}/observation", trend.slope),
                        trend.slope,
                        None,
                    )
                    .await?;
                alerts.push(alert);
            }
        }

        // (ii) contradiction rate spike.
        if let Ok(anomaly) = self.anomaly(contradiction_metric, 720, 24).await {
            if anomaly.is_anomaly {
                let alert = self
                    .raise_alert(
                        "contradiction_spike",
                        contradiction_metric,
                        anomaly.severity,
                        format!("contradiction rate anomaly, z={:.2}", anomaly.z_score),
                        anomaly.z_score,
                        None,
                    )
                    .await?;
                alerts.push(alert);
            }
        }

        // (iii) validation velocity drop.
        if let Ok(anomaly) = self.anomaly(validation_metric, 720, 24).await {
            if anomaly.z_score < -2.5 {
                let alert = self
                    .raise_alert(
                        "activity_decline",
                        validation_metric,
                        "info",
                        format!("validation velocity dropped, z={:.2}", anomaly.z_score),
                        anomaly.z_score,
                        None,
                    )
                    .await?;
                alerts.push(alert);
            }
        }

        Ok(alerts)
    }
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Rough two-sided p-value approximation via a normal tail bound; sufficient
/// for the high/medium/low confidence banding this module needs (exact
/// Student's-t quantiles aren't worth a dependency here).
fn approximate_two_sided_p(t_stat: f64, _df: f64) -> f64 {
    let z = t_stat.abs();
    let p_one_sided = 0.5 * erfc(z / std::f64::consts::SQRT_2);
    (2.0 * p_one_sided).clamp(0.0, 1.0)
}

fn erfc(x: f64) -> f64 {
    // Abramowitz & Stegun 7.1.26 approximation.
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    1.0 - sign * y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetaObserverConfig;

    async fn observer_with_store() -> (tempfile::TempDir, MetaObserver) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let observer = MetaObserver::new(store, MetaObserverConfig::default());
        (tmp, observer)
    }

    #[tokio::test]
    async fn bootstrap_mode_suppresses_other_alerts_below_threshold() {
        let (_tmp, observer) = observer_with_store().await;
        for i in 0..5 {
            observer.record("confidence_avg", 0.5 + i as f64 * 0.01, None, None).await.unwrap();
        }
        let alerts = observer.check_alerts("confidence_avg", "contradiction_rate", "validation_velocity").await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "bootstrap");
    }

    #[tokio::test]
    async fn trend_detects_increasing_direction() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let observer = MetaObserver::new(store.clone(), MetaObserverConfig::default());

        let start = Utc::now() - ChronoDuration::hours(20);
        for i in 0..20 {
            let row = MetricObservation {
                id: uuid::Uuid::new_v4().to_string(),
                name: "metric_a".to_string(),
                value: i as f64,
                domain: None,
                metadata: None,
                observed_at: start + ChronoDuration::hours(i),
            };
            store.insert_metric_observation(&row).await.unwrap();
        }
        let trend = observer.trend("metric_a", 24).await.unwrap();
        assert_eq!(trend.direction, TrendDirection::Increasing);
    }

    #[tokio::test]
    async fn trend_with_too_few_observations_is_insufficient_data() {
        let (_tmp, observer) = observer_with_store().await;
        observer.record("metric_b", 1.0, None, None).await.unwrap();
        let err = observer.trend("metric_b", 24).await.unwrap_err();
        assert!(matches!(err, ObserverError::InsufficientData { .. }));
    }

    #[tokio::test]
    async fn raise_alert_is_idempotent_for_same_type_and_metric() {
        let (_tmp, observer) = observer_with_store().await;
        let a1 = observer.raise_alert("activity_decline", "validation_velocity", "info", "first".to_string(), 1.0, None).await.unwrap();
        let a2 = observer.raise_alert("activity_decline", "validation_velocity", "info", "second".to_string(), 2.0, None).await.unwrap();
        assert_eq!(a1.id, a2.id);
        assert_eq!(a2.message, "second");
    }
}
