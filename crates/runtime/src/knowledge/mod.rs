//! C3 — Knowledge Store: a SQLite-backed persistent store of learnings,
//! heuristics, decisions, invariants, assumptions, spike reports, fraud
//! records, meta-observer metrics, and the conductor's workflow tables
//! (§4.3), following the teacher's `SqliteJobStore` idiom — a single
//! `tokio::sync::Mutex<rusqlite::Connection>` guarding a connection opened
//! once and reused for the process lifetime.

pub mod types;
pub mod validators;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::types::error::KnowledgeError;
use types::*;

pub struct KnowledgeStore {
    conn: tokio::sync::Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> KnowledgeError {
    KnowledgeError::Sqlite(e.to_string())
}

fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn to_json(value: &impl serde::Serialize) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn from_json<T: serde::de::DeserializeOwned + Default>(raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Renders a closed enum to its bare `snake_case` variant name (no
/// surrounding JSON quotes), so it can be used directly in `WHERE` clauses
/// and unique partial indexes alongside literal strings like `'active'`.
fn enum_str(value: &impl serde::Serialize) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

fn enum_from_str<T: serde::de::DeserializeOwned>(raw: &str, default: T) -> T {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).unwrap_or(default)
}

impl KnowledgeStore {
    /// Opens (creating if absent) `<memory>/index.db`. On create, sets file
    /// permissions to 0600 (owner-only); on Windows that step is skipped —
    /// the original's ACL adjustment to the current user has no direct
    /// cross-platform equivalent through `std::fs` alone and is left to
    /// deployment-time hardening.
    pub fn open(memory_dir: &Path) -> Result<Self, KnowledgeError> {
        std::fs::create_dir_all(memory_dir).map_err(|e| KnowledgeError::Configuration(e.to_string()))?;
        let db_path = memory_dir.join("index.db");
        let is_new = !db_path.exists();

        let conn = Connection::open(&db_path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;
        conn.pragma_update(None, "busy_timeout", 10_000).map_err(db_err)?;
        conn.pragma_update(None, "foreign_keys", "ON").map_err(db_err)?;
        Self::init_schema(&conn)?;

        if is_new {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o600);
                let _ = std::fs::set_permissions(&db_path, perms);
            }
        }

        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), KnowledgeError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS heuristics (
                id TEXT PRIMARY KEY,
                domain TEXT NOT NULL,
                rule TEXT NOT NULL,
                explanation TEXT NOT NULL,
                confidence REAL NOT NULL,
                confidence_ema REAL NOT NULL,
                ema_alpha REAL NOT NULL,
                ema_warmup_remaining INTEGER NOT NULL,
                times_validated INTEGER NOT NULL DEFAULT 0,
                times_violated INTEGER NOT NULL DEFAULT 0,
                times_contradicted INTEGER NOT NULL DEFAULT 0,
                times_revived INTEGER NOT NULL DEFAULT 0,
                fraud_flags INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                is_golden INTEGER NOT NULL DEFAULT 0,
                project_path TEXT,
                last_used_at TEXT,
                dormant_since TEXT,
                revival_conditions TEXT NOT NULL DEFAULT '[]',
                update_count_today INTEGER NOT NULL DEFAULT 0,
                update_count_reset_date TEXT NOT NULL,
                last_confidence_update TEXT,
                last_fraud_check TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_heuristics_domain ON heuristics(domain);
            CREATE INDEX IF NOT EXISTS idx_heuristics_status ON heuristics(status);

            CREATE TABLE IF NOT EXISTS learnings (
                id TEXT PRIMARY KEY,
                learning_type TEXT NOT NULL,
                filepath TEXT NOT NULL,
                title TEXT NOT NULL,
                summary TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                domain TEXT NOT NULL,
                severity INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_learnings_domain ON learnings(domain);

            CREATE TABLE IF NOT EXISTS decisions (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                context TEXT NOT NULL,
                options TEXT NOT NULL DEFAULT '[]',
                decision TEXT NOT NULL,
                rationale TEXT NOT NULL,
                status TEXT NOT NULL,
                superseded_by TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS invariants (
                id TEXT PRIMARY KEY,
                statement TEXT NOT NULL,
                rationale TEXT NOT NULL,
                scope TEXT NOT NULL,
                severity TEXT NOT NULL,
                status TEXT NOT NULL,
                violation_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS assumptions (
                id TEXT PRIMARY KEY,
                assumption TEXT NOT NULL,
                context TEXT NOT NULL,
                source TEXT NOT NULL,
                confidence REAL NOT NULL,
                status TEXT NOT NULL,
                verified_count INTEGER NOT NULL DEFAULT 0,
                challenged_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS spike_reports (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                findings TEXT NOT NULL,
                gotchas TEXT NOT NULL,
                usefulness_score REAL NOT NULL DEFAULT 0,
                access_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS building_queries (
                id TEXT PRIMARY KEY,
                query_type TEXT NOT NULL,
                session_id TEXT,
                agent_id TEXT,
                filters TEXT NOT NULL DEFAULT '{}',
                results_returned INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS confidence_updates (
                id TEXT PRIMARY KEY,
                heuristic_id TEXT NOT NULL,
                old_confidence REAL NOT NULL,
                new_confidence REAL NOT NULL,
                delta REAL NOT NULL,
                update_type TEXT NOT NULL,
                raw_target REAL NOT NULL,
                smoothed_delta REAL NOT NULL,
                alpha REAL NOT NULL,
                session TEXT,
                agent TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_confidence_updates_heuristic ON confidence_updates(heuristic_id, created_at);

            CREATE TABLE IF NOT EXISTS heuristic_merges (
                id TEXT PRIMARY KEY,
                result_id TEXT NOT NULL,
                source_ids TEXT NOT NULL,
                strategy TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS metric_observations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                value REAL NOT NULL,
                domain TEXT,
                metadata TEXT,
                observed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_metric_observations_name ON metric_observations(name, observed_at);

            CREATE TABLE IF NOT EXISTS fraud_reports (
                id TEXT PRIMARY KEY,
                heuristic_id TEXT NOT NULL,
                fraud_score REAL NOT NULL,
                classification TEXT NOT NULL,
                evidence TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS anomaly_signals (
                id TEXT PRIMARY KEY,
                report_id TEXT NOT NULL,
                detector TEXT NOT NULL,
                score REAL NOT NULL,
                severity TEXT NOT NULL,
                reason TEXT NOT NULL,
                evidence TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS fraud_responses (
                id TEXT PRIMARY KEY,
                report_id TEXT NOT NULL,
                response_type TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fraud_outcomes (
                report_id TEXT PRIMARY KEY,
                outcome TEXT NOT NULL,
                decided_by TEXT NOT NULL,
                notes TEXT,
                decided_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS session_contexts (
                session_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                context_hash TEXT NOT NULL,
                preview TEXT NOT NULL,
                heuristics_applied TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                PRIMARY KEY (session_id, agent_id)
            );

            CREATE TABLE IF NOT EXISTS domain_baselines (
                domain TEXT PRIMARY KEY,
                avg_success_rate REAL NOT NULL,
                std_success_rate REAL NOT NULL,
                sample_count INTEGER NOT NULL,
                avg_update_frequency REAL NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS domain_baseline_history (
                id TEXT PRIMARY KEY,
                domain TEXT NOT NULL,
                avg_success_rate REAL NOT NULL,
                std_success_rate REAL NOT NULL,
                sample_count INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS baseline_drift_alerts (
                id TEXT PRIMARY KEY,
                domain TEXT NOT NULL,
                drift_pct REAL NOT NULL,
                severity TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS threshold_recommendations (
                id TEXT PRIMARY KEY,
                detector TEXT NOT NULL,
                level TEXT NOT NULL,
                current_value REAL NOT NULL,
                recommended_value REAL NOT NULL,
                target_fpr REAL NOT NULL,
                estimated_fpr REAL NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS threshold_history (
                id TEXT PRIMARY KEY,
                recommendation_id TEXT NOT NULL,
                detector TEXT NOT NULL,
                level TEXT NOT NULL,
                old_value REAL NOT NULL,
                new_value REAL NOT NULL,
                applied_by TEXT NOT NULL,
                applied_at TEXT NOT NULL,
                rolled_back INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS workflows (
                name TEXT PRIMARY KEY,
                nodes_json TEXT NOT NULL,
                config_json TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS workflow_edges (
                workflow TEXT NOT NULL,
                from_node TEXT NOT NULL,
                to_node TEXT NOT NULL,
                condition TEXT,
                priority INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_workflow_edges_from ON workflow_edges(workflow, from_node);

            CREATE TABLE IF NOT EXISTS workflow_runs (
                id TEXT PRIMARY KEY,
                workflow TEXT NOT NULL,
                status TEXT NOT NULL,
                phase TEXT NOT NULL,
                input_json TEXT NOT NULL DEFAULT '{}',
                context_json TEXT NOT NULL DEFAULT '{}',
                total_nodes INTEGER NOT NULL DEFAULT 0,
                completed_nodes INTEGER NOT NULL DEFAULT 0,
                failed_nodes INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS node_executions (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                status TEXT NOT NULL,
                prompt_hash TEXT NOT NULL,
                result_text TEXT,
                result_json TEXT,
                findings_json TEXT,
                files_modified TEXT NOT NULL DEFAULT '[]',
                duration_ms INTEGER,
                token_count INTEGER,
                error_type TEXT,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_node_executions_run ON node_executions(run_id);

            CREATE TABLE IF NOT EXISTS conductor_decisions (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                decision_type TEXT NOT NULL,
                node_id TEXT,
                detail TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trails (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                location TEXT NOT NULL,
                scent TEXT NOT NULL,
                strength REAL NOT NULL,
                agent_id TEXT,
                node_id TEXT,
                message TEXT,
                tags TEXT NOT NULL DEFAULT '[]',
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trails_location ON trails(location);

            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                alert_type TEXT NOT NULL,
                metric_name TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                current_value REAL NOT NULL,
                baseline_value REAL,
                state TEXT NOT NULL,
                true_positive_count INTEGER NOT NULL DEFAULT 0,
                false_positive_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_seen TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_type_metric_live ON alerts(alert_type, metric_name)
                WHERE state IN ('new', 'active');
            "#,
        )
        .map_err(db_err)
    }

    // ---- heuristics -------------------------------------------------------

    pub async fn insert_heuristic(&self, h: &Heuristic) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO heuristics (id, domain, rule, explanation, confidence, confidence_ema, ema_alpha,
                ema_warmup_remaining, times_validated, times_violated, times_contradicted, times_revived,
                fraud_flags, status, is_golden, project_path, last_used_at, dormant_since, revival_conditions,
                update_count_today, update_count_reset_date, last_confidence_update, last_fraud_check,
                created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25)",
            params![
                h.id, h.domain, h.rule, h.explanation, h.confidence, h.confidence_ema, h.ema_alpha,
                h.ema_warmup_remaining, h.times_validated, h.times_violated, h.times_contradicted,
                h.times_revived, h.fraud_flags, enum_str(&h.status), h.is_golden as i32, h.project_path,
                h.last_used_at.map(to_rfc3339), h.dormant_since.map(to_rfc3339), to_json(&h.revival_conditions),
                h.update_count_today, to_rfc3339(h.update_count_reset_date),
                h.last_confidence_update.map(to_rfc3339), h.last_fraud_check.map(to_rfc3339),
                to_rfc3339(h.created_at), to_rfc3339(h.updated_at),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_heuristic(&self, id: &str) -> Result<Option<Heuristic>, KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM heuristics WHERE id = ?1", params![id], row_to_heuristic)
            .optional()
            .map_err(db_err)
    }

    pub async fn list_heuristics_by_domain(
        &self,
        domain: &str,
        status: Option<&str>,
    ) -> Result<Vec<Heuristic>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = if status.is_some() {
            conn.prepare("SELECT * FROM heuristics WHERE domain = ?1 AND status = ?2").map_err(db_err)?
        } else {
            conn.prepare("SELECT * FROM heuristics WHERE domain = ?1").map_err(db_err)?
        };
        let rows = if let Some(s) = status {
            stmt.query_map(params![domain, s], row_to_heuristic).map_err(db_err)?
        } else {
            stmt.query_map(params![domain], row_to_heuristic).map_err(db_err)?
        };
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    pub async fn list_heuristics_by_status(&self, status: &str) -> Result<Vec<Heuristic>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM heuristics WHERE status = ?1").map_err(db_err)?;
        let rows = stmt.query_map(params![status], row_to_heuristic).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    pub async fn update_heuristic(&self, h: &Heuristic) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE heuristics SET domain=?2, rule=?3, explanation=?4, confidence=?5, confidence_ema=?6,
                ema_alpha=?7, ema_warmup_remaining=?8, times_validated=?9, times_violated=?10,
                times_contradicted=?11, times_revived=?12, fraud_flags=?13, status=?14, is_golden=?15,
                project_path=?16, last_used_at=?17, dormant_since=?18, revival_conditions=?19,
                update_count_today=?20, update_count_reset_date=?21, last_confidence_update=?22,
                last_fraud_check=?23, updated_at=?24
             WHERE id=?1",
            params![
                h.id, h.domain, h.rule, h.explanation, h.confidence, h.confidence_ema, h.ema_alpha,
                h.ema_warmup_remaining, h.times_validated, h.times_violated, h.times_contradicted,
                h.times_revived, h.fraud_flags, enum_str(&h.status), h.is_golden as i32, h.project_path,
                h.last_used_at.map(to_rfc3339), h.dormant_since.map(to_rfc3339), to_json(&h.revival_conditions),
                h.update_count_today, to_rfc3339(h.update_count_reset_date),
                h.last_confidence_update.map(to_rfc3339), h.last_fraud_check.map(to_rfc3339),
                to_rfc3339(h.updated_at),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn insert_confidence_update(&self, u: &ConfidenceUpdate) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO confidence_updates (id, heuristic_id, old_confidence, new_confidence, delta,
                update_type, raw_target, smoothed_delta, alpha, session, agent, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                u.id, u.heuristic_id, u.old_confidence, u.new_confidence, u.delta, enum_str(&u.update_type),
                u.raw_target, u.smoothed_delta, u.alpha, u.session, u.agent, to_rfc3339(u.created_at)
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn count_updates_today(&self, heuristic_id: &str, since: DateTime<Utc>) -> Result<u32, KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT COUNT(*) FROM confidence_updates WHERE heuristic_id = ?1 AND created_at >= ?2",
            params![heuristic_id, to_rfc3339(since)],
            |r| r.get(0),
        )
        .map_err(db_err)
    }

    /// Timestamps of every confidence update for a heuristic since `since`,
    /// ascending — the raw material the fraud detector's temporal and
    /// growth-pattern detectors analyze.
    pub async fn query_confidence_history(
        &self,
        heuristic_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT created_at FROM confidence_updates WHERE heuristic_id = ?1 AND created_at >= ?2 ORDER BY created_at ASC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![heuristic_id, to_rfc3339(since)], |r| r.get::<_, String>(0))
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(db_err)
            .map(|v| v.into_iter().map(|s| parse_ts(&s)).collect())
    }

    /// `(created_at, smoothed_delta)` pairs, ascending — the per-update
    /// confidence deltas the growth-pattern detector needs to tell a
    /// genuinely earned streak from an artificially smooth one.
    pub async fn query_confidence_deltas(
        &self,
        heuristic_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT created_at, smoothed_delta FROM confidence_updates WHERE heuristic_id = ?1 AND created_at >= ?2 ORDER BY created_at ASC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![heuristic_id, to_rfc3339(since)], |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?)))
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(db_err)
            .map(|v| v.into_iter().map(|(ts, delta)| (parse_ts(&ts), delta)).collect())
    }

    pub async fn insert_heuristic_merge(&self, m: &HeuristicMerge) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO heuristic_merges (id, result_id, source_ids, strategy, created_at) VALUES (?1,?2,?3,?4,?5)",
            params![m.id, m.result_id, to_json(&m.source_ids), m.strategy, to_rfc3339(m.created_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    // ---- learnings / decisions / invariants / assumptions / spikes -------

    pub async fn insert_learning(&self, l: &Learning) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO learnings (id, learning_type, filepath, title, summary, tags, domain, severity, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![l.id, enum_str(&l.learning_type), l.filepath, l.title, l.summary, to_json(&l.tags),
                l.domain, l.severity, to_rfc3339(l.created_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_learnings(
        &self,
        domain: Option<&str>,
        tag: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Learning>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM learnings WHERE (?1 IS NULL OR domain = ?1) ORDER BY created_at DESC LIMIT ?2")
            .map_err(db_err)?;
        let rows = stmt.query_map(params![domain, limit as i64], row_to_learning).map_err(db_err)?;
        let all: Vec<Learning> = rows.collect::<Result<Vec<_>, _>>().map_err(db_err)?;
        Ok(match tag {
            Some(t) => all.into_iter().filter(|l| l.tags.iter().any(|x| x == t)).collect(),
            None => all,
        })
    }

    pub async fn insert_decision(&self, d: &Decision) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO decisions (id, title, context, options, decision, rationale, status, superseded_by, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![d.id, d.title, d.context, to_json(&d.options), d.decision, d.rationale, d.status,
                d.superseded_by, to_rfc3339(d.created_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_accepted_decisions(&self, limit: usize) -> Result<Vec<Decision>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM decisions WHERE status = 'accepted' ORDER BY created_at DESC LIMIT ?1")
            .map_err(db_err)?;
        let rows = stmt.query_map(params![limit as i64], row_to_decision).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    pub async fn insert_invariant(&self, i: &Invariant) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO invariants (id, statement, rationale, scope, severity, status, violation_count, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![i.id, i.statement, i.rationale, enum_str(&i.scope), enum_str(&i.severity), i.status,
                i.violation_count, to_rfc3339(i.created_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_active_or_violated_invariants(&self, limit: usize) -> Result<Vec<Invariant>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM invariants WHERE status IN ('active','violated') ORDER BY created_at DESC LIMIT ?1")
            .map_err(db_err)?;
        let rows = stmt.query_map(params![limit as i64], row_to_invariant).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    pub async fn insert_assumption(&self, a: &Assumption) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO assumptions (id, assumption, context, source, confidence, status, verified_count,
                challenged_count, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![a.id, a.assumption, a.context, a.source, a.confidence, a.status, a.verified_count,
                a.challenged_count, to_rfc3339(a.created_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_high_confidence_assumptions(&self, min_confidence: f64, limit: usize) -> Result<Vec<Assumption>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM assumptions WHERE status = 'active' AND confidence >= ?1 ORDER BY created_at DESC LIMIT ?2")
            .map_err(db_err)?;
        let rows = stmt.query_map(params![min_confidence, limit as i64], row_to_assumption).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    pub async fn list_challenged_assumptions(&self, limit: usize) -> Result<Vec<Assumption>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM assumptions WHERE status IN ('challenged','invalidated') ORDER BY created_at DESC LIMIT ?1")
            .map_err(db_err)?;
        let rows = stmt.query_map(params![limit as i64], row_to_assumption).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    pub async fn insert_spike_report(&self, s: &SpikeReport) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO spike_reports (id, title, findings, gotchas, usefulness_score, access_count, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![s.id, s.title, s.findings, s.gotchas, s.usefulness_score, s.access_count, to_rfc3339(s.created_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_spike_reports(&self, limit: usize) -> Result<Vec<SpikeReport>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM spike_reports ORDER BY usefulness_score DESC, created_at DESC LIMIT ?1")
            .map_err(db_err)?;
        let rows = stmt.query_map(params![limit as i64], row_to_spike).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    // ---- building_queries / metric_observations ---------------------------

    pub async fn audit_query(&self, q: &BuildingQuery) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        let _ = conn.execute(
            "INSERT INTO building_queries (id, query_type, session_id, agent_id, filters, results_returned,
                duration_ms, status, error, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![q.id, q.query_type, q.session_id, q.agent_id, to_json(&q.filters), q.results_returned,
                q.duration_ms, q.status, q.error, to_rfc3339(q.created_at)],
        );
        Ok(())
    }

    pub async fn insert_metric_observation(&self, m: &MetricObservation) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO metric_observations (id, name, value, domain, metadata, observed_at) VALUES (?1,?2,?3,?4,?5,?6)",
            params![m.id, m.name, m.value, m.domain, m.metadata.as_ref().map(to_json), to_rfc3339(m.observed_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn query_metric_observations(
        &self,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MetricObservation>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM metric_observations WHERE name = ?1 AND observed_at >= ?2 ORDER BY observed_at ASC")
            .map_err(db_err)?;
        let rows = stmt.query_map(params![name, to_rfc3339(since)], row_to_metric).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    pub async fn count_metric_observations(&self, name: &str) -> Result<u64, KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT COUNT(*) FROM metric_observations WHERE name = ?1", params![name], |r| r.get(0))
            .map_err(db_err)
    }

    // ---- fraud --------------------------------------------------------

    pub async fn insert_fraud_report(&self, r: &FraudReport) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO fraud_reports (id, heuristic_id, fraud_score, classification, evidence, created_at)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![r.id, r.heuristic_id, r.fraud_score, r.classification, to_json(&r.evidence), to_rfc3339(r.created_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn insert_anomaly_signal(&self, s: &AnomalySignal) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO anomaly_signals (id, report_id, detector, score, severity, reason, evidence)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![s.id, s.report_id, s.detector, s.score, enum_str(&s.severity), s.reason, to_json(&s.evidence)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn insert_fraud_response(&self, report_id: &str, response_type: &str) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO fraud_responses (id, report_id, response_type, created_at) VALUES (?1,?2,?3,?4)",
            params![uuid::Uuid::new_v4().to_string(), report_id, response_type, to_rfc3339(Utc::now())],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn record_outcome(&self, o: &FraudOutcome) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO fraud_outcomes (report_id, outcome, decided_by, notes, decided_at) VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(report_id) DO UPDATE SET outcome=excluded.outcome, decided_by=excluded.decided_by,
                notes=excluded.notes, decided_at=excluded.decided_at",
            params![o.report_id, o.outcome, o.decided_by, o.notes, to_rfc3339(o.decided_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// `(true_positive, false_positive, dismissed, pending)` counts, per detector.
    pub async fn fraud_accuracy_by_detector(&self, detector: &str) -> Result<(u64, u64, u64, u64), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT
                SUM(CASE WHEN fo.outcome = 'true_positive' THEN 1 ELSE 0 END),
                SUM(CASE WHEN fo.outcome = 'false_positive' THEN 1 ELSE 0 END),
                SUM(CASE WHEN fo.outcome = 'dismissed' THEN 1 ELSE 0 END),
                SUM(CASE WHEN fo.outcome IS NULL OR fo.outcome = 'pending' THEN 1 ELSE 0 END)
             FROM anomaly_signals ansig
             JOIN fraud_reports fr ON fr.id = ansig.report_id
             LEFT JOIN fraud_outcomes fo ON fo.report_id = fr.id
             WHERE ansig.detector = ?1",
            params![detector],
            |r| {
                Ok((
                    r.get::<_, Option<i64>>(0)?.unwrap_or(0) as u64,
                    r.get::<_, Option<i64>>(1)?.unwrap_or(0) as u64,
                    r.get::<_, Option<i64>>(2)?.unwrap_or(0) as u64,
                    r.get::<_, Option<i64>>(3)?.unwrap_or(0) as u64,
                ))
            },
        )
        .map_err(db_err)
    }

    pub async fn upsert_session_context(&self, s: &SessionContext) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO session_contexts (session_id, agent_id, context_hash, preview, heuristics_applied, created_at)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(session_id, agent_id) DO UPDATE SET context_hash=excluded.context_hash,
                preview=excluded.preview, heuristics_applied=excluded.heuristics_applied, created_at=excluded.created_at",
            params![s.session_id, s.agent_id, s.context_hash, s.preview, to_json(&s.heuristics_applied), to_rfc3339(s.created_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn cleanup_old_contexts(&self, older_than: DateTime<Utc>) -> Result<usize, KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM session_contexts WHERE created_at < ?1", params![to_rfc3339(older_than)])
            .map_err(db_err)
    }

    pub async fn upsert_domain_baseline(&self, b: &DomainBaseline) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO domain_baselines (domain, avg_success_rate, std_success_rate, sample_count,
                avg_update_frequency, updated_at) VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(domain) DO UPDATE SET avg_success_rate=excluded.avg_success_rate,
                std_success_rate=excluded.std_success_rate, sample_count=excluded.sample_count,
                avg_update_frequency=excluded.avg_update_frequency, updated_at=excluded.updated_at",
            params![b.domain, b.avg_success_rate, b.std_success_rate, b.sample_count, b.avg_update_frequency, to_rfc3339(b.updated_at)],
        )
        .map_err(db_err)?;
        conn.execute(
            "INSERT INTO domain_baseline_history (id, domain, avg_success_rate, std_success_rate, sample_count, recorded_at)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![uuid::Uuid::new_v4().to_string(), b.domain, b.avg_success_rate, b.std_success_rate, b.sample_count, to_rfc3339(b.updated_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_domain_baseline(&self, domain: &str) -> Result<Option<DomainBaseline>, KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM domain_baselines WHERE domain = ?1", params![domain], row_to_baseline)
            .optional()
            .map_err(db_err)
    }

    pub async fn insert_baseline_drift_alert(&self, domain: &str, drift_pct: f64, severity: &str) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO baseline_drift_alerts (id, domain, drift_pct, severity, created_at) VALUES (?1,?2,?3,?4,?5)",
            params![uuid::Uuid::new_v4().to_string(), domain, drift_pct, severity, to_rfc3339(Utc::now())],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn insert_threshold_recommendation(&self, t: &ThresholdRecommendation) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO threshold_recommendations (id, detector, level, current_value, recommended_value,
                target_fpr, estimated_fpr, status, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![t.id, t.detector, t.level, t.current_value, t.recommended_value, t.target_fpr,
                t.estimated_fpr, t.status, to_rfc3339(t.created_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_threshold_recommendation(&self, id: &str) -> Result<Option<ThresholdRecommendation>, KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM threshold_recommendations WHERE id = ?1", params![id], row_to_threshold_rec)
            .optional()
            .map_err(db_err)
    }

    pub async fn apply_threshold_update(
        &self,
        recommendation_id: &str,
        applied_by: &str,
    ) -> Result<String, KnowledgeError> {
        let conn = self.conn.lock().await;
        let rec = conn
            .query_row("SELECT * FROM threshold_recommendations WHERE id = ?1", params![recommendation_id], row_to_threshold_rec)
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| KnowledgeError::NotFound(format!("threshold recommendation {recommendation_id}")))?;

        let history_id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO threshold_history (id, recommendation_id, detector, level, old_value, new_value,
                applied_by, applied_at, rolled_back) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,0)",
            params![history_id, rec.id, rec.detector, rec.level, rec.current_value, rec.recommended_value,
                applied_by, to_rfc3339(Utc::now())],
        )
        .map_err(db_err)?;
        conn.execute("UPDATE threshold_recommendations SET status = 'applied' WHERE id = ?1", params![recommendation_id])
            .map_err(db_err)?;
        Ok(history_id)
    }

    pub async fn rollback_threshold(&self, history_id: &str) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute("UPDATE threshold_history SET rolled_back = 1 WHERE id = ?1 AND rolled_back = 0", params![history_id])
            .map_err(db_err)?;
        if updated == 0 {
            return Err(KnowledgeError::NotFound(format!("threshold history {history_id}")));
        }
        Ok(())
    }

    // ---- workflows / runs / nodes / trails / decisions ---------------------

    pub async fn upsert_workflow(&self, w: &Workflow) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO workflows (name, nodes_json, config_json) VALUES (?1,?2,?3)
             ON CONFLICT(name) DO UPDATE SET nodes_json=excluded.nodes_json, config_json=excluded.config_json",
            params![w.name, to_json(&w.nodes), to_json(&w.config)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_workflow(&self, name: &str) -> Result<Option<Workflow>, KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT name, nodes_json, config_json FROM workflows WHERE name = ?1", params![name], |r| {
            let nodes_raw: String = r.get(1)?;
            let config_raw: String = r.get(2)?;
            Ok(Workflow {
                name: r.get(0)?,
                nodes: serde_json::from_str(&nodes_raw).unwrap_or(serde_json::Value::Null),
                config: serde_json::from_str(&config_raw).unwrap_or(serde_json::Value::Null),
            })
        })
        .optional()
        .map_err(db_err)
    }

    pub async fn insert_workflow_edge(&self, e: &WorkflowEdge) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO workflow_edges (workflow, from_node, to_node, condition, priority) VALUES (?1,?2,?3,?4,?5)",
            params![e.workflow, e.from_node, e.to_node, e.condition, e.priority],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_edges_from(&self, workflow: &str, from_node: &str) -> Result<Vec<WorkflowEdge>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT workflow, from_node, to_node, condition, priority FROM workflow_edges
                      WHERE workflow = ?1 AND from_node = ?2 ORDER BY priority DESC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![workflow, from_node], |r| {
                Ok(WorkflowEdge {
                    workflow: r.get(0)?,
                    from_node: r.get(1)?,
                    to_node: r.get(2)?,
                    condition: r.get(3)?,
                    priority: r.get(4)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    pub async fn insert_workflow_run(&self, run: &WorkflowRun) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO workflow_runs (id, workflow, status, phase, input_json, context_json, total_nodes,
                completed_nodes, failed_nodes, created_at, updated_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![run.id, run.workflow, enum_str(&run.status), run.phase, to_json(&run.input), to_json(&run.context),
                run.total_nodes, run.completed_nodes, run.failed_nodes, to_rfc3339(run.created_at), to_rfc3339(run.updated_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn update_workflow_run(&self, run: &WorkflowRun) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE workflow_runs SET status=?2, phase=?3, context_json=?4, total_nodes=?5, completed_nodes=?6,
                failed_nodes=?7, updated_at=?8 WHERE id=?1",
            params![run.id, enum_str(&run.status), run.phase, to_json(&run.context), run.total_nodes,
                run.completed_nodes, run.failed_nodes, to_rfc3339(run.updated_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_workflow_run(&self, run_id: &str) -> Result<Option<WorkflowRun>, KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM workflow_runs WHERE id = ?1", params![run_id], row_to_run)
            .optional()
            .map_err(db_err)
    }

    pub async fn insert_node_execution(&self, n: &NodeExecution) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO node_executions (id, run_id, node_id, status, prompt_hash, result_text, result_json,
                findings_json, files_modified, duration_ms, token_count, error_type, error_message, retry_count,
                created_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![n.id, n.run_id, n.node_id, enum_str(&n.status), n.prompt_hash, n.result_text,
                n.result_json.as_ref().map(to_json), n.findings_json.as_ref().map(to_json),
                to_json(&n.files_modified), n.duration_ms, n.token_count, n.error_type, n.error_message,
                n.retry_count, to_rfc3339(n.created_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn update_node_execution(&self, n: &NodeExecution) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE node_executions SET status=?2, result_text=?3, result_json=?4, findings_json=?5,
                files_modified=?6, duration_ms=?7, token_count=?8, error_type=?9, error_message=?10,
                retry_count=?11 WHERE id=?1",
            params![n.id, enum_str(&n.status), n.result_text, n.result_json.as_ref().map(to_json),
                n.findings_json.as_ref().map(to_json), to_json(&n.files_modified), n.duration_ms,
                n.token_count, n.error_type, n.error_message, n.retry_count],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_node_executions(&self, run_id: &str) -> Result<Vec<NodeExecution>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM node_executions WHERE run_id = ?1 ORDER BY created_at ASC")
            .map_err(db_err)?;
        let rows = stmt.query_map(params![run_id], row_to_node_execution).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    pub async fn insert_conductor_decision(&self, d: &ConductorDecision) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO conductor_decisions (id, run_id, decision_type, node_id, detail, created_at)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![d.id, d.run_id, d.decision_type, d.node_id, to_json(&d.detail), to_rfc3339(d.created_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn insert_trail(&self, t: &Trail) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO trails (id, run_id, location, scent, strength, agent_id, node_id, message, tags,
                expires_at, created_at) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![t.id, t.run_id, t.location, t.scent, t.strength, t.agent_id, t.node_id, t.message,
                to_json(&t.tags), to_rfc3339(t.expires_at), to_rfc3339(t.created_at)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn decay_trails(&self, rate: f64, now: DateTime<Utc>) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE trails SET strength = strength * ?1 WHERE expires_at > ?2",
            params![1.0 - rate, to_rfc3339(now)],
        )
        .map_err(db_err)?;
        conn.execute("DELETE FROM trails WHERE strength < 0.01").map_err(db_err)?;
        Ok(())
    }

    pub async fn get_trails(&self, location: Option<&str>) -> Result<Vec<Trail>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM trails WHERE (?1 IS NULL OR location = ?1) ORDER BY strength DESC")
            .map_err(db_err)?;
        let rows = stmt.query_map(params![location], row_to_trail).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    pub async fn get_hot_spots(&self, limit: usize) -> Result<Vec<(String, f64)>, KnowledgeError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT location, SUM(strength) AS total FROM trails GROUP BY location ORDER BY total DESC LIMIT ?1")
            .map_err(db_err)?;
        let rows = stmt.query_map(params![limit as i64], |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    // ---- alerts -------------------------------------------------------

    pub async fn get_live_alert(&self, alert_type: &str, metric_name: &str) -> Result<Option<Alert>, KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT * FROM alerts WHERE alert_type = ?1 AND metric_name = ?2 AND state IN ('new','active')",
            params![alert_type, metric_name],
            row_to_alert,
        )
        .optional()
        .map_err(db_err)
    }

    pub async fn insert_alert(&self, a: &Alert) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO alerts (id, alert_type, metric_name, severity, message, current_value, baseline_value,
                state, true_positive_count, false_positive_count, created_at, last_seen)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![a.id, a.alert_type, a.metric_name, a.severity, a.message, a.current_value, a.baseline_value,
                enum_str(&a.state), a.true_positive_count, a.false_positive_count, to_rfc3339(a.created_at), to_rfc3339(a.last_seen)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn update_alert(&self, a: &Alert) -> Result<(), KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE alerts SET severity=?2, message=?3, current_value=?4, baseline_value=?5, state=?6,
                true_positive_count=?7, false_positive_count=?8, last_seen=?9 WHERE id=?1",
            params![a.id, a.severity, a.message, a.current_value, a.baseline_value, enum_str(&a.state),
                a.true_positive_count, a.false_positive_count, to_rfc3339(a.last_seen)],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_alert(&self, id: &str) -> Result<Option<Alert>, KnowledgeError> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT * FROM alerts WHERE id = ?1", params![id], row_to_alert).optional().map_err(db_err)
    }
}

fn row_to_heuristic(r: &rusqlite::Row) -> rusqlite::Result<Heuristic> {
    let last_used_at: Option<String> = r.get("last_used_at")?;
    let dormant_since: Option<String> = r.get("dormant_since")?;
    let last_confidence_update: Option<String> = r.get("last_confidence_update")?;
    let last_fraud_check: Option<String> = r.get("last_fraud_check")?;
    let revival_conditions: String = r.get("revival_conditions")?;
    let status_raw: String = r.get("status")?;
    Ok(Heuristic {
        id: r.get("id")?,
        domain: r.get("domain")?,
        rule: r.get("rule")?,
        explanation: r.get("explanation")?,
        confidence: r.get("confidence")?,
        confidence_ema: r.get("confidence_ema")?,
        ema_alpha: r.get("ema_alpha")?,
        ema_warmup_remaining: r.get("ema_warmup_remaining")?,
        times_validated: r.get("times_validated")?,
        times_violated: r.get("times_violated")?,
        times_contradicted: r.get("times_contradicted")?,
        times_revived: r.get("times_revived")?,
        fraud_flags: r.get("fraud_flags")?,
        status: enum_from_str(&status_raw, crate::types::HeuristicStatus::Active),
        is_golden: r.get::<_, i32>("is_golden")? != 0,
        project_path: r.get("project_path")?,
        last_used_at: last_used_at.map(|s| parse_ts(&s)),
        dormant_since: dormant_since.map(|s| parse_ts(&s)),
        revival_conditions: from_json(&revival_conditions),
        update_count_today: r.get("update_count_today")?,
        update_count_reset_date: parse_ts(&r.get::<_, String>("update_count_reset_date")?),
        last_confidence_update: last_confidence_update.map(|s| parse_ts(&s)),
        last_fraud_check: last_fraud_check.map(|s| parse_ts(&s)),
        created_at: parse_ts(&r.get::<_, String>("created_at")?),
        updated_at: parse_ts(&r.get::<_, String>("updated_at")?),
    })
}

fn row_to_learning(r: &rusqlite::Row) -> rusqlite::Result<Learning> {
    let learning_type: String = r.get(1)?;
    let tags: String = r.get(5)?;
    Ok(Learning {
        id: r.get(0)?,
        learning_type: enum_from_str(&learning_type, LearningType::Observation),
        filepath: r.get(2)?,
        title: r.get(3)?,
        summary: r.get(4)?,
        tags: from_json(&tags),
        domain: r.get(6)?,
        severity: r.get(7)?,
        created_at: parse_ts(&r.get::<_, String>(8)?),
    })
}

fn row_to_decision(r: &rusqlite::Row) -> rusqlite::Result<Decision> {
    let options: String = r.get(3)?;
    Ok(Decision {
        id: r.get(0)?,
        title: r.get(1)?,
        context: r.get(2)?,
        options: from_json(&options),
        decision: r.get(4)?,
        rationale: r.get(5)?,
        status: r.get(6)?,
        superseded_by: r.get(7)?,
        created_at: parse_ts(&r.get::<_, String>(8)?),
    })
}

fn row_to_invariant(r: &rusqlite::Row) -> rusqlite::Result<Invariant> {
    let scope: String = r.get(3)?;
    let severity: String = r.get(4)?;
    Ok(Invariant {
        id: r.get(0)?,
        statement: r.get(1)?,
        rationale: r.get(2)?,
        scope: enum_from_str(&scope, InvariantScope::Codebase),
        severity: enum_from_str(&severity, InvariantSeverity::Warning),
        status: r.get(5)?,
        violation_count: r.get(6)?,
        created_at: parse_ts(&r.get::<_, String>(7)?),
    })
}

fn row_to_assumption(r: &rusqlite::Row) -> rusqlite::Result<Assumption> {
    Ok(Assumption {
        id: r.get(0)?,
        assumption: r.get(1)?,
        context: r.get(2)?,
        source: r.get(3)?,
        confidence: r.get(4)?,
        status: r.get(5)?,
        verified_count: r.get(6)?,
        challenged_count: r.get(7)?,
        created_at: parse_ts(&r.get::<_, String>(8)?),
    })
}

fn row_to_spike(r: &rusqlite::Row) -> rusqlite::Result<SpikeReport> {
    Ok(SpikeReport {
        id: r.get(0)?,
        title: r.get(1)?,
        findings: r.get(2)?,
        gotchas: r.get(3)?,
        usefulness_score: r.get(4)?,
        access_count: r.get(5)?,
        created_at: parse_ts(&r.get::<_, String>(6)?),
    })
}

fn row_to_metric(r: &rusqlite::Row) -> rusqlite::Result<MetricObservation> {
    let metadata: Option<String> = r.get(4)?;
    Ok(MetricObservation {
        id: r.get(0)?,
        name: r.get(1)?,
        value: r.get(2)?,
        domain: r.get(3)?,
        metadata: metadata.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
        observed_at: parse_ts(&r.get::<_, String>(5)?),
    })
}

fn row_to_baseline(r: &rusqlite::Row) -> rusqlite::Result<DomainBaseline> {
    Ok(DomainBaseline {
        domain: r.get(0)?,
        avg_success_rate: r.get(1)?,
        std_success_rate: r.get(2)?,
        sample_count: r.get(3)?,
        avg_update_frequency: r.get(4)?,
        updated_at: parse_ts(&r.get::<_, String>(5)?),
    })
}

fn row_to_threshold_rec(r: &rusqlite::Row) -> rusqlite::Result<ThresholdRecommendation> {
    Ok(ThresholdRecommendation {
        id: r.get(0)?,
        detector: r.get(1)?,
        level: r.get(2)?,
        current_value: r.get(3)?,
        recommended_value: r.get(4)?,
        target_fpr: r.get(5)?,
        estimated_fpr: r.get(6)?,
        status: r.get(7)?,
        created_at: parse_ts(&r.get::<_, String>(8)?),
    })
}

fn row_to_run(r: &rusqlite::Row) -> rusqlite::Result<WorkflowRun> {
    let status: String = r.get(2)?;
    let input: String = r.get(4)?;
    let context: String = r.get(5)?;
    Ok(WorkflowRun {
        id: r.get(0)?,
        workflow: r.get(1)?,
        status: enum_from_str(&status, RunStatus::Running),
        phase: r.get(3)?,
        input: serde_json::from_str(&input).unwrap_or(serde_json::Value::Null),
        context: serde_json::from_str(&context).unwrap_or(serde_json::Value::Null),
        total_nodes: r.get(6)?,
        completed_nodes: r.get(7)?,
        failed_nodes: r.get(8)?,
        created_at: parse_ts(&r.get::<_, String>(9)?),
        updated_at: parse_ts(&r.get::<_, String>(10)?),
    })
}

fn row_to_node_execution(r: &rusqlite::Row) -> rusqlite::Result<NodeExecution> {
    let status: String = r.get(3)?;
    let result_json: Option<String> = r.get(6)?;
    let findings_json: Option<String> = r.get(7)?;
    let files_modified: String = r.get(8)?;
    Ok(NodeExecution {
        id: r.get(0)?,
        run_id: r.get(1)?,
        node_id: r.get(2)?,
        status: enum_from_str(&status, NodeExecStatus::Pending),
        prompt_hash: r.get(4)?,
        result_text: r.get(5)?,
        result_json: result_json.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
        findings_json: findings_json.map(|s| serde_json::from_str(&s).unwrap_or(serde_json::Value::Null)),
        files_modified: from_json(&files_modified),
        duration_ms: r.get(9)?,
        token_count: r.get(10)?,
        error_type: r.get(11)?,
        error_message: r.get(12)?,
        retry_count: r.get(13)?,
        created_at: parse_ts(&r.get::<_, String>(14)?),
    })
}

fn row_to_trail(r: &rusqlite::Row) -> rusqlite::Result<Trail> {
    let tags: String = r.get(8)?;
    Ok(Trail {
        id: r.get(0)?,
        run_id: r.get(1)?,
        location: r.get(2)?,
        scent: r.get(3)?,
        strength: r.get(4)?,
        agent_id: r.get(5)?,
        node_id: r.get(6)?,
        message: r.get(7)?,
        tags: from_json(&tags),
        expires_at: parse_ts(&r.get::<_, String>(9)?),
        created_at: parse_ts(&r.get::<_, String>(10)?),
    })
}

fn row_to_alert(r: &rusqlite::Row) -> rusqlite::Result<Alert> {
    let state: String = r.get(7)?;
    Ok(Alert {
        id: r.get(0)?,
        alert_type: r.get(1)?,
        metric_name: r.get(2)?,
        severity: r.get(3)?,
        message: r.get(4)?,
        current_value: r.get(5)?,
        baseline_value: r.get(6)?,
        state: enum_from_str(&state, AlertState::New),
        true_positive_count: r.get(8)?,
        false_positive_count: r.get(9)?,
        created_at: parse_ts(&r.get::<_, String>(10)?),
        last_seen: parse_ts(&r.get::<_, String>(11)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_heuristic(id: &str, domain: &str) -> Heuristic {
        let now = Utc::now();
        Heuristic {
            id: id.to_string(),
            domain: domain.to_string(),
            rule: "always check bounds".to_string(),
            explanation: "prevents overflow".to_string(),
            confidence: 0.5,
            confidence_ema: 0.5,
            ema_alpha: 0.2,
            ema_warmup_remaining: 5,
            times_validated: 0,
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
            update_count_reset_date: now,
            last_confidence_update: None,
            last_fraud_check: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_heuristic_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(tmp.path()).unwrap();
        let h = new_heuristic("h1", "rust");
        store.insert_heuristic(&h).await.unwrap();
        let fetched = store.get_heuristic("h1").await.unwrap().unwrap();
        assert_eq!(fetched.domain, "rust");
        assert_eq!(fetched.confidence, 0.5);
    }

    #[tokio::test]
    async fn list_by_domain_filters_correctly() {
        let tmp = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(tmp.path()).unwrap();
        store.insert_heuristic(&new_heuristic("h1", "rust")).await.unwrap();
        store.insert_heuristic(&new_heuristic("h2", "python")).await.unwrap();
        let rust_only = store.list_heuristics_by_domain("rust", None).await.unwrap();
        assert_eq!(rust_only.len(), 1);
        assert_eq!(rust_only[0].id, "h1");
    }

    #[tokio::test]
    async fn claim_chain_style_trail_decay_removes_weak_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(tmp.path()).unwrap();
        let now = Utc::now();
        store
            .insert_trail(&Trail {
                id: "t1".into(),
                run_id: "r1".into(),
                location: "src/lib.rs".into(),
                scent: "refactor".into(),
                strength: 0.02,
                agent_id: None,
                node_id: None,
                message: None,
                tags: vec![],
                expires_at: now + chrono::Duration::hours(1),
                created_at: now,
            })
            .await
            .unwrap();
        store.decay_trails(0.5, now).await.unwrap();
        let trails = store.get_trails(None).await.unwrap();
        assert!(trails.is_empty());
    }

    #[tokio::test]
    async fn apply_threshold_update_then_rollback() {
        let tmp = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(tmp.path()).unwrap();
        let rec = ThresholdRecommendation {
            id: "rec1".into(),
            detector: "success_rate".into(),
            level: "suspicious".into(),
            current_value: 0.20,
            recommended_value: 0.25,
            target_fpr: 0.05,
            estimated_fpr: 0.04,
            status: "pending".into(),
            created_at: Utc::now(),
        };
        store.insert_threshold_recommendation(&rec).await.unwrap();
        let history_id = store.apply_threshold_update("rec1", "ceo").await.unwrap();
        store.rollback_threshold(&history_id).await.unwrap();
        let err = store.rollback_threshold(&history_id).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::NotFound(_)));
    }
}
