//! C10 — Safety Scanner: advisory-only regex catalog over added lines.
//! Never blocks a write; surfaces warnings to stderr and records
//! `metric_observations` rows for later review (§4.10).

use chrono::Utc;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use crate::knowledge::types::MetricObservation;
use crate::knowledge::KnowledgeStore;

pub struct Advisory {
    pub pattern: &'static str,
    pub line: String,
}

fn catalog() -> &'static Vec<(&'static str, Regex)> {
    static CATALOG: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        let patterns: &[&str] = &[
            r"eval\s*\(",
            r"exec\s*\(",
            r"subprocess\.[A-Za-z_]+\([^)]*shell\s*=\s*True",
            r#"password\s*[:=]\s*["'][^"']+["']"#,
            r#"secret\s*[:=]\s*["'][^"']+["']"#,
            r#"api[_-]?key\s*[:=]\s*["'][^"']+["']"#,
            r"Bearer\s+[A-Za-z0-9_-]{20,}",
            r"chmod\s+777",
            r"pickle\.loads?\s*\(",
            r"yaml\.load\s*\([^,)]*\)(?!\s*,\s*Loader)",
            r"hashlib\.md5\s*\(",
            r"hashlib\.sha1\s*\(",
            r"random\.(randint|random|choice|shuffle)\s*\(",
            r"verify\s*=\s*False",
            r"\.\./\.\./\.\.|\.\.[\\/]\.\.[\\/]",
            r"os\.system\s*\(",
            r"rm\s+-rf\s+/",
            r"DROP\s+TABLE",
            r"--no-verify",
            r"sudo\s+",
            r"curl\s+[^|]*\|\s*(sh|bash)",
            r"wget\s+[^|]*\|\s*(sh|bash)",
            r"innerHTML\s*=",
            r"document\.write\s*\(",
            r"dangerouslySetInnerHTML",
            r"unsafe\s*\{",
            r"\.unwrap\(\)\.unwrap\(\)",
            r"TODO\s*:\s*security",
            r"FIXME\s*:\s*security",
            r"disable[_-]?ssl[_-]?verif",
        ];
        patterns.iter().map(|p| (*p, Regex::new(p).expect("valid advisory regex"))).collect()
    })
}

/// Lines present in `new` but absent from `old`.
pub fn diff_added_lines(old: &str, new: &str) -> Vec<String> {
    let old_lines: HashSet<&str> = old.lines().collect();
    new.lines().filter(|l| !old_lines.contains(l)).map(|l| l.to_string()).collect()
}

fn is_comment_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('#')
        || trimmed.starts_with("//")
        || trimmed.starts_with("/*")
        || trimmed.starts_with('*')
        || trimmed.starts_with("\"\"\"")
        || trimmed.starts_with("'''")
}

pub fn scan_lines(lines: &[String]) -> Vec<Advisory> {
    let mut hits = Vec::new();
    for line in lines {
        if is_comment_line(line) {
            continue;
        }
        for (pattern, regex) in catalog() {
            if regex.is_match(line) {
                hits.push(Advisory { pattern, line: line.clone() });
            }
        }
    }
    hits
}

pub struct SafetyScanner {
    store: Arc<KnowledgeStore>,
}

impl SafetyScanner {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }

    /// Scans a diff, prints warnings to stderr, records metrics. Never errors.
    pub async fn scan_write(&self, path: &str, old: &str, new: &str) -> Vec<Advisory> {
        let added = diff_added_lines(old, new);
        let hits = scan_lines(&added);

        for hit in &hits {
            eprintln!("SAFETY ADVISORY [{}]: {} ({})", path, hit.line.trim(), hit.pattern);
            let _ = self
                .store
                .insert_metric_observation(&MetricObservation {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: "advisory_warning".to_string(),
                    value: 1.0,
                    domain: None,
                    metadata: Some(serde_json::json!({
                        "path": path,
                        "pattern": hit.pattern,
                        "line": hit.line,
                    })),
                    observed_at: Utc::now(),
                })
                .await;
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_added_lines_only_returns_new_lines() {
        let old = "a\nb\n";
        let new = "a\nb\nc\n";
        assert_eq!(diff_added_lines(old, new), vec!["c".to_string()]);
    }

    #[test]
    fn comment_lines_are_filtered_before_matching() {
        let lines = vec!["# eval(user_input)".to_string(), "// exec(cmd)".to_string()];
        assert!(scan_lines(&lines).is_empty());
    }

    #[test]
    fn detects_eval_and_hardcoded_password() {
        let lines = vec!["result = eval(user_input)".to_string(), r#"password = "hunter2""#.to_string()];
        let hits = scan_lines(&lines);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn detects_chmod_777_and_path_traversal() {
        let lines = vec!["os.chmod(path, 0o777)".to_string(), "chmod 777 /etc/passwd".to_string(), "../../../etc/passwd".to_string()];
        let hits = scan_lines(&lines);
        assert!(hits.iter().any(|h| h.pattern.contains("chmod")));
        assert!(hits.iter().any(|h| h.pattern.contains(r"\.\.")));
    }

    #[tokio::test]
    async fn scan_write_records_metric_per_hit_and_never_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(KnowledgeStore::open(tmp.path()).unwrap());
        let scanner = SafetyScanner::new(store.clone());
        let hits = scanner.scan_write("app.py", "", "password = \"hunter2\"\n").await;
        assert_eq!(hits.len(), 1);
        let count = store.count_metric_observations("advisory_warning").await.unwrap();
        assert_eq!(count, 1);
    }
}
