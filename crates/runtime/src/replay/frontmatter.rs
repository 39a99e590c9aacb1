//! Parse and rewrite the `---\n...\n---\n` YAML frontmatter block prefixing
//! a markdown file, leaving the body untouched. Ported from the original's
//! `frontmatter.py`.

use serde_yaml::Value;
use std::collections::BTreeMap;

/// Splits `content` into (frontmatter map, remaining body). An absent or
/// malformed block yields an empty map and the content unchanged.
pub fn parse(content: &str) -> (BTreeMap<String, Value>, String) {
    let Some(rest) = content.strip_prefix("---\n") else {
        return (BTreeMap::new(), content.to_string());
    };
    let Some(end) = rest.find("\n---\n") else {
        return (BTreeMap::new(), content.to_string());
    };
    let yaml_text = &rest[..end];
    let body = rest[end + 5..].to_string();
    let map: BTreeMap<String, Value> = serde_yaml::from_str(yaml_text).unwrap_or_default();
    (map, body)
}

pub fn format(data: &BTreeMap<String, Value>) -> String {
    if data.is_empty() {
        return String::new();
    }
    let yaml = serde_yaml::to_string(data).unwrap_or_default();
    format!("---\n{yaml}---\n\n")
}

pub fn add(content: &str, data: BTreeMap<String, Value>) -> String {
    let (_, body) = parse(content);
    format(&data) + &body
}

pub fn update(content: &str, updates: BTreeMap<String, Value>) -> String {
    let (mut existing, body) = parse(content);
    for (k, v) in updates {
        existing.insert(k, v);
    }
    format(&existing) + &body
}

pub fn get(content: &str) -> BTreeMap<String, Value> {
    parse(content).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_frontmatter() {
        let content = "---\nstatus: active\ncount: 3\n---\n# Hello\nbody text\n";
        let (fm, body) = parse(content);
        assert_eq!(fm.get("status").and_then(|v| v.as_str()), Some("active"));
        assert_eq!(fm.get("count").and_then(|v| v.as_i64()), Some(3));
        assert_eq!(body, "# Hello\nbody text\n");
    }

    #[test]
    fn content_without_frontmatter_is_returned_unchanged() {
        let content = "# No frontmatter here\n";
        let (fm, body) = parse(content);
        assert!(fm.is_empty());
        assert_eq!(body, content);
    }

    #[test]
    fn update_merges_without_dropping_existing_keys() {
        let content = "---\nstatus: active\nsteps_completed: [1, 2]\n---\nbody\n";
        let mut updates = BTreeMap::new();
        updates.insert("status".to_string(), Value::String("paused".to_string()));
        let updated = update(content, updates);
        let (fm, body) = parse(&updated);
        assert_eq!(fm.get("status").and_then(|v| v.as_str()), Some("paused"));
        assert!(fm.contains_key("steps_completed"));
        assert_eq!(body, "body\n");
    }
}
