//! A closed, non-Turing-complete edge condition mini-language (§4.7).
//!
//! Grammar (exactly one form per condition string):
//!   'key' in context
//!   'key' not in context
//!   context.get('key') OP literal
//!   context['key'] OP literal
//! OP is one of == != > < >= <=. literal is a JSON scalar (number, string,
//! true/false, null). An absent condition always evaluates true.

use serde_json::Value;

pub fn evaluate(condition: Option<&str>, context: &Value) -> bool {
    let Some(raw) = condition else { return true };
    let expr = raw.trim();
    if expr.is_empty() {
        return true;
    }

    if let Some(rest) = expr.strip_suffix("in context") {
        let negate = rest.trim_end().ends_with("not");
        let key_part = if negate {
            rest.trim_end().strip_suffix("not").unwrap_or(rest).trim()
        } else {
            rest.trim()
        };
        let key = unquote(key_part);
        let present = key.map(|k| has_key(context, &k)).unwrap_or(false);
        return if negate { !present } else { present };
    }

    for op in ["==", "!=", ">=", "<=", ">", "<"] {
        if let Some((lhs, rhs)) = split_once_op(expr, op) {
            let Some(key) = extract_key(lhs.trim()) else { return false };
            let Some(actual) = get_key(context, &key) else { return false };
            let Some(expected) = parse_literal(rhs.trim()) else { return false };
            return compare(&actual, op, &expected);
        }
    }

    false
}

fn split_once_op<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    // guard against matching `==` inside `>=`/`<=`/`!=` twice by requiring
    // the shorter two-char ops to be tried first (caller order handles this).
    let idx = expr.find(op)?;
    Some((&expr[..idx], &expr[idx + op.len()..]))
}

fn extract_key(lhs: &str) -> Option<String> {
    if let Some(inner) = lhs.strip_prefix("context.get(").and_then(|s| s.strip_suffix(')')) {
        return unquote(inner);
    }
    if let Some(inner) = lhs.strip_prefix("context[").and_then(|s| s.strip_suffix(']')) {
        return unquote(inner);
    }
    None
}

fn unquote(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.len() >= 2 && ((s.starts_with('\'') && s.ends_with('\'')) || (s.starts_with('"') && s.ends_with('"'))) {
        Some(s[1..s.len() - 1].to_string())
    } else {
        None
    }
}

fn has_key(context: &Value, key: &str) -> bool {
    context.get(key).is_some()
}

fn get_key(context: &Value, key: &str) -> Option<Value> {
    context.get(key).cloned()
}

fn parse_literal(raw: &str) -> Option<Value> {
    if let Some(s) = unquote(raw) {
        return Some(Value::String(s));
    }
    match raw {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" | "None" => return Some(Value::Null),
        _ => {}
    }
    raw.parse::<f64>().ok().map(|n| serde_json::json!(n))
}

fn compare(actual: &Value, op: &str, expected: &Value) -> bool {
    if op == "==" {
        return actual == expected;
    }
    if op == "!=" {
        return actual != expected;
    }
    let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) else {
        return false;
    };
    match op {
        ">" => a > b,
        "<" => a < b,
        ">=" => a >= b,
        "<=" => a <= b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_condition_always_passes() {
        assert!(evaluate(None, &serde_json::json!({})));
    }

    #[test]
    fn membership_in_and_not_in() {
        let ctx = serde_json::json!({ "status": "ok" });
        assert!(evaluate(Some("'status' in context"), &ctx));
        assert!(!evaluate(Some("'missing' in context"), &ctx));
        assert!(evaluate(Some("'missing' not in context"), &ctx));
    }

    #[test]
    fn comparison_with_get_and_index_forms() {
        let ctx = serde_json::json!({ "score": 7 });
        assert!(evaluate(Some("context.get('score') > 5"), &ctx));
        assert!(!evaluate(Some("context['score'] < 5"), &ctx));
        assert!(evaluate(Some("context['score'] == 7"), &ctx));
        assert!(evaluate(Some("context['score'] != 8"), &ctx));
    }

    #[test]
    fn string_literal_comparison() {
        let ctx = serde_json::json!({ "phase": "done" });
        assert!(evaluate(Some("context['phase'] == 'done'"), &ctx));
    }

    #[test]
    fn missing_key_fails_comparison() {
        let ctx = serde_json::json!({});
        assert!(!evaluate(Some("context['score'] > 5"), &ctx));
    }

    #[test]
    fn malformed_condition_fails_closed() {
        let ctx = serde_json::json!({ "score": 7 });
        assert!(!evaluate(Some("import os; os.system('x')"), &ctx));
    }
}
