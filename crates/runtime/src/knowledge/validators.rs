//! Bound-checking helpers centralized here rather than inlined per call
//! site, mirroring the original system's single `validators` module.

use crate::types::error::KnowledgeError;

pub const MAX_DOMAIN_LEN: usize = 100;
pub const MAX_TAG_LEN: usize = 50;
pub const MAX_TAGS: usize = 50;
pub const MAX_QUERY_LEN: usize = 10_000;
pub const MAX_LIMIT: usize = 1_000;
pub const MAX_TOKENS: usize = 50_000;

fn reject(message: impl Into<String>) -> KnowledgeError {
    KnowledgeError::Validation { message: message.into() }
}

pub fn validate_domain(domain: &str) -> Result<(), KnowledgeError> {
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(reject(format!("domain exceeds {MAX_DOMAIN_LEN} characters")));
    }
    Ok(())
}

pub fn validate_tags(tags: &[String]) -> Result<(), KnowledgeError> {
    if tags.len() > MAX_TAGS {
        return Err(reject(format!("more than {MAX_TAGS} tags supplied")));
    }
    for tag in tags {
        if tag.len() > MAX_TAG_LEN {
            return Err(reject(format!("tag '{tag}' exceeds {MAX_TAG_LEN} characters")));
        }
    }
    Ok(())
}

pub fn validate_query(query: &str) -> Result<(), KnowledgeError> {
    if query.len() > MAX_QUERY_LEN {
        return Err(reject(format!("query exceeds {MAX_QUERY_LEN} characters")));
    }
    Ok(())
}

pub fn validate_limit(limit: usize) -> Result<(), KnowledgeError> {
    if limit < 1 || limit > MAX_LIMIT {
        return Err(reject(format!("limit must be in [1, {MAX_LIMIT}]")));
    }
    Ok(())
}

pub fn validate_max_tokens(max_tokens: usize) -> Result<(), KnowledgeError> {
    if max_tokens > MAX_TOKENS {
        return Err(reject(format!("max_tokens exceeds the {MAX_TOKENS} hard cap")));
    }
    Ok(())
}

/// Escapes `\`, `%`, `_` for a SQLite `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like_pattern(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversized_domain() {
        let domain = "d".repeat(MAX_DOMAIN_LEN + 1);
        assert!(validate_domain(&domain).is_err());
    }

    #[test]
    fn escapes_like_metacharacters() {
        assert_eq!(escape_like_pattern("50%_done\\x"), "50\\%\\_done\\\\x");
    }

    #[test]
    fn accepts_limit_at_bounds() {
        assert!(validate_limit(1).is_ok());
        assert!(validate_limit(MAX_LIMIT).is_ok());
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(MAX_LIMIT + 1).is_err());
    }
}
