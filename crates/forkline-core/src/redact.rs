//! Redaction at the storage boundary.
//!
//! A pure transform from payload to redacted payload, driven by an ordered
//! rule list (first match wins). Every payload persisted by the store flows
//! through a [`RedactionPolicy`] first; any persistence path that bypasses
//! it is a defect.
//!
//! The engine performs no I/O, reads no clock, and never mutates its input.
//! Same (policy, input) always yields byte-identical output.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::canon::{canonical_hash, DEFAULT_MAX_DEPTH};
use crate::domain::error::{ForklineError, Result};
use crate::domain::value::Value;

/// Sentinel written in place of a masked value.
pub const REDACTED: &str = "[REDACTED]";

/// Key substrings treated as secrets by the default policy.
pub const SECRET_KEY_PATTERNS: &[&str] = &[
    "api_key",
    "apikey",
    "token",
    "secret",
    "password",
    "access_token",
    "refresh_token",
    "private_key",
    "credentials",
    "auth",
    "session",
    "csrf",
    "authorization",
    "cookie",
    "set-cookie",
];

/// Structural-metadata keys exempt from rule matching in the default policy.
pub const STRUCTURAL_ALLOWLIST: &[&str] = &[
    "run_id",
    "event_id",
    "step_id",
    "timestamp",
    "created_at",
    "started_at",
    "ended_at",
    "status",
    "duration",
    "type",
    "name",
    "tool",
    "model",
    "entrypoint",
];

/// What to do with a matched value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactAction {
    /// Replace the value with `"[REDACTED]"`.
    Mask,
    /// Replace the value with `"hash:" + canonical-hash(value)`.
    Hash,
    /// Omit the entry entirely.
    Drop,
}

impl FromStr for RedactAction {
    type Err = ForklineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mask" => Ok(RedactAction::Mask),
            "hash" => Ok(RedactAction::Hash),
            "drop" => Ok(RedactAction::Drop),
            other => Err(ForklineError::PolicyError(format!(
                "unknown redaction action: {other}"
            ))),
        }
    }
}

/// A single redaction rule.
///
/// `key_pattern` matches the current mapping key and `path_pattern` matches
/// the dot-separated path from the root, both as case-insensitive substrings.
/// A rule matches iff every pattern it specifies matches; a rule must specify
/// at least one pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedactRule {
    action: RedactAction,
    key_pattern: Option<String>,
    path_pattern: Option<String>,
}

impl RedactRule {
    pub fn new(
        action: RedactAction,
        key_pattern: Option<&str>,
        path_pattern: Option<&str>,
    ) -> Result<Self> {
        if key_pattern.is_none() && path_pattern.is_none() {
            return Err(ForklineError::PolicyError(
                "redaction rule requires at least one pattern".to_string(),
            ));
        }
        Ok(Self {
            action,
            key_pattern: key_pattern.map(|p| p.to_lowercase()),
            path_pattern: path_pattern.map(|p| p.to_lowercase()),
        })
    }

    /// Rule matching a key substring.
    pub fn for_key(action: RedactAction, pattern: &str) -> Self {
        Self {
            action,
            key_pattern: Some(pattern.to_lowercase()),
            path_pattern: None,
        }
    }

    /// Rule matching a path substring.
    pub fn for_path(action: RedactAction, pattern: &str) -> Self {
        Self {
            action,
            key_pattern: None,
            path_pattern: Some(pattern.to_lowercase()),
        }
    }

    pub fn action(&self) -> RedactAction {
        self.action
    }

    /// `key` is `None` at sequence elements; key-requiring rules never fire there.
    fn matches(&self, key: Option<&str>, path: &str) -> bool {
        if let Some(pattern) = &self.key_pattern {
            match key {
                Some(k) if k.to_lowercase().contains(pattern.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(pattern) = &self.path_pattern {
            if !path.to_lowercase().contains(pattern.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Escalation mode selecting which policy the recorder applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMode {
    /// Default: secrets masked, structural metadata preserved.
    Safe,
    /// Identity policy; raw payloads persisted. Must be explicitly enabled
    /// by the caller.
    Debug,
    /// Secret keys dropped; the canonical bytes of the remainder are handed
    /// to an out-of-band encryption step owned by the storage collaborator.
    EncryptedDebug,
}

impl RedactionMode {
    /// Policy this mode applies at the storage boundary.
    pub fn policy(&self) -> RedactionPolicy {
        match self {
            RedactionMode::Safe => RedactionPolicy::safe_default(),
            RedactionMode::Debug => RedactionPolicy::identity(),
            RedactionMode::EncryptedDebug => {
                let rules = SECRET_KEY_PATTERNS
                    .iter()
                    .map(|p| RedactRule::for_key(RedactAction::Drop, p))
                    .collect();
                RedactionPolicy::with_allowlist(rules, STRUCTURAL_ALLOWLIST)
            }
        }
    }
}

/// An ordered redaction rule list with an exact-match key allowlist.
#[derive(Debug, Clone)]
pub struct RedactionPolicy {
    rules: Vec<RedactRule>,
    allowlist: BTreeSet<String>,
}

impl RedactionPolicy {
    pub fn new(rules: Vec<RedactRule>) -> Self {
        Self {
            rules,
            allowlist: BTreeSet::new(),
        }
    }

    pub fn with_allowlist(rules: Vec<RedactRule>, allowlist: &[&str]) -> Self {
        Self {
            rules,
            allowlist: allowlist.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Policy with no rules: payloads pass through unchanged.
    pub fn identity() -> Self {
        Self::new(Vec::new())
    }

    /// The default SAFE policy: mask every secret-pattern key, exempting the
    /// structural-metadata allowlist.
    pub fn safe_default() -> Self {
        let rules = SECRET_KEY_PATTERNS
            .iter()
            .map(|p| RedactRule::for_key(RedactAction::Mask, p))
            .collect();
        Self::with_allowlist(rules, STRUCTURAL_ALLOWLIST)
    }

    pub fn is_identity(&self) -> bool {
        self.rules.is_empty()
    }

    /// Transform `value` into its redacted form. The input is untouched; the
    /// returned tree is new.
    pub fn redact(&self, value: &Value) -> Result<Value> {
        self.redact_value(value, "", DEFAULT_MAX_DEPTH)
    }

    fn redact_value(&self, value: &Value, path: &str, depth: usize) -> Result<Value> {
        if depth == 0 {
            return Err(ForklineError::BadValueKind(
                "recursion depth limit exceeded".to_string(),
            ));
        }
        match value {
            Value::Map(map) => {
                let mut out = std::collections::BTreeMap::new();
                for (key, entry) in map.iter() {
                    let entry_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    if self.allowlist.contains(&key.to_lowercase()) {
                        out.insert(key.clone(), self.redact_value(entry, &entry_path, depth - 1)?);
                        continue;
                    }
                    match self.first_match(Some(key), &entry_path) {
                        None => {
                            out.insert(key.clone(), self.redact_value(entry, &entry_path, depth - 1)?);
                        }
                        Some(RedactAction::Mask) => {
                            out.insert(key.clone(), Value::Str(REDACTED.to_string()));
                        }
                        Some(RedactAction::Hash) => {
                            out.insert(key.clone(), Value::Str(hash_value(entry)?));
                        }
                        Some(RedactAction::Drop) => {}
                    }
                }
                Ok(Value::Map(out))
            }
            Value::Seq(items) => {
                // No key at a sequence element; only path-only rules can fire.
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.first_match(None, path) {
                        None => out.push(self.redact_value(item, path, depth - 1)?),
                        Some(RedactAction::Mask) => out.push(Value::Str(REDACTED.to_string())),
                        Some(RedactAction::Hash) => out.push(Value::Str(hash_value(item)?)),
                        Some(RedactAction::Drop) => {}
                    }
                }
                Ok(Value::Seq(out))
            }
            leaf => Ok(leaf.clone()),
        }
    }

    fn first_match(&self, key: Option<&str>, path: &str) -> Option<RedactAction> {
        self.rules
            .iter()
            .find(|rule| rule.matches(key, path))
            .map(|rule| rule.action)
    }
}

fn hash_value(value: &Value) -> Result<String> {
    Ok(format!("hash:{}", canonical_hash(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(rules: Vec<RedactRule>) -> RedactionPolicy {
        RedactionPolicy::new(rules)
    }

    fn redact(policy: &RedactionPolicy, payload: serde_json::Value) -> Value {
        policy.redact(&Value::from(payload)).expect("redact")
    }

    #[test]
    fn test_rule_requires_a_pattern() {
        match RedactRule::new(RedactAction::Mask, None, None) {
            Err(ForklineError::PolicyError(msg)) => {
                assert!(msg.contains("at least one pattern"));
            }
            other => panic!("expected PolicyError, got {:?}", other),
        }
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("mask".parse::<RedactAction>().expect("parse"), RedactAction::Mask);
        assert_eq!("HASH".parse::<RedactAction>().expect("parse"), RedactAction::Hash);
        assert!("shred".parse::<RedactAction>().is_err());
    }

    #[test]
    fn test_identity_policy_passes_through() {
        let p = RedactionPolicy::identity();
        let payload = json!({"api_key": "sk-123", "data": "value"});
        assert_eq!(redact(&p, payload.clone()), Value::from(payload));
    }

    #[test]
    fn test_mask_replaces_with_sentinel() {
        let p = policy(vec![RedactRule::for_key(RedactAction::Mask, "secret")]);
        let out = redact(&p, json!({"secret_key": "s", "normal_key": "n"}));
        assert_eq!(out.get("secret_key"), Some(&Value::from(REDACTED)));
        assert_eq!(out.get("normal_key"), Some(&Value::from("n")));
    }

    #[test]
    fn test_drop_removes_entry() {
        let p = policy(vec![RedactRule::for_key(RedactAction::Drop, "secret")]);
        let out = redact(&p, json!({"secret_key": "s", "normal_key": "n"}));
        assert_eq!(out.get("secret_key"), None);
        assert_eq!(out.get("normal_key"), Some(&Value::from("n")));
    }

    #[test]
    fn test_hash_is_deterministic_canonical_hash() {
        let p = policy(vec![RedactRule::for_key(RedactAction::Hash, "secret")]);
        let out1 = redact(&p, json!({"secret_key": "sensitive"}));
        let out2 = redact(&p, json!({"secret_key": "sensitive"}));
        let hashed = out1.get("secret_key").and_then(|v| v.as_str()).expect("str");
        assert!(hashed.starts_with("hash:"));
        assert_eq!(hashed.len(), "hash:".len() + 64);
        assert_eq!(out1, out2);
        assert_eq!(
            hashed["hash:".len()..],
            *canonical_hash(&Value::from("sensitive")).expect("hash")
        );
    }

    #[test]
    fn test_key_match_case_insensitive_substring() {
        let p = policy(vec![RedactRule::for_key(RedactAction::Mask, "secret")]);
        let out = redact(
            &p,
            json!({"SECRET_KEY": "a", "my_secret_token": "b", "unrelated": "c"}),
        );
        assert_eq!(out.get("SECRET_KEY"), Some(&Value::from(REDACTED)));
        assert_eq!(out.get("my_secret_token"), Some(&Value::from(REDACTED)));
        assert_eq!(out.get("unrelated"), Some(&Value::from("c")));
    }

    #[test]
    fn test_path_pattern_scopes_match() {
        let p = policy(vec![RedactRule::for_path(
            RedactAction::Mask,
            "headers.authorization",
        )]);
        let out = redact(
            &p,
            json!({
                "headers": {"authorization": "Bearer x", "content-type": "json"},
                "body": {"authorization": "not a header"}
            }),
        );
        assert_eq!(
            out.get("headers").and_then(|h| h.get("authorization")),
            Some(&Value::from(REDACTED))
        );
        assert_eq!(
            out.get("headers").and_then(|h| h.get("content-type")),
            Some(&Value::from("json"))
        );
        assert_eq!(
            out.get("body").and_then(|b| b.get("authorization")),
            Some(&Value::from("not a header"))
        );
    }

    #[test]
    fn test_rule_with_both_patterns_needs_both() {
        let rule = RedactRule::new(RedactAction::Mask, Some("token"), Some("auth")).expect("rule");
        let p = policy(vec![rule]);
        let out = redact(
            &p,
            json!({"auth": {"token": "a"}, "public": {"token": "b"}}),
        );
        assert_eq!(
            out.get("auth").and_then(|v| v.get("token")),
            Some(&Value::from(REDACTED))
        );
        assert_eq!(
            out.get("public").and_then(|v| v.get("token")),
            Some(&Value::from("b"))
        );
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let p = policy(vec![
            RedactRule::for_key(RedactAction::Hash, "secret"),
            RedactRule::for_key(RedactAction::Mask, "secret"),
        ]);
        let out = redact(&p, json!({"secret_key": "v"}));
        let value = out.get("secret_key").and_then(|v| v.as_str()).expect("str");
        assert!(value.starts_with("hash:"));
    }

    #[test]
    fn test_recurses_into_nested_maps_and_seqs() {
        let p = policy(vec![RedactRule::for_key(RedactAction::Mask, "secret")]);
        let out = redact(
            &p,
            json!({
                "outer": {"inner": {"secret_key": "s", "normal": "v"}},
                "items": [{"secret_key": "a"}, {"secret_key": "b"}]
            }),
        );
        let inner = out.get("outer").and_then(|v| v.get("inner")).expect("inner");
        assert_eq!(inner.get("secret_key"), Some(&Value::from(REDACTED)));
        assert_eq!(inner.get("normal"), Some(&Value::from("v")));
        let items = out.get("items").and_then(|v| v.as_seq()).expect("seq");
        for item in items {
            assert_eq!(item.get("secret_key"), Some(&Value::from(REDACTED)));
        }
    }

    #[test]
    fn test_path_only_rule_masks_whole_matching_entry() {
        let p = policy(vec![RedactRule::for_path(RedactAction::Mask, "samples")]);
        let out = redact(&p, json!({"samples": ["a", "b"], "other": ["c"]}));
        assert_eq!(out.get("samples"), Some(&Value::from(REDACTED)));
        let other = out.get("other").and_then(|v| v.as_seq()).expect("seq");
        assert_eq!(other, &[Value::from("c")]);
    }

    #[test]
    fn test_key_rule_never_fires_inside_sequences() {
        let p = policy(vec![RedactRule::for_key(RedactAction::Mask, "items")]);
        // String elements have no key, so a key-requiring rule cannot touch
        // them even when their text matches the pattern.
        let out = redact(&p, json!({"payload": ["items", "more"]}));
        let seq = out.get("payload").and_then(|v| v.as_seq()).expect("seq");
        assert_eq!(seq, &[Value::from("items"), Value::from("more")]);
    }

    #[test]
    fn test_nested_map_inside_sequence_still_matched() {
        let p = policy(vec![RedactRule::new(
            RedactAction::Drop,
            Some("token"),
            Some("calls"),
        )
        .expect("rule")]);
        let out = redact(
            &p,
            json!({"calls": [{"token": "t", "arg": 1}], "misc": [{"token": "kept"}]}),
        );
        let call = out.get("calls").and_then(|v| v.as_seq()).expect("seq");
        assert_eq!(call[0].get("token"), None);
        assert_eq!(call[0].get("arg"), Some(&Value::Int(1)));
        let misc = out.get("misc").and_then(|v| v.as_seq()).expect("seq");
        assert_eq!(misc[0].get("token"), Some(&Value::from("kept")));
    }

    #[test]
    fn test_input_not_mutated() {
        let p = policy(vec![RedactRule::for_key(RedactAction::Mask, "secret")]);
        let input = Value::from(json!({"secret_key": "s", "nested": {"secret_key": "n"}}));
        let before = input.clone();
        let _ = p.redact(&input).expect("redact");
        assert_eq!(input, before);
    }

    #[test]
    fn test_safe_default_masks_secrets_keeps_rest() {
        let p = RedactionPolicy::safe_default();
        let out = redact(&p, json!({"api_key": "sk-secret123", "url": "https://x"}));
        assert_eq!(out.get("api_key"), Some(&Value::from(REDACTED)));
        assert_eq!(out.get("url"), Some(&Value::from("https://x")));
    }

    #[test]
    fn test_safe_default_keeps_structural_keys() {
        let p = RedactionPolicy::safe_default();
        let out = redact(
            &p,
            json!({"session": "abc", "status": "success", "type": "input", "name": "init"}),
        );
        assert_eq!(out.get("session"), Some(&Value::from(REDACTED)));
        assert_eq!(out.get("status"), Some(&Value::from("success")));
        assert_eq!(out.get("type"), Some(&Value::from("input")));
        assert_eq!(out.get("name"), Some(&Value::from("init")));
    }

    #[test]
    fn test_allowlist_exempts_key_from_matching() {
        let p = RedactionPolicy::with_allowlist(
            vec![RedactRule::for_key(RedactAction::Mask, "name")],
            &["name"],
        );
        let out = redact(&p, json!({"name": "init", "nickname": "zed"}));
        // Exact-match allowlist: "name" survives, "nickname" still matches.
        assert_eq!(out.get("name"), Some(&Value::from("init")));
        assert_eq!(out.get("nickname"), Some(&Value::from(REDACTED)));
    }

    #[test]
    fn test_safe_default_deterministic() {
        let p = RedactionPolicy::safe_default();
        let payload = Value::from(json!({
            "api_key": "sk-1",
            "headers": {"authorization": "Bearer t", "accept": "json"},
            "args": [{"password": "p"}]
        }));
        let first = serde_json::to_vec(&p.redact(&payload).expect("redact")).expect("serialize");
        for _ in 0..20 {
            let again =
                serde_json::to_vec(&p.redact(&payload).expect("redact")).expect("serialize");
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_mode_policies() {
        assert!(RedactionMode::Debug.policy().is_identity());
        assert!(!RedactionMode::Safe.policy().is_identity());

        let p = RedactionMode::EncryptedDebug.policy();
        let out = redact(&p, json!({"api_key": "sk-1", "prompt": "hello"}));
        assert_eq!(out.get("api_key"), None);
        assert_eq!(out.get("prompt"), Some(&Value::from("hello")));
    }
}
