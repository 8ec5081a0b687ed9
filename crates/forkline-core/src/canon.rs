//! Deterministic canonicalization and content hashing.
//!
//! Maps any [`Value`] to a stable byte sequence such that semantically equal
//! values yield byte-equal output, then hashes those bytes with SHA-256. The
//! canonicalizer is the single source of identity for the differ and the
//! divergence engine.
//!
//! Guarantees (profile `strict`, the only profile):
//! - mapping key order is irrelevant (keys normalized, then sorted by code point)
//! - strings are NFC-normalized and `\r\n` / `\r` collapse to `\n`
//! - floats use a shortest-round-trip rendering; `-0.0` collapses to `0.0`;
//!   non-finite floats render as the strings `"NaN"`, `"Infinity"`, `"-Infinity"`
//! - booleans never collapse into integers
//! - byte sequences render as `{"$bytes":"<lowercase hex>"}`

use std::fmt::Write as _;

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::domain::error::{ForklineError, Result};
use crate::domain::value::Value;

/// Recursion depth bound; exceeding it fails with `BadValueKind`.
/// Defends against cyclic inputs materialized as very deep trees.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Canonical byte encoding of `value` under the `strict` profile.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    canonical_bytes_bounded(value, DEFAULT_MAX_DEPTH)
}

/// Canonical byte encoding with an explicit recursion depth bound.
pub fn canonical_bytes_bounded(value: &Value, max_depth: usize) -> Result<Vec<u8>> {
    let mut out = String::new();
    write_value(&mut out, value, max_depth)?;
    Ok(out.into_bytes())
}

/// SHA-256 of the canonical bytes of `value`, as 64 lowercase hex characters.
pub fn canonical_hash(value: &Value) -> Result<String> {
    Ok(sha256_hex(&canonical_bytes(value)?))
}

/// SHA-256 hex digest of raw bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Human-readable preview of a byte body: `sha256:<hash>:<first-16-bytes-hex>`.
/// Comparison always uses the full hash; this form is for logs only.
pub fn bytes_preview(data: &[u8]) -> String {
    let prefix = hex::encode(&data[..data.len().min(16)]);
    format!("sha256:{}:{}", sha256_hex(data), prefix)
}

/// Apply NFC normalization, then collapse `\r\n` and lone `\r` to `\n`.
/// NFC runs first so the collapse cannot split a combining sequence.
pub fn normalize_str(s: &str) -> String {
    let nfc: String = s.nfc().collect();
    nfc.replace("\r\n", "\n").replace('\r', "\n")
}

fn write_value(out: &mut String, value: &Value, depth: usize) -> Result<()> {
    if depth == 0 {
        return Err(ForklineError::BadValueKind(
            "recursion depth limit exceeded".to_string(),
        ));
    }
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Float(f) => write_float(out, *f),
        Value::Str(s) => write_string(out, &normalize_str(s)),
        Value::Bytes(b) => {
            out.push_str("{\"$bytes\":\"");
            out.push_str(&hex::encode(b));
            out.push_str("\"}");
        }
        Value::Seq(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item, depth - 1)?;
            }
            out.push(']');
        }
        Value::Map(map) => {
            // Keys normalize before sorting; two raw keys that normalize
            // identically are both emitted, in stable order.
            let mut entries: Vec<(String, &Value)> = map
                .iter()
                .map(|(k, v)| (normalize_str(k), v))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            out.push('{');
            for (i, (key, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, v, depth - 1)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

/// Shortest-round-trip float rendering. Rust's `Display` for `f64` is
/// round-trip exact; a trailing `.0` keeps floats disjoint from integers.
fn write_float(out: &mut String, f: f64) {
    if f.is_nan() {
        out.push_str("\"NaN\"");
        return;
    }
    if f.is_infinite() {
        out.push_str(if f > 0.0 { "\"Infinity\"" } else { "\"-Infinity\"" });
        return;
    }
    let f = if f == 0.0 { 0.0 } else { f };
    let text = format!("{f}");
    out.push_str(&text);
    if !text.contains(['.', 'e', 'E']) {
        out.push_str(".0");
    }
}

/// JSON string token with minimal escaping; non-ASCII is preserved verbatim.
fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
