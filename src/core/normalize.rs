//! Turns loose on-chain / explorer JSON into a fully-populated [`TokenSignals`].
//!
//! Normalization never fails. Missing or malformed fields take their default
//! and are only reported at `debug` level: upstream lookups are routinely
//! partial, and the defaults (unverified, zero holders, zero liquidity) all
//! push the assessment toward caution.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use super::{ActionType, ApprovalAmount, TokenSignals};

/// Bytecode shorter than this many hex chars (100 bytes) is treated as suspicious.
pub const MIN_CODE_HEX_LEN: usize = 200;
/// Bytecode longer than this many hex chars (50 KB) is treated as suspicious.
pub const MAX_CODE_HEX_LEN: usize = 100_000;

/// Normalize a raw signals object observed at `now`.
///
/// `null` and non-object values normalize to the all-defaults record.
pub fn normalize(raw: &Value, now: DateTime<Utc>) -> TokenSignals {
    let empty = Map::new();
    let obj = raw.as_object().unwrap_or(&empty);
    let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);

    let is_verified = field(obj, &["isVerified", "contractVerified"])
        .and_then(as_bool)
        .unwrap_or(false);

    let creation_timestamp = match field(obj, &["creationTimestamp", "creationTime"]).and_then(as_count) {
        Some(ts) if ts <= now_ms => ts,
        Some(ts) => {
            debug!(ts, now_ms, "creation timestamp is in the future, using observation time");
            now_ms
        }
        None => now_ms,
    };

    let transaction_count = field(obj, &["transactionCount", "txCount"])
        .and_then(as_count)
        .unwrap_or(0);

    let holder_count = field(obj, &["holderCount"]).and_then(as_count).unwrap_or(0);

    let liquidity_usd = field(obj, &["liquidityUSD", "liquidityUsd"])
        .and_then(as_amount)
        .unwrap_or(0.0);

    let bytecode = match field(obj, &["bytecode"]).and_then(Value::as_str) {
        Some(code) if is_hex(code) => code.trim().to_string(),
        Some(_) => {
            debug!("bytecode is not hex, ignoring");
            String::new()
        }
        None => String::new(),
    };

    let has_trading_restrictions = field(obj, &["hasTradingRestrictions"])
        .and_then(as_bool)
        .unwrap_or_else(|| detect_trading_restrictions(&bytecode));

    let action_type = match field(obj, &["actionType"]).and_then(Value::as_str) {
        Some(s) => s.parse::<ActionType>().unwrap_or_else(|e| {
            debug!("{e}, defaulting to transfer");
            ActionType::default()
        }),
        None => ActionType::default(),
    };

    let requested_approval_amount = field(obj, &["requestedApprovalAmount", "approvalAmount"])
        .and_then(ApprovalAmount::from_json);

    TokenSignals {
        is_verified,
        creation_timestamp,
        transaction_count,
        holder_count,
        liquidity_usd,
        bytecode,
        has_trading_restrictions,
        action_type,
        requested_approval_amount,
        observed_at: now,
    }
}

/// Placeholder honeypot heuristic over raw contract code.
///
/// Empty code (or a bare `0x`) carries no evidence either way. Otherwise code
/// whose hex length falls outside `[MIN_CODE_HEX_LEN, MAX_CODE_HEX_LEN]` is
/// flagged. This is a size check, not static analysis.
pub fn detect_trading_restrictions(bytecode: &str) -> bool {
    let code = strip_hex_prefix(bytecode.trim());
    if code.is_empty() {
        return false;
    }
    code.len() < MIN_CODE_HEX_LEN || code.len() > MAX_CODE_HEX_LEN
}

/// First non-null value among `keys`.
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Non-negative integer from a JSON number, decimal string or `0x` hex string.
/// Fractional values are truncated.
fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(float_to_count)),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s
                    .parse::<u64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(float_to_count)),
            }
        }
        _ => None,
    }
}

fn float_to_count(f: f64) -> Option<u64> {
    // u64::MAX as f64 rounds up to 2^64, so the bound is exclusive
    (f.is_finite() && f >= 0.0 && f < u64::MAX as f64).then(|| f.trunc() as u64)
}

/// Non-negative finite amount from a JSON number or numeric string.
fn as_amount(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (f.is_finite() && f >= 0.0).then_some(f)
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

fn is_hex(s: &str) -> bool {
    strip_hex_prefix(s.trim()).chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-16T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn now_ms() -> u64 {
        now().timestamp_millis() as u64
    }

    #[test]
    fn null_input_gets_all_defaults() {
        let s = normalize(&Value::Null, now());
        assert!(!s.is_verified);
        assert_eq!(s.creation_timestamp, now_ms());
        assert_eq!(s.transaction_count, 0);
        assert_eq!(s.holder_count, 0);
        assert_eq!(s.liquidity_usd, 0.0);
        assert_eq!(s.bytecode, "");
        assert!(!s.has_trading_restrictions);
        assert_eq!(s.action_type, ActionType::Transfer);
        assert_eq!(s.requested_approval_amount, None);
        assert_eq!(s.observed_at, now());
    }

    #[test]
    fn non_object_input_gets_defaults() {
        let s = normalize(&json!([1, 2, 3]), now());
        assert_eq!(s, normalize(&Value::Null, now()));
    }

    #[test]
    fn well_formed_input_passes_through() {
        let raw = json!({
            "isVerified": true,
            "creationTimestamp": 1_700_000_000_000u64,
            "transactionCount": 250,
            "holderCount": 150,
            "liquidityUSD": 25000.5,
            "actionType": "swap",
        });
        let s = normalize(&raw, now());
        assert!(s.is_verified);
        assert_eq!(s.creation_timestamp, 1_700_000_000_000);
        assert_eq!(s.transaction_count, 250);
        assert_eq!(s.holder_count, 150);
        assert_eq!(s.liquidity_usd, 25000.5);
        assert_eq!(s.action_type, ActionType::Swap);
    }

    #[test]
    fn fetcher_aliases_are_accepted() {
        let raw = json!({
            "contractVerified": true,
            "creationTime": 1_000u64,
            "txCount": 7,
        });
        let s = normalize(&raw, now());
        assert!(s.is_verified);
        assert_eq!(s.creation_timestamp, 1_000);
        assert_eq!(s.transaction_count, 7);
    }

    #[test]
    fn negative_numbers_fall_back() {
        let raw = json!({ "holderCount": -5, "liquidityUSD": -1.0, "transactionCount": -3 });
        let s = normalize(&raw, now());
        assert_eq!(s.holder_count, 0);
        assert_eq!(s.liquidity_usd, 0.0);
        assert_eq!(s.transaction_count, 0);
    }

    #[test]
    fn numeric_strings_and_hex_counts() {
        let raw = json!({ "holderCount": "120", "transactionCount": "0x1a", "liquidityUSD": " 3000.25 " });
        let s = normalize(&raw, now());
        assert_eq!(s.holder_count, 120);
        assert_eq!(s.transaction_count, 26);
        assert_eq!(s.liquidity_usd, 3000.25);
    }

    #[test]
    fn fractional_counts_truncate() {
        let s = normalize(&json!({ "holderCount": 49.9 }), now());
        assert_eq!(s.holder_count, 49);
    }

    #[test]
    fn wrong_types_fall_back() {
        let raw = json!({
            "isVerified": "yes",
            "holderCount": { "count": 10 },
            "liquidityUSD": [1],
            "bytecode": 42,
        });
        let s = normalize(&raw, now());
        assert!(!s.is_verified);
        assert_eq!(s.holder_count, 0);
        assert_eq!(s.liquidity_usd, 0.0);
        assert_eq!(s.bytecode, "");
    }

    #[test]
    fn string_booleans() {
        let s = normalize(&json!({ "isVerified": "TRUE", "hasTradingRestrictions": "false" }), now());
        assert!(s.is_verified);
        assert!(!s.has_trading_restrictions);
    }

    #[test]
    fn future_creation_defaults_to_now() {
        let raw = json!({ "creationTimestamp": now_ms() + 60_000 });
        assert_eq!(normalize(&raw, now()).creation_timestamp, now_ms());
    }

    #[test]
    fn unknown_raw_action_defaults_to_transfer() {
        let s = normalize(&json!({ "actionType": "burn" }), now());
        assert_eq!(s.action_type, ActionType::Transfer);
    }

    #[test]
    fn approval_amount_is_read() {
        let s = normalize(
            &json!({ "actionType": "approve", "requestedApprovalAmount": "unlimited" }),
            now(),
        );
        assert_eq!(s.action_type, ActionType::Approve);
        assert_eq!(s.requested_approval_amount, Some(ApprovalAmount::Unlimited));
    }

    #[test]
    fn non_hex_bytecode_is_dropped() {
        let s = normalize(&json!({ "bytecode": "0xnothex" }), now());
        assert_eq!(s.bytecode, "");
        assert!(!s.has_trading_restrictions);
    }

    #[test]
    fn restriction_flag_derived_from_short_code() {
        let s = normalize(&json!({ "bytecode": "0x6080" }), now());
        assert!(s.has_trading_restrictions);
    }

    #[test]
    fn explicit_restriction_flag_wins() {
        let s = normalize(&json!({ "bytecode": "0x6080", "hasTradingRestrictions": false }), now());
        assert!(!s.has_trading_restrictions);
    }

    #[test]
    fn detect_empty_code() {
        assert!(!detect_trading_restrictions(""));
        assert!(!detect_trading_restrictions("0x"));
    }

    #[test]
    fn detect_length_window() {
        let normal = format!("0x{}", "60".repeat(MIN_CODE_HEX_LEN / 2));
        assert!(!detect_trading_restrictions(&normal));

        let short = format!("0x{}", "6".repeat(MIN_CODE_HEX_LEN - 1));
        assert!(detect_trading_restrictions(&short));

        let upper = "a".repeat(MAX_CODE_HEX_LEN);
        assert!(!detect_trading_restrictions(&upper));

        let huge = "a".repeat(MAX_CODE_HEX_LEN + 1);
        assert!(detect_trading_restrictions(&huge));
    }

    #[test]
    fn normalization_is_deterministic() {
        let raw = json!({ "holderCount": 10, "bytecode": "0x60806040" });
        assert_eq!(normalize(&raw, now()), normalize(&raw, now()));
    }
}
