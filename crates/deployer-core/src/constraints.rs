//! Constraint parsing and normalization.
//!
//! Bundles carry constraints as `key=value` strings (`mem=2G cpu-cores=2`)
//! while a live cluster reports them as a map with raw numbers. Both sides
//! go through [`normalize_constraints`] before they are compared.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::{Number, Value};

use crate::error::ConstraintError;

/// Normalized constraints: sizes in megabytes, counts as integers,
/// list-valued keys as arrays.
pub type Constraints = BTreeMap<String, Value>;

/// Keys measured in megabytes.
const SIZE_KEYS: &[&str] = &["mem", "root-disk"];

/// Keys holding plain integers.
const INTEGER_KEYS: &[&str] = &["cpu-cores", "cores", "cpu-power"];

/// Keys holding comma-separated lists.
const LIST_KEYS: &[&str] = &["tags", "spaces"];

/// Parse a `key=value key=value` constraint string.
pub fn parse_constraints(raw: &str) -> Result<Constraints, ConstraintError> {
    let mut out = Constraints::new();
    for token in raw.split_whitespace() {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| ConstraintError::MissingValue(token.to_string()))?;
        out.insert(key.to_string(), normalize_value(key, Value::String(value.to_string()))?);
    }
    Ok(out)
}

/// Normalize an already-split constraint map (as reported by a cluster).
pub fn normalize_constraints(raw: &Constraints) -> Result<Constraints, ConstraintError> {
    raw.iter()
        .map(|(key, value)| Ok((key.clone(), normalize_value(key, value.clone())?)))
        .collect()
}

fn normalize_value(key: &str, value: Value) -> Result<Value, ConstraintError> {
    match value {
        Value::String(text) => normalize_text(key, text),
        other if LIST_KEYS.contains(&key) && !other.is_array() => Ok(Value::Array(vec![other])),
        other => Ok(other),
    }
}

fn normalize_text(key: &str, text: String) -> Result<Value, ConstraintError> {
    if SIZE_KEYS.contains(&key) {
        return parse_size(key, &text);
    }
    if INTEGER_KEYS.contains(&key) {
        return text
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| ConstraintError::InvalidInteger {
                key: key.to_string(),
                value: text,
            });
    }
    if LIST_KEYS.contains(&key) {
        return Ok(Value::Array(
            text.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ));
    }
    Ok(Value::String(text))
}

/// Convert a size such as `512`, `2G` or `1.5T` to megabytes.
fn parse_size(key: &str, text: &str) -> Result<Value, ConstraintError> {
    let invalid = || ConstraintError::InvalidSize {
        key: key.to_string(),
        value: text.to_string(),
    };
    let size_re = Regex::new(r"^(\d+(?:\.\d+)?)([MGTP])?$")?;
    let caps = size_re.captures(text).ok_or_else(invalid)?;
    let amount: f64 = caps[1].parse().map_err(|_| invalid())?;
    let factor = match caps.get(2).map(|m| m.as_str()) {
        None | Some("M") => 1.0,
        Some("G") => 1024.0,
        Some("T") => 1024.0 * 1024.0,
        Some("P") => 1024.0 * 1024.0 * 1024.0,
        Some(_) => return Err(invalid()),
    };
    let megabytes = amount * factor;
    if megabytes.fract() == 0.0 {
        Ok(Value::from(megabytes as u64))
    } else {
        Number::from_f64(megabytes).map(Value::Number).ok_or_else(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_sizes_to_megabytes() {
        let c = parse_constraints("mem=2G root-disk=512").unwrap();
        assert_eq!(c["mem"], json!(2048));
        assert_eq!(c["root-disk"], json!(512));
    }

    #[test]
    fn fractional_sizes_stay_fractional() {
        let c = parse_constraints("mem=1.5G").unwrap();
        assert_eq!(c["mem"], json!(1536));
        let c = parse_constraints("mem=0.3M").unwrap();
        assert_eq!(c["mem"], json!(0.3));
    }

    #[test]
    fn integers_and_strings() {
        let c = parse_constraints("cpu-cores=4 arch=amd64").unwrap();
        assert_eq!(c["cpu-cores"], json!(4));
        assert_eq!(c["arch"], json!("amd64"));
    }

    #[test]
    fn tags_become_a_list() {
        let c = parse_constraints("tags=ssd,fast").unwrap();
        assert_eq!(c["tags"], json!(["ssd", "fast"]));
    }

    #[test]
    fn rejects_missing_value() {
        let err = parse_constraints("mem").unwrap_err();
        assert!(matches!(err, ConstraintError::MissingValue(token) if token == "mem"));
    }

    #[test]
    fn rejects_bad_size() {
        assert!(matches!(
            parse_constraints("mem=lots"),
            Err(ConstraintError::InvalidSize { .. })
        ));
    }

    #[test]
    fn empty_string_is_empty_map() {
        assert!(parse_constraints("").unwrap().is_empty());
    }

    #[test]
    fn normalizes_live_maps() {
        let mut live = Constraints::new();
        live.insert("mem".into(), json!("4G"));
        live.insert("tags".into(), json!("gpu"));
        live.insert("cpu-cores".into(), json!(2));
        let n = normalize_constraints(&live).unwrap();
        assert_eq!(n["mem"], json!(4096));
        assert_eq!(n["tags"], json!(["gpu"]));
        assert_eq!(n["cpu-cores"], json!(2));
    }

    #[test]
    fn bundle_and_live_forms_agree() {
        let bundle = parse_constraints("mem=2G tags=ssd").unwrap();
        let mut live = Constraints::new();
        live.insert("mem".into(), json!(2048));
        live.insert("tags".into(), json!(["ssd"]));
        assert_eq!(bundle, normalize_constraints(&live).unwrap());
    }
}
