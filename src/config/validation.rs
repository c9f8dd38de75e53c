//! Config validation: unknown-key detection with Levenshtein suggestions.
//!
//! The raw TOML is walked before serde deserialization and every key
//! is compared against the known layout. Metric names under
//! `[thresholds]` and device ids under `[devices]` are free-form, so
//! those segments are matched as wildcards. Warnings never break a config.

use std::collections::HashSet;

/// A non-fatal config warning (typo, misplaced key).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Placeholder for a user-chosen table name (metric or device id).
pub const WILDCARD: &str = "*";

/// Sections whose direct children are user-named tables.
const OPEN_SECTIONS: &[&str] = &["thresholds", "devices"];

/// Returns the set of valid dotted key paths for `GatewayConfig`.
///
/// Kept by hand in step with gateway_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [gateway]
        "gateway",
        "gateway.name",
        "gateway.entity_prefix",
        "gateway.entity_type",
        // [thresholds.<metric>]
        "thresholds",
        "thresholds.*",
        "thresholds.*.min",
        "thresholds.*.max",
        // [correction]
        "correction",
        "correction.window_capacity",
        "correction.streak_limit",
        "correction.sentinel",
        "correction.smoothing_weight",
        "correction.history_append",
        // [origin]
        "origin",
        "origin.lat",
        "origin.lon",
        // [devices.<id>]
        "devices",
        "devices.*",
        "devices.*.x",
        "devices.*.y",
        // [delivery]
        "delivery",
        "delivery.enabled",
        "delivery.iot_agent_url",
        "delivery.admin_url",
        "delivery.orion_url",
        "delivery.agent_endpoint",
        "delivery.api_key",
        "delivery.service",
        "delivery.service_path",
        "delivery.timeout_secs",
        "delivery.provisioning_timeout_secs",
        // [replay]
        "replay",
        "replay.cycle_delay_ms",
    ];
    keys.iter().copied().collect()
}

/// Replace the user-named segment of an open section with `*`.
///
/// `thresholds.co2.min` becomes `thresholds.*.min`; other keys pass through.
pub fn normalize_key(key: &str) -> String {
    let mut parts: Vec<&str> = key.split('.').collect();
    if parts.len() >= 2 && OPEN_SECTIONS.contains(&parts[0]) {
        parts[1] = WILDCARD;
    }
    parts.join(".")
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// A table `{ a = { b = 1, c = 2 } }` yields `["a", "a.b", "a.c"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
///
/// Ties resolve to the alphabetically first candidate so output is stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    let mut candidates: Vec<&str> = known.iter().copied().collect();
    candidates.sort_unstable();

    let mut best: Option<(&str, usize)> = None;
    for k in candidates {
        let dist = levenshtein(unknown, k);
        if dist > 3 {
            continue;
        }
        match best {
            Some((_, best_dist)) if dist >= best_dist => {}
            _ => best = Some((k, dist)),
        }
    }
    best.map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// Parse errors return no warnings; serde reports them afterwards.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    let mut warnings = Vec::new();

    for key in walk_toml_keys(&value, "") {
        let normalized = normalize_key(&key);
        if known.contains(normalized.as_str()) {
            continue;
        }
        let suggestion = suggest_correction(&normalized, &known).map(|s| {
            // Put the user's own table name back into the suggestion
            let user_parts: Vec<&str> = key.split('.').collect();
            s.split('.')
                .enumerate()
                .map(|(i, seg)| {
                    if seg == WILDCARD {
                        user_parts.get(i).copied().unwrap_or(seg)
                    } else {
                        seg
                    }
                })
                .collect::<Vec<_>>()
                .join(".")
        });
        warnings.push(ValidationWarning {
            message: format!("Unknown config key '{key}'"),
            field: key,
            suggestion,
        });
    }

    warnings
}
