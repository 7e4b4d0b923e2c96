use std::collections::HashMap;

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

/// Extract a parameter as f64, clamped to a range with finite checks
pub fn get_param_f64_clamped(
    params: &HashMap<String, f64>,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> f64 {
    let raw = params.get(key).copied().unwrap_or(default);
    if !raw.is_finite() {
        return default;
    }
    raw.clamp(min, max)
}

/// Extract a parameter as usize with a minimum value
pub fn get_param_usize_at_least(
    params: &HashMap<String, f64>,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    let raw = params.get(key).copied().unwrap_or(default as f64);
    if !raw.is_finite() {
        return default.max(min);
    }
    (raw as usize).max(min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_param_rejects_non_finite_values() {
        let mut params = HashMap::new();
        params.insert("driftBands".to_string(), f64::NAN);
        assert_eq!(get_param_f64_clamped(&params, "driftBands", 10.0, 0.0, 100.0), 10.0);
        params.insert("driftBands".to_string(), 250.0);
        assert_eq!(get_param_f64_clamped(&params, "driftBands", 10.0, 0.0, 100.0), 100.0);
    }

    #[test]
    fn usize_param_enforces_minimum() {
        let mut params = HashMap::new();
        params.insert("lookbackPeriod".to_string(), 0.0);
        assert_eq!(get_param_usize_at_least(&params, "lookbackPeriod", 90, 2), 2);
        assert_eq!(get_param_usize_at_least(&params, "missing", 90, 2), 90);
    }
}
