/// Replaces `:key` placeholders in `pattern`. Longer keys are substituted
/// first so `:name` never clobbers `:name_full`.
pub fn apply_pattern_string(pattern: &str, replacements: &[(&str, &str)]) -> String {
    let mut ordered: Vec<&(&str, &str)> = replacements.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut output = pattern.to_string();
    for (key, value) in ordered {
        output = output.replace(&format!(":{key}"), value);
    }
    output
}
