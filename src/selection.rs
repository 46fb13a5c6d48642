/// Glob matching for table selection: `*` matches any run of characters,
/// `?` matches exactly one. Case-sensitive, following source identifier
/// rules.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    matches_at(&pattern, &name)
}

fn matches_at(pattern: &[char], name: &[char]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some(('*', rest)) => {
            // try every possible span for the star, including empty
            (0..=name.len()).any(|skip| matches_at(rest, &name[skip..]))
        }
        Some(('?', rest)) => !name.is_empty() && matches_at(rest, &name[1..]),
        Some((ch, rest)) => name.first() == Some(ch) && matches_at(rest, &name[1..]),
    }
}

/// Resolve the effective table set: start from all source tables, intersect
/// with `include` when non-empty, subtract `exclude`. Patterns that select
/// nothing produce a warning, not an error.
pub fn resolve_tables(
    all: &[String],
    include: &[String],
    exclude: &[String],
) -> (Vec<String>, Vec<String>) {
    let mut warnings = Vec::new();

    for pattern in include.iter().chain(exclude.iter()) {
        if !all.iter().any(|t| pattern_matches(pattern, t)) {
            warnings.push(format!("pattern '{}' matches no table", pattern));
        }
    }

    let selected = all
        .iter()
        .filter(|table| {
            include.is_empty() || include.iter().any(|p| pattern_matches(p, table))
        })
        .filter(|table| !exclude.iter().any(|p| pattern_matches(p, table)))
        .cloned()
        .collect();

    (selected, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn star_matches_prefix_and_suffix() {
        assert!(pattern_matches("user_*", "user_profiles"));
        assert!(pattern_matches("user_*", "user_settings"));
        assert!(!pattern_matches("user_*", "superuser"));
        assert!(pattern_matches("*_log", "access_log"));
        assert!(!pattern_matches("*_log", "logger"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        assert!(pattern_matches("t?", "t1"));
        assert!(!pattern_matches("t?", "t"));
        assert!(!pattern_matches("t?", "t12"));
    }

    #[test]
    fn literal_names_match_exactly() {
        assert!(pattern_matches("orders", "orders"));
        assert!(!pattern_matches("orders", "Orders"));
        assert!(!pattern_matches("orders", "orders_2024"));
    }

    #[test]
    fn include_then_exclude() {
        let all = names(&["user_profile", "user_log", "order"]);
        let (selected, warnings) =
            resolve_tables(&all, &names(&["user_*"]), &names(&["*_log"]));
        assert_eq!(selected, vec!["user_profile"]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn empty_include_selects_all() {
        let all = names(&["a", "b"]);
        let (selected, _) = resolve_tables(&all, &[], &[]);
        assert_eq!(selected, vec!["a", "b"]);
    }

    #[test]
    fn unknown_pattern_warns_but_does_not_fail() {
        let all = names(&["a"]);
        let (selected, warnings) = resolve_tables(&all, &names(&["missing"]), &[]);
        assert!(selected.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("missing"));
    }
}
