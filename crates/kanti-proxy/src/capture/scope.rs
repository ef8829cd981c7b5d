//! Host-pattern scope filtering: exact matches and `*.suffix` wildcards.

/// `true` if `host` matches `pattern`. `pattern` is either an exact host
/// string or `*.suffix`, which matches `suffix` itself and any host ending
/// in `.suffix`.
fn matches(host: &str, pattern: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => host == suffix || host.ends_with(&format!(".{suffix}")),
        None => host == pattern,
    }
}

/// Decides whether a completed exchange for `host` should be emitted,
/// given the configured scope lists. When `save_only_in_scope` is false,
/// everything is emitted and the scope lists are not consulted at all.
/// Otherwise `out_of_scope` is evaluated first and wins, then `in_scope`
/// is required.
pub fn in_scope(host: &str, save_only_in_scope: bool, in_scope: &[String], out_of_scope: &[String]) -> bool {
    if !save_only_in_scope {
        return true;
    }
    if out_of_scope.iter().any(|p| matches(host, p)) {
        return false;
    }
    in_scope.iter().any(|p| matches(host, p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(matches("example.com", "example.com"));
        assert!(!matches("example.com", "other.com"));
    }

    #[test]
    fn wildcard_matches_suffix_and_literal() {
        assert!(matches("api.example.com", "*.example.com"));
        assert!(matches("example.com", "*.example.com"));
        assert!(!matches("notexample.com", "*.example.com"));
    }

    #[test]
    fn out_of_scope_wins_over_in_scope() {
        let in_scope_list = vec!["*.example.com".to_string()];
        let out_of_scope_list = vec!["admin.example.com".to_string()];
        assert!(!in_scope(
            "admin.example.com",
            true,
            &in_scope_list,
            &out_of_scope_list
        ));
        assert!(in_scope(
            "api.example.com",
            true,
            &in_scope_list,
            &out_of_scope_list
        ));
    }

    #[test]
    fn disabled_filter_emits_everything() {
        assert!(in_scope("anything.org", false, &[], &[]));
    }

    #[test]
    fn unmatched_host_is_dropped_when_filtering() {
        let in_scope_list = vec!["*.example.com".to_string()];
        assert!(!in_scope("example.org", true, &in_scope_list, &[]));
    }
}
