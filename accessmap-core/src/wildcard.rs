//! Database reference resolution with shell-style wildcards.

/// Returns true when `reference` contains a wildcard character.
pub fn has_wildcard(reference: &str) -> bool {
    reference.contains(['*', '?', '['])
}

/// Prefixes a bare database id with the single configured region.
///
/// References that already carry a region, or runs spanning several regions,
/// are returned unchanged.
pub fn qualify(reference: &str, single_region: Option<&str>) -> String {
    match single_region {
        Some(region) if !reference.contains('/') => format!("{}/{}", region, reference),
        _ => reference.to_string(),
    }
}

/// Expands a reference against candidate uids.
///
/// A wildcard reference yields every matching candidate in candidate order;
/// a literal reference yields itself when it is a candidate.
pub fn expand(reference: &str, candidates: &[String]) -> Vec<String> {
    if has_wildcard(reference) {
        candidates
            .iter()
            .filter(|uid| glob_match(reference, uid))
            .cloned()
            .collect()
    } else if candidates.iter().any(|uid| uid == reference) {
        vec![reference.to_string()]
    } else {
        Vec::new()
    }
}

/// Simple glob pattern matching.
///
/// Supports:
/// - `*` matches any sequence of characters, `/` included
/// - `?` matches any single character
/// - `[abc]`, `[a-z]` and `[!abc]` match one character from (or not from) a set
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    glob_match_recursive(&pattern_chars, &text_chars, 0, 0)
}

fn glob_match_recursive(pattern: &[char], text: &[char], mut pi: usize, mut ti: usize) -> bool {
    while pi < pattern.len() {
        match pattern[pi] {
            '*' => {
                while pi < pattern.len() && pattern[pi] == '*' {
                    pi += 1;
                }

                if pi == pattern.len() {
                    return true;
                }

                while ti <= text.len() {
                    if glob_match_recursive(pattern, text, pi, ti) {
                        return true;
                    }
                    ti += 1;
                }
                return false;
            }
            '?' => {
                if ti >= text.len() {
                    return false;
                }
                pi += 1;
                ti += 1;
            }
            '[' => {
                let Some((matched, next_pi)) = match_class(pattern, pi, text.get(ti).copied())
                else {
                    // Unterminated class, treat '[' literally
                    if ti >= text.len() || text[ti] != '[' {
                        return false;
                    }
                    pi += 1;
                    ti += 1;
                    continue;
                };
                if !matched {
                    return false;
                }
                pi = next_pi;
                ti += 1;
            }
            c => {
                if ti >= text.len() || text[ti] != c {
                    return false;
                }
                pi += 1;
                ti += 1;
            }
        }
    }

    ti == text.len()
}

/// Matches one character against the class starting at `pattern[start] == '['`.
///
/// Returns `None` when the class is unterminated, otherwise whether `c`
/// matched and the index just past the closing `]`.
fn match_class(pattern: &[char], start: usize, c: Option<char>) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negated = matches!(pattern.get(i), Some('!'));
    if negated {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < pattern.len() {
        if pattern[i] == ']' && !first {
            let matched = c.is_some() && (matched != negated);
            return Some((matched, i + 1));
        }
        first = false;
        if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            if c.is_some_and(|c| pattern[i] <= c && c <= pattern[i + 2]) {
                matched = true;
            }
            i += 3;
        } else {
            if c == Some(pattern[i]) {
                matched = true;
            }
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "eu-west-2/blackwells"));
        assert!(glob_match("eu-west-2/*", "eu-west-2/blackwells"));
        assert!(!glob_match("eu-west-2/*", "us-east-1/borders"));
        assert!(glob_match("*/w?smith", "eu-west-2/whsmith"));
        assert!(glob_match("eu-west-2/[bw]*", "eu-west-2/whsmith"));
        assert!(!glob_match("eu-west-2/[!bw]*", "eu-west-2/whsmith"));
        assert!(glob_match("eu-west-2/[a-c]*", "eu-west-2/blackwells"));
        assert!(!glob_match("eu-west-2/foyles", "eu-west-2/foyles2"));
    }

    #[test]
    fn test_expand_wildcard() {
        let candidates = uids(&["eu-west-2/blackwells", "eu-west-2/whsmith", "us-east-1/borders"]);
        assert_eq!(
            expand("eu-west-2/*", &candidates),
            uids(&["eu-west-2/blackwells", "eu-west-2/whsmith"])
        );
        assert_eq!(expand("*", &candidates).len(), 3);
        assert!(expand("ap-south-1/*", &candidates).is_empty());
    }

    #[test]
    fn test_expand_literal() {
        let candidates = uids(&["eu-west-2/blackwells"]);
        assert_eq!(expand("eu-west-2/blackwells", &candidates), candidates);
        assert!(expand("eu-west-2/foyles", &candidates).is_empty());
    }

    #[test]
    fn test_qualify_with_single_region() {
        assert_eq!(qualify("whsmith", Some("eu-west-2")), "eu-west-2/whsmith");
        assert_eq!(qualify("*", Some("eu-west-2")), "eu-west-2/*");
        assert_eq!(qualify("us-east-1/borders", Some("eu-west-2")), "us-east-1/borders");
        assert_eq!(qualify("whsmith", None), "whsmith");
    }
}
