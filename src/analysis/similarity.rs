//! Column-name similarity for rename detection
//!
//! Ratcliff/Obershelp matching: the score is `2 * M / T`, where `M` is the
//! number of characters in matching blocks (found by recursively taking the
//! longest common substring) and `T` is the total length of both names.

/// Case-insensitive similarity in `[0, 1]`.
///
/// Symmetric: the pair is put in a canonical order before matching, so
/// `similarity(a, b) == similarity(b, a)`. Identical names score 1.0.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();

    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let (first, second) = if a <= b { (&a, &b) } else { (&b, &a) };
    let matched = matching_chars(first, second);

    2.0 * matched as f64 / total as f64
}

/// Best rename target for `old_name` among `candidates`.
///
/// Returns the candidate with the highest score strictly above `threshold`;
/// ties go to the lexicographically smallest name.
pub fn best_match<'a, I>(old_name: &str, candidates: I, threshold: f64) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&str, f64)> = None;

    for candidate in candidates {
        let score = similarity(old_name, candidate);
        if score <= threshold {
            continue;
        }
        best = match best {
            Some((name, best_score))
                if best_score > score || (best_score == score && name <= candidate) =>
            {
                Some((name, best_score))
            }
            _ => Some((candidate, score)),
        };
    }

    best.map(|(name, _)| name)
}

/// Total length of the matching blocks between `a` and `b`
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut stack = vec![(0, a.len(), 0, b.len())];
    let mut matched = 0;

    while let Some((a_lo, a_hi, b_lo, b_hi)) = stack.pop() {
        let (i, j, size) = longest_match(a, b, a_lo, a_hi, b_lo, b_hi);
        if size == 0 {
            continue;
        }
        matched += size;
        if a_lo < i && b_lo < j {
            stack.push((a_lo, i, b_lo, j));
        }
        if i + size < a_hi && j + size < b_hi {
            stack.push((i + size, a_hi, j + size, b_hi));
        }
    }

    matched
}

/// Longest common block within the given windows. The earliest block in `a`
/// wins, then the earliest in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    a_lo: usize,
    a_hi: usize,
    b_lo: usize,
    b_hi: usize,
) -> (usize, usize, usize) {
    let mut best = (a_lo, b_lo, 0);
    // lengths of common suffixes ending at the previous row, indexed by j - b_lo
    let mut prev = vec![0usize; b_hi - b_lo + 1];

    for i in a_lo..a_hi {
        let mut current = vec![0usize; b_hi - b_lo + 1];
        for j in b_lo..b_hi {
            if a[i] == b[j] {
                let len = prev[j - b_lo] + 1;
                current[j - b_lo + 1] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            }
        }
        prev = current;
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_names_score_one() {
        assert_eq!(similarity("email", "email"), 1.0);
        assert_eq!(similarity("Email", "EMAIL"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let pairs = [
            ("full_nm", "full_name"),
            ("abcd", "bcda"),
            ("status_code", "status_id"),
            ("qty", "quantity"),
            ("xyz", "zyx"),
        ];
        for (a, b) in pairs {
            assert_eq!(similarity(a, b), similarity(b, a), "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_known_scores() {
        assert!((similarity("full_nm", "full_name") - 0.875).abs() < 1e-9);
        assert_eq!(similarity("abc", "xyz"), 0.0);
        assert!((similarity("abc", "") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_best_match_requires_strictly_greater() {
        // "ab" vs "abc": 2*2/5 = 0.8
        assert_eq!(best_match("ab", ["abc"], 0.8), None);
        assert_eq!(best_match("ab", ["abc"], 0.7), Some("abc"));
    }

    #[test]
    fn test_best_match_prefers_highest_score() {
        let candidates = ["full_name", "fullname_x", "nickname"];
        assert_eq!(best_match("full_nm", candidates, 0.7), Some("full_name"));
    }

    #[test]
    fn test_best_match_ties_go_to_smallest_name() {
        // both candidates score identically against "name"
        assert_eq!(best_match("name", ["namez", "namea"], 0.7), Some("namea"));
        assert_eq!(best_match("name", ["namea", "namez"], 0.7), Some("namea"));
    }

    #[test]
    fn test_best_match_none_without_candidates() {
        assert_eq!(best_match("fax", std::iter::empty(), 0.7), None);
        assert_eq!(best_match("fax", ["email"], 0.7), None);
    }
}
