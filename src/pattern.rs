//! Redis-style glob matching.
//!
//! Used wherever the cache has to evaluate a key pattern itself: the local
//! tier sweep in `delete_by_pattern` and the in-memory remote tier. Redis
//! evaluates `SCAN MATCH` server-side with the same rules.
//!
//! Supported syntax: `*`, `?`, `[abc]`, `[a-z]`, `[^a]` / `[!a]`, and `\x`
//! to match `x` literally.

/// Returns true if `key` matches the glob `pattern`.
#[must_use]
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    match_from(&p, &k)
}

fn match_from(p: &[char], k: &[char]) -> bool {
    let (mut pi, mut ki) = (0usize, 0usize);
    // Backtrack point for the most recent `*`: (pattern index after star, key index)
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi + 1, ki));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ki += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(p, pi, k[ki]) {
                        if matched {
                            pi = next;
                            ki += 1;
                            continue;
                        }
                    } else if k[ki] == '[' {
                        // Unterminated class: treat '[' literally
                        pi += 1;
                        ki += 1;
                        continue;
                    }
                }
                '\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == k[ki] {
                        pi += 2;
                        ki += 1;
                        continue;
                    }
                }
                c => {
                    if c == k[ki] {
                        pi += 1;
                        ki += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((star_pi, star_ki)) => {
                pi = star_pi;
                ki = star_ki + 1;
                star = Some((star_pi, star_ki + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// Evaluate a `[...]` class starting at `p[start]`.
///
/// Returns `(matched, index after the closing bracket)`, or `None` if the
/// class is never closed.
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = matches!(p.get(i), Some('^') | Some('!'));
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < p.len() {
        if p[i] == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;

        let lo = if p[i] == '\\' && i + 1 < p.len() {
            i += 1;
            p[i]
        } else {
            p[i]
        };

        if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            let hi = p[i + 2];
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            if (lo..=hi).contains(&c) {
                matched = true;
            }
            i += 3;
        } else {
            if lo == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}
