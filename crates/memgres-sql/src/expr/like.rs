//! `LIKE` / `ILIKE` pattern matching.

/// One element of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// `%`: any sequence, possibly empty.
    Any,
    /// `_`: exactly one character.
    One,
    /// A literal character.
    Char(char),
}

/// A compiled `LIKE` pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikePattern {
    tokens: Vec<Token>,
    case_insensitive: bool,
}

impl LikePattern {
    /// Compiles a pattern. A backslash escapes the next character.
    pub fn new(pattern: &str, case_insensitive: bool) -> Self {
        let mut tokens = Vec::with_capacity(pattern.len());
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            let token = match c {
                '%' => {
                    // consecutive wildcards are one wildcard
                    if tokens.last() == Some(&Token::Any) {
                        continue;
                    }
                    Token::Any
                }
                '_' => Token::One,
                '\\' => Token::Char(chars.next().unwrap_or('\\')),
                c => Token::Char(c),
            };
            tokens.push(token);
        }
        Self {
            tokens,
            case_insensitive,
        }
    }

    /// Tests a value against the pattern.
    pub fn matches(&self, value: &str) -> bool {
        let value: Vec<char> = if self.case_insensitive {
            value.to_lowercase().chars().collect()
        } else {
            value.chars().collect()
        };

        // Greedy matching with a single backtrack point: the position of the
        // last `%` seen and the value position it currently absorbs up to.
        let (mut v, mut p) = (0, 0);
        let mut backtrack: Option<(usize, usize)> = None;
        while v < value.len() {
            match self.tokens.get(p) {
                Some(Token::Any) => {
                    backtrack = Some((p, v));
                    p += 1;
                }
                Some(Token::One) => {
                    v += 1;
                    p += 1;
                }
                Some(Token::Char(c)) if self.char_eq(*c, value[v]) => {
                    v += 1;
                    p += 1;
                }
                _ => match backtrack {
                    Some((star, absorbed)) => {
                        p = star + 1;
                        v = absorbed + 1;
                        backtrack = Some((star, absorbed + 1));
                    }
                    None => return false,
                },
            }
        }
        self.tokens[p..].iter().all(|t| *t == Token::Any)
    }

    fn char_eq(&self, pattern: char, value: char) -> bool {
        if self.case_insensitive {
            pattern.to_lowercase().eq(std::iter::once(value))
        } else {
            pattern == value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn like(value: &str, pattern: &str) -> bool {
        LikePattern::new(pattern, false).matches(value)
    }

    #[test]
    fn test_wildcards() {
        assert!(like("hello", "h%"));
        assert!(like("hello", "%llo"));
        assert!(like("hello", "h_llo"));
        assert!(like("hello", "%"));
        assert!(like("", "%"));
        assert!(!like("hello", "h_lo"));
        assert!(like("abcabc", "%bc%bc"));
        assert!(!like("abcab", "%bc%bc"));
    }

    #[test]
    fn test_escape() {
        assert!(like("50%", "50\\%"));
        assert!(!like("500", "50\\%"));
        assert!(like("a_b", "a\\_b"));
    }

    #[test]
    fn test_ilike() {
        assert!(LikePattern::new("HeL%", true).matches("hello"));
        assert!(!LikePattern::new("HeL%", false).matches("hello"));
    }
}
