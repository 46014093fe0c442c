//! File-mask matching.
//!
//! Filters are globs with `*`, `?` and bracket classes (`[abc]`, `[a-z]`,
//! `[!x]` / `[^x]`), matched case-sensitively against the whole name. A
//! leading `!` makes the filter inverse: a name it matches is explicitly
//! rejected and no further filters are tried for that file.

/// Outcome of matching one filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// The name is taken (`0`)
    Match,
    /// An inverse filter matched; stop evaluating (`1`)
    InverseHit,
    /// Try the next filter (`-1`)
    NoMatch,
}

impl MatchResult {
    /// Numeric form used in logs and by older tooling
    pub fn code(self) -> i32 {
        match self {
            MatchResult::Match => 0,
            MatchResult::InverseHit => 1,
            MatchResult::NoMatch => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassItem {
    Byte(u8),
    Range(u8, u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(u8),
    Any,
    Star,
    Class { negated: bool, items: Vec<ClassItem> },
}

/// A parsed filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    source: String,
    inverse: bool,
    tokens: Vec<Token>,
}

impl Filter {
    pub fn parse(filter: &str) -> Self {
        let (inverse, body) = match filter.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, filter),
        };
        let bytes = body.as_bytes();
        let mut tokens = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'*' => {
                    // Consecutive stars behave like one.
                    if tokens.last() != Some(&Token::Star) {
                        tokens.push(Token::Star);
                    }
                    i += 1;
                }
                b'?' => {
                    tokens.push(Token::Any);
                    i += 1;
                }
                b'\\' if i + 1 < bytes.len() => {
                    tokens.push(Token::Literal(bytes[i + 1]));
                    i += 2;
                }
                b'[' => match parse_class(&bytes[i + 1..]) {
                    Some((token, used)) => {
                        tokens.push(token);
                        i += used + 1;
                    }
                    None => {
                        tokens.push(Token::Literal(b'['));
                        i += 1;
                    }
                },
                b => {
                    tokens.push(Token::Literal(b));
                    i += 1;
                }
            }
        }
        Self {
            source: filter.to_string(),
            inverse,
            tokens,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_inverse(&self) -> bool {
        self.inverse
    }

    /// Match `name` against this filter
    pub fn evaluate(&self, name: &str) -> MatchResult {
        let hit = match_tokens(&self.tokens, name.as_bytes(), &mut None);
        match (hit, self.inverse) {
            (true, false) => MatchResult::Match,
            (true, true) => MatchResult::InverseHit,
            (false, _) => MatchResult::NoMatch,
        }
    }

    /// Text matched by each `*` and `?`.
    ///
    /// `None` unless the filter takes the name. `*` captures as little as
    /// possible while still letting the rest of the filter match.
    pub fn captures(&self, name: &str) -> Option<Captures> {
        if self.inverse {
            return None;
        }
        let mut spans = Some(Vec::new());
        if !match_tokens(&self.tokens, name.as_bytes(), &mut spans) {
            return None;
        }
        let text = |s: usize, e: usize| String::from_utf8_lossy(&name.as_bytes()[s..e]).into_owned();
        let mut caps = Captures::default();
        for (wildcard, s, e) in spans? {
            match wildcard {
                Wildcard::Star => caps.stars.push(text(s, e)),
                Wildcard::Single => caps.singles.push(text(s, e)),
            }
        }
        Some(caps)
    }
}

/// Captured wildcard text, in filter order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    pub stars: Vec<String>,
    pub singles: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wildcard {
    Star,
    Single,
}

/// Parse a class body after `[`; returns the token and bytes used
/// including the closing `]`.
fn parse_class(bytes: &[u8]) -> Option<(Token, usize)> {
    let mut i = 0;
    let negated = matches!(bytes.first(), Some(b'!') | Some(b'^'));
    if negated {
        i += 1;
    }
    let mut items = Vec::new();
    let start = i;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b']' && i > start {
            return Some((Token::Class { negated, items }, i + 1));
        }
        if i + 2 < bytes.len() && bytes[i + 1] == b'-' && bytes[i + 2] != b']' {
            items.push(ClassItem::Range(b, bytes[i + 2]));
            i += 3;
        } else {
            items.push(ClassItem::Byte(b));
            i += 1;
        }
    }
    None
}

fn class_matches(negated: bool, items: &[ClassItem], b: u8) -> bool {
    let inside = items.iter().any(|item| match *item {
        ClassItem::Byte(c) => c == b,
        ClassItem::Range(lo, hi) => lo <= b && b <= hi,
    });
    inside != negated
}

type Spans = Option<Vec<(Wildcard, usize, usize)>>;

fn match_tokens(tokens: &[Token], name: &[u8], caps: &mut Spans) -> bool {
    match_at(tokens, name, 0, caps)
}

fn match_at(tokens: &[Token], name: &[u8], pos: usize, caps: &mut Spans) -> bool {
    let Some((token, rest)) = tokens.split_first() else {
        return pos == name.len();
    };
    match token {
        Token::Star => {
            for end in pos..=name.len() {
                let mark = caps.as_ref().map(Vec::len);
                if let Some(c) = caps.as_mut() {
                    c.push((Wildcard::Star, pos, end));
                }
                if match_at(rest, name, end, caps) {
                    return true;
                }
                if let (Some(c), Some(len)) = (caps.as_mut(), mark) {
                    c.truncate(len);
                }
            }
            false
        }
        Token::Any => {
            if pos >= name.len() {
                return false;
            }
            let mark = caps.as_ref().map(Vec::len);
            if let Some(c) = caps.as_mut() {
                c.push((Wildcard::Single, pos, pos + 1));
            }
            if match_at(rest, name, pos + 1, caps) {
                return true;
            }
            if let (Some(c), Some(len)) = (caps.as_mut(), mark) {
                c.truncate(len);
            }
            false
        }
        Token::Literal(b) => {
            pos < name.len() && name[pos] == *b && match_at(rest, name, pos + 1, caps)
        }
        Token::Class { negated, items } => {
            pos < name.len()
                && class_matches(*negated, items, name[pos])
                && match_at(rest, name, pos + 1, caps)
        }
    }
}

/// Match one filter string against a name
pub fn pmatch(filter: &str, name: &str) -> MatchResult {
    Filter::parse(filter).evaluate(name)
}

/// Index of the first filter taking `name`.
///
/// Evaluation stops at the first inverse hit, which rejects the name.
pub fn first_match(filters: &[Filter], name: &str) -> Option<usize> {
    for (i, filter) in filters.iter().enumerate() {
        match filter.evaluate(name) {
            MatchResult::Match => return Some(i),
            MatchResult::InverseHit => return None,
            MatchResult::NoMatch => continue,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(pmatch("*.txt", "a.txt").code(), 0);
        assert_eq!(pmatch("!*.tmp", "a.tmp").code(), 1);
        assert_eq!(pmatch("!*.tmp", "a.txt").code(), -1);
        assert_eq!(pmatch("*.txt", "a.TXT").code(), -1);
    }

    #[test]
    fn test_wildcards() {
        assert_eq!(pmatch("*", ""), MatchResult::Match);
        assert_eq!(pmatch("?", ""), MatchResult::NoMatch);
        assert_eq!(pmatch("a?c", "abc"), MatchResult::Match);
        assert_eq!(pmatch("a*b*c", "axxbyyc"), MatchResult::Match);
        assert_eq!(pmatch("a*b*c", "axxbyy"), MatchResult::NoMatch);
        assert_eq!(pmatch("**x", "abx"), MatchResult::Match);
    }

    #[test]
    fn test_classes() {
        assert_eq!(pmatch("[abc]x", "bx"), MatchResult::Match);
        assert_eq!(pmatch("[a-c]x", "dx"), MatchResult::NoMatch);
        assert_eq!(pmatch("[!a-c]x", "dx"), MatchResult::Match);
        assert_eq!(pmatch("[^0-9]*", "7up"), MatchResult::NoMatch);
        assert_eq!(pmatch("[]]", "]"), MatchResult::Match);
        // Unterminated class is a literal bracket
        assert_eq!(pmatch("[ab", "[ab"), MatchResult::Match);
    }

    #[test]
    fn test_escape() {
        assert_eq!(pmatch("a\\*", "a*"), MatchResult::Match);
        assert_eq!(pmatch("a\\*", "ab"), MatchResult::NoMatch);
    }

    #[test]
    fn test_inverse_stops_evaluation() {
        let filters: Vec<Filter> = ["!*.tmp", "*"].iter().map(|f| Filter::parse(f)).collect();
        assert_eq!(first_match(&filters, "x.tmp"), None);
        assert_eq!(first_match(&filters, "x.txt"), Some(1));
    }

    #[test]
    fn test_captures_shortest_star() {
        let f = Filter::parse("*.*");
        assert_eq!(f.captures("a.b.c").unwrap().stars, vec!["a", "b.c"]);
        let caps = Filter::parse("data_??_*.grb").captures("data_12_europe.grb").unwrap();
        assert_eq!(caps.singles, vec!["1", "2"]);
        assert_eq!(caps.stars, vec!["europe"]);
        assert!(Filter::parse("data_??_*.grb").captures("data_1_europe.grb").is_none());
        assert!(Filter::parse("!*").captures("x").is_none());
    }
}
