//! Shell-style glob matching for archive and entry names.
//!
//! Supported syntax:
//! - `*` matches zero or more characters within one path component
//! - `?` matches exactly one character other than `/`
//! - `[abc]`, `[a-z]` match one character from the set; `[!a]` or `[^a]`
//!   negate it. An unterminated `[` is an ordinary character.
//!
//! Matching is case-sensitive and `**` is just two stars: nothing crosses a
//! `/` except a literal `/`.

use std::fmt;

use super::structures::CentralDirectoryEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassItem {
    Char(char),
    Range(char, char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    Star,
    AnyChar,
    Class { negated: bool, items: Vec<ClassItem> },
}

impl Token {
    fn matches(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar => c != '/',
            Token::Class { negated, items } => {
                if c == '/' {
                    return false;
                }
                let hit = items.iter().any(|item| match *item {
                    ClassItem::Char(x) => x == c,
                    ClassItem::Range(lo, hi) => lo <= c && c <= hi,
                });
                hit != *negated
            }
            Token::Star => true,
        }
    }
}

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    tokens: Vec<Token>,
}

impl Pattern {
    /// Compile `pattern`. Every string is a valid pattern.
    pub fn new(pattern: &str) -> Self {
        let chars: Vec<char> = pattern.chars().collect();
        let mut tokens = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            match chars[i] {
                '*' => {
                    if tokens.last() != Some(&Token::Star) {
                        tokens.push(Token::Star);
                    }
                    i += 1;
                }
                '?' => {
                    tokens.push(Token::AnyChar);
                    i += 1;
                }
                '[' => match parse_class(&chars[i + 1..]) {
                    Some((token, used)) => {
                        tokens.push(token);
                        i += 1 + used;
                    }
                    None => {
                        tokens.push(Token::Literal('['));
                        i += 1;
                    }
                },
                c => {
                    tokens.push(Token::Literal(c));
                    i += 1;
                }
            }
        }

        Self {
            source: pattern.to_string(),
            tokens,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check whether `text` matches the whole pattern.
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let tokens = &self.tokens;
        let (mut p, mut t) = (0, 0);
        // Most recent star and the text position it currently extends to
        let mut star: Option<(usize, usize)> = None;

        while t < text.len() {
            match tokens.get(p) {
                Some(Token::Star) => {
                    star = Some((p, t));
                    p += 1;
                    continue;
                }
                Some(token) if token.matches(text[t]) => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }

            // Let the last star swallow one more character, never a separator.
            match star {
                Some((sp, st)) if text[st] != '/' => {
                    star = Some((sp, st + 1));
                    p = sp + 1;
                    t = st + 1;
                }
                _ => return false,
            }
        }

        tokens[p..].iter().all(|token| *token == Token::Star)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse a bracket expression; `rest` starts right after the `[`.
///
/// Returns the token and the number of characters consumed including the
/// closing `]`, or `None` when the bracket is never closed.
fn parse_class(rest: &[char]) -> Option<(Token, usize)> {
    let mut i = 0;
    let negated = matches!(rest.first(), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut items = Vec::new();
    let mut first = true;
    loop {
        let c = *rest.get(i)?;
        if c == ']' && !first {
            return Some((Token::Class { negated, items }, i + 1));
        }
        first = false;

        match (rest.get(i + 1), rest.get(i + 2)) {
            (Some('-'), Some(&hi)) if hi != ']' => {
                items.push(ClassItem::Range(c, hi));
                i += 3;
            }
            _ => {
                items.push(ClassItem::Char(c));
                i += 1;
            }
        }
    }
}

/// Which entries to extract from one archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionCriterion {
    /// `None` selects every file entry.
    pattern: Option<Pattern>,
    max_count: Option<usize>,
}

impl SelectionCriterion {
    pub fn new(pattern: &str, max_count: Option<usize>) -> Self {
        Self {
            pattern: Some(Pattern::new(pattern)),
            max_count,
        }
    }

    /// Select every file entry, optionally capped at `max_count`.
    pub fn all(max_count: Option<usize>) -> Self {
        Self {
            pattern: None,
            max_count,
        }
    }

    pub fn pattern(&self) -> Option<&Pattern> {
        self.pattern.as_ref()
    }

    pub fn max_count(&self) -> Option<usize> {
        self.max_count
    }

    /// Check a single name against the pattern, ignoring the count limit.
    pub fn matches(&self, name: &str) -> bool {
        match &self.pattern {
            Some(pattern) if name.contains('\\') => pattern.matches(&name.replace('\\', "/")),
            Some(pattern) => pattern.matches(name),
            None => true,
        }
    }

    /// Keep the first `max_count` names that match, in their original order.
    pub fn filter<I, T>(&self, items: I, name: impl Fn(&T) -> &str) -> Vec<T>
    where
        I: IntoIterator<Item = T>,
    {
        items
            .into_iter()
            .filter(|item| self.matches(name(item)))
            .take(self.max_count.unwrap_or(usize::MAX))
            .collect()
    }

    /// Select matching file entries in central directory order.
    ///
    /// Directory entries are never selected; they are created implicitly
    /// when their files are written.
    pub fn select(&self, entries: &[CentralDirectoryEntry]) -> Vec<CentralDirectoryEntry> {
        self.filter(
            entries.iter().filter(|e| !e.is_directory),
            |e: &&CentralDirectoryEntry| e.file_name.as_str(),
        )
        .into_iter()
        .cloned()
        .collect()
    }
}

/// Split a combined `archive.zip/inner-pattern` into its two halves.
///
/// Used when no inner pattern is given explicitly, so
/// `*.zip/*tubulin*.mat` selects `*tubulin*.mat` inside every `*.zip`.
/// Returns the archive pattern and the inner pattern, if any.
pub fn split_zip_pattern(zip_pattern: &str, inner_pattern: Option<&str>) -> (String, Option<String>) {
    if let Some(inner) = inner_pattern.filter(|p| !p.is_empty()) {
        return (zip_pattern.to_string(), Some(inner.to_string()));
    }
    if !zip_pattern.to_lowercase().ends_with(".zip") {
        if let Some((archive, inner)) = zip_pattern.split_once(".zip/") {
            let inner = (!inner.is_empty()).then(|| inner.to_string());
            return (format!("{}.zip", archive), inner);
        }
    }
    (zip_pattern.to_string(), None)
}

/// Archive and entry selection for a whole record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPlan {
    /// Which archives of the record to open.
    pub archives: SelectionCriterion,
    /// Which entries to extract from each opened archive.
    pub entries: SelectionCriterion,
}

impl SelectionPlan {
    /// Build a plan from the user-facing patterns and limits.
    ///
    /// A combined `archive.zip/inner` pattern is split as described in
    /// [`split_zip_pattern`].
    pub fn from_patterns(
        zip_pattern: &str,
        inner_pattern: Option<&str>,
        max_archives: Option<usize>,
        max_entries: Option<usize>,
    ) -> Self {
        let (zip_pattern, inner_pattern) = split_zip_pattern(zip_pattern, inner_pattern);
        let entries = match inner_pattern {
            Some(inner) => SelectionCriterion::new(&inner, max_entries),
            None => SelectionCriterion::all(max_entries),
        };
        Self {
            archives: SelectionCriterion::new(&zip_pattern, max_archives),
            entries,
        }
    }
}
