use regex::{Captures, Regex, RegexBuilder};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{HushError, Result};
use crate::subtitle::SubtitleCue;

/// Replacement used when a lexicon line carries no explicit replacement
pub const DEFAULT_MASK: &str = "*****";

#[derive(Debug, Clone, PartialEq)]
pub struct LexiconEntry {
    pub term: String,
    pub replacement: String,
}

/// Case-insensitive term -> replacement map.
///
/// Keys are stored lower-cased; the entry keeps the term as it was written so
/// diagnostics and iteration show the original casing. Iteration follows the
/// order in which terms were first declared.
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    entries: HashMap<String, LexiconEntry>,
    order: Vec<String>,
}

impl Lexicon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a term. A term that differs only in case replaces the
    /// earlier entry but keeps its declaration position.
    pub fn insert<T: Into<String>, R: Into<String>>(&mut self, term: T, replacement: R) {
        let term = term.into();
        let key = term.to_lowercase();
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(
            key,
            LexiconEntry {
                term,
                replacement: replacement.into(),
            },
        );
    }

    pub fn contains(&self, term: &str) -> bool {
        self.entries.contains_key(&term.to_lowercase())
    }

    pub fn get(&self, term: &str) -> Option<&LexiconEntry> {
        self.entries.get(&term.to_lowercase())
    }

    pub fn replacement_for(&self, term: &str) -> Option<&str> {
        self.get(term).map(|e| e.replacement.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &LexiconEntry> {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }

    /// Parse lexicon text: one `term` or `term|replacement` per line, blank
    /// lines and `#` comments ignored.
    pub fn parse(content: &str, source_name: &str) -> Result<Self> {
        let mut lexicon = Lexicon::new();

        for (line_no, raw) in content.trim_start_matches('\u{feff}').lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.split('|');
            let term = parts.next().unwrap_or_default().trim();
            let replacement = parts.next().map(str::trim);
            if parts.next().is_some() {
                return Err(HushError::format(
                    source_name,
                    line_no + 1,
                    "more than one '|' separator",
                ));
            }
            if term.is_empty() {
                return Err(HushError::format(source_name, line_no + 1, "empty term"));
            }

            if lexicon.contains(term) {
                debug!("Lexicon term '{}' redefined on line {}", term, line_no + 1);
            }
            lexicon.insert(term, replacement.unwrap_or(DEFAULT_MASK));
        }

        Ok(lexicon)
    }

    /// Load a lexicon file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => HushError::FileNotFound(path.display().to_string()),
            _ => HushError::Io(e),
        })?;

        let lexicon = Self::parse(&content, &path.display().to_string())?;
        info!("Loaded {} lexicon terms from {}", lexicon.len(), path.display());
        Ok(lexicon)
    }
}

/// Outcome of scanning one cue
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub cue: SubtitleCue,
    pub cleaned_text: String,
    pub matched: bool,
}

impl MatchResult {
    /// The cue with its text replaced by the cleaned text
    pub fn cleaned_cue(&self) -> SubtitleCue {
        SubtitleCue {
            text: self.cleaned_text.clone(),
            ..self.cue.clone()
        }
    }
}

/// Whole-word, case-insensitive lexicon scanner.
///
/// All terms are compiled into one alternation anchored at word boundaries,
/// so scanning is linear in the cue length. When two terms could match at the
/// same position the one declared first wins, even if a later one is longer.
#[derive(Debug, Clone)]
pub struct Matcher {
    lexicon: Lexicon,
    pattern: Option<Regex>,
}

impl Matcher {
    pub fn new(lexicon: Lexicon) -> Result<Self> {
        if lexicon.is_empty() {
            warn!("Lexicon is empty; no cue will be matched");
            return Ok(Self {
                lexicon,
                pattern: None,
            });
        }

        let alternation = lexicon
            .iter()
            .map(|e| regex::escape(&e.term))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = RegexBuilder::new(&format!(r"\b(?:{})\b", alternation))
            .case_insensitive(true)
            .size_limit(64 * 1024 * 1024)
            .build()
            .map_err(|e| {
                HushError::Config(format!("Lexicon does not compile into a pattern: {}", e))
            })?;

        debug!("Compiled lexicon pattern over {} terms", lexicon.len());
        Ok(Self {
            lexicon,
            pattern: Some(pattern),
        })
    }

    /// Replace every lexicon hit in `text`
    pub fn clean_text(&self, text: &str) -> String {
        let Some(pattern) = &self.pattern else {
            return text.to_string();
        };

        pattern
            .replace_all(text, |caps: &Captures| {
                let hit = &caps[0];
                self.lexicon
                    .replacement_for(hit)
                    .unwrap_or(DEFAULT_MASK)
                    .to_string()
            })
            .into_owned()
    }

    pub fn match_cue(&self, cue: &SubtitleCue) -> MatchResult {
        let cleaned_text = self.clean_text(&cue.text);
        MatchResult {
            matched: cleaned_text != cue.text,
            cleaned_text,
            cue: cue.clone(),
        }
    }

    pub fn match_all(&self, cues: &[SubtitleCue]) -> Vec<MatchResult> {
        let results: Vec<MatchResult> = cues.iter().map(|c| self.match_cue(c)).collect();
        debug!(
            "{} of {} cues matched the lexicon",
            results.iter().filter(|r| r.matched).count(),
            results.len()
        );
        results
    }
}
