//! Line formats of the card list files.
//!
//! Passive lines (recognition, Japanese on the front):
//!
//! - `(摯)　(シ)　真摯` gives front `(摯)` and the rest as back, tagged `Kanji`
//! - `いすわるto stay` gives front `いすわる`, back `to stay`
//! - `せつseason節` gives front `せつ`, back `season`; trailing Japanese is dropped
//!
//! Active lines (production, English on the front):
//!
//! - `(physical book)紙の本` gives front `(physical book)`, back `紙の本`
//! - `はっけん(発見)` gives front `(発見)`, back `はっけん`

use regex::Regex;

/// Tag attached to passive kanji cards.
pub const KANJI_TAG: &str = "Kanji";

/// Kana and common kanji.
const JAPANESE: &str = r"\x{3040}-\x{30FF}\x{4E00}-\x{9FAF}";
/// Japanese plus CJK punctuation and full-width forms.
const JAPANESE_WIDE: &str = r"\x{3000}-\x{30FF}\x{4E00}-\x{9FAF}\x{FF00}-\x{FFEF}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    Passive,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCard {
    pub front: String,
    pub back: String,
    pub tags: Vec<String>,
}

impl ParsedCard {
    fn new(front: &str, back: &str, tags: &[&str]) -> Self {
        Self {
            front: front.trim().to_string(),
            back: back.trim().to_string(),
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
        }
    }
}

pub struct CardParser {
    kanji: Regex,
    vocab: Regex,
    vocab_trailing: Regex,
    phrase_first: Regex,
    word_first: Regex,
}

impl CardParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            kanji: Regex::new(r"^(\(.+?\))\s*(.+)$")?,
            vocab: Regex::new(&format!(r"^([{JAPANESE}]+)\s*([A-Za-z][^{JAPANESE_WIDE}]*)$"))?,
            vocab_trailing: Regex::new(&format!(
                r"^([{JAPANESE}]+)\s*([A-Za-z][^{JAPANESE_WIDE}]*?)\s*[{JAPANESE}].*$"
            ))?,
            phrase_first: Regex::new(&format!(r"^(\(.+?\))\s*([{JAPANESE_WIDE}]+)$"))?,
            word_first: Regex::new(&format!(r"^([{JAPANESE_WIDE}]+)\s*(\(.+?\))$"))?,
        })
    }

    /// Parse one line, or `None` if it is blank or in no known format.
    pub fn parse(&self, kind: CardKind, line: &str) -> Option<ParsedCard> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match kind {
            CardKind::Passive => self.passive(line),
            CardKind::Active => self.active(line),
        }
    }

    fn passive(&self, line: &str) -> Option<ParsedCard> {
        if let Some(caps) = self.kanji.captures(line) {
            return Some(ParsedCard::new(&caps[1], &caps[2], &[KANJI_TAG]));
        }
        self.vocab
            .captures(line)
            .or_else(|| self.vocab_trailing.captures(line))
            .map(|caps| ParsedCard::new(&caps[1], &caps[2], &[]))
    }

    fn active(&self, line: &str) -> Option<ParsedCard> {
        if let Some(caps) = self.phrase_first.captures(line) {
            return Some(ParsedCard::new(&caps[1], &caps[2], &[]));
        }
        self.word_first
            .captures(line)
            .map(|caps| ParsedCard::new(&caps[2], &caps[1], &[]))
    }
}
