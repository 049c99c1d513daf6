//! Note search queries.
//!
//! A small subset of the desktop search syntax: whitespace-separated terms,
//! all of which must match. Terms may be double-quoted to include spaces.
//!
//! - `deck:NAME` matches the deck and its subdecks
//! - `tag:NAME` matches a tag
//! - `FIELD:VALUE` matches a field's whole value
//! - anything else matches a substring of any field
//! - a leading `-` negates the term
//!
//! `*` is a wildcard in every form except plain text. A backslash makes the
//! next character literal, so `\*` and `\"` match themselves.

use regex::{Regex, RegexBuilder};

use super::{CollectionError, Note};

#[derive(Debug, Clone)]
pub struct Query {
    terms: Vec<Term>,
}

#[derive(Debug, Clone)]
enum Term {
    Deck(Regex),
    Tag(Regex),
    Field { name: String, value: Regex },
    Text(String),
    Not(Box<Term>),
}

impl Query {
    pub fn parse(input: &str) -> Result<Self, CollectionError> {
        let terms = tokenize(input)?
            .iter()
            .map(|token| parse_term(token))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { terms })
    }

    pub fn matches(&self, note: &Note) -> bool {
        self.terms.iter().all(|term| term.matches(note))
    }
}

impl Term {
    fn matches(&self, note: &Note) -> bool {
        match self {
            Term::Deck(pattern) => pattern.is_match(&note.deck),
            Term::Tag(pattern) => note.tags.iter().any(|tag| pattern.is_match(tag)),
            Term::Field { name, value } => note
                .field(name)
                .is_some_and(|content| value.is_match(content)),
            Term::Text(text) => note
                .fields
                .iter()
                .any(|(_, content)| content.to_lowercase().contains(text)),
            Term::Not(term) => !term.matches(note),
        }
    }
}

fn parse_term(token: &str) -> Result<Term, CollectionError> {
    if let Some(rest) = token.strip_prefix('-').filter(|rest| !rest.is_empty()) {
        return Ok(Term::Not(Box::new(parse_term(rest)?)));
    }

    let Some((key, value)) = token.split_once(':') else {
        return Ok(Term::Text(unescape(token).to_lowercase()));
    };

    match key.to_lowercase().as_str() {
        "deck" => Ok(Term::Deck(glob(value, "(::.*)?")?)),
        "tag" => Ok(Term::Tag(glob(value, "")?)),
        "" => Ok(Term::Text(unescape(token).to_lowercase())),
        _ => Ok(Term::Field {
            name: key.to_string(),
            value: glob(value, "")?,
        }),
    }
}

/// Case-insensitive whole-string pattern where `*` matches anything.
fn glob(pattern: &str, suffix: &str) -> Result<Regex, CollectionError> {
    let mut body = String::new();
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        let literal = match ch {
            '*' => {
                body.push_str(".*");
                continue;
            }
            '\\' => chars.next().unwrap_or('\\'),
            ch => ch,
        };
        body.push_str(&regex::escape(literal.encode_utf8(&mut [0; 4])));
    }
    RegexBuilder::new(&format!("^(?:{body}){suffix}$"))
        .case_insensitive(true)
        .build()
        .map_err(|error| CollectionError::InvalidQuery(error.to_string()))
}

/// Escape `text` so that a search term matches it literally.
pub fn escape_term(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '"' | '*') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn unescape(text: &str) -> String {
    let mut plain = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => plain.push(chars.next().unwrap_or('\\')),
            ch => plain.push(ch),
        }
    }
    plain
}

/// Split on unquoted whitespace. Backslash escapes are kept for the term
/// parsers to interpret.
fn tokenize(input: &str) -> Result<Vec<String>, CollectionError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut started = false;

    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                current.push('\\');
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                started = true;
            }
            '"' => {
                quoted = !quoted;
                started = true;
            }
            ch if ch.is_whitespace() && !quoted => {
                if started {
                    tokens.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            ch => {
                current.push(ch);
                started = true;
            }
        }
    }

    if quoted {
        return Err(CollectionError::InvalidQuery(
            "unterminated quote".to_string(),
        ));
    }
    if started {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn note(deck: &str, front: &str, tags: &[&str]) -> Note {
        Note {
            id: 1,
            deck: deck.to_string(),
            model: "Basic".to_string(),
            fields: vec![
                ("Front".to_string(), front.to_string()),
                ("Back".to_string(), "back side".to_string()),
            ],
            tags: tags.iter().map(|t| t.to_string()).collect(),
            modified: Utc::now(),
        }
    }

    fn matches(query: &str, note: &Note) -> bool {
        Query::parse(query).unwrap().matches(note)
    }

    #[test]
    fn tokenizer_respects_quotes() {
        assert_eq!(
            tokenize(r#""deck:Japanese::Passive" "Front:to stay" tag:x"#).unwrap(),
            vec!["deck:Japanese::Passive", "Front:to stay", "tag:x"]
        );
        assert!(tokenize(r#""deck:open"#).is_err());
    }

    #[test]
    fn deck_term_includes_subdecks() {
        let child = note("Japanese::Passive", "いすわる", &[]);

        assert!(matches("deck:Japanese", &child));
        assert!(matches("deck:japanese::passive", &child));
        assert!(!matches("deck:Japan", &child));
        assert!(matches("deck:Japan*", &child));
        assert!(matches("deck:*", &child));
    }

    #[test]
    fn field_term_matches_whole_value() {
        let card = note("Default", "to stay", &[]);

        assert!(matches(r#""Front:to stay""#, &card));
        assert!(matches(r#""front:TO STAY""#, &card));
        assert!(!matches("Front:to", &card));
        assert!(matches("Front:to*", &card));
        assert!(!matches("Missing:to", &card));
    }

    #[test]
    fn terms_are_combined_with_and() {
        let card = note("Japanese::Active", "(発見)", &["Kanji"]);

        assert!(matches(r#""deck:Japanese::Active" "Front:(発見)" tag:kanji"#, &card));
        assert!(!matches(r#""deck:Japanese::Passive" "Front:(発見)""#, &card));
    }

    #[test]
    fn negation_and_text() {
        let card = note("Default", "Hello World", &["greeting"]);

        assert!(matches("world", &card));
        assert!(matches("-tag:farewell", &card));
        assert!(!matches("-tag:greeting", &card));
        assert!(matches("", &card));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let card = note("Default", "a+b (c)", &[]);

        assert!(matches(r#""Front:a+b (c)""#, &card));
        assert!(!matches(r#""Front:aab (c)""#, &card));
    }

    #[test]
    fn escaped_terms_match_literally() {
        let starred = note("Default", "a*b", &[]);
        let plain = note("Default", "axxb", &[]);
        let quoted = note("Default", r#"say "hi" \ bye"#, &[]);

        let exact = format!("\"Front:{}\"", escape_term("a*b"));
        assert!(matches(&exact, &starred));
        assert!(!matches(&exact, &plain));
        assert!(matches("Front:a*b", &plain));

        let exact = format!("\"Front:{}\"", escape_term(r#"say "hi" \ bye"#));
        assert!(matches(&exact, &quoted));
        assert!(matches(r#"\"hi\""#, &quoted));
    }
}
