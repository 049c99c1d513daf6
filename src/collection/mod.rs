//! In-memory card collection served by the application actions.
//!
//! Holds decks, note types and notes for the lifetime of the process.
//! Nothing is persisted.

mod models;
mod query;

pub use models::{DuplicateScopeOptions, FieldInfo, Model, NewNote, Note, NoteInfo, NoteOptions};
pub use query::{Query, escape_term};

use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;

use crate::rpc::ActionError;

pub const DEFAULT_DECK: &str = "Default";
const DEFAULT_DECK_ID: i64 = 1;
const DECK_SEPARATOR: &str = "::";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectionError {
    #[error("deck was not found: {0}")]
    DeckNotFound(String),
    #[error("model was not found: {0}")]
    ModelNotFound(String),
    #[error("deck name must not be empty")]
    EmptyDeckName,
    #[error("cannot create note because it is empty")]
    EmptyNote,
    #[error("cannot create note because it is a duplicate")]
    Duplicate,
    #[error("invalid search: {0}")]
    InvalidQuery(String),
}

impl From<CollectionError> for ActionError {
    fn from(error: CollectionError) -> Self {
        ActionError::failed(error.to_string())
    }
}

pub struct Collection {
    decks: BTreeMap<String, i64>,
    models: Vec<Model>,
    notes: BTreeMap<i64, Note>,
    last_id: i64,
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection {
    /// A collection with the default deck and the stock note types.
    pub fn new() -> Self {
        Self {
            decks: BTreeMap::from([(DEFAULT_DECK.to_string(), DEFAULT_DECK_ID)]),
            models: vec![
                Model::new("Basic", &["Front", "Back"]),
                Model::new("Basic (and reversed card)", &["Front", "Back"]),
                Model::new("Cloze", &["Text", "Back Extra"]),
            ],
            notes: BTreeMap::new(),
            last_id: DEFAULT_DECK_ID,
        }
    }

    /// Millisecond timestamp, bumped to stay unique within the collection.
    fn next_id(&mut self) -> i64 {
        self.last_id = Utc::now().timestamp_millis().max(self.last_id + 1);
        self.last_id
    }

    pub fn deck_names(&self) -> Vec<String> {
        self.decks.keys().cloned().collect()
    }

    pub fn deck_names_and_ids(&self) -> BTreeMap<String, i64> {
        self.decks.clone()
    }

    /// Canonical spelling of a deck name, matched case-insensitively.
    fn find_deck(&self, name: &str) -> Option<&str> {
        self.decks
            .keys()
            .find(|deck| deck.to_lowercase() == name.to_lowercase())
            .map(String::as_str)
    }

    /// Create a deck and any missing parents. An existing deck keeps its id.
    pub fn create_deck(&mut self, name: &str) -> Result<i64, CollectionError> {
        let parts: Vec<&str> = name.split(DECK_SEPARATOR).map(str::trim).collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(CollectionError::EmptyDeckName);
        }

        let mut id = DEFAULT_DECK_ID;
        for depth in 1..=parts.len() {
            let path = parts[..depth].join(DECK_SEPARATOR);
            let existing = self
                .find_deck(&path)
                .and_then(|deck| self.decks.get(deck))
                .copied();
            id = match existing {
                Some(existing) => existing,
                None => {
                    let created = self.next_id();
                    self.decks.insert(path, created);
                    created
                }
            };
        }
        Ok(id)
    }

    /// Remove decks and their subdecks.
    ///
    /// Their notes are removed with them when `cards_too` is set, otherwise
    /// moved to the default deck, which always survives. Returns the number
    /// of notes removed. Unknown names are skipped.
    pub fn delete_decks(&mut self, names: &[String], cards_too: bool) -> usize {
        let doomed: Vec<String> = self
            .decks
            .keys()
            .filter(|deck| names.iter().any(|name| in_deck(deck, name, true)))
            .cloned()
            .collect();
        for deck in &doomed {
            self.decks.remove(deck);
        }

        self.decks
            .entry(DEFAULT_DECK.to_string())
            .or_insert(DEFAULT_DECK_ID);

        if !cards_too {
            for note in self.notes.values_mut() {
                if doomed.contains(&note.deck) {
                    note.deck = DEFAULT_DECK.to_string();
                }
            }
            return 0;
        }

        let before = self.notes.len();
        self.notes.retain(|_, note| !doomed.contains(&note.deck));
        before - self.notes.len()
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|model| model.name.clone()).collect()
    }

    pub fn model(&self, name: &str) -> Result<&Model, CollectionError> {
        self.models
            .iter()
            .find(|model| model.name == name)
            .ok_or_else(|| CollectionError::ModelNotFound(name.to_string()))
    }

    pub fn add_note(&mut self, note: NewNote) -> Result<i64, CollectionError> {
        let model = self.model(&note.model_name)?.clone();
        let deck = self
            .find_deck(&note.deck_name)
            .ok_or_else(|| CollectionError::DeckNotFound(note.deck_name.clone()))?
            .to_string();

        // Submitted names match model fields case-insensitively; the rest are ignored.
        let fields: Vec<(String, String)> = model
            .fields
            .iter()
            .map(|field| {
                let value = note
                    .fields
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(field))
                    .map(|(_, value)| value.clone())
                    .unwrap_or_default();
                (field.clone(), value)
            })
            .collect();

        let first = fields.first().map_or("", |(_, value)| value.as_str());
        if first.trim().is_empty() {
            return Err(CollectionError::EmptyNote);
        }
        if !note.options.allow_duplicate && self.is_duplicate(&model, &deck, first, &note.options) {
            return Err(CollectionError::Duplicate);
        }

        let id = self.next_id();
        let mut tags = note.tags;
        tags.sort();
        tags.dedup();
        self.notes.insert(
            id,
            Note {
                id,
                deck,
                model: model.name,
                fields,
                tags,
                modified: Utc::now(),
            },
        );
        Ok(id)
    }

    fn is_duplicate(&self, model: &Model, deck: &str, first: &str, options: &NoteOptions) -> bool {
        let scope = options.duplicate_scope_options.clone().unwrap_or_default();
        let by_deck = options.duplicate_scope.as_deref() == Some("deck");
        let target = scope.deck_name.as_deref().unwrap_or(deck);

        self.notes.values().any(|existing| {
            (scope.check_all_models || existing.model == model.name)
                && (!by_deck || in_deck(&existing.deck, target, scope.check_children))
                && existing.sort_field().trim() == first.trim()
        })
    }

    /// Ids of matching notes, ascending.
    pub fn find_notes(&self, query: &Query) -> Vec<i64> {
        self.notes
            .values()
            .filter(|note| query.matches(note))
            .map(|note| note.id)
            .collect()
    }

    pub fn note(&self, id: i64) -> Option<&Note> {
        self.notes.get(&id)
    }

    pub fn notes_info(&self, ids: &[i64]) -> Vec<Option<NoteInfo>> {
        ids.iter()
            .map(|id| self.notes.get(id).map(NoteInfo::from))
            .collect()
    }

    pub fn note_count(&self) -> usize {
        self.notes.len()
    }
}

fn in_deck(deck: &str, name: &str, children: bool) -> bool {
    let deck = deck.to_lowercase();
    let name = name.to_lowercase();
    deck == name || (children && deck.starts_with(&format!("{name}{DECK_SEPARATOR}")))
}
