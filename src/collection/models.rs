use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A note type: a name and its ordered field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub name: String,
    pub fields: Vec<String>,
}

impl Model {
    pub fn new(name: &str, fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            fields: fields.iter().map(|field| field.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Note {
    pub id: i64,
    pub deck: String,
    pub model: String,
    /// Field values in model order.
    pub fields: Vec<(String, String)>,
    pub tags: Vec<String>,
    pub modified: DateTime<Utc>,
}

impl Note {
    /// Field value by case-insensitive name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The first field, which duplicate detection compares.
    pub fn sort_field(&self) -> &str {
        self.fields.first().map_or("", |(_, value)| value.as_str())
    }
}

/// Note submitted through `addNote`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNote {
    pub deck_name: String,
    pub model_name: String,
    pub fields: HashMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub options: NoteOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteOptions {
    #[serde(default)]
    pub allow_duplicate: bool,
    /// `"deck"` limits duplicate detection to the target deck; anything
    /// else checks the whole collection.
    pub duplicate_scope: Option<String>,
    pub duplicate_scope_options: Option<DuplicateScopeOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateScopeOptions {
    pub deck_name: Option<String>,
    #[serde(default)]
    pub check_children: bool,
    #[serde(default)]
    pub check_all_models: bool,
}

/// A note as reported by `notesInfo`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteInfo {
    pub note_id: i64,
    pub model_name: String,
    pub tags: Vec<String>,
    pub fields: BTreeMap<String, FieldInfo>,
    #[serde(rename = "mod")]
    pub modified: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldInfo {
    pub value: String,
    pub order: usize,
}

impl From<&Note> for NoteInfo {
    fn from(note: &Note) -> Self {
        Self {
            note_id: note.id,
            model_name: note.model.clone(),
            tags: note.tags.clone(),
            fields: note
                .fields
                .iter()
                .enumerate()
                .map(|(order, (name, value))| {
                    (
                        name.clone(),
                        FieldInfo {
                            value: value.clone(),
                            order,
                        },
                    )
                })
                .collect(),
            modified: note.modified.timestamp(),
        }
    }
}
