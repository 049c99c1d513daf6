//! Card list importer.
//!
//! Reads line-oriented card files, parses each line and adds the cards to a
//! deck through the RPC client, skipping cards whose front already exists
//! in that deck.

mod parsers;

pub use parsers::{CardKind, CardParser, KANJI_TAG, ParsedCard};

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::collection::escape_term;
use crate::rpc::{ClientError, RpcClient};

pub const DEFAULT_MODEL: &str = "Basic";
pub const PASSIVE_DECK: &str = "Japanese::Passive";
pub const ACTIVE_DECK: &str = "Japanese::Active";

const DUPLICATE_ERROR: &str = "cannot create note because it is a duplicate";

/// One file to import into one deck.
#[derive(Debug, Clone)]
pub struct ImportJob {
    pub path: PathBuf,
    pub deck: String,
    pub kind: CardKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub added: usize,
    pub skipped: usize,
    pub failed: usize,
    pub unparsable: usize,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} skipped, {} failed, {} unparsable",
            self.added, self.skipped, self.failed, self.unparsable
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Skipped,
    Failed,
}

pub struct Importer {
    client: RpcClient,
    parser: CardParser,
    model: String,
}

impl Importer {
    pub fn new(client: RpcClient) -> Result<Self> {
        Ok(Self {
            client,
            parser: CardParser::new().context("Failed to compile card patterns")?,
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Create `deck` unless it already exists.
    pub async fn ensure_deck(&self, deck: &str) -> Result<(), ClientError> {
        let decks: Vec<String> = self.client.call_no_params("deckNames").await?;
        if decks.iter().any(|name| name == deck) {
            return Ok(());
        }

        info!(deck, "Creating deck");
        let _: i64 = self
            .client
            .call("createDeck", params(json!({ "deck": deck })))
            .await?;
        Ok(())
    }

    /// Add one card unless its front is already in `deck`.
    pub async fn add_card(&self, deck: &str, card: &ParsedCard) -> AddOutcome {
        let query = format!(
            "\"deck:{}\" \"Front:{}\"",
            escape_term(deck),
            escape_term(&card.front)
        );
        let existing: Vec<i64> = match self
            .client
            .call("findNotes", params(json!({ "query": query })))
            .await
        {
            Ok(existing) => existing,
            Err(error) => {
                warn!(front = %card.front, error = %error, "Duplicate check failed");
                return AddOutcome::Failed;
            }
        };
        if !existing.is_empty() {
            info!(deck, front = %card.front, "Skipping existing card");
            return AddOutcome::Skipped;
        }

        let note = json!({
            "note": {
                "deckName": deck,
                "modelName": self.model,
                "fields": { "Front": card.front, "Back": card.back },
                "options": {
                    "allowDuplicate": false,
                    "duplicateScope": "deck",
                    "duplicateScopeOptions": {
                        "deckName": deck,
                        "checkChildren": false,
                        "checkAllModels": false
                    }
                },
                "tags": card.tags
            }
        });

        match self.client.call::<i64>("addNote", params(note)).await {
            Ok(_) => {
                info!(deck, front = %card.front, back = %card.back, "Added card");
                AddOutcome::Added
            }
            Err(ClientError::Rpc(message)) if message.to_lowercase().contains(DUPLICATE_ERROR) => {
                info!(deck, front = %card.front, "Skipping duplicate card");
                AddOutcome::Skipped
            }
            Err(error) => {
                warn!(deck, front = %card.front, error = %error, "Failed to add card");
                AddOutcome::Failed
            }
        }
    }

    /// Parse and add every line of `content`. Blank lines are not counted.
    pub async fn import_lines(&self, deck: &str, kind: CardKind, content: &str) -> ImportSummary {
        let mut summary = ImportSummary::default();

        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let Some(card) = self.parser.parse(kind, line) else {
                warn!(line = index + 1, content = line.trim(), "Could not parse line");
                summary.unparsable += 1;
                continue;
            };
            match self.add_card(deck, &card).await {
                AddOutcome::Added => summary.added += 1,
                AddOutcome::Skipped => summary.skipped += 1,
                AddOutcome::Failed => summary.failed += 1,
            }
        }

        summary
    }

    pub async fn import_file(&self, job: &ImportJob) -> Result<ImportSummary> {
        let content = tokio::fs::read_to_string(&job.path)
            .await
            .with_context(|| format!("Failed to read {}", job.path.display()))?;
        self.ensure_deck(&job.deck)
            .await
            .with_context(|| format!("Could not create deck {}", job.deck))?;

        info!(path = %job.path.display(), deck = %job.deck, "Importing cards");
        Ok(self.import_lines(&job.deck, job.kind, &content).await)
    }
}

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
