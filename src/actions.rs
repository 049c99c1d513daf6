//! Application actions registered on the dispatcher.
//!
//! Each handler deserializes its own `Params` from the invocation and works
//! on the [`AppContext`]. Errors become the reply's error string.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::collection::{NewNote, Query};
use crate::config::AppConfig;
use crate::context::{AppContext, Permission};
use crate::rpc::protocol::{self, DEFAULT_VERSION, RpcEnvelope};
use crate::rpc::{
    API_VERSION, ActionError, ActionHandler, BOOTSTRAP_ACTION, Dispatcher, Invocation,
    MethodRegistry, MethodResult,
};

pub type App = Dispatcher<AppContext>;

/// Scope name under which `apiReflect` lists actions.
const ACTIONS_SCOPE: &str = "actions";

pub fn registry() -> MethodRegistry<AppContext> {
    let mut registry = MethodRegistry::new();
    registry.register("version", version);
    registry.register(BOOTSTRAP_ACTION, request_permission);
    registry.register("apiReflect", api_reflect);
    registry.register("multi", multi);
    registry.register("deckNames", deck_names);
    registry.register("deckNamesAndIds", deck_names_and_ids);
    registry.register("createDeck", create_deck);
    registry.register("deleteDecks", delete_decks);
    registry.register("modelNames", model_names);
    registry.register("modelFieldNames", model_field_names);
    registry.register("addNote", add_note);
    registry.register("findNotes", find_notes);
    registry.register("getNotes", notes_info).since(6, "notesInfo");
    registry
}

/// Dispatcher over a fresh collection, configured from `config`.
pub fn build(config: &AppConfig) -> App {
    Dispatcher::new(registry(), AppContext::new(config), config.api_key.clone())
}

fn version(_: &mut App, _: Invocation) -> MethodResult {
    Ok(json!(API_VERSION))
}

fn request_permission(app: &mut App, invocation: Invocation) -> MethodResult {
    #[derive(Deserialize)]
    struct Params {
        origin: String,
        allowed: bool,
    }

    let params: Params = invocation.parse()?;
    let require_key = app.requires_key();

    match app
        .state_mut()
        .request_permission(&params.origin, params.allowed)
    {
        Permission::Granted => Ok(json!({
            "permission": "granted",
            "requireApikey": require_key,
            "version": API_VERSION,
        })),
        Permission::Denied => Ok(json!({ "permission": "denied" })),
    }
}

fn api_reflect(app: &mut App, invocation: Invocation) -> MethodResult {
    #[derive(Deserialize)]
    struct Params {
        scopes: Vec<String>,
        #[serde(default)]
        actions: Option<Vec<Value>>,
    }

    let params: Params = invocation.parse()?;
    let mut scopes = Vec::new();
    let mut reply = Map::new();

    if params.scopes.iter().any(|scope| scope == ACTIONS_SCOPE) {
        scopes.push(ACTIONS_SCOPE);
        let wanted: Option<Vec<&str>> = params
            .actions
            .as_ref()
            .map(|actions| actions.iter().filter_map(Value::as_str).collect());
        let names: Vec<&str> = app
            .registry()
            .addressable_names(invocation.version)
            .filter(|name| wanted.as_ref().is_none_or(|wanted| wanted.contains(name)))
            .collect();
        reply.insert(ACTIONS_SCOPE.to_string(), json!(names));
    }

    reply.insert("scopes".to_string(), json!(scopes));
    Ok(Value::Object(reply))
}

/// Run several calls in order. Each carries its own version and key and is
/// formatted as if it had been sent alone.
fn multi(app: &mut App, invocation: Invocation) -> MethodResult {
    #[derive(Deserialize)]
    struct Params {
        actions: Vec<Value>,
    }

    let params: Params = invocation.parse()?;
    let replies = params
        .actions
        .into_iter()
        .map(|call| {
            let version = call
                .get("version")
                .and_then(Value::as_i64)
                .unwrap_or(DEFAULT_VERSION);
            match RpcEnvelope::from_value(call) {
                Ok(envelope) => protocol::format_reply(version, app.handle(envelope.into())),
                Err(error) => protocol::error_reply(error),
            }
        })
        .collect();
    Ok(Value::Array(replies))
}

fn deck_names(app: &mut App, _: Invocation) -> MethodResult {
    Ok(json!(app.state().collection.deck_names()))
}

fn deck_names_and_ids(app: &mut App, _: Invocation) -> MethodResult {
    Ok(json!(app.state().collection.deck_names_and_ids()))
}

fn create_deck(app: &mut App, invocation: Invocation) -> MethodResult {
    #[derive(Deserialize)]
    struct Params {
        deck: String,
    }

    let params: Params = invocation.parse()?;
    let id = app.state_mut().collection.create_deck(&params.deck)?;
    debug!(deck = %params.deck, id, "Deck ready");
    Ok(json!(id))
}

fn delete_decks(app: &mut App, invocation: Invocation) -> MethodResult {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Params {
        decks: Vec<String>,
        #[serde(default)]
        cards_too: bool,
    }

    let params: Params = invocation.parse()?;
    if !params.cards_too && invocation.version >= 6 {
        return Err(ActionError::failed(
            "decks cannot be deleted without deleting their cards as well",
        ));
    }

    let removed = app
        .state_mut()
        .collection
        .delete_decks(&params.decks, params.cards_too);
    debug!(decks = ?params.decks, removed, "Decks deleted");
    Ok(Value::Null)
}

fn model_names(app: &mut App, _: Invocation) -> MethodResult {
    Ok(json!(app.state().collection.model_names()))
}

fn model_field_names(app: &mut App, invocation: Invocation) -> MethodResult {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Params {
        model_name: String,
    }

    let params: Params = invocation.parse()?;
    let model = app.state().collection.model(&params.model_name)?;
    Ok(json!(model.fields))
}

fn add_note(app: &mut App, invocation: Invocation) -> MethodResult {
    #[derive(Deserialize)]
    struct Params {
        note: NewNote,
    }

    let params: Params = invocation.parse()?;
    let id = app.state_mut().collection.add_note(params.note)?;
    debug!(id, "Note added");
    Ok(json!(id))
}

fn find_notes(app: &mut App, invocation: Invocation) -> MethodResult {
    #[derive(Deserialize)]
    struct Params {
        query: String,
    }

    let params: Params = invocation.parse()?;
    let query = Query::parse(&params.query)?;
    Ok(json!(app.state().collection.find_notes(&query)))
}

fn notes_info(app: &mut App, invocation: Invocation) -> MethodResult {
    #[derive(Deserialize)]
    struct Params {
        notes: Vec<i64>,
    }

    let params: Params = invocation.parse()?;
    let infos = app
        .state()
        .collection
        .notes_info(&params.notes)
        .into_iter()
        .map(|info| match info {
            Some(info) => {
                serde_json::to_value(info).map_err(|error| ActionError::failed(error.to_string()))
            }
            None => Ok(json!({})),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(infos))
}
