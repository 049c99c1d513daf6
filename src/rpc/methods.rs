//! Action dispatch.
//!
//! Actions are registered once at start-up in a [`MethodRegistry`]. An
//! action may change its public name across protocol versions: each entry
//! carries `(version, alias)` pairs, and a caller requesting version `v` can
//! reach the entry under the alias with the greatest version `<= v`, or
//! under the registered name when no alias applies.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use super::error::ActionError;
use super::protocol::RpcEnvelope;

/// Action reachable without passing the origin check.
pub const BOOTSTRAP_ACTION: &str = "requestPermission";

/// One call into the application.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub action: String,
    pub version: i64,
    pub params: Map<String, Value>,
    pub key: Option<String>,
}

impl From<RpcEnvelope> for ActionCall {
    fn from(envelope: RpcEnvelope) -> Self {
        Self {
            action: envelope.action,
            version: envelope.version,
            params: envelope.params,
            key: envelope.key,
        }
    }
}

/// The application behind the server.
///
/// Called synchronously once per admitted request. Any error is turned into
/// the reply's error string; its structure is never inspected.
pub trait ActionHandler {
    fn handle(&mut self, call: ActionCall) -> Result<Value, ActionError>;
}

/// Arguments handed to a registered method.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub version: i64,
    pub params: Map<String, Value>,
}

impl Invocation {
    /// Deserialize the whole parameter object.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ActionError> {
        Ok(serde_json::from_value(Value::Object(self.params.clone()))?)
    }
}

pub type MethodResult = Result<Value, ActionError>;
pub type MethodFn<S> = fn(&mut Dispatcher<S>, Invocation) -> MethodResult;

/// A registered action.
pub struct Method<S> {
    name: &'static str,
    handler: MethodFn<S>,
    aliases: Vec<(i64, &'static str)>,
}

impl<S> Method<S> {
    /// Make the action reachable as `alias` for callers at `version` or later.
    pub fn since(&mut self, version: i64, alias: &'static str) -> &mut Self {
        self.aliases.push((version, alias));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Name under which a caller at `version` addresses this action.
    pub fn addressable_name(&self, version: i64) -> &'static str {
        let mut best: Option<(i64, &'static str)> = None;
        for &(threshold, alias) in &self.aliases {
            let floor = best.map_or(0, |(found, _)| found);
            if floor < threshold && threshold <= version {
                best = Some((threshold, alias));
            }
        }
        best.map_or(self.name, |(_, alias)| alias)
    }
}

/// Static table of actions, built once and read-only afterwards.
pub struct MethodRegistry<S> {
    methods: Vec<Method<S>>,
}

impl<S> Default for MethodRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> MethodRegistry<S> {
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, handler: MethodFn<S>) -> &mut Method<S> {
        self.methods.push(Method {
            name,
            handler,
            aliases: Vec::new(),
        });
        let last = self.methods.len() - 1;
        &mut self.methods[last]
    }

    /// Find the action a caller at `version` means by `action`.
    pub fn resolve(&self, action: &str, version: i64) -> Option<&Method<S>> {
        self.methods
            .iter()
            .find(|method| method.addressable_name(version) == action)
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.methods.iter().map(|method| method.name)
    }

    /// Names a caller at `version` can address, in registration order.
    pub fn addressable_names(&self, version: i64) -> impl Iterator<Item = &'static str> + '_ {
        self.methods
            .iter()
            .map(move |method| method.addressable_name(version))
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// [`ActionHandler`] that routes calls through a [`MethodRegistry`] onto
/// application state `S`, guarded by the shared API key.
pub struct Dispatcher<S> {
    registry: MethodRegistry<S>,
    state: S,
    api_key: Option<String>,
}

impl<S> Dispatcher<S> {
    pub fn new(registry: MethodRegistry<S>, state: S, api_key: Option<String>) -> Self {
        Self {
            registry,
            state,
            api_key,
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn registry(&self) -> &MethodRegistry<S> {
        &self.registry
    }

    pub fn requires_key(&self) -> bool {
        self.api_key.is_some()
    }
}

impl<S> ActionHandler for Dispatcher<S> {
    fn handle(&mut self, call: ActionCall) -> Result<Value, ActionError> {
        // The key must match exactly; a key sent to a keyless server is wrong too.
        if call.action != BOOTSTRAP_ACTION && call.key != self.api_key {
            return Err(ActionError::InvalidApiKey);
        }

        let handler = self
            .registry
            .resolve(&call.action, call.version)
            .map(|method| method.handler)
            .ok_or(ActionError::UnsupportedAction)?;

        debug!(action = %call.action, version = call.version, "Dispatching action");
        handler(
            self,
            Invocation {
                version: call.version,
                params: call.params,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn answer(_: &mut Dispatcher<u32>, _: Invocation) -> MethodResult {
        Ok(json!("answer"))
    }

    fn legacy(_: &mut Dispatcher<u32>, _: Invocation) -> MethodResult {
        Ok(json!("legacy"))
    }

    fn count(dispatcher: &mut Dispatcher<u32>, _: Invocation) -> MethodResult {
        *dispatcher.state_mut() += 1;
        Ok(json!(*dispatcher.state()))
    }

    fn call(action: &str, version: i64) -> ActionCall {
        ActionCall {
            action: action.to_string(),
            version,
            params: Map::new(),
            key: None,
        }
    }

    #[test]
    fn alias_is_gated_by_version() {
        let mut registry = MethodRegistry::<u32>::new();
        registry.register("answer", answer).since(6, "foo");

        assert!(registry.resolve("foo", 4).is_none());
        assert_eq!(registry.resolve("answer", 4).map(Method::name), Some("answer"));
        assert_eq!(registry.resolve("foo", 6).map(Method::name), Some("answer"));
        assert_eq!(registry.resolve("foo", 9).map(Method::name), Some("answer"));
        assert!(registry.resolve("answer", 6).is_none());
    }

    #[test]
    fn newest_applicable_alias_wins() {
        let mut registry = MethodRegistry::<u32>::new();
        registry
            .register("answer", answer)
            .since(7, "third")
            .since(3, "first")
            .since(5, "second");
        let method = registry.resolve("answer", 1).unwrap();

        assert_eq!(method.addressable_name(2), "answer");
        assert_eq!(method.addressable_name(3), "first");
        assert_eq!(method.addressable_name(6), "second");
        assert_eq!(method.addressable_name(70), "third");
    }

    #[test]
    fn renamed_action_frees_old_name() {
        let mut registry = MethodRegistry::<u32>::new();
        registry.register("getAnswer", legacy).since(6, "answer");
        registry.register("answerLegacy", answer);

        assert_eq!(registry.resolve("getAnswer", 5).map(Method::name), Some("getAnswer"));
        assert_eq!(registry.resolve("answer", 6).map(Method::name), Some("getAnswer"));
        assert_eq!(registry.names().collect::<Vec<_>>(), ["getAnswer", "answerLegacy"]);
        assert_eq!(
            registry.addressable_names(6).collect::<Vec<_>>(),
            ["answer", "answerLegacy"]
        );
    }

    #[test]
    fn dispatcher_runs_handler_against_state() {
        let mut registry = MethodRegistry::new();
        registry.register("count", count);
        let mut dispatcher = Dispatcher::new(registry, 0u32, None);

        assert_eq!(dispatcher.handle(call("count", 6)), Ok(json!(1)));
        assert_eq!(dispatcher.handle(call("count", 4)), Ok(json!(2)));
        assert_eq!(*dispatcher.state(), 2);
    }

    #[test]
    fn unknown_action_is_unsupported() {
        let dispatcher_registry = MethodRegistry::<u32>::new();
        let mut dispatcher = Dispatcher::new(dispatcher_registry, 0, None);

        assert_eq!(
            dispatcher.handle(call("nope", 6)),
            Err(ActionError::UnsupportedAction)
        );
    }

    #[test]
    fn api_key_must_match_except_for_bootstrap() {
        let mut registry = MethodRegistry::new();
        registry.register("count", count);
        registry.register(BOOTSTRAP_ACTION, answer);
        let mut dispatcher = Dispatcher::new(registry, 0u32, Some("secret".to_string()));

        assert_eq!(
            dispatcher.handle(call("count", 6)),
            Err(ActionError::InvalidApiKey)
        );
        assert_eq!(dispatcher.handle(call(BOOTSTRAP_ACTION, 6)), Ok(json!("answer")));

        let mut keyed = call("count", 6);
        keyed.key = Some("secret".to_string());
        assert_eq!(dispatcher.handle(keyed), Ok(json!(1)));
    }

    #[test]
    fn key_sent_to_keyless_server_is_rejected() {
        let mut registry = MethodRegistry::new();
        registry.register("count", count);
        let mut dispatcher = Dispatcher::new(registry, 0u32, None);

        let mut keyed = call("count", 6);
        keyed.key = Some("guess".to_string());
        assert_eq!(dispatcher.handle(keyed), Err(ActionError::InvalidApiKey));
    }
}
