//! Per-request handling: preflight, envelope validation, authorization,
//! dispatch and reply formatting.

use serde_json::Value;
use tracing::{debug, info};

use super::framer::RawRequest;
use super::methods::{ActionCall, ActionHandler, BOOTSTRAP_ACTION};
use super::origin::{OriginDecision, OriginPolicy};
use super::protocol::{self, HttpResponse, RpcEnvelope};
use super::{API_VERSION, SERVER_NAME};

const PRIVATE_NETWORK_REQUEST: &str = "access-control-request-private-network";

/// Turns framed requests into responses.
pub struct Pipeline<H> {
    policy: OriginPolicy,
    handler: H,
}

impl<H: ActionHandler> Pipeline<H> {
    pub fn new(policy: OriginPolicy, handler: H) -> Self {
        Self { policy, handler }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn policy(&self) -> &OriginPolicy {
        &self.policy
    }

    /// Swap in a rebuilt policy. Takes effect from the next request.
    pub fn replace_policy(&mut self, policy: OriginPolicy) {
        self.policy = policy;
    }

    pub fn respond(&mut self, request: &RawRequest) -> HttpResponse {
        let origin = request.header_str("origin");
        let decision = self.policy.decide(origin.as_deref());

        if request.is_preflight() {
            return preflight(request, decision);
        }

        let envelope = match RpcEnvelope::parse(&request.body) {
            Ok(envelope) => Some(envelope),
            Err(error) if decision.allowed => {
                debug!(error = %error, "Rejecting malformed request body");
                return malformed(request, decision, error);
            }
            Err(_) => None,
        };

        let envelope = match envelope {
            Some(envelope) if decision.allowed || envelope.action == BOOTSTRAP_ACTION => envelope,
            _ => {
                info!(origin = origin.as_deref().unwrap_or(""), "Forbidden request");
                return HttpResponse::forbidden(decision.cors_origin);
            }
        };

        let mut cors_origin = decision.cors_origin;
        let mut call = ActionCall::from(envelope);
        if call.action == BOOTSTRAP_ACTION {
            let declared = origin.unwrap_or_default();
            call.params
                .insert("allowed".to_string(), Value::Bool(decision.allowed));
            call.params
                .insert("origin".to_string(), Value::String(declared.clone()));
            if !decision.allowed {
                cors_origin = declared;
            }
        }

        let version = call.version;
        let outcome = self.handler.handle(call);
        if let Err(error) = &outcome {
            debug!(error = %error, "Action failed");
        }
        HttpResponse::json(cors_origin, &protocol::format_reply(version, outcome))
    }
}

fn preflight(request: &RawRequest, decision: OriginDecision) -> HttpResponse {
    let response = HttpResponse::ok(decision.cors_origin, Vec::new());
    if request.header(PRIVATE_NETWORK_REQUEST) == Some(&b"true"[..]) {
        response.with_private_network()
    } else {
        response
    }
}

fn malformed(
    request: &RawRequest,
    decision: OriginDecision,
    error: impl ToString,
) -> HttpResponse {
    if request.body.is_empty() {
        let banner = format!("{SERVER_NAME} v.{API_VERSION}");
        return HttpResponse::ok(decision.cors_origin, banner.into_bytes());
    }
    HttpResponse::json(decision.cors_origin, &protocol::error_reply(error))
}
