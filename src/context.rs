use tracing::info;

use crate::collection::Collection;
use crate::config::AppConfig;
use crate::rpc::OriginPolicy;

/// Outcome of a `requestPermission` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// State the application actions run against.
pub struct AppContext {
    pub collection: Collection,
    policy: OriginPolicy,
    grant_requests: bool,
    policy_changed: bool,
}

impl AppContext {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_collection(config, Collection::new())
    }

    pub fn with_collection(config: &AppConfig, collection: Collection) -> Self {
        Self {
            collection,
            policy: config.origin_policy(),
            grant_requests: config.grant_permission_requests,
            policy_changed: false,
        }
    }

    /// Answer a permission request from `origin`.
    ///
    /// `allowed` is the verdict the origin policy already reached. Ignored
    /// origins are denied outright; any other unknown origin is granted only
    /// when configured to, and is then added to the allow-list.
    pub fn request_permission(&mut self, origin: &str, allowed: bool) -> Permission {
        if allowed {
            return Permission::Granted;
        }
        if self.policy.is_ignored(origin) {
            info!(origin, "Ignoring permission request");
            return Permission::Denied;
        }
        if !self.grant_requests {
            info!(origin, "Denied permission request");
            return Permission::Denied;
        }

        info!(origin, "Granted permission request");
        self.policy = self.policy.extended(origin);
        self.policy_changed = true;
        Permission::Granted
    }

    /// The rebuilt origin policy, once, after a grant changed it.
    pub fn take_policy_update(&mut self) -> Option<OriginPolicy> {
        if !std::mem::take(&mut self.policy_changed) {
            return None;
        }
        Some(self.policy.clone())
    }
}
