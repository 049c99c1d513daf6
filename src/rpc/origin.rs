//! Origin allow-list and CORS header decisions.

/// Origin echoed when no better value is known. Allow-listing it also
/// extends trust to loopback and browser-extension origins.
pub const FALLBACK_ORIGIN: &str = "http://localhost";

const WILDCARD: &str = "*";

const LOOPBACK_ORIGINS: &[&str] = &["http://127.0.0.1", "https://127.0.0.1"];
const LOOPBACK_PORT_PREFIX: &str = "http://127.0.0.1:";
const EXTENSION_SCHEMES: &[&str] = &[
    "chrome-extension://",
    "moz-extension://",
    "safari-web-extension://",
];

/// Outcome of checking one request's origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginDecision {
    pub allowed: bool,
    /// Value for the `Access-Control-Allow-Origin` header.
    pub cors_origin: String,
}

impl OriginDecision {
    fn allow(origin: impl Into<String>) -> Self {
        Self {
            allowed: true,
            cors_origin: origin.into(),
        }
    }

    fn deny() -> Self {
        Self {
            allowed: false,
            cors_origin: FALLBACK_ORIGIN.to_string(),
        }
    }
}

/// Static origin policy, built once from configuration.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allow_list: Vec<String>,
    ignore_list: Vec<String>,
}

impl OriginPolicy {
    pub fn new(allow_list: Vec<String>, ignore_list: Vec<String>) -> Self {
        Self {
            allow_list,
            ignore_list,
        }
    }

    /// Decide whether a request declaring `origin` may be serviced.
    ///
    /// `None` means the request carried no `Origin` header at all, which is
    /// what non-browser clients send.
    pub fn decide(&self, origin: Option<&str>) -> OriginDecision {
        if self.allows(WILDCARD) {
            return OriginDecision::allow(WILDCARD);
        }

        let Some(origin) = origin else {
            return OriginDecision::allow(FALLBACK_ORIGIN);
        };

        if self.allows(origin) {
            return OriginDecision::allow(origin);
        }

        if self.allows(FALLBACK_ORIGIN) && is_local_origin(origin) {
            return OriginDecision::allow(origin);
        }

        OriginDecision::deny()
    }

    /// Origins whose permission requests are silently denied.
    pub fn is_ignored(&self, origin: &str) -> bool {
        self.ignore_list.iter().any(|entry| entry == origin)
    }

    pub fn allow_list(&self) -> &[String] {
        &self.allow_list
    }

    /// A copy of this policy that also allows `origin`.
    pub fn extended(&self, origin: &str) -> Self {
        let mut policy = self.clone();
        if !policy.allows(origin) {
            policy.allow_list.push(origin.to_string());
        }
        policy
    }

    fn allows(&self, origin: &str) -> bool {
        self.allow_list.iter().any(|entry| entry == origin)
    }
}

fn is_local_origin(origin: &str) -> bool {
    LOOPBACK_ORIGINS.contains(&origin)
        || origin.starts_with(LOOPBACK_PORT_PREFIX)
        || EXTENSION_SCHEMES
            .iter()
            .any(|scheme| origin.starts_with(scheme))
}
