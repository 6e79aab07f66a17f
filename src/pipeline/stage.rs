//! Pipeline states.

use std::fmt;

/// States of the enforcement pipeline, entered strictly in this order.
/// `RateLimit` is skipped when the decision carries no rate-limit obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Start,
    Authenticate,
    ResolveRoute,
    EvaluatePolicy,
    RateLimit,
    Forward,
    Respond,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "START",
            Stage::Authenticate => "AUTHENTICATE",
            Stage::ResolveRoute => "RESOLVE_ROUTE",
            Stage::EvaluatePolicy => "EVALUATE_POLICY",
            Stage::RateLimit => "RATE_LIMIT",
            Stage::Forward => "FORWARD",
            Stage::Respond => "RESPOND",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
