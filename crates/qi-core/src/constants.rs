//! Reserved identities used by the bus itself.

/// Reserved session identity used as the sender of server-originated
/// messages (auto-replies) and as the registration scope for global
/// handlers. No client is ever assigned this logical id.
pub const HUB_ID: &str = "__hub__";
