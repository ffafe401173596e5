//! Default User-Agent strings for primary and secondary sessions.
//!
//! Single source for the UA format so request and prefetch traffic stay
//! consistent and easy to update.

/// Default User-Agent for primary session requests.
#[must_use]
pub(crate) fn default_session_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("lazyfetch/{version}")
}

/// User-Agent for secondary sessions that prefetch remote upload sources.
#[must_use]
pub(crate) fn default_prefetch_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("lazyfetch/{version} (prefetch)")
}
