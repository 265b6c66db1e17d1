//! Presence gate for sensitive actions.
//!
//! Downstream collaborators hand over a known callable and a token and get
//! back a callable that consumes the token before running. A rejected token
//! means the action body never executes.

use crate::service::PresenceService;
use log::info;
use presence_core::{AuthorizationToken, PresenceError};
use std::sync::Arc;

/// Runs `action` now, after consuming `token`.
pub fn require_presence<T>(
    service: &PresenceService,
    label: &str,
    token: &AuthorizationToken,
    action: impl FnOnce() -> T,
) -> Result<T, PresenceError> {
    service.consume_token(token)?;
    info!("[GATE] {} authorized for {}", label, token.subject);
    Ok(action())
}

/// Wraps `action` into a single-shot callable bound to `token`.
pub fn guard<A, T, F>(
    service: Arc<PresenceService>,
    label: &'static str,
    token: AuthorizationToken,
    action: F,
) -> impl FnOnce(A) -> Result<T, PresenceError>
where
    F: FnOnce(A) -> T,
{
    move |args| require_presence(&service, label, &token, move || action(args))
}
