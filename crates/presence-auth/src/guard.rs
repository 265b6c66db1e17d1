use crate::issuer::verify_token;
use crate::replay::ReplayStore;
use ed25519_dalek::VerifyingKey;
use log::{info, warn};
use presence_core::{AuthorizationToken, Clock, PresenceError, TokenConfig};
use std::sync::Arc;

/// Single-use enforcement for authorization tokens.
///
/// Order of checks: signer, expiry, future skew, then the atomic
/// check-and-insert on the replay store. Nothing here extends a token's
/// lifetime.
pub struct ReplayGuard {
    store: Arc<dyn ReplayStore>,
    authority: VerifyingKey,
    tokens: TokenConfig,
    clock: Arc<dyn Clock>,
}

impl ReplayGuard {
    pub fn new(
        store: Arc<dyn ReplayStore>,
        authority: VerifyingKey,
        tokens: TokenConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            authority,
            tokens,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn ReplayStore> {
        &self.store
    }

    /// Signature and age checks without consuming the nonce.
    pub fn check_unconsumed(&self, token: &AuthorizationToken, now_ms: i64) -> Result<(), PresenceError> {
        verify_token(token, &self.authority)?;

        let age_ms = token.age_ms(now_ms);
        if age_ms > self.tokens.max_age_ms {
            return Err(PresenceError::TokenExpired {
                age_ms,
                max_age_ms: self.tokens.max_age_ms,
            });
        }
        let ahead_ms = age_ms.saturating_neg();
        if ahead_ms > self.tokens.max_clock_skew_ms {
            return Err(PresenceError::TokenFromFuture { ahead_ms });
        }

        let seen = self
            .store
            .contains(&token.nonce)
            .map_err(|e| PresenceError::ReplayStoreUnavailable(e.to_string()))?;
        if seen {
            return Err(PresenceError::TokenReplayed);
        }
        Ok(())
    }

    pub fn try_consume_at(&self, token: &AuthorizationToken, now_ms: i64) -> Result<(), PresenceError> {
        let outcome = self.check_unconsumed(token, now_ms).and_then(|_| {
            match self.store.insert_if_absent(&token.nonce) {
                Ok(true) => Ok(()),
                Ok(false) => Err(PresenceError::TokenReplayed),
                Err(e) => Err(PresenceError::ReplayStoreUnavailable(e.to_string())),
            }
        });
        match &outcome {
            Ok(()) => info!("[REPLAY] token {} consumed for {}", token.nonce, token.subject),
            Err(e) => warn!("[REPLAY] token {} rejected: {}", token.nonce, e),
        }
        outcome
    }

    pub fn try_consume(&self, token: &AuthorizationToken) -> Result<(), PresenceError> {
        self.try_consume_at(token, self.clock.now_ms())
    }
}
