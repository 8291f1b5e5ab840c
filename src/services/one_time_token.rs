use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::Result;
use crate::kvs::client::Kvs;

/// The size of a one-time token value in bytes, before encoding.
const TOKEN_SIZE: usize = 32;

/// What a one-time token is for. The purpose namespaces the key, so a
/// reset token can never be replayed as a verification token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenPurpose {
    /// Password reset; short-lived.
    PasswordReset,
    /// Email verification; may sit in an inbox for a while.
    EmailVerification,
}

impl TokenPurpose {
    fn as_str(self) -> &'static str {
        match self {
            TokenPurpose::PasswordReset => "reset",
            TokenPurpose::EmailVerification => "verify",
        }
    }
}

/// Single-use token → subject mappings for reset and verification flows.
#[derive(Clone)]
pub struct OneTimeTokenStore {
    kvs: Arc<dyn Kvs>,
    reset_ttl_secs: u64,
    verify_ttl_secs: u64,
}

fn token_key(purpose: TokenPurpose, token: &str) -> String {
    format!("one_time:{}:{}", purpose.as_str(), token)
}

/// Generates an unguessable URL-safe token value.
fn generate_token_value() -> String {
    let mut token = [0u8; TOKEN_SIZE];
    OsRng.fill_bytes(&mut token);
    general_purpose::URL_SAFE_NO_PAD.encode(token)
}

impl OneTimeTokenStore {
    /// Creates a new `OneTimeTokenStore`.
    ///
    /// # Arguments
    ///
    /// * `kvs` - The shared KVS client.
    /// * `reset_ttl_secs` - TTL for password-reset tokens.
    /// * `verify_ttl_secs` - TTL for email-verification tokens.
    pub fn new(kvs: Arc<dyn Kvs>, reset_ttl_secs: u64, verify_ttl_secs: u64) -> Self {
        Self {
            kvs,
            reset_ttl_secs,
            verify_ttl_secs,
        }
    }

    fn ttl_for(&self, purpose: TokenPurpose) -> u64 {
        match purpose {
            TokenPurpose::PasswordReset => self.reset_ttl_secs,
            TokenPurpose::EmailVerification => self.verify_ttl_secs,
        }
    }

    /// Issues a fresh token mapping to `subject` with the purpose's TTL.
    ///
    /// # Returns
    ///
    /// The token value to hand to the subject (mail link, etc.).
    pub async fn issue(&self, purpose: TokenPurpose, subject: &str) -> Result<String> {
        let token = generate_token_value();
        self.kvs
            .set_ex(&token_key(purpose, &token), subject, self.ttl_for(purpose))
            .await?;
        tracing::debug!("✅ Issued {} token for {}", purpose.as_str(), subject);
        Ok(token)
    }

    /// Consumes a token, returning its subject at most once.
    ///
    /// Get-then-delete, conditional on the delete: the subject is only
    /// returned when this caller's DEL removed the key, so two requests
    /// racing on the same token cannot both succeed. Absent, expired and
    /// already-consumed tokens are indistinguishable to the caller.
    pub async fn consume(&self, purpose: TokenPurpose, token: &str) -> Option<String> {
        let key = token_key(purpose, token);

        let subject = match self.kvs.get(&key).await {
            Ok(Some(subject)) => subject,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("❌ One-time token lookup failed: {}", e);
                return None;
            }
        };

        match self.kvs.del(&[key]).await {
            Ok(removed) if removed > 0 => Some(subject),
            Ok(_) => {
                tracing::debug!("One-time token lost a consumption race");
                None
            }
            Err(e) => {
                // The token stays stored; the caller can retry later.
                tracing::warn!("❌ One-time token delete failed: {}", e);
                None
            }
        }
    }
}
