//! Client authentication registry.
//!
//! Issues one secret token per client and validates presented tokens.
//! Tokens are 128 bits of OS randomness, hex-encoded, compared in constant
//! time, and never logged or embedded in error messages.

use std::collections::HashMap;

use rand::rngs::OsRng;
use rand::RngCore;

use fedcoord_common::{unix_time_ms, CoordError};

/// Bytes of randomness per token (128 bits).
const TOKEN_BYTES: usize = 16;

/// Per-client identity record. Owned exclusively by the registry; other
/// ledgers reference clients by id only.
#[derive(Debug, Clone)]
pub struct ClientRecord {
    token: String,
    /// Milliseconds since epoch of first registration.
    pub first_seen_ms: u64,
    /// Milliseconds since epoch of the last authenticated request.
    pub last_seen_ms: u64,
}

/// In-memory token registry.
#[derive(Debug, Default)]
pub struct AuthRegistry {
    clients: HashMap<String, ClientRecord>,
}

impl AuthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh token for a new client id.
    ///
    /// Fails with `duplicate_client` if the id already holds a token.
    pub fn issue(&mut self, client_id: &str) -> Result<String, CoordError> {
        if self.clients.contains_key(client_id) {
            return Err(CoordError::DuplicateClient);
        }

        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let now = unix_time_ms();
        self.clients.insert(
            client_id.to_string(),
            ClientRecord {
                token: token.clone(),
                first_seen_ms: now,
                last_seen_ms: now,
            },
        );
        Ok(token)
    }

    /// Returns true if the client id holds a token.
    pub fn is_registered(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Validates a presented token against the client's issued token.
    ///
    /// Unknown clients verify as false; the comparison itself is constant
    /// time so the result does not leak how much of the token matched.
    pub fn verify(&self, client_id: &str, token: &str) -> bool {
        match self.clients.get(client_id) {
            Some(record) => constant_time_eq(record.token.as_bytes(), token.as_bytes()),
            None => false,
        }
    }

    /// Records an authenticated request from the client.
    pub fn touch(&mut self, client_id: &str) {
        if let Some(record) = self.clients.get_mut(client_id) {
            record.last_seen_ms = unix_time_ms();
        }
    }

    /// Read-only view of a client record.
    pub fn record(&self, client_id: &str) -> Option<&ClientRecord> {
        self.clients.get(client_id)
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Byte-wise comparison whose duration does not depend on where the inputs
/// first differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
