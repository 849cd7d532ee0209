//! Commitment Hashing
//!
//! Domain-separated SHA-256 used for:
//! - Secret commitments published with every round snapshot
//! - Deriving participant ids from external identity subjects

use sha2::{Sha256, Digest};

use super::ids::{ParticipantId, RoundId};

/// Hash output type (256 bits / 32 bytes)
pub type Commitment = [u8; 32];

/// Domain-separated hasher.
///
/// Order of updates is significant.
pub struct CommitmentHasher {
    hasher: Sha256,
}

impl CommitmentHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for round secrets.
    pub fn for_round_secret() -> Self {
        Self::new(b"MYSTERY_ROUND_SECRET_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a length-prefixed string.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Update with a UUID (16 bytes).
    #[inline]
    pub fn update_uuid(&mut self, uuid: &[u8; 16]) {
        self.hasher.update(uuid);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> Commitment {
        self.hasher.finalize().into()
    }
}

/// Commit to a round's secret.
///
/// Tokens are length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
/// The round id is part of the preimage.
pub fn commit_secret(round_id: &RoundId, tokens: &[String]) -> Commitment {
    let mut hasher = CommitmentHasher::for_round_secret();
    hasher.update_uuid(round_id.0.as_bytes());
    hasher.update_u32(tokens.len() as u32);
    for token in tokens {
        hasher.update_str(token);
    }
    hasher.finalize()
}

/// Derive a deterministic participant id from an identity subject.
pub fn participant_id_from_subject(subject: &str) -> ParticipantId {
    let mut hasher = CommitmentHasher::new(b"mystery-round-participant:");
    hasher.update_bytes(subject.as_bytes());
    let hash = hasher.finalize();

    let mut id = [0u8; 16];
    id.copy_from_slice(&hash[..16]);
    ParticipantId::new(id)
}
