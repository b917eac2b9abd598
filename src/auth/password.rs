//! Credential Verifier
//! Mission: Hash and check passwords with bcrypt at a fixed process-wide cost

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to hash password: {0}")]
    Hashing(#[source] bcrypt::BcryptError),

    #[error("stored password hash is unusable: {0}")]
    Verification(#[source] bcrypt::BcryptError),
}

/// Bcrypt hasher. The cost is fixed at construction and never taken from
/// a request.
#[derive(Debug, Clone, Copy)]
pub struct Credentials {
    cost: u32,
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

impl Credentials {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn hash(&self, plaintext: &str) -> Result<String, CredentialError> {
        bcrypt::hash(plaintext, self.cost).map_err(CredentialError::Hashing)
    }

    /// `Ok(false)` on mismatch; an error only when `hash` is not a bcrypt hash.
    pub fn verify(&self, plaintext: &str, hash: &str) -> Result<bool, CredentialError> {
        bcrypt::verify(plaintext, hash).map_err(CredentialError::Verification)
    }
}
