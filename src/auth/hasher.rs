// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! One-way hashing for PINs and verification codes.
//!
//! Argon2id with a fresh random salt per digest, encoded as a PHC string.
//! Both PINs (4 digits) and codes (6 digits) have tiny input spaces, so the
//! hash is only one layer: issuance is rate limited and attempts are capped.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use ring::rand::{SecureRandom, SystemRandom};
use tracing::error;

use crate::config::HasherConfig;

const SALT_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid argon2 parameters: {0}")]
    Params(String),

    #[error("random source unavailable")]
    Random,

    #[error("hashing failed: {0}")]
    Hash(String),
}

/// Salted Argon2id hasher with constant-time verification.
pub struct SecretHasher {
    argon2: Argon2<'static>,
    rng: SystemRandom,
}

impl SecretHasher {
    pub fn new(config: HasherConfig) -> Result<Self, HashError> {
        let params = Params::new(config.memory_kib, config.iterations, 1, None)
            .map_err(|e| HashError::Params(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            rng: SystemRandom::new(),
        })
    }

    /// Hash a secret into a PHC string.
    pub fn hash(&self, secret: &str) -> Result<String, HashError> {
        let mut salt_bytes = [0u8; SALT_LEN];
        self.rng
            .fill(&mut salt_bytes)
            .map_err(|_| HashError::Random)?;
        let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| HashError::Hash(e.to_string()))?;

        let digest = self
            .argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                HashError::Hash(e.to_string())
            })?
            .to_string();
        Ok(digest)
    }

    /// Check a secret against a stored digest.
    ///
    /// Malformed digests verify as `false`.
    pub fn verify(&self, secret: &str, digest: &str) -> bool {
        let parsed = match PasswordHash::new(digest) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(error = %e, "argon2 parse hash error");
                return false;
            }
        };
        self.argon2
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok()
    }

    /// Uniformly random decimal string of `digits` length.
    pub fn random_digits(&self, digits: u32) -> Result<String, HashError> {
        let modulus = 10u32.pow(digits);
        // Largest multiple of the modulus that fits in u32; draws above it are rejected.
        let zone = u32::MAX - (u32::MAX % modulus);
        loop {
            let mut buf = [0u8; 4];
            self.rng.fill(&mut buf).map_err(|_| HashError::Random)?;
            let value = u32::from_be_bytes(buf);
            if value < zone {
                return Ok(format!("{:0width$}", value % modulus, width = digits as usize));
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_hasher() -> SecretHasher {
    SecretHasher::new(HasherConfig {
        memory_kib: 8,
        iterations: 1,
    })
    .expect("test hasher params are valid")
}
