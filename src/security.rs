use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use password_hash::{PasswordHash, SaltString};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("salt generation failed: {0}")]
    Salt(String),
    #[error("hashing failed: {0}")]
    Hash(String),
}

/// One-way credential hashing. `verify` is the only way callers compare a
/// candidate secret against a stored hash.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, secret: &str) -> Result<String, HashError>;
    fn verify(&self, hash: &str, candidate: &str) -> bool;
}

/// Argon2id with PHC-formatted output. Verification reads the parameters from the
/// stored hash, so hashes made with different costs stay verifiable.
#[derive(Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Default for Argon2Hasher {
    fn default() -> Self { Self { params: Params::default() } }
}

impl Argon2Hasher {
    /// Custom cost parameters (memory in KiB, iterations, lanes).
    pub fn with_params(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self, HashError> {
        let params = Params::new(m_cost, t_cost, p_cost, None).map_err(|e| HashError::Hash(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> { Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone()) }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, secret: &str) -> Result<String, HashError> {
        let mut salt_bytes = [0u8; 16];
        getrandom::getrandom(&mut salt_bytes).map_err(|e| HashError::Salt(e.to_string()))?;
        let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| HashError::Salt(e.to_string()))?;
        let phc = self.argon2().hash_password(secret.as_bytes(), &salt).map_err(|e| HashError::Hash(e.to_string()))?.to_string();
        Ok(phc)
    }

    fn verify(&self, hash: &str, candidate: &str) -> bool {
        if let Ok(parsed) = PasswordHash::new(hash) {
            Argon2::default().verify_password(candidate.as_bytes(), &parsed).is_ok()
        } else { false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light() -> Argon2Hasher { Argon2Hasher::with_params(8, 1, 1).unwrap() }

    #[test]
    fn hash_then_verify() {
        let h = light();
        let phc = h.hash("hunter2").unwrap();
        assert!(phc.starts_with("$argon2id$"));
        assert!(h.verify(&phc, "hunter2"));
        assert!(!h.verify(&phc, "hunter3"));
    }

    #[test]
    fn salts_differ_and_garbage_never_verifies() {
        let h = light();
        assert_ne!(h.hash("x").unwrap(), h.hash("x").unwrap());
        assert!(!h.verify("not-a-phc-string", "x"));
    }
}
