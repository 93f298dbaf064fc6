use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2, PasswordHash, PasswordVerifier,
};

use crate::error::{AppError, Result};
use crate::models::{DenyCause, FileRecord};

/// Download/delete gatekeeping for a single record.
///
/// Expiry is not checked here: expired records never reach the policy,
/// the orchestrator reports them as not found.
pub struct AccessPolicy;

impl AccessPolicy {
    /// Salted argon2 hash in PHC string form
    pub fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }

    /// Constant-time check of `attempt` against a stored hash. A corrupt
    /// stored hash never verifies.
    pub fn verify_password(hash: &str, attempt: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(attempt.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::error!("Stored password hash is unreadable: {}", e);
                false
            }
        }
    }

    fn password_gate(record: &FileRecord, attempt: Option<&str>) -> Result<()> {
        if let Some(hash) = &record.password_hash {
            let attempt = attempt.unwrap_or_default();
            if !Self::verify_password(hash, attempt) {
                return Err(AppError::AccessDenied(DenyCause::Password));
            }
        }
        Ok(())
    }

    /// Download cap first, then password
    pub fn can_download(record: &FileRecord, attempt: Option<&str>) -> Result<()> {
        if let Some(max) = record.max_downloads {
            if record.download_count >= max {
                return Err(AppError::AccessDenied(DenyCause::MaxDownloads));
            }
        }
        Self::password_gate(record, attempt)
    }

    /// Password only; the owner may delete an exhausted record
    pub fn can_delete(record: &FileRecord, attempt: Option<&str>) -> Result<()> {
        Self::password_gate(record, attempt)
    }
}
