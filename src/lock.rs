//! Process-wide locked/unlocked gate.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use parking_lot::RwLock;
use rand::rngs::OsRng;

use crate::error::{Error, Result};

enum Inner {
    Unlocked,
    Locked { verifier: String },
}

/// Locked/unlocked gate with a salted-hash verifier.
///
/// While locked, every handler other than `unlock` must be rejected
/// with [`Error::Locked`] by the dispatcher before it touches the
/// registry — this type only tracks the gate itself, it does not
/// enforce dispatch (see `src/dispatcher.rs`).
pub struct LockState {
    inner: RwLock<Inner>,
}

impl Default for LockState {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::Unlocked),
        }
    }
}

impl LockState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(*self.inner.read(), Inner::Locked { .. })
    }

    /// Transition to locked iff currently unlocked. Derives a fresh
    /// salted hash of `passphrase`.
    pub fn lock(&self, passphrase: &str) -> Result<()> {
        let mut guard = self.inner.write();
        if matches!(*guard, Inner::Locked { .. }) {
            return Err(Error::BadRequest("agent is already locked".into()));
        }
        let salt = SaltString::generate(&mut OsRng);
        let verifier = Argon2::default()
            .hash_password(passphrase.as_bytes(), &salt)
            .map_err(|e| Error::Internal(format!("failed to hash lock passphrase: {e}")))?
            .to_string();
        *guard = Inner::Locked { verifier };
        Ok(())
    }

    /// Recompute the verifier with the stored salt and constant-time
    /// compare (delegated to argon2's own verify, which is
    /// constant-time). On match, transition to unlocked.
    pub fn unlock(&self, passphrase: &str) -> Result<()> {
        let mut guard = self.inner.write();
        let Inner::Locked { verifier } = &*guard else {
            return Err(Error::BadRequest("agent is not locked".into()));
        };
        let parsed = PasswordHash::new(verifier)
            .map_err(|e| Error::Internal(format!("stored lock verifier is malformed: {e}")))?;
        Argon2::default()
            .verify_password(passphrase.as_bytes(), &parsed)
            .map_err(|_| Error::Locked)?;
        *guard = Inner::Unlocked;
        Ok(())
    }
}
