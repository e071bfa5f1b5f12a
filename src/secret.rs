//! Secret buffer: owns sensitive bytes, zeroizes on release, supports
//! at-rest encryption while idle in memory.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

/// Process-wide key used to encrypt every hidden secret buffer.
///
/// One key per process, generated once at startup. Locking the agent
/// does not rotate this key — it only flips buffers from plain to
/// hidden; the key lives for the lifetime of the process.
#[derive(Clone)]
pub struct SecretKey(Key<Aes256Gcm>);

impl SecretKey {
    /// Generate a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let key = Self(*Key::<Aes256Gcm>::from_slice(&bytes));
        bytes.zeroize();
        key
    }
}

/// A byte buffer that is either plainly readable or hidden (encrypted
/// at rest under the process [`SecretKey`]).
///
/// Invariant: the plain representation is overwritten with zeros
/// before the buffer's memory is released or transitioned to hidden.
/// No copy of a plain secret escapes the buffer except through
/// [`SecretBuffer::reveal`], which hands back a [`Zeroizing`] copy that
/// the caller is responsible for dropping promptly.
pub enum SecretBuffer {
    /// No secret present (e.g. an account with no client secret).
    Empty,
    /// Readable in memory.
    Plain(Zeroizing<Vec<u8>>),
    /// Encrypted at rest; `nonce` is unique per encryption.
    Hidden { nonce: [u8; 12], ciphertext: Vec<u8> },
}

impl Default for SecretBuffer {
    fn default() -> Self {
        Self::Empty
    }
}

impl SecretBuffer {
    /// Build a plain buffer from owned bytes.
    #[must_use]
    pub fn plain(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            Self::Empty
        } else {
            Self::Plain(Zeroizing::new(bytes))
        }
    }

    /// Build a plain buffer from a `&str`.
    #[must_use]
    pub fn plain_str(s: impl Into<String>) -> Self {
        Self::plain(s.into().into_bytes())
    }

    /// True if this buffer currently holds no secret.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
            || matches!(self, Self::Plain(b) if b.is_empty())
    }

    /// Read the secret as plain bytes, decrypting first if hidden.
    ///
    /// Returns a [`Zeroizing`] copy; the underlying buffer's own
    /// representation (plain or hidden) is left unchanged.
    pub fn reveal(&self, key: &SecretKey) -> crate::Result<Zeroizing<Vec<u8>>> {
        match self {
            Self::Empty => Ok(Zeroizing::new(Vec::new())),
            Self::Plain(bytes) => Ok(bytes.clone()),
            Self::Hidden { nonce, ciphertext } => {
                let cipher = Aes256Gcm::new(&key.0);
                let plain = cipher
                    .decrypt(Nonce::from_slice(nonce), ciphertext.as_ref())
                    .map_err(|_| crate::Error::Internal("secret buffer decryption failed".into()))?;
                Ok(Zeroizing::new(plain))
            }
        }
    }

    /// Read the secret as a `String`, decrypting first if hidden.
    pub fn reveal_string(&self, key: &SecretKey) -> crate::Result<String> {
        let bytes = self.reveal(key)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| crate::Error::Internal(format!("secret buffer is not utf8: {e}")))
    }

    /// Transition to hidden (encrypted) representation in place.
    ///
    /// No-op if already hidden or empty.
    pub fn hide(&mut self, key: &SecretKey) -> crate::Result<()> {
        if let Self::Plain(bytes) = self {
            let cipher = Aes256Gcm::new(&key.0);
            let mut nonce_bytes = [0u8; 12];
            OsRng.fill_bytes(&mut nonce_bytes);
            let nonce = Nonce::from_slice(&nonce_bytes);
            let ciphertext = cipher
                .encrypt(nonce, bytes.as_slice())
                .map_err(|_| crate::Error::Internal("secret buffer encryption failed".into()))?;
            *self = Self::Hidden {
                nonce: nonce_bytes,
                ciphertext,
            };
        }
        Ok(())
    }

    /// Transition back to plain representation in place.
    ///
    /// No-op if already plain or empty.
    pub fn reveal_in_place(&mut self, key: &SecretKey) -> crate::Result<()> {
        if let Self::Hidden { .. } = self {
            let bytes = self.reveal(key)?;
            *self = Self::Plain(bytes);
        }
        Ok(())
    }

    /// Overwrite with zeros and drop the contents, leaving an empty buffer.
    pub fn clear(&mut self) {
        *self = Self::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_round_trips_through_hidden() {
        let key = SecretKey::generate();
        let mut buf = SecretBuffer::plain_str("rt-12345");
        buf.hide(&key).unwrap();
        assert!(matches!(buf, SecretBuffer::Hidden { .. }));
        assert_eq!(buf.reveal_string(&key).unwrap(), "rt-12345");
        buf.reveal_in_place(&key).unwrap();
        assert!(matches!(buf, SecretBuffer::Plain(_)));
    }

    #[test]
    fn empty_buffer_reveals_to_empty() {
        let key = SecretKey::generate();
        let buf = SecretBuffer::Empty;
        assert!(buf.reveal(&key).unwrap().is_empty());
    }

    #[test]
    fn clear_drops_to_empty() {
        let mut buf = SecretBuffer::plain_str("secret");
        buf.clear();
        assert!(buf.is_empty());
    }

    #[test]
    fn distinct_hide_calls_use_distinct_nonces() {
        let key = SecretKey::generate();
        let mut a = SecretBuffer::plain_str("same-value");
        let mut b = SecretBuffer::plain_str("same-value");
        a.hide(&key).unwrap();
        b.hide(&key).unwrap();
        match (&a, &b) {
            (
                SecretBuffer::Hidden { nonce: n1, .. },
                SecretBuffer::Hidden { nonce: n2, .. },
            ) => assert_ne!(n1, n2),
            _ => panic!("expected both hidden"),
        }
    }
}
