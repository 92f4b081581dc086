//! X25519 key material for the prekey pool.
//!
//! The store itself treats keys as opaque bytes; this module is the seam to
//! the crypto layer, generating fresh pairs during pool replenishment and
//! rebuilding a pair from the 32 stored private bytes.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::ZeroizeOnDrop;

/// X25519 key pair.  The private half is wiped from memory on drop.
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    private: [u8; 32],
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self::from_private(secret.to_bytes())
    }

    /// Rebuild a pair from stored private bytes; the public half is derived.
    pub fn from_private(private: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private);
        let public = PublicKey::from(&secret).to_bytes();
        Self { public, private }
    }

    pub fn public_bytes(&self) -> &[u8; 32] {
        &self.public
    }

    pub fn private_bytes(&self) -> &[u8; 32] {
        &self.private
    }
}

/// One-time prekey: a key pair tagged with its pool id.
pub struct PreKey {
    pub key_id: u32,
    pub key_pair: KeyPair,
}

impl PreKey {
    pub fn generate(key_id: u32) -> Self {
        Self {
            key_id,
            key_pair: KeyPair::generate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::KeyPair;

    #[test]
    fn public_half_is_derived_from_private_bytes() {
        let pair = KeyPair::generate();
        let rebuilt = KeyPair::from_private(*pair.private_bytes());
        assert_eq!(pair.public_bytes(), rebuilt.public_bytes());
    }

    #[test]
    fn generated_pairs_are_distinct() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        assert_ne!(a.private_bytes(), b.private_bytes());
    }
}
