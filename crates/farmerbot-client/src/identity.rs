//! The farmer's sr25519 identity.

use base58::ToBase58;
use bip39::{Language, Mnemonic};
use blake2::digest::typenum::U64;
use blake2::digest::FixedOutput;
use blake2::{Blake2b, Digest};
use schnorrkel::context::SigningContext;
use schnorrkel::{ExpansionMode, Keypair, MiniSecretKey};
use substrate_bip39::mini_secret_from_entropy;
use thiserror::Error;
use zeroize::Zeroizing;

const SIGNING_CONTEXT: &[u8] = b"substrate";
const SS58_HASH_PREFIX: &[u8] = b"SS58PRE";
/// Generic substrate address format.
const SS58_FORMAT: u8 = 42;
const SEED_LENGTH: usize = 32;

/// Errors happening while loading the farmer identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The mnemonic phrase failed bip39 validation.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    /// The hex seed is malformed or has the wrong length.
    #[error("invalid seed: {0}")]
    InvalidSeed(String),
    /// Key material could not be expanded into a keypair.
    #[error("key derivation failed: {0}")]
    Derivation(String),
}

/// The farmer's keypair plus the signing context used for chain writes.
#[derive(Clone)]
pub struct Identity {
    keypair: Zeroizing<Keypair>,
    context: SigningContext,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Derives the identity from a bip39 mnemonic phrase.
    pub fn from_mnemonic(phrase: &str) -> Result<Self, IdentityError> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase.trim())
            .map_err(|e| IdentityError::InvalidMnemonic(e.to_string()))?;
        let mini = mini_secret_from_entropy(&mnemonic.to_entropy(), "")
            .map_err(|e| IdentityError::Derivation(format!("{e:?}")))?;
        Ok(Self::from_mini_secret(&mini))
    }

    /// Derives the identity from a 32-byte hex seed, `0x`-prefixed or bare.
    pub fn from_seed_hex(seed: &str) -> Result<Self, IdentityError> {
        let stripped = seed.trim().trim_start_matches("0x");
        let bytes = Zeroizing::new(
            hex::decode(stripped).map_err(|e| IdentityError::InvalidSeed(e.to_string()))?,
        );
        if bytes.len() != SEED_LENGTH {
            return Err(IdentityError::InvalidSeed(format!(
                "expected {SEED_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        let mini = MiniSecretKey::from_bytes(&bytes)
            .map_err(|e| IdentityError::Derivation(e.to_string()))?;
        Ok(Self::from_mini_secret(&mini))
    }

    /// Accepts either a mnemonic phrase or a hex seed.
    pub fn from_phrase_or_seed(input: &str) -> Result<Self, IdentityError> {
        let trimmed = input.trim();
        let looks_like_seed = trimmed.starts_with("0x")
            || (trimmed.len() == SEED_LENGTH * 2 && trimmed.chars().all(|c| c.is_ascii_hexdigit()));
        if looks_like_seed {
            Self::from_seed_hex(trimmed)
        } else {
            Self::from_mnemonic(trimmed)
        }
    }

    fn from_mini_secret(mini: &MiniSecretKey) -> Self {
        Self {
            keypair: Zeroizing::new(mini.expand_to_keypair(ExpansionMode::Ed25519)),
            context: schnorrkel::signing_context(SIGNING_CONTEXT),
        }
    }

    /// Raw public key bytes.
    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public.to_bytes()
    }

    /// SS58 address of the public key under the generic substrate format.
    #[must_use]
    pub fn address(&self) -> String {
        let mut data = Vec::with_capacity(1 + SEED_LENGTH + 2);
        data.push(SS58_FORMAT);
        data.extend_from_slice(&self.public_key());
        let hash = ss58hash(&data);
        data.extend_from_slice(&hash[0..2]);
        data.to_base58()
    }

    /// Signs a message with the farmer key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.keypair.sign(self.context.bytes(message)).to_bytes()
    }
}

fn ss58hash(data: &[u8]) -> [u8; 64] {
    let mut state = Blake2b::<U64>::new();
    state.update(SS58_HASH_PREFIX);
    state.update(data);
    state.finalize_fixed().into()
}
