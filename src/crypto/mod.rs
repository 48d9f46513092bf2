//! Key derivation, stream encryption and master secret handling

pub mod cipher;
pub mod kdf;
pub mod secret;

pub use cipher::{CipherAlgorithm, CipherStreamFactory, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, NONCE_SIZE};
pub use kdf::{
    derive, generate_salt, DerivedKey, KdfAlgorithm, KdfParameters, KeyDerivationService, KEY_SIZE,
    SALT_SIZE,
};
pub use secret::{EnvSecret, MasterSecret, SecretPort, StaticSecret};
