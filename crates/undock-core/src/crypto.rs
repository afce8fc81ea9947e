//! Overlay identity and stream encryption.
//!
//! Provides two things:
//!   1. The node's long-term X25519 keypair and the `PeerId` derived from it
//!   2. Noise_XX stream establishment: authenticated key exchange
//!
//! A peer's overlay identity IS its static public key. Completing a Noise_XX
//! handshake proves the remote side holds the private half, so a stream opened
//! to a `PeerId` is authenticated once the handshake finishes.
//!
//! All key material derives ZeroizeOnDrop and is wiped from memory when dropped.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snow::{Builder, HandshakeState, TransportState};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// The Noise protocol pattern used for overlay streams.
///
/// Noise_XX: mutual authentication, both static keys transmitted encrypted.
const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_BLAKE2s";

/// Largest Noise message on the wire.
pub const MAX_NOISE_MESSAGE: usize = 65_535;

/// Poly1305 tag appended to every transport message.
pub const TAG_LEN: usize = 16;

/// Largest plaintext that fits in one transport message.
pub const MAX_PLAINTEXT: usize = MAX_NOISE_MESSAGE - TAG_LEN;

// ── PeerId ────────────────────────────────────────────────────────────────────

/// Opaque overlay identity of a node: its static X25519 public key.
///
/// Rendered as lowercase hex everywhere it leaves the process (JSON, logs, CLI).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; 32]);

impl PeerId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl FromStr for PeerId {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::BadPeerId)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::BadPeerId)?;
        Ok(Self(arr))
    }
}

impl TryFrom<&[u8]> for PeerId {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::BadPeerId)?;
        Ok(Self(arr))
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Keypair ───────────────────────────────────────────────────────────────────

/// A node's long-term static X25519 keypair.
///
/// Generated once per node and stored persistently. The public key is the
/// node's `PeerId`. The private key never leaves this struct.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    /// Private key. Zeroized on drop, never exposed directly.
    private: Zeroizing<[u8; 32]>,
    /// Public key, which is the overlay identity.
    pub public: [u8; 32],
}

impl Keypair {
    /// Generate a new random X25519 keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(secret.to_bytes()),
            public: *public.as_bytes(),
        }
    }

    /// Reconstruct a keypair from stored private key bytes.
    /// The public key is derived deterministically from the private key.
    pub fn from_private(private_bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private_bytes);
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(private_bytes),
            public: *public.as_bytes(),
        }
    }

    /// Serialize the private key for persistent storage.
    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(*self.private)
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId(self.public)
    }

    /// Load the keypair stored at `path`, or generate and store a new one.
    ///
    /// The file holds the 32 raw private key bytes, written with mode 0600.
    pub fn load_or_generate(path: &Path) -> Result<Self, CryptoError> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let private: [u8; 32] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| CryptoError::BadKeyFile(path.display().to_string()))?;
                Ok(Self::from_private(private))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let keypair = Self::generate();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                write_private(path, &keypair.private_bytes())?;
                Ok(keypair)
            }
            Err(e) => Err(CryptoError::Io(e)),
        }
    }
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8; 32]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8; 32]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}

// ── Noise Handshake ───────────────────────────────────────────────────────────

/// Initiator side of the Noise_XX handshake.
///
/// Sends message 1, receives message 2, sends message 3.
pub struct NoiseInitiator {
    state: HandshakeState,
}

impl NoiseInitiator {
    /// Begin a handshake as the initiator.
    ///
    /// Returns the initiator state and the bytes of message 1.
    pub fn new(keypair: &Keypair) -> Result<(Self, Vec<u8>), CryptoError> {
        let mut state = Builder::new(NOISE_PATTERN.parse().map_err(|_| CryptoError::BadPattern)?)
            .local_private_key(&*keypair.private)
            .build_initiator()?;

        let mut msg1 = vec![0u8; MAX_NOISE_MESSAGE];
        let len = state.write_message(&[], &mut msg1)?;
        msg1.truncate(len);

        Ok((Self { state }, msg1))
    }

    /// Process the responder's message 2 and produce message 3.
    ///
    /// On success the transport is ready and carries the responder's identity.
    pub fn finish(mut self, msg2: &[u8]) -> Result<(NoiseTransport, Vec<u8>), CryptoError> {
        let mut payload = vec![0u8; MAX_NOISE_MESSAGE];
        self.state.read_message(msg2, &mut payload)?;

        let mut msg3 = vec![0u8; MAX_NOISE_MESSAGE];
        let len = self.state.write_message(&[], &mut msg3)?;
        msg3.truncate(len);

        let transport = NoiseTransport::new(self.state.into_transport_mode()?)?;
        Ok((transport, msg3))
    }
}

/// Responder side of the Noise_XX handshake.
pub struct NoiseResponder {
    state: HandshakeState,
}

impl NoiseResponder {
    pub fn new(keypair: &Keypair) -> Result<Self, CryptoError> {
        let state = Builder::new(NOISE_PATTERN.parse().map_err(|_| CryptoError::BadPattern)?)
            .local_private_key(&*keypair.private)
            .build_responder()?;
        Ok(Self { state })
    }

    /// Process the initiator's message 1 and write message 2.
    pub fn respond(mut self, msg1: &[u8]) -> Result<(ResponderPending, Vec<u8>), CryptoError> {
        let mut payload = vec![0u8; MAX_NOISE_MESSAGE];
        self.state.read_message(msg1, &mut payload)?;

        let mut msg2 = vec![0u8; MAX_NOISE_MESSAGE];
        let len = self.state.write_message(&[], &mut msg2)?;
        msg2.truncate(len);

        Ok((ResponderPending { state: self.state }, msg2))
    }
}

/// Responder waiting for message 3 from the initiator.
pub struct ResponderPending {
    state: HandshakeState,
}

impl ResponderPending {
    /// Read message 3 and complete the handshake.
    pub fn finish(mut self, msg3: &[u8]) -> Result<NoiseTransport, CryptoError> {
        let mut payload = vec![0u8; MAX_NOISE_MESSAGE];
        self.state.read_message(msg3, &mut payload)?;
        NoiseTransport::new(self.state.into_transport_mode()?)
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// A completed Noise_XX handshake, ready to encrypt an ordered byte stream.
///
/// Uses the stateful transport with implicit nonces, correct for TCP where
/// messages arrive exactly once and in order.
pub struct NoiseTransport {
    state: TransportState,
    remote: PeerId,
}

impl NoiseTransport {
    fn new(state: TransportState) -> Result<Self, CryptoError> {
        let remote = state
            .get_remote_static()
            .ok_or(CryptoError::MissingRemoteKey)
            .and_then(|key| PeerId::try_from(key))?;
        Ok(Self { state, remote })
    }

    /// Identity proven by the remote side during the handshake.
    pub fn remote(&self) -> PeerId {
        self.remote
    }

    /// Encrypt one message. `plaintext` must not exceed `MAX_PLAINTEXT`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if plaintext.len() > MAX_PLAINTEXT {
            return Err(CryptoError::TooLong(plaintext.len()));
        }
        let mut out = vec![0u8; plaintext.len() + TAG_LEN];
        let len = self.state.write_message(plaintext, &mut out)?;
        out.truncate(len);
        Ok(out)
    }

    /// Decrypt one message produced by the peer's `encrypt`.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::TooShort);
        }
        let mut out = vec![0u8; ciphertext.len()];
        let len = self.state.read_message(ciphertext, &mut out)?;
        out.truncate(len);
        Ok(out)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid Noise pattern string")]
    BadPattern,

    #[error("Noise protocol error: {0}")]
    Noise(#[from] snow::Error),

    #[error("ciphertext too short (need at least 16 bytes of MAC)")]
    TooShort,

    #[error("plaintext of {0} bytes exceeds one Noise message")]
    TooLong(usize),

    #[error("handshake finished without a remote static key")]
    MissingRemoteKey,

    #[error("peer id must be 32 bytes of hex")]
    BadPeerId,

    #[error("key file {0} is not a 32-byte private key")]
    BadKeyFile(String),

    #[error("key file I/O: {0}")]
    Io(#[from] std::io::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
