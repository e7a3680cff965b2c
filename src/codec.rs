//! Multicodec and multihash tables.

use sha2::{Digest, Sha256};

/// Content codecs a block may be addressed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[repr(u64)]
pub enum Codec {
    /// Plain bytes.
    #[display("raw")]
    Raw = 0x55,
    /// Protobuf encoded merkle dag nodes, the basis of UnixFS.
    #[display("dag-pb")]
    DagPb = 0x70,
    /// CBOR with links.
    #[display("dag-cbor")]
    DagCbor = 0x71,
    /// JSON with links.
    #[display("dag-json")]
    DagJson = 0x0129,
    /// Plain JSON.
    #[display("json")]
    Json = 0x0200,
}

impl TryFrom<u64> for Codec {
    type Error = u64;

    fn try_from(code: u64) -> Result<Self, Self::Error> {
        match code {
            0x55 => Ok(Codec::Raw),
            0x70 => Ok(Codec::DagPb),
            0x71 => Ok(Codec::DagCbor),
            0x0129 => Ok(Codec::DagJson),
            0x0200 => Ok(Codec::Json),
            other => Err(other),
        }
    }
}

impl From<Codec> for u64 {
    fn from(codec: Codec) -> Self {
        codec as u64
    }
}

/// Multihash functions a block may be hashed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
#[repr(u64)]
pub enum HashCode {
    /// The digest is the content itself.
    #[display("identity")]
    Identity = 0x00,
    #[display("sha2-256")]
    #[allow(missing_docs)]
    Sha2_256 = 0x12,
    #[display("blake2b-256")]
    #[allow(missing_docs)]
    Blake2b256 = 0xb220,
}

impl HashCode {
    /// Computes the digest of `bytes`.
    ///
    /// For [`HashCode::Identity`] this is the input itself.
    pub fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        match self {
            HashCode::Identity => bytes.to_vec(),
            HashCode::Sha2_256 => Sha256::digest(bytes).to_vec(),
            HashCode::Blake2b256 => blake2b_simd::Params::new()
                .hash_length(32)
                .hash(bytes)
                .as_bytes()
                .to_vec(),
        }
    }
}

impl TryFrom<u64> for HashCode {
    type Error = u64;

    fn try_from(code: u64) -> Result<Self, Self::Error> {
        match code {
            0x00 => Ok(HashCode::Identity),
            0x12 => Ok(HashCode::Sha2_256),
            0xb220 => Ok(HashCode::Blake2b256),
            other => Err(other),
        }
    }
}

impl From<HashCode> for u64 {
    fn from(code: HashCode) -> Self {
        code as u64
    }
}
