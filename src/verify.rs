//! Checks that a block's bytes hash to the CID it was addressed with.

use cid::Cid;
use data_encoding::HEXLOWER;
use nested_enum_utils::common_fields;
use snafu::{Backtrace, Snafu};

use crate::codec::{Codec, HashCode};

/// Smallest digest accepted for hashing multihash functions.
pub const MIN_DIGEST_LEN: usize = 20;
/// Largest digest accepted for hashing multihash functions.
pub const MAX_DIGEST_LEN: usize = 128;

/// Which part of a CID named an unsupported code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum FormatKind {
    #[display("codec")]
    #[allow(missing_docs)]
    Codec,
    #[display("multihash")]
    #[allow(missing_docs)]
    Multihash,
}

/// Errors from verifying a block.
#[common_fields({
    backtrace: Option<Backtrace>,
    #[snafu(implicit)]
    span_trace: n0_snafu::SpanTrace,
})]
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[non_exhaustive]
#[snafu(visibility(pub(crate)))]
pub enum VerifyError {
    #[snafu(display("unsupported {kind} 0x{code:x}"))]
    UnsupportedFormat { kind: FormatKind, code: u64 },
    #[snafu(display("digest length {len} is outside of [20, 128]"))]
    InvalidDigestLength { len: usize },
    #[snafu(display("hash of block ({actual}) does not match the digest in its CID ({expected})"))]
    DigestMismatch { expected: String, actual: String },
}

/// Checks that a CID with the given parts could be verified at all.
///
/// The codec is checked before the multihash code, and the digest length last.
pub fn check_format(codec: u64, hash_code: u64, digest_len: usize) -> Result<HashCode, VerifyError> {
    Codec::try_from(codec).map_err(|code| {
        UnsupportedFormatSnafu {
            kind: FormatKind::Codec,
            code,
        }
        .build()
    })?;
    let hash = HashCode::try_from(hash_code).map_err(|code| {
        UnsupportedFormatSnafu {
            kind: FormatKind::Multihash,
            code,
        }
        .build()
    })?;
    if hash != HashCode::Identity {
        snafu::ensure!(
            (MIN_DIGEST_LEN..=MAX_DIGEST_LEN).contains(&digest_len),
            InvalidDigestLengthSnafu { len: digest_len }
        );
    }
    Ok(hash)
}

/// Verifies that `bytes` are the content addressed by `cid`.
pub fn verify(cid: &Cid, bytes: &[u8]) -> Result<(), VerifyError> {
    let mh = cid.hash();
    let hash = check_format(cid.codec(), mh.code(), mh.digest().len())?;
    let actual = hash.digest(bytes);
    snafu::ensure!(
        actual == mh.digest(),
        DigestMismatchSnafu {
            expected: HEXLOWER.encode(mh.digest()),
            actual: HEXLOWER.encode(&actual),
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use cid::multihash::Multihash;
    use proptest::prelude::*;

    use super::*;
    use crate::test_utils::cid_of;

    #[test]
    fn valid_blocks() {
        for codec in [Codec::Raw, Codec::DagCbor, Codec::DagJson, Codec::Json] {
            let cid = cid_of(codec, b"hello world\n");
            verify(&cid, b"hello world\n").unwrap();
        }
        let digest = HashCode::Blake2b256.digest(b"test");
        let cid = Cid::new_v1(0x71, Multihash::wrap(0xb220, &digest).unwrap());
        verify(&cid, b"test").unwrap();
    }

    #[test]
    fn identity_is_its_own_digest() {
        let cid = Cid::new_v1(0x55, Multihash::wrap(0x00, b"tiny").unwrap());
        verify(&cid, b"tiny").unwrap();
        assert!(matches!(
            verify(&cid, b"tinier"),
            Err(VerifyError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn rejects_unsupported_codec_before_hash() {
        let cid = Cid::new_v1(0x0300, Multihash::wrap(0x1e, &[0u8; 32]).unwrap());
        let err = verify(&cid, b"").unwrap_err();
        assert!(matches!(
            err,
            VerifyError::UnsupportedFormat {
                kind: FormatKind::Codec,
                code: 0x0300,
                ..
            }
        ));

        let cid = Cid::new_v1(0x55, Multihash::wrap(0x1e, &[0u8; 32]).unwrap());
        let err = verify(&cid, b"").unwrap_err();
        assert!(matches!(
            err,
            VerifyError::UnsupportedFormat {
                kind: FormatKind::Multihash,
                code: 0x1e,
                ..
            }
        ));
    }

    #[test]
    fn rejects_short_digests() {
        let cid = Cid::new_v1(0x55, Multihash::wrap(0x12, &[7u8; 19]).unwrap());
        assert!(matches!(
            verify(&cid, b"x"),
            Err(VerifyError::InvalidDigestLength { len: 19, .. })
        ));
        assert!(matches!(
            check_format(0x55, 0x12, 129),
            Err(VerifyError::InvalidDigestLength { len: 129, .. })
        ));
        check_format(0x55, 0x12, 128).unwrap();
        check_format(0x55, 0x00, 0).unwrap();
    }

    proptest! {
        #[test]
        fn any_mutation_is_detected(
            data in proptest::collection::vec(any::<u8>(), 1..512),
            idx in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let cid = cid_of(Codec::Raw, &data);
            let mut mutated = data.clone();
            let i = idx.index(mutated.len());
            mutated[i] ^= flip;
            let is_mismatch = matches!(verify(&cid, &mutated), Err(VerifyError::DigestMismatch { .. }));
            prop_assert!(is_mismatch);
        }
    }
}
