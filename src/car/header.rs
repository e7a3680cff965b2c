use cid::Cid;
use serde::{Deserialize, Serialize};

use super::{Error, InvalidFileSnafu, ParsingSnafu};

/// A CAR header.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CarHeader {
    /// Version 1, the only version read by this crate.
    V1(CarHeaderV1),
}

impl CarHeader {
    /// Creates a version 1 header with the given roots.
    pub fn new_v1(roots: Vec<Cid>) -> Self {
        Self::V1(roots.into())
    }

    /// Decodes a DAG-CBOR encoded header.
    pub fn decode(buffer: &[u8]) -> Result<Self, Error> {
        let header: CarHeaderV1 = serde_ipld_dagcbor::from_slice(buffer).map_err(|e| {
            ParsingSnafu {
                message: e.to_string(),
            }
            .build()
        })?;

        snafu::ensure!(
            !header.roots.is_empty(),
            ParsingSnafu {
                message: "empty CAR file"
            }
        );
        snafu::ensure!(
            header.version == 1,
            InvalidFileSnafu {
                message: "only CAR file version 1 is supported"
            }
        );

        Ok(CarHeader::V1(header))
    }

    /// Encodes the header as DAG-CBOR.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        match self {
            CarHeader::V1(header) => serde_ipld_dagcbor::to_vec(header).map_err(|e| {
                ParsingSnafu {
                    message: e.to_string(),
                }
                .build()
            }),
        }
    }

    /// The roots named by the header.
    pub fn roots(&self) -> &[Cid] {
        match self {
            CarHeader::V1(header) => &header.roots,
        }
    }

    /// The CAR version of this header.
    pub fn version(&self) -> u64 {
        match self {
            CarHeader::V1(_) => 1,
        }
    }
}

/// CAR file header version 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarHeaderV1 {
    /// Root CIDs of the DAGs in the file.
    pub roots: Vec<Cid>,
    /// Always 1.
    pub version: u64,
}

impl From<Vec<Cid>> for CarHeaderV1 {
    fn from(roots: Vec<Cid>) -> Self {
        Self { roots, version: 1 }
    }
}
