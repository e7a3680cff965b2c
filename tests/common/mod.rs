#![allow(dead_code)]

use bytes::Bytes;
use cid::{Cid, multihash::Multihash};
use iroh_retrieval::{
    car::{CarHeader, CarWriter},
    codec::{Codec, HashCode},
    unixfs::{Data, DataType, PbLink, PbNode},
};
use prost::Message;

/// A UnixFS file with its blocks in traversal order.
#[derive(Debug)]
pub struct File {
    pub root: Cid,
    pub blocks: Vec<(Cid, Bytes)>,
}

pub fn cid_of(codec: Codec, data: &[u8]) -> Cid {
    let digest = HashCode::Sha2_256.digest(data);
    Cid::new_v1(
        codec.into(),
        Multihash::wrap(HashCode::Sha2_256.into(), &digest).unwrap(),
    )
}

/// Chunks `content` into raw leaves under a single root.
pub fn file(content: &[u8], chunk: usize) -> File {
    let leaves: Vec<(Cid, Bytes)> = content
        .chunks(chunk)
        .map(|c| (cid_of(Codec::Raw, c), Bytes::copy_from_slice(c)))
        .collect();
    let data = Data {
        r#type: DataType::File as i32,
        filesize: Some(content.len() as u64),
        blocksizes: leaves.iter().map(|(_, d)| d.len() as u64).collect(),
        ..Default::default()
    };
    let node = PbNode {
        data: Some(data.encode_to_vec().into()),
        links: leaves
            .iter()
            .map(|(cid, d)| PbLink {
                hash: Some(cid.to_bytes()),
                name: Some(String::new()),
                tsize: Some(d.len() as u64),
            })
            .collect(),
    };
    let bytes = Bytes::from(node.encode_to_vec());
    let root = cid_of(Codec::DagPb, &bytes);

    let mut blocks = vec![(root, bytes)];
    blocks.extend(leaves);
    File { root, blocks }
}

pub async fn car(root: Cid, blocks: &[(Cid, Bytes)]) -> Bytes {
    let mut writer = CarWriter::new(CarHeader::new_v1(vec![root]), Vec::new());
    for (cid, data) in blocks {
        writer.write(*cid, data).await.unwrap();
    }
    writer.finish().await.unwrap().into()
}

pub fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}
