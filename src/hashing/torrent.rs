//! BitTorrent v1 info hashes built from cached block digests.
//!
//! Multi-file torrents align every file to a piece boundary with BEP 47
//! padding files, so each file's pieces can be reused from its own
//! [`BlockInfo`] regardless of where it sits in the torrent.

use std::collections::BTreeMap;
use std::sync::Arc;

use sha1::{Digest, Sha1};

use super::blocks::{BlockHash, BlockHashCache, BlockInfo};
use crate::error::Result;
use crate::stream::StreamFactory;

/// Minimal bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bencode {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Bencode>),
    Dict(BTreeMap<Vec<u8>, Bencode>),
}

impl Bencode {
    pub fn str(value: &str) -> Self {
        Bencode::Bytes(value.as_bytes().to_vec())
    }

    pub fn int(value: u64) -> Self {
        Bencode::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Bencode::Int(n) => {
                out.push(b'i');
                out.extend_from_slice(n.to_string().as_bytes());
                out.push(b'e');
            }
            Bencode::Bytes(bytes) => {
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(bytes);
            }
            Bencode::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode(out);
                }
                out.push(b'e');
            }
            Bencode::Dict(entries) => {
                out.push(b'd');
                for (key, value) in entries {
                    Bencode::Bytes(key.clone()).encode(out);
                    value.encode(out);
                }
                out.push(b'e');
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

fn dict(entries: Vec<(&str, Bencode)>) -> Bencode {
    Bencode::Dict(
        entries
            .into_iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v))
            .collect(),
    )
}

/// One file of a multi-file torrent.
pub struct TorrentFile {
    /// Path components relative to the torrent root.
    pub path: Vec<String>,
    pub source: Arc<dyn StreamFactory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn urn(&self) -> String {
        format!("urn:btih:{}", self.hex())
    }
}

fn concat(hashes: impl IntoIterator<Item = BlockHash>) -> Vec<u8> {
    hashes.into_iter().flatten().collect()
}

fn info_hash(info: &Bencode) -> InfoHash {
    InfoHash(Sha1::digest(info.to_bytes()).into())
}

pub fn single_file_info(name: &str, piece_length: u64, blocks: &BlockInfo) -> Bencode {
    let pieces = concat(blocks.block_hashes.iter().copied().chain(blocks.last_hash));
    dict(vec![
        ("length", Bencode::int(blocks.length)),
        ("name", Bencode::str(name)),
        ("piece length", Bencode::int(piece_length)),
        ("pieces", Bencode::Bytes(pieces)),
    ])
}

pub fn multi_file_info(name: &str, piece_length: u64, files: &[(Vec<String>, Arc<BlockInfo>)]) -> Bencode {
    let mut entries = Vec::new();
    let mut pieces = Vec::new();

    for (i, (path, blocks)) in files.iter().enumerate() {
        let last = i + 1 == files.len();
        entries.push(dict(vec![
            ("length", Bencode::int(blocks.length)),
            ("path", Bencode::List(path.iter().map(|c| Bencode::str(c)).collect())),
        ]));
        pieces.extend(concat(blocks.block_hashes.iter().copied()));

        if last {
            pieces.extend(concat(blocks.last_hash));
        } else if let Some(padded) = blocks.last_hash_padded {
            pieces.extend_from_slice(&padded);
            let padding = blocks.padding_length.to_string();
            entries.push(dict(vec![
                ("attr", Bencode::str("p")),
                ("length", Bencode::int(blocks.padding_length)),
                (
                    "path",
                    Bencode::List(vec![Bencode::str(".pad"), Bencode::str(&padding)]),
                ),
            ]));
        }
    }

    dict(vec![
        ("files", Bencode::List(entries)),
        ("name", Bencode::str(name)),
        ("piece length", Bencode::int(piece_length)),
        ("pieces", Bencode::Bytes(pieces)),
    ])
}

pub async fn single_file_info_hash(
    cache: &BlockHashCache,
    name: &str,
    file: &Arc<dyn StreamFactory>,
    piece_length: u64,
) -> Result<InfoHash> {
    let blocks = cache.get_cached_block_info(piece_length, file).await?;
    Ok(info_hash(&single_file_info(name, piece_length, &blocks)))
}

/// Files are hashed in the given order; callers sort them.
pub async fn multi_file_info_hash(
    cache: &BlockHashCache,
    name: &str,
    files: &[TorrentFile],
    piece_length: u64,
) -> Result<InfoHash> {
    let mut resolved = Vec::with_capacity(files.len());
    for file in files {
        let blocks = cache.get_cached_block_info(piece_length, &file.source).await?;
        resolved.push((file.path.clone(), blocks));
    }
    Ok(info_hash(&multi_file_info(name, piece_length, &resolved)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::blocks::compute_blocks;
    use crate::stream::MemoryStreamFactory;
    use std::io::Cursor;

    #[test]
    fn test_bencode_encoding() {
        let value = dict(vec![
            ("b", Bencode::List(vec![Bencode::Int(-3), Bencode::str("xy")])),
            ("a", Bencode::int(42)),
        ]);
        assert_eq!(value.to_bytes(), b"d1:ai42e1:bli-3e2:xyee");
    }

    #[test]
    fn test_single_file_info_layout() {
        let blocks = compute_blocks(Cursor::new(b"abcdefghij".to_vec()), 4).unwrap();
        let info = single_file_info("f.txt", 4, &blocks).to_bytes();

        let mut expected = b"d6:lengthi10e4:name5:f.txt12:piece lengthi4e6:pieces60:".to_vec();
        expected.extend_from_slice(&Sha1::digest(b"abcd"));
        expected.extend_from_slice(&Sha1::digest(b"efgh"));
        expected.extend_from_slice(&Sha1::digest(b"ij"));
        expected.push(b'e');
        assert_eq!(info, expected);
    }

    #[test]
    fn test_multi_file_padding() {
        let a = Arc::new(compute_blocks(Cursor::new(b"abcdef".to_vec()), 4).unwrap());
        let b = Arc::new(compute_blocks(Cursor::new(b"xy".to_vec()), 4).unwrap());
        let info = multi_file_info(
            "dir",
            4,
            &[(vec!["a".into()], a), (vec!["sub".into(), "b".into()], b)],
        );

        let Bencode::Dict(top) = &info else {
            panic!("info is not a dictionary");
        };
        let Some(Bencode::List(files)) = top.get(&b"files".to_vec()) else {
            panic!("missing files");
        };
        assert_eq!(files.len(), 3);
        let pad = files[1].to_bytes();
        assert_eq!(pad, b"d4:attr1:p6:lengthi2e4:pathl4:.pad1:2ee");

        let Some(Bencode::Bytes(pieces)) = top.get(&b"pieces".to_vec()) else {
            panic!("missing pieces");
        };
        let mut expected = Vec::new();
        expected.extend_from_slice(&Sha1::digest(b"abcd"));
        expected.extend_from_slice(&Sha1::digest(b"ef\0\0"));
        expected.extend_from_slice(&Sha1::digest(b"xy"));
        assert_eq!(pieces, &expected);
    }

    #[tokio::test]
    async fn test_info_hash_reuses_cache() {
        let cache = BlockHashCache::new();
        let file: Arc<dyn StreamFactory> = Arc::new(MemoryStreamFactory::new(&b"hello torrent"[..]));

        let single = single_file_info_hash(&cache, "hello.txt", &file, 16384).await.unwrap();
        let files = vec![TorrentFile {
            path: vec!["hello.txt".into()],
            source: file.clone(),
        }];
        let multi = multi_file_info_hash(&cache, "dir", &files, 16384).await.unwrap();

        assert_ne!(single, multi);
        assert_eq!(cache.scans(), 1);
        assert!(single.urn().starts_with("urn:btih:"));
        assert_eq!(single.hex().len(), 40);
    }
}
