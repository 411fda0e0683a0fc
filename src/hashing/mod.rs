//! Single-pass hashing pipeline.
//!
//! A producer reads the source once in fixed-size chunks and broadcasts each
//! chunk to one bounded queue per hash algorithm. Every algorithm consumes its
//! queue on its own task, so a failing algorithm only loses its own result.
//! The producer also classifies the content as text or binary and hands the
//! first bytes to format detection as soon as they are available.

pub mod blocks;
pub mod encoding;
pub mod torrent;

pub use blocks::{BlockHashCache, BlockInfo};
pub use encoding::{classify, classify_prefix, EncodingDetector, EncodingVerdict};

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use sha2::Digest;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{ArchiverError, Result};
use crate::stream::{read_up_to, ByteStream, StreamFactory};

/// Chunks buffered per algorithm before the producer waits.
const QUEUE_DEPTH: usize = 8;

/// A pluggable hash algorithm.
pub trait HashAlgorithm: Send + Sync {
    /// Name in the `ni` hash algorithm registry, e.g. `sha-256`.
    fn name(&self) -> &str;

    /// Human-readable label, e.g. `SHA-256`.
    fn label(&self) -> &str {
        self.name()
    }

    fn start(&self) -> Box<dyn IncrementalHash>;
}

pub trait IncrementalHash: Send {
    fn update(&mut self, data: &[u8]) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinHash {
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Blake3,
    Crc32,
}

impl BuiltinHash {
    pub const ALL: &'static [BuiltinHash] = &[
        BuiltinHash::Md5,
        BuiltinHash::Sha1,
        BuiltinHash::Sha256,
        BuiltinHash::Sha512,
        BuiltinHash::Blake3,
        BuiltinHash::Crc32,
    ];

    /// Accepts registry names and common spellings (`SHA256`, `sha-256`).
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "md5" => Some(BuiltinHash::Md5),
            "sha1" => Some(BuiltinHash::Sha1),
            "sha256" => Some(BuiltinHash::Sha256),
            "sha512" => Some(BuiltinHash::Sha512),
            "blake3" => Some(BuiltinHash::Blake3),
            "crc32" => Some(BuiltinHash::Crc32),
            _ => None,
        }
    }
}

impl HashAlgorithm for BuiltinHash {
    fn name(&self) -> &str {
        match self {
            BuiltinHash::Md5 => "md5",
            BuiltinHash::Sha1 => "sha-1",
            BuiltinHash::Sha256 => "sha-256",
            BuiltinHash::Sha512 => "sha-512",
            BuiltinHash::Blake3 => "blake3",
            BuiltinHash::Crc32 => "crc32",
        }
    }

    fn label(&self) -> &str {
        match self {
            BuiltinHash::Md5 => "MD5",
            BuiltinHash::Sha1 => "SHA-1",
            BuiltinHash::Sha256 => "SHA-256",
            BuiltinHash::Sha512 => "SHA-512",
            BuiltinHash::Blake3 => "BLAKE3",
            BuiltinHash::Crc32 => "CRC-32",
        }
    }

    fn start(&self) -> Box<dyn IncrementalHash> {
        match self {
            BuiltinHash::Md5 => Box::new(DigestHash(md5::Md5::new())),
            BuiltinHash::Sha1 => Box::new(DigestHash(sha1::Sha1::new())),
            BuiltinHash::Sha256 => Box::new(DigestHash(sha2::Sha256::new())),
            BuiltinHash::Sha512 => Box::new(DigestHash(sha2::Sha512::new())),
            BuiltinHash::Blake3 => Box::new(Blake3Hash(blake3::Hasher::new())),
            BuiltinHash::Crc32 => Box::new(Crc32Hash(crc32fast::Hasher::new())),
        }
    }
}

struct DigestHash<D>(D);

impl<D: Digest + Send> IncrementalHash for DigestHash<D> {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        Digest::update(&mut self.0, data);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(self.0.finalize().to_vec())
    }
}

struct Blake3Hash(blake3::Hasher);

impl IncrementalHash for Blake3Hash {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        self.0.update(data);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(self.0.finalize().as_bytes().to_vec())
    }
}

struct Crc32Hash(crc32fast::Hasher);

impl IncrementalHash for Crc32Hash {
    fn update(&mut self, data: &[u8]) -> Result<()> {
        self.0.update(data);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(self.0.finalize().to_be_bytes().to_vec())
    }
}

/// Resolves a configured algorithm name.
pub fn algorithm_by_name(name: &str) -> Option<Arc<dyn HashAlgorithm>> {
    BuiltinHash::from_name(name).map(|h| Arc::new(h) as Arc<dyn HashAlgorithm>)
}

/// A finished digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashValue {
    pub algorithm: String,
    pub label: String,
    pub digest: Vec<u8>,
}

impl HashValue {
    /// RFC 6920 `ni` URI naming the hashed content.
    pub fn ni_uri(&self) -> String {
        format!("ni:///{};{}", self.algorithm, URL_SAFE_NO_PAD.encode(&self.digest))
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub chunk_size: usize,
    /// Bytes forwarded to format detection.
    pub header_length: usize,
    /// Minimum text confidence; below it content is binary.
    pub text_confidence: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024,
            header_length: 64 * 1024,
            text_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HashOutcome {
    pub length: u64,
    pub encoding: EncodingVerdict,
    /// Successful digests, in configured order.
    pub hashes: Vec<HashValue>,
    /// Names of algorithms that failed.
    pub failures: Vec<String>,
}

impl HashOutcome {
    pub fn primary(&self) -> Option<&HashValue> {
        self.hashes.first()
    }
}

struct Scan {
    length: u64,
    detector: EncodingDetector,
}

/// Reads `source` exactly once, feeding every algorithm and the encoding
/// detector. When `header_tx` is given, the first `header_length` bytes (or
/// the whole stream if shorter) are sent through it as soon as they are read.
pub async fn hash_and_detect(
    source: &dyn StreamFactory,
    algorithms: &[Arc<dyn HashAlgorithm>],
    settings: PipelineSettings,
    header_tx: Option<oneshot::Sender<Bytes>>,
) -> Result<HashOutcome> {
    if settings.chunk_size == 0 {
        return Err(ArchiverError::Config("chunk size must be positive".into()));
    }
    let stream = source.open().await?;

    let mut senders = Vec::with_capacity(algorithms.len());
    let mut consumers = Vec::with_capacity(algorithms.len());
    for algorithm in algorithms {
        let (tx, rx) = mpsc::channel::<Bytes>(QUEUE_DEPTH);
        senders.push(Some(tx));
        consumers.push(tokio::spawn(consume(algorithm.clone(), rx)));
    }

    let scan = tokio::task::spawn_blocking(move || produce(stream, senders, settings, header_tx))
        .await??;

    let mut hashes = Vec::new();
    let mut failures = Vec::new();
    for (algorithm, consumer) in algorithms.iter().zip(consumers) {
        let result = match consumer.await {
            Ok(result) => result,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(digest) => hashes.push(HashValue {
                algorithm: algorithm.name().to_string(),
                label: algorithm.label().to_string(),
                digest,
            }),
            Err(e) => {
                warn!("Hash {} failed: {}", algorithm.name(), e);
                failures.push(algorithm.name().to_string());
            }
        }
    }

    let encoding = scan.detector.finish(settings.text_confidence);
    debug!(
        "Hashed {} bytes with {} algorithm(s), binary={}",
        scan.length,
        hashes.len(),
        encoding.is_binary
    );

    Ok(HashOutcome {
        length: scan.length,
        encoding,
        hashes,
        failures,
    })
}

async fn consume(algorithm: Arc<dyn HashAlgorithm>, mut rx: mpsc::Receiver<Bytes>) -> Result<Vec<u8>> {
    let mut state = algorithm.start();
    while let Some(chunk) = rx.recv().await {
        state.update(&chunk)?;
    }
    state.finish()
}

fn produce(
    mut stream: Box<dyn ByteStream>,
    mut senders: Vec<Option<mpsc::Sender<Bytes>>>,
    settings: PipelineSettings,
    mut header_tx: Option<oneshot::Sender<Bytes>>,
) -> Result<Scan> {
    let mut detector = EncodingDetector::new();
    let mut header = BytesMut::with_capacity(settings.header_length);
    let mut buf = vec![0u8; settings.chunk_size];
    let mut length = 0u64;

    if settings.header_length == 0 {
        if let Some(tx) = header_tx.take() {
            let _ = tx.send(Bytes::new());
        }
    }

    loop {
        let n = read_up_to(&mut stream, &mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = Bytes::copy_from_slice(&buf[..n]);
        length += n as u64;
        detector.feed(&chunk);

        if header_tx.is_some() {
            let take = (settings.header_length - header.len()).min(n);
            header.extend_from_slice(&chunk[..take]);
            if header.len() == settings.header_length {
                if let Some(tx) = header_tx.take() {
                    let _ = tx.send(header.split().freeze());
                }
            }
        }

        for slot in senders.iter_mut() {
            if let Some(tx) = slot {
                if tx.blocking_send(chunk.clone()).is_err() {
                    *slot = None;
                }
            }
        }

        if n < buf.len() {
            break;
        }
    }

    if let Some(tx) = header_tx.take() {
        let _ = tx.send(header.freeze());
    }

    Ok(Scan { length, detector })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStreamFactory;

    fn algorithms(names: &[&str]) -> Vec<Arc<dyn HashAlgorithm>> {
        names.iter().map(|n| algorithm_by_name(n).unwrap()).collect()
    }

    struct FailingHash;

    struct FailingState;

    impl HashAlgorithm for FailingHash {
        fn name(&self) -> &str {
            "broken"
        }

        fn start(&self) -> Box<dyn IncrementalHash> {
            Box::new(FailingState)
        }
    }

    impl IncrementalHash for FailingState {
        fn update(&mut self, _data: &[u8]) -> Result<()> {
            Err(ArchiverError::hash("broken", "refusing input"))
        }

        fn finish(self: Box<Self>) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(BuiltinHash::from_name("SHA256"), Some(BuiltinHash::Sha256));
        assert_eq!(BuiltinHash::from_name("sha-1"), Some(BuiltinHash::Sha1));
        assert_eq!(BuiltinHash::from_name("whirlpool"), None);
        for hash in BuiltinHash::ALL {
            assert_eq!(BuiltinHash::from_name(hash.name()), Some(*hash));
        }
    }

    #[test]
    fn test_ni_uri() {
        let value = HashValue {
            algorithm: "sha-256".into(),
            label: "SHA-256".into(),
            digest: vec![0xfb, 0xff, 0x01],
        };
        assert_eq!(value.ni_uri(), "ni:///sha-256;-_8B");
        assert_eq!(value.hex(), "fbff01");
    }

    #[tokio::test]
    async fn test_known_digests() {
        let source = MemoryStreamFactory::new(&b"hello\n"[..]);
        let outcome = hash_and_detect(
            &source,
            &algorithms(&["md5", "sha-1", "sha-256"]),
            PipelineSettings::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.length, 6);
        assert!(!outcome.encoding.is_binary);
        assert_eq!(outcome.hashes.len(), 3);
        assert_eq!(outcome.hashes[0].hex(), "b1946ac92492d2347c6235b4d2611184");
        assert_eq!(outcome.hashes[1].hex(), "f572d396fae9206628714fb2ce00f72e94f2258f");
        assert_eq!(
            outcome.hashes[2].hex(),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[tokio::test]
    async fn test_chunking_does_not_change_digest() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let source = MemoryStreamFactory::new(data.clone());
        let algs = algorithms(&["sha-256", "blake3", "crc32"]);

        let small = PipelineSettings {
            chunk_size: 7,
            ..Default::default()
        };
        let a = hash_and_detect(&source, &algs, small, None).await.unwrap();
        let b = hash_and_detect(&source, &algs, PipelineSettings::default(), None)
            .await
            .unwrap();

        assert_eq!(a.hashes, b.hashes);
        assert_eq!(a.length, data.len() as u64);
        assert_eq!(a.hashes[0].digest, sha2::Sha256::digest(&data).to_vec());
    }

    #[tokio::test]
    async fn test_failing_algorithm_is_isolated() {
        let source = MemoryStreamFactory::new(vec![7u8; 100_000]);
        let algs: Vec<Arc<dyn HashAlgorithm>> = vec![
            Arc::new(FailingHash),
            Arc::new(BuiltinHash::Sha1),
        ];
        let settings = PipelineSettings {
            chunk_size: 1024,
            ..Default::default()
        };

        let outcome = hash_and_detect(&source, &algs, settings, None).await.unwrap();
        assert_eq!(outcome.failures, vec!["broken".to_string()]);
        assert_eq!(outcome.hashes.len(), 1);
        assert_eq!(outcome.hashes[0].algorithm, "sha-1");
        assert_eq!(outcome.length, 100_000);
    }

    #[tokio::test]
    async fn test_header_delivered_early() {
        let data: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let source = MemoryStreamFactory::new(data.clone());
        let (tx, rx) = oneshot::channel();
        let settings = PipelineSettings {
            chunk_size: 100,
            header_length: 250,
            text_confidence: 0.5,
        };

        let outcome = hash_and_detect(&source, &algorithms(&["md5"]), settings, Some(tx))
            .await
            .unwrap();
        let header = rx.await.unwrap();
        assert_eq!(&header[..], &data[..250]);
        assert!(outcome.encoding.is_binary);
    }

    #[tokio::test]
    async fn test_header_shorter_than_limit() {
        let source = MemoryStreamFactory::new(&b"abc"[..]);
        let (tx, rx) = oneshot::channel();
        hash_and_detect(&source, &[], PipelineSettings::default(), Some(tx))
            .await
            .unwrap();
        assert_eq!(&rx.await.unwrap()[..], b"abc");
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let source = MemoryStreamFactory::new(Bytes::new());
        let outcome = hash_and_detect(
            &source,
            &algorithms(&["sha-256"]),
            PipelineSettings::default(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome.length, 0);
        assert!(!outcome.encoding.is_binary);
        assert_eq!(
            outcome.hashes[0].hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
