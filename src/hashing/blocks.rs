//! Per-block SHA-1 digests, computed once per (block size, content).

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::cache::PromiseMap;
use crate::error::{ArchiverError, Result};
use crate::stream::{read_up_to, DedupKey, StreamFactory};

/// Bytes read ahead per parallel hashing batch.
const BATCH_BYTES: u64 = 8 * 1024 * 1024;

pub type BlockHash = [u8; 20];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// Digests of every full block, in order.
    pub block_hashes: Vec<BlockHash>,
    /// Digest of the final partial block, zero-padded to the block size.
    pub last_hash_padded: Option<BlockHash>,
    /// Digest of the final partial block as is.
    pub last_hash: Option<BlockHash>,
    /// Zero bytes appended to reach a block boundary.
    pub padding_length: u64,
    pub length: u64,
}

/// Shares block digests between everything that needs them for one run, so
/// a file referenced by several torrents is only read once per block size.
#[derive(Default)]
pub struct BlockHashCache {
    entries: PromiseMap<(u64, DedupKey), Arc<BlockInfo>>,
    scans: AtomicUsize,
}

impl BlockHashCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_cached_block_info(
        &self,
        block_size: u64,
        file: &Arc<dyn StreamFactory>,
    ) -> Result<Arc<BlockInfo>> {
        if block_size == 0 {
            return Err(ArchiverError::Config("block size must be positive".into()));
        }
        let key = (block_size, file.dedup_key());
        let scans = &self.scans;
        let file = file.clone();
        let (info, _) = self
            .entries
            .get_or_try_init(key, move || async move {
                scans.fetch_add(1, Ordering::Relaxed);
                let stream = file.open().await?;
                let info =
                    tokio::task::spawn_blocking(move || compute_blocks(stream, block_size)).await??;
                debug!(
                    "Computed {} block hash(es) of {} bytes",
                    info.block_hashes.len(),
                    block_size
                );
                Ok::<_, ArchiverError>(Arc::new(info))
            })
            .await?;
        Ok(info)
    }

    /// Number of sources actually read so far.
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }
}

fn sha1_block(data: &[u8]) -> BlockHash {
    Sha1::digest(data).into()
}

pub fn compute_blocks<R: Read>(mut stream: R, block_size: u64) -> Result<BlockInfo> {
    let size = usize::try_from(block_size)
        .map_err(|_| ArchiverError::Config(format!("block size {} is too large", block_size)))?;
    let per_batch = (BATCH_BYTES / block_size).max(1) as usize;

    let mut info = BlockInfo {
        block_hashes: Vec::new(),
        last_hash_padded: None,
        last_hash: None,
        padding_length: 0,
        length: 0,
    };

    let mut done = false;
    while !done {
        let mut batch = Vec::with_capacity(per_batch);
        while batch.len() < per_batch {
            let mut block = vec![0u8; size];
            let n = read_up_to(&mut stream, &mut block)?;
            info.length += n as u64;
            if n == size {
                batch.push(block);
                continue;
            }
            if n > 0 {
                let mut hasher = Sha1::new();
                hasher.update(&block[..n]);
                info.last_hash = Some(hasher.clone().finalize().into());
                // the buffer tail is still zeroed
                hasher.update(&block[n..]);
                info.last_hash_padded = Some(hasher.finalize().into());
                info.padding_length = (size - n) as u64;
            }
            done = true;
            break;
        }
        let hashes: Vec<BlockHash> = batch.par_iter().map(|block| sha1_block(block)).collect();
        info.block_hashes.extend(hashes);
    }

    Ok(info)
}
