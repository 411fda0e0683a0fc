//! Format detection and parser dispatch.
//!
//! Every registered format whose signature matches the shared header becomes
//! a [`Candidate`]. Sources that allow concurrent opens have all candidates
//! parsed at once; single-access sources are parsed one candidate at a time.
//! Either way candidates are settled in precedence order (longer required
//! header first, then registration order) and the first successful parse
//! that still matches the full header wins.

use std::borrow::Cow;
use std::cmp::{Ordering, Reverse};
use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{ArchiverError, Result};
use crate::formats::{Format, FormatRegistry, FormatValue, HeaderHint};
use crate::stream::{read_up_to, StreamFactory};

/// Hard cap on the shared header, whatever formats request.
pub const MAX_HEADER_LENGTH: usize = 64 * 1024;

/// A detected format together with its parsed value.
#[derive(Clone)]
pub struct FormatObject {
    format: Arc<dyn Format>,
    value: Arc<dyn FormatValue>,
}

impl FormatObject {
    pub fn new(format: Arc<dyn Format>, value: Arc<dyn FormatValue>) -> Self {
        Self { format, value }
    }

    pub fn format_name(&self) -> &'static str {
        self.format.name()
    }

    pub fn format(&self) -> &Arc<dyn Format> {
        &self.format
    }

    pub fn value(&self) -> &Arc<dyn FormatValue> {
        &self.value
    }

    pub fn media_type(&self) -> Cow<'static, str> {
        self.value.media_type()
    }

    pub fn extension(&self) -> Option<Cow<'static, str>> {
        self.value.extension()
    }
}

impl std::fmt::Debug for FormatObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatObject")
            .field("format", &self.format_name())
            .field("media_type", &self.media_type())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    /// Matched; parse not yet settled.
    Pending,
    Rejected,
    Accepted,
}

type ParseTask = JoinHandle<Result<Arc<dyn FormatValue>>>;

/// A format whose signature matched.
pub struct Candidate {
    format: Arc<dyn Format>,
    index: usize,
    state: CandidateState,
    task: Option<ParseTask>,
}

impl Candidate {
    fn new(format: Arc<dyn Format>, index: usize) -> Self {
        Self {
            format,
            index,
            state: CandidateState::Pending,
            task: None,
        }
    }

    pub fn format(&self) -> &Arc<dyn Format> {
        &self.format
    }

    pub fn state(&self) -> CandidateState {
        self.state
    }

    fn precedence(&self) -> (Reverse<usize>, usize) {
        (Reverse(self.format.header_length()), self.index)
    }

    /// Opens `source` and parses it on the blocking pool.
    fn start(&mut self, source: &Arc<dyn StreamFactory>) {
        let format = self.format.clone();
        let source = source.clone();
        self.task = Some(tokio::spawn(async move {
            let stream = source.open().await?;
            tokio::task::spawn_blocking(move || format.parse(stream, source)).await?
        }));
    }

    /// Cancels an unsettled parse. A parser already running on the blocking
    /// pool finishes, but a source not yet opened is never opened.
    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            trace!("Aborting parse for {}", self.format.name());
            task.abort();
        }
    }

    async fn settle(&mut self) -> Option<Arc<dyn FormatValue>> {
        let task = self.task.take()?;
        let outcome = match task.await {
            Ok(result) => result,
            Err(e) => Err(ArchiverError::from(e)),
        };
        match outcome {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Format {} rejected: {}", self.format.name(), e);
                self.state = CandidateState::Rejected;
                None
            }
        }
    }
}

impl Drop for Candidate {
    fn drop(&mut self) {
        self.abort();
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.precedence() == other.precedence()
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.precedence().cmp(&other.precedence())
    }
}

pub struct FormatEngine {
    registry: Arc<FormatRegistry>,
    header_limit: usize,
    text_confidence: f32,
}

impl FormatEngine {
    pub fn new(registry: Arc<FormatRegistry>) -> Self {
        Self {
            registry,
            header_limit: MAX_HEADER_LENGTH,
            text_confidence: 0.5,
        }
    }

    pub fn with_header_limit(mut self, limit: usize) -> Self {
        self.header_limit = limit.min(MAX_HEADER_LENGTH);
        self
    }

    pub fn with_text_confidence(mut self, confidence: f32) -> Self {
        self.text_confidence = confidence;
        self
    }

    pub fn registry(&self) -> &Arc<FormatRegistry> {
        &self.registry
    }

    /// Bytes of shared header a caller should supply.
    pub fn header_length(&self) -> usize {
        self.registry.max_header_length().min(self.header_limit)
    }

    /// Reads the header itself, then detects. The header stream is closed
    /// before any parser opens the source.
    pub async fn detect(&self, source: &Arc<dyn StreamFactory>) -> Option<FormatObject> {
        if self.registry.is_empty() {
            return None;
        }
        let header = match self.read_header(source).await {
            Ok(header) => header,
            Err(e) => {
                debug!("Could not read header: {}", e);
                return None;
            }
        };
        self.detect_with_header(source, header).await
    }

    async fn read_header(&self, source: &Arc<dyn StreamFactory>) -> Result<Bytes> {
        let mut stream = source.open().await?;
        let len = self.header_length();
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            let n = read_up_to(&mut stream, &mut buf)?;
            buf.truncate(n);
            Ok(Bytes::from(buf))
        })
        .await?
    }

    /// Formats whose signature matches `header`, in precedence order.
    pub fn candidates(&self, header: &[u8], hint: &HeaderHint) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .registry
            .formats()
            .iter()
            .enumerate()
            .filter_map(|(index, format)| {
                let required = format.header_length();
                if required > header.len() {
                    trace!("Format {} needs {} header bytes", format.name(), required);
                    return None;
                }
                if !hint.admits(format.content_kind()) {
                    return None;
                }
                let prefix = if required == 0 { header } else { &header[..required] };
                format
                    .could_match(prefix, hint)
                    .then(|| Candidate::new(format.clone(), index))
            })
            .collect();
        candidates.sort();
        candidates
    }

    pub async fn detect_with_header(
        &self,
        source: &Arc<dyn StreamFactory>,
        header: Bytes,
    ) -> Option<FormatObject> {
        let header = if header.len() > self.header_limit {
            header.slice(..self.header_limit)
        } else {
            header
        };
        let hint = HeaderHint::from_header(&header, source.length(), self.text_confidence);
        let mut candidates = self.candidates(&header, &hint);
        if candidates.is_empty() {
            return None;
        }
        debug!(
            "{} candidate format(s): {:?}",
            candidates.len(),
            candidates.iter().map(|c| c.format.name()).collect::<Vec<_>>()
        );

        let concurrent = source.access_mode().allows_concurrency();
        if concurrent {
            for candidate in candidates.iter_mut() {
                candidate.start(source);
            }
        }

        // unsettled tasks are aborted when `candidates` drops
        for candidate in candidates.iter_mut() {
            if !concurrent {
                candidate.start(source);
            }
            let Some(value) = candidate.settle().await else {
                continue;
            };
            if !candidate.format.could_match(&header, &hint) {
                debug!("Format {} failed re-validation", candidate.format.name());
                candidate.state = CandidateState::Rejected;
                continue;
            }
            candidate.state = CandidateState::Accepted;
            return Some(FormatObject::new(candidate.format.clone(), value));
        }
        None
    }
}
