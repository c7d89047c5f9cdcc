//! Byte allocator consumed by [`Graph::data_malloc`](crate::graph::Graph::data_malloc).
//!
//! The protocol is two-phase: every tensor first requests a byte range and receives an
//! offset, then a single base block sized for all requests is materialised and each tensor
//! binds to `base + offset`.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::error::{GraphError, Result};

/// One contiguous storage block handed out by an allocator.
pub struct DataBlock {
    bytes: Box<[u8]>,
}

impl DataBlock {
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for DataBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBlock").field("len", &self.len()).finish()
    }
}

/// Storage binding of a tensor: a shared base block plus the tensor's byte offset.
#[derive(Debug, Clone)]
pub struct Blob {
    block: Arc<DataBlock>,
    offset: usize,
}

impl Blob {
    pub fn new(block: Arc<DataBlock>, offset: usize) -> Self {
        Self { block, offset }
    }

    pub fn block(&self) -> &Arc<DataBlock> {
        &self.block
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

pub trait Allocator: fmt::Debug + Send {
    /// Reserves `size` bytes and returns their offset from the future base block.
    fn alloc(&mut self, size: usize) -> Result<usize>;

    /// Returns the base block, materialising it on first call. No further `alloc` is
    /// accepted afterwards.
    fn base(&mut self) -> Result<Arc<DataBlock>>;

    /// Highest byte offset handed out so far.
    fn peak(&self) -> usize;

    /// Emits a diagnostic dump of the allocator state.
    fn info(&self);
}

/// Monotonic allocator: offsets only grow, nothing is reused or freed.
#[derive(Debug)]
pub struct BumpAllocator {
    used: usize,
    peak: usize,
    alignment: usize,
    block: Option<Arc<DataBlock>>,
}

impl BumpAllocator {
    pub fn new() -> Self {
        Self::with_alignment(1)
    }

    pub fn with_alignment(alignment: usize) -> Self {
        Self {
            used: 0,
            peak: 0,
            alignment: alignment.max(1),
            block: None,
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    fn aligned(&self, size: usize) -> usize {
        size.div_ceil(self.alignment) * self.alignment
    }
}

impl Default for BumpAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for BumpAllocator {
    fn alloc(&mut self, size: usize) -> Result<usize> {
        if self.block.is_some() {
            return Err(GraphError::Allocator(
                "alloc requested after the base block was materialised".to_string(),
            ));
        }
        let offset = self.used;
        self.used = self
            .used
            .checked_add(self.aligned(size))
            .ok_or_else(|| GraphError::Allocator(format!("offset overflow adding {size}")))?;
        self.peak = self.peak.max(self.used);
        Ok(offset)
    }

    fn base(&mut self) -> Result<Arc<DataBlock>> {
        let peak = self.peak;
        let block = self
            .block
            .get_or_insert_with(|| Arc::new(DataBlock::zeroed(peak)));
        Ok(Arc::clone(block))
    }

    fn peak(&self) -> usize {
        self.peak
    }

    fn info(&self) {
        info!(
            used = self.used,
            peak = self.peak,
            alignment = self.alignment,
            materialised = self.block.is_some(),
            "allocator state"
        );
    }
}
