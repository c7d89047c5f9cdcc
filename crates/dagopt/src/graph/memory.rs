use std::sync::Arc;

use tracing::debug;

use crate::allocator::Blob;
use crate::error::{GraphError, Result};
use crate::tensor::TensorId;

use super::Graph;

impl Graph {
    /// Binds every tensor to a byte range of one shared block.
    ///
    /// All sizes are requested first so the allocator knows the total before the base
    /// block is materialised; only then are tensors bound to `base + offset`.
    pub fn data_malloc(&mut self) -> Result<()> {
        if !self.topo_sort() {
            return Err(GraphError::Cycle);
        }

        let mut offsets: Vec<(TensorId, usize)> = Vec::with_capacity(self.tensor_order.len());
        for id in &self.tensor_order {
            let bytes = self.tensors.get(id).map_or(0, |t| t.bytes());
            let offset = self.allocator.alloc(bytes)?;
            debug!(tensor = %id, offset, bytes, "tensor placed");
            offsets.push((*id, offset));
        }

        let base = self.allocator.base()?;
        for (id, offset) in offsets {
            self.tensor_mut_or_err(id)?
                .set_data_blob(Blob::new(Arc::clone(&base), offset));
        }

        self.allocator.info();
        Ok(())
    }
}
