use bytes::Bytes;

use crate::metadata::BlockDescriptor;

/// A materialized block: the payload of one descriptor plus its type tag.
///
/// `binary` is reference counted, so handing a cached block to several
/// callers does not copy the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub data_type: String,
    pub binary:    Bytes,
}

impl Block {
    pub fn new(data_type: impl Into<String>, binary: impl Into<Bytes>) -> Self {
        Self {
            data_type: data_type.into(),
            binary:    binary.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.binary.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.binary.is_empty()
    }

    /// The descriptor recorded in the metadata tail for this payload.
    pub fn descriptor(&self) -> BlockDescriptor {
        BlockDescriptor {
            length:    self.len(),
            data_type: self.data_type.clone(),
        }
    }
}
