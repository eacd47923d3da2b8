//! Byte layout of an HPKG file.
//!
//! ```text
//! [header text][preview][block 0][block 1]...[block N-1][tail JSON]
//! ```
//!
//! The header length is implicit, so every region is located backward from
//! the end of the file using the three explicit length fields.

use crate::error::{HpkgError, Result};

/// Region lengths of one file. Construction checks that they fit, so the
/// offset accessors never underflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub file_size:      u64,
    pub tail_length:    u64,
    pub array_length:   u64,
    pub preview_length: u64,
}

impl Layout {
    pub fn new(
        file_size:      u64,
        tail_length:    u64,
        array_length:   u64,
        preview_length: u64,
    ) -> Result<Self> {
        let total = tail_length
            .checked_add(array_length)
            .and_then(|n| n.checked_add(preview_length));
        match total {
            Some(total) if total <= file_size => Ok(Self {
                file_size,
                tail_length,
                array_length,
                preview_length,
            }),
            _ => Err(HpkgError::header(format!(
                "lengths (preview {preview_length}, array {array_length}, tail {tail_length}) \
                 exceed the file size {file_size}"
            ))),
        }
    }

    pub fn tail_offset(&self) -> u64 {
        self.file_size - self.tail_length
    }

    pub fn array_region_start(&self) -> u64 {
        self.tail_offset() - self.array_length
    }

    /// Equals [`Self::array_region_start`] when there is no preview.
    pub fn preview_region_start(&self) -> u64 {
        self.array_region_start() - self.preview_length
    }

    /// Offset of block `index`, given every block length in descriptor order.
    ///
    /// Recomputes the prefix sum on each call; containers hold few blocks.
    /// Lengths come from the tail, so an overflowing sum is a header error.
    pub fn block_offset<I>(&self, lengths: I, index: usize) -> Result<u64>
    where
        I: IntoIterator<Item = u64>,
    {
        lengths
            .into_iter()
            .take(index)
            .try_fold(self.array_region_start(), |offset, len| offset.checked_add(len))
            .ok_or_else(|| HpkgError::header(format!("offset of block {index} overflows")))
    }
}
