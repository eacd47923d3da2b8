pub mod error;
pub mod header;
pub mod layout;
pub mod metadata;
pub mod block;
pub mod source;
pub mod cache;
pub mod container;

pub use error::{HpkgError, Result};
pub use header::{HeaderOptions, OptionValue, HEADER_CAPACITY, MAGIC};
pub use layout::Layout;
pub use metadata::{BlockDescriptor, Metadata, PreviewDescriptor};
pub use block::Block;
pub use source::{BlockSource, FileSource, MemorySource};
pub use cache::{Slot, SlotStatus};
pub use container::{Container, OpenOptions};
