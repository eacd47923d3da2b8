//! High-level [`Container`] API: the primary embedding surface.
//!
//! ```no_run
//! use hpkg::{Block, Container};
//!
//! # async fn demo() -> hpkg::Result<()> {
//! // Build
//! let mut pkg = Container::init("Holiday", vec!["sea".into()], chrono::Utc::now());
//! pkg.set_preview(Block::new("image/jpeg", vec![0xff, 0xd8]))
//!    .add(Block::new("image/png", vec![0x89, b'P', b'N', b'G']))
//!    .add(Block::new("text/plain", &b"caption"[..]));
//! pkg.write("holiday.hpkg").await?;
//!
//! // Read: metadata eagerly, payloads on demand
//! let pkg = Container::open("holiday.hpkg").await?;
//! assert_eq!(pkg.metadata().title, "Holiday");
//! let caption = pkg.get(1).await?.expect("two blocks were added");
//! assert_eq!(&caption.binary[..], b"caption");
//! # Ok(())
//! # }
//! ```
//!
//! A container either wraps a [`BlockSource`] it was opened from, or starts
//! empty via [`Container::init`]. Blocks added in memory and blocks still on
//! disk share one cache, so an opened container can be extended and written
//! to a new path.
//!
//! Writing is not transactional: a failure part way through leaves a file
//! that cannot be reopened.

use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, trace, warn};

use crate::block::Block;
use crate::cache::{Lookup, Slot, SlotCache, SlotStatus};
use crate::error::{HpkgError, Result};
use crate::header::{HeaderOptions, HEADER_CAPACITY};
use crate::layout::Layout;
use crate::metadata::{BlockDescriptor, Metadata};
use crate::source::{BlockSource, FileSource, MemorySource};

// ── OpenOptions ───────────────────────────────────────────────────────────────

/// Configuration for [`Container::open_with`].
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Leading bytes scanned for the header text. A header that does not fit
    /// is a format violation.
    pub header_capacity: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self { header_capacity: HEADER_CAPACITY }
    }
}

// ── Backing ───────────────────────────────────────────────────────────────────

struct Backing {
    source: Arc<dyn BlockSource>,
    header: HeaderOptions,
    layout: Layout,
}

impl Backing {
    /// Future reading `descriptor`'s bytes at `start`, provided they stay
    /// inside the region ending at `region_end`.
    fn materialize(
        &self,
        slot:       Slot,
        start:      u64,
        region_end: u64,
        descriptor: &BlockDescriptor,
    ) -> Result<BoxFuture<'static, Result<Block>>> {
        let fits = start
            .checked_add(descriptor.length)
            .is_some_and(|end| end <= region_end);
        if !fits {
            return Err(HpkgError::header(format!(
                "{slot:?} ({} bytes at offset {start}) runs past its region ending at {region_end}",
                descriptor.length
            )));
        }
        let length = usize::try_from(descriptor.length)
            .map_err(|_| HpkgError::header(format!("{slot:?} is too large to load")))?;

        let source    = Arc::clone(&self.source);
        let data_type = descriptor.data_type.clone();
        Ok(async move {
            trace!(?slot, start, length, "materializing");
            let binary = source.read_at(start, length).await?;
            Ok(Block { data_type, binary })
        }
        .boxed())
    }
}

// ── Container ─────────────────────────────────────────────────────────────────

pub struct Container {
    metadata: Metadata,
    backing:  Option<Backing>,
    cache:    SlotCache,
}

impl Container {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Start an empty container in build mode.
    pub fn init(title: impl Into<String>, tags: Vec<String>, date: DateTime<Utc>) -> Self {
        Self {
            metadata: Metadata::new(title, tags, date),
            backing:  None,
            cache:    SlotCache::default(),
        }
    }

    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &OpenOptions::default()).await
    }

    pub async fn open_with<P: AsRef<Path>>(path: P, opts: &OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let source = FileSource::open(path).await?;
        debug!(path = %path.display(), "opening container");
        Self::from_source(Arc::new(source), opts).await
    }

    /// Open a container image held in memory.
    pub async fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        Self::from_source(Arc::new(MemorySource::new(data)), &OpenOptions::default()).await
    }

    /// Parse the header and metadata tail of `source`. Payloads are not read.
    pub async fn from_source(source: Arc<dyn BlockSource>, opts: &OpenOptions) -> Result<Self> {
        let file_size = source.size().await?;
        let capacity = usize::try_from(file_size)
            .map_or(opts.header_capacity, |size| size.min(opts.header_capacity));
        let raw = source.read_at(0, capacity).await?;
        let (header, header_len) = HeaderOptions::parse(&raw)?;

        let body_size = file_size - header_len as u64;
        if header.tail_length > body_size {
            return Err(HpkgError::header(format!(
                "tail_length {} exceeds the {body_size} bytes after the header",
                header.tail_length
            )));
        }
        let tail_length = usize::try_from(header.tail_length)
            .map_err(|_| HpkgError::header("tail_length is too large to load"))?;
        let tail = source.read_at(file_size - header.tail_length, tail_length).await?;
        let metadata = Metadata::from_bytes(&tail)?;

        let described = metadata.array_length().ok_or_else(|| {
            HpkgError::header("block descriptor lengths overflow a 64-bit sum")
        })?;
        let array_length = match header.array_length {
            Some(n) => n,
            None => {
                warn!(derived = described, "header has no array_length; using the descriptor sum");
                described
            }
        };
        if described != array_length {
            warn!(array_length, described, "descriptor lengths disagree with array_length");
        }
        if let (Some(preview), Some(expected)) = (&metadata.preview, header.preview_length) {
            if preview.length != expected {
                warn!(preview_length = expected, described = preview.length,
                      "preview descriptor disagrees with preview_length");
            }
        }

        let layout = Layout::new(
            file_size,
            header.tail_length,
            array_length,
            header.preview_length.unwrap_or(0),
        )?;
        if layout.preview_region_start() < header_len as u64 {
            return Err(HpkgError::header(format!(
                "payload regions overlap the {header_len}-byte header"
            )));
        }

        debug!(
            file_size,
            header_len,
            blocks = metadata.array.len(),
            preview = metadata.preview.is_some(),
            "container opened"
        );
        Ok(Self {
            metadata,
            backing: Some(Backing { source, header, layout }),
            cache:   SlotCache::default(),
        })
    }

    // ── Build ─────────────────────────────────────────────────────────────────

    /// Replace the preview. Calling twice keeps only the second block.
    pub fn set_preview(&mut self, block: Block) -> &mut Self {
        self.metadata.preview = Some(block.descriptor());
        self.cache.fill(Slot::Preview, block);
        self
    }

    /// Append a block after every existing one.
    pub fn add(&mut self, block: Block) -> &mut Self {
        let index = self.metadata.array.len();
        self.metadata.array.push(block.descriptor());
        self.cache.fill(Slot::Block(index), block);
        self
    }

    // ── Read ──────────────────────────────────────────────────────────────────

    /// Block `index`, read from the source on first use and cached afterwards.
    ///
    /// `Ok(None)` when no block has that index.
    pub async fn get(&self, index: usize) -> Result<Option<Block>> {
        let slot = Slot::Block(index);
        let lookup = self.cache.lookup_or_start(slot, || {
            let (Some(descriptor), Some(backing)) = (self.metadata.array.get(index), &self.backing)
            else {
                return Ok(None);
            };
            let lengths = self.metadata.array.iter().map(|d| d.length);
            let start = backing.layout.block_offset(lengths, index)?;
            backing
                .materialize(slot, start, backing.layout.tail_offset(), descriptor)
                .map(Some)
        })?;
        self.settle(slot, lookup).await
    }

    /// The preview, read on first use and cached afterwards.
    ///
    /// `Ok(None)` when the metadata has no preview descriptor, or when the
    /// file's header carried no `preview_length`.
    pub async fn get_preview(&self) -> Result<Option<Block>> {
        let lookup = self.cache.lookup_or_start(Slot::Preview, || {
            let (Some(descriptor), Some(backing)) = (&self.metadata.preview, &self.backing) else {
                return Ok(None);
            };
            if backing.header.preview_length.is_none() {
                return Ok(None);
            }
            backing
                .materialize(
                    Slot::Preview,
                    backing.layout.preview_region_start(),
                    backing.layout.array_region_start(),
                    descriptor,
                )
                .map(Some)
        })?;
        self.settle(Slot::Preview, lookup).await
    }

    async fn settle(&self, slot: Slot, lookup: Lookup) -> Result<Option<Block>> {
        match lookup {
            Lookup::Ready(block)     => Ok(Some(block)),
            Lookup::Pending(pending) => self.cache.resolve(slot, pending).await.map(Some),
            Lookup::Absent           => Ok(None),
        }
    }

    /// Read `length` raw bytes at absolute offset `start`, bypassing the cache.
    pub async fn read_block(&self, start: u64, length: usize) -> Result<Bytes> {
        match &self.backing {
            Some(backing) => Ok(backing.source.read_at(start, length).await?),
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "container has no backing source",
            )
            .into()),
        }
    }

    // ── Write ─────────────────────────────────────────────────────────────────

    /// Serialize the container to a new file at `path`.
    ///
    /// Every block still on the source is materialized before the file is
    /// created, so `path` may be the file this container was opened from.
    pub async fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let (preview, blocks) = self.collect_payloads().await?;
        let mut writer = BufWriter::new(File::create(path).await?);
        self.emit(&mut writer, preview.as_ref(), &blocks).await?;
        writer.flush().await?;
        debug!(path = %path.display(), blocks = blocks.len(), "container written");
        Ok(())
    }

    /// Serialize the container into `writer`.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let (preview, blocks) = self.collect_payloads().await?;
        self.emit(writer, preview.as_ref(), &blocks).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write_to(&mut out).await?;
        Ok(out)
    }

    async fn collect_payloads(&self) -> Result<(Option<Block>, Vec<Block>)> {
        let preview = self.get_preview().await?;
        let mut blocks = Vec::with_capacity(self.len());
        for index in 0..self.len() {
            blocks.push(self.get(index).await?.ok_or(HpkgError::MissingBlock(index))?);
        }
        Ok((preview, blocks))
    }

    /// Header, preview, blocks in descriptor order, then the tail. The tail
    /// describes exactly the payloads written.
    async fn emit<W: AsyncWrite + Unpin>(
        &self,
        writer:  &mut W,
        preview: Option<&Block>,
        blocks:  &[Block],
    ) -> Result<()> {
        let mut tail_meta = self.metadata.clone();
        tail_meta.preview = preview.map(Block::descriptor);
        tail_meta.array   = blocks.iter().map(Block::descriptor).collect();
        let tail = tail_meta.to_bytes()?;

        let array_length = tail_meta
            .array_length()
            .ok_or_else(|| HpkgError::header("block lengths overflow a 64-bit sum"))?;
        let mut header = HeaderOptions::new(
            preview.map_or(0, Block::len),
            array_length,
            tail.len() as u64,
        );
        if let Some(backing) = &self.backing {
            header.extra = backing.header.extra.clone();
        }

        writer.write_all(header.encode().as_bytes()).await?;
        if let Some(preview) = preview {
            writer.write_all(&preview.binary).await?;
        }
        for block in blocks {
            writer.write_all(&block.binary).await?;
        }
        writer.write_all(&tail).await?;
        Ok(())
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn metadata(&self) -> &Metadata { &self.metadata }

    /// Header options parsed on open; `None` in build mode.
    pub fn header(&self) -> Option<&HeaderOptions> {
        self.backing.as_ref().map(|b| &b.header)
    }

    /// Region offsets of the opened file; `None` in build mode.
    pub fn layout(&self) -> Option<&Layout> {
        self.backing.as_ref().map(|b| &b.layout)
    }

    /// Number of blocks.
    pub fn len(&self) -> usize { self.metadata.array.len() }

    pub fn is_empty(&self) -> bool { self.metadata.array.is_empty() }

    /// Whether `slot` has been requested, is being read, or is cached.
    pub fn slot_status(&self, slot: Slot) -> SlotStatus {
        self.cache.status(slot)
    }
}

impl Default for Container {
    /// An empty container titled `"N/A"`, with no tags, dated now.
    fn default() -> Self {
        let Metadata { title, tags, date, .. } = Metadata::default();
        Self::init(title, tags, date)
    }
}
