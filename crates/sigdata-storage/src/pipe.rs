//! Fixed-capacity streaming pipe for typed data elements.
//!
//! A [`Pipe`] is a circular byte region with independent write and read cursors.
//! Producers call [`Pipe::fill`] with whole elements; consumers call
//! [`Pipe::drain`] and get back as many whole elements as are available.
//!
//! # Architecture
//!
//! The cursors are a monotonically increasing write head and read tail measured in
//! bits, so a full pipe and an empty pipe are never
//! confused. The physical offset is `position % capacity`. Bits rather than bytes
//! let packed single-bit formats pack densely; for every other format all positions
//! are multiples of eight and byte and bit accounting coincide.
//!
//! The transfer unit is the *element*: one atom for flat layouts, one row of
//! `sub_element_count` atoms for matrix layouts.
//!
//! ## Wraparound
//!
//! When a fill runs past the physical end of the store the copy is split at byte
//! granularity: the first bytes go to the tail, the rest resume at byte 0. A
//! complex atom can therefore have its real part at the end of the store and its
//! imaginary part at the start. Reads go through a ring [`TypedView`], which
//! reassembles such atoms transparently.
//!
//! ## Failure semantics
//!
//! - `fill` is all-or-nothing. If the elements do not fit it fails with
//!   [`DataError::PipeFull`] and the cursors are untouched.
//! - `drain` never fails. It returns fewer elements than requested (possibly 0).
//!
//! # Thread Safety
//!
//! Single producer, single consumer, one owner: `fill` and `drain` take `&mut self`.
//! Callers sharing a pipe between threads wrap it in their own mutex. Taps are
//! internally synchronised because their receivers live on other tasks.
//!
//! # Example
//!
//! ```
//! use sigdata_core::{derive_geometry, FormatDescriptor, Layout};
//! use sigdata_storage::pipe::{Pipe, PipeConfig};
//!
//! let cf = FormatDescriptor::resolve("CF")?;
//! let geometry = derive_geometry(cf, Layout::Flat, 0, 1)?;
//! let mut pipe = Pipe::new(&geometry, PipeConfig::new(16))?;
//!
//! pipe.fill(&[1.0, 2.0, 3.0, 4.0], 2)?;
//! assert!(pipe.fill(&[5.0, 6.0], 1).is_err());
//!
//! assert_eq!(pipe.drain_to_vec(1), vec![1.0, 2.0]);
//! pipe.fill(&[5.0, 6.0], 1)?;
//! assert_eq!(pipe.available_to_read(), 16);
//! # Ok::<(), sigdata_core::DataError>(())
//! ```

use crate::store::BackingStore;
use crate::tap_registry::{TapFrame, TapRegistry};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sigdata_core::limits::{bits_to_bytes_ceil, MAX_PIPE_BYTES};
use sigdata_core::view::encode_scalars;
use sigdata_core::{ByteOrder, DataError, DataResult, Geometry, HeaderModel, TypedView};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// How a capacity that is not a whole number of elements is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Reject the configuration with [`DataError::MisalignedCapacity`].
    #[default]
    Strict,
    /// Accept it. Cursors still wrap at the physical capacity, elements may straddle
    /// the end of the store, and the trailing `capacity % element_size` bytes can
    /// never be occupied alongside a full set of elements. Existing streams are sized
    /// this way, so the behaviour is kept exactly.
    OddRemainder,
}

/// Construction parameters of a [`Pipe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeConfig {
    /// Size of the backing store in bytes.
    pub capacity_bytes: u64,
    /// Treatment of a capacity that is not a whole number of elements.
    #[serde(default)]
    pub policy: CapacityPolicy,
    /// Frames buffered per tap before frames are dropped.
    #[serde(default = "default_tap_channel_size")]
    pub tap_channel_size: usize,
}

fn default_tap_channel_size() -> usize {
    crate::tap_registry::DEFAULT_TAP_CHANNEL_SIZE
}

impl PipeConfig {
    /// Strict configuration of `capacity_bytes`.
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            policy: CapacityPolicy::Strict,
            tap_channel_size: default_tap_channel_size(),
        }
    }

    /// Set the capacity policy.
    pub fn with_policy(mut self, policy: CapacityPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the per-tap channel size.
    pub fn with_tap_channel_size(mut self, size: usize) -> Self {
        self.tap_channel_size = size;
        self
    }
}

/// Counters describing a pipe's traffic since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipeStats {
    /// Successful fills.
    pub fills: u64,
    /// Fills rejected with [`DataError::PipeFull`].
    pub rejected_fills: u64,
    /// Drains that returned at least one element.
    pub drains: u64,
    /// Drains that returned fewer elements than requested.
    pub short_drains: u64,
    /// Elements accepted by fills.
    pub elements_filled: u64,
    /// Elements returned by drains or discarded by skips.
    pub elements_drained: u64,
}

/// Check that a capacity suits a geometry under a policy.
pub fn validate_capacity(
    geometry: &Geometry,
    capacity_bytes: u64,
    policy: CapacityPolicy,
) -> DataResult<()> {
    if capacity_bytes > MAX_PIPE_BYTES {
        return Err(DataError::invalid_geometry(
            geometry.element_count(),
            geometry.sub_element_count(),
            format!(
                "pipe capacity {} bytes exceeds maximum {} bytes",
                capacity_bytes, MAX_PIPE_BYTES
            ),
        ));
    }

    let element_bits = geometry.bits_per_element();
    let capacity_bits = capacity_bytes * 8;
    let misaligned = DataError::MisalignedCapacity {
        capacity_bytes,
        element_bits,
    };

    if capacity_bits < element_bits {
        return Err(misaligned);
    }
    if policy == CapacityPolicy::Strict && capacity_bits % element_bits != 0 {
        return Err(misaligned);
    }
    Ok(())
}

/// Circular buffer of typed elements.
pub struct Pipe {
    geometry: Geometry,
    policy: CapacityPolicy,
    order: ByteOrder,
    store: BackingStore,
    capacity_bits: u64,

    /// Bits written since creation or the last reset (monotonically increasing)
    write_head: u64,

    /// Bits consumed since creation or the last reset
    read_tail: u64,

    // Reused encode buffer for byte-aligned formats
    scratch: Vec<u8>,

    taps: Arc<TapRegistry>,
    stats: PipeStats,
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("format", &self.geometry.format().code())
            .field("capacity", &self.capacity())
            .field("policy", &self.policy)
            .field("write_head", &self.write_head)
            .field("read_tail", &self.read_tail)
            .field("tap_count", &self.taps.count())
            .field("path", &self.store.path())
            .finish()
    }
}

impl Pipe {
    /// Create a heap-backed pipe for elements of `geometry`.
    ///
    /// Data is stored in the platform's native byte order.
    pub fn new(geometry: &Geometry, config: PipeConfig) -> DataResult<Self> {
        validate_capacity(geometry, config.capacity_bytes, config.policy)?;
        let store = BackingStore::heap(config.capacity_bytes as usize);
        Ok(Self::with_store(geometry, config, ByteOrder::NATIVE, store))
    }

    /// Create a heap-backed pipe using a header's geometry and byte order.
    pub fn from_header(header: &HeaderModel, config: PipeConfig) -> DataResult<Self> {
        let geometry = header.geometry();
        validate_capacity(&geometry, config.capacity_bytes, config.policy)?;
        let store = BackingStore::heap(config.capacity_bytes as usize);
        Ok(Self::with_store(&geometry, config, header.byte_order(), store))
    }

    /// Create a pipe whose store is a memory-mapped file at `path`.
    ///
    /// # Example
    /// ```no_run
    /// use std::path::Path;
    /// use sigdata_core::{derive_geometry, FormatDescriptor, Layout};
    /// use sigdata_storage::pipe::{Pipe, PipeConfig};
    ///
    /// let sf = FormatDescriptor::resolve("SF")?;
    /// let geometry = derive_geometry(sf, Layout::Flat, 0, 1)?;
    /// let pipe = Pipe::create_mapped(Path::new("/dev/shm/live.pipe"), &geometry, PipeConfig::new(1 << 20))?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn create_mapped(path: &Path, geometry: &Geometry, config: PipeConfig) -> Result<Self> {
        validate_capacity(geometry, config.capacity_bytes, config.policy)?;
        let store = BackingStore::mapped(path, config.capacity_bytes as usize)
            .with_context(|| format!("Failed to create mapped pipe at {:?}", path))?;
        Ok(Self::with_store(geometry, config, ByteOrder::NATIVE, store))
    }

    fn with_store(
        geometry: &Geometry,
        config: PipeConfig,
        order: ByteOrder,
        store: BackingStore,
    ) -> Self {
        let capacity_bits = config.capacity_bytes * 8;
        let remainder_bits = capacity_bits % geometry.bits_per_element();

        tracing::info!(
            format = %geometry.format(),
            capacity_bytes = config.capacity_bytes,
            element_bits = geometry.bits_per_element(),
            policy = ?config.policy,
            unusable_bits = remainder_bits,
            "Created pipe"
        );

        Self {
            geometry: *geometry,
            policy: config.policy,
            order,
            store,
            capacity_bits,
            write_head: 0,
            read_tail: 0,
            scratch: Vec::new(),
            taps: Arc::new(TapRegistry::with_channel_size(config.tap_channel_size)),
            stats: PipeStats::default(),
        }
    }

    /// Write `count` elements taken from the front of `source`.
    ///
    /// `source` must hold at least `count * scalars_per_element` scalars (real and
    /// imaginary parts interleaved for complex formats); otherwise the call fails with
    /// [`DataError::OutOfRange`] before anything is written.
    ///
    /// # Errors
    /// [`DataError::PipeFull`] when the elements do not fit in the free space. Nothing
    /// is written and the cursors are unchanged; drain and retry, or drop the frame.
    pub fn fill(&mut self, source: &[f64], count: usize) -> DataResult<()> {
        let scalars_per_element = self.geometry.scalars_per_element();
        let scalars = count.saturating_mul(scalars_per_element);
        if source.len() < scalars {
            return Err(DataError::OutOfRange {
                index: scalars - 1,
                len: source.len(),
            });
        }
        if count == 0 {
            return Ok(());
        }

        let bits_needed = (count as u64).saturating_mul(self.geometry.bits_per_element());
        if bits_needed > self.free_bits() {
            self.stats.rejected_fills += 1;
            let err = DataError::PipeFull {
                needed_bytes: bits_to_bytes_ceil(bits_needed),
                available_bytes: self.available_to_write(),
            };
            tracing::debug!(count, error = %err, "Rejected fill");
            return Err(err);
        }

        let frame = &source[..scalars];
        let start_bit = self.write_head % self.capacity_bits;
        let format = *self.geometry.format();

        if format.is_packed() {
            let mut view = TypedView::ring(
                self.store.as_mut_slice(),
                format,
                self.order,
                start_bit,
                scalars,
            )?;
            for (i, &value) in frame.iter().enumerate() {
                view.write_scalar(i, value)?;
            }
        } else {
            self.scratch.clear();
            encode_scalars(&format, self.order, frame, &mut self.scratch);
            self.store
                .write_wrapped((start_bit / 8) as usize, &self.scratch);
        }

        self.write_head += bits_needed;
        self.stats.fills += 1;
        self.stats.elements_filled += count as u64;

        tracing::trace!(
            count,
            write_cursor = self.write_cursor(),
            available = self.available_to_read(),
            "Filled pipe"
        );

        if self.taps.notify_all(frame) {
            let pruned = self.taps.prune_closed();
            tracing::debug!(pruned, "Removed taps with closed receivers");
        }
        Ok(())
    }

    /// Read and consume up to `max` elements into `dest`.
    ///
    /// Returns the number of elements written to `dest`: the smallest of `max`, the
    /// elements available, and the elements `dest` can hold. An empty pipe returns 0.
    pub fn drain(&mut self, dest: &mut [f64], max: usize) -> usize {
        let returned = self.peek(dest, max);
        if returned > 0 {
            self.read_tail += returned as u64 * self.geometry.bits_per_element();
            self.stats.drains += 1;
            self.stats.elements_drained += returned as u64;
        }
        if returned < max {
            self.stats.short_drains += 1;
            tracing::trace!(requested = max, returned, "Short drain");
        }
        returned
    }

    /// Drain up to `max` elements into a new vector.
    pub fn drain_to_vec(&mut self, max: usize) -> Vec<f64> {
        let elements = max.min(self.readable_elements());
        let mut out = vec![0.0; elements * self.geometry.scalars_per_element()];
        let returned = self.drain(&mut out, elements);
        out.truncate(returned * self.geometry.scalars_per_element());
        out
    }

    /// Copy up to `max` elements into `dest` without consuming them.
    pub fn peek(&self, dest: &mut [f64], max: usize) -> usize {
        let scalars_per_element = self.geometry.scalars_per_element();
        let count = max
            .min(self.readable_elements())
            .min(dest.len() / scalars_per_element);
        if count == 0 {
            return 0;
        }

        // The window covers only unread bits, which never exceed the store, and
        // `dest` was sized above, so the ring view cannot be out of range.
        let scalars = count * scalars_per_element;
        let start_bit = self.read_tail % self.capacity_bits;
        let decoded = TypedView::ring(
            self.store.as_slice(),
            *self.geometry.format(),
            self.order,
            start_bit,
            scalars,
        )
        .and_then(|view| view.read_scalars_into(0, &mut dest[..scalars]));
        debug_assert!(decoded.is_ok(), "unread window out of range: {:?}", decoded);

        match decoded {
            Ok(()) => count,
            Err(_) => 0,
        }
    }

    /// Discard up to `max` unread elements. Returns how many were discarded.
    pub fn skip(&mut self, max: usize) -> usize {
        let count = max.min(self.readable_elements());
        self.read_tail += count as u64 * self.geometry.bits_per_element();
        self.stats.elements_drained += count as u64;
        count
    }

    /// Read-only view over the unread scalars, oldest first.
    pub fn unread_view(&self) -> DataResult<TypedView<&[u8]>> {
        let scalars = (self.used_bits() / u64::from(self.geometry.format().bits_per_scalar()))
            as usize;
        TypedView::ring(
            self.store.as_slice(),
            *self.geometry.format(),
            self.order,
            self.read_tail % self.capacity_bits,
            scalars,
        )
    }

    /// Discard all data, zero the store and return both cursors to 0.
    pub fn reset(&mut self) {
        tracing::info!(
            discarded_bytes = self.available_to_read(),
            "Reset pipe"
        );
        self.write_head = 0;
        self.read_tail = 0;
        self.store.clear();
    }

    /// Switch to a new element geometry, keeping the capacity. Resets the pipe.
    ///
    /// On error the pipe keeps its previous geometry and contents.
    pub fn reconfigure(&mut self, geometry: &Geometry) -> DataResult<()> {
        validate_capacity(geometry, self.capacity(), self.policy)?;
        tracing::info!(
            from = %self.geometry.format(),
            to = %geometry.format(),
            element_bits = geometry.bits_per_element(),
            "Reconfiguring pipe"
        );
        self.geometry = *geometry;
        self.reset();
        Ok(())
    }

    // =========================================================================
    // Geometry accessors
    // =========================================================================

    /// Capacity of the store in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity_bits / 8
    }

    /// Bytes holding unread data. A partially occupied byte counts as unread.
    pub fn available_to_read(&self) -> u64 {
        bits_to_bytes_ceil(self.used_bits())
    }

    /// Free bytes. Always `capacity() - available_to_read()`.
    pub fn available_to_write(&self) -> u64 {
        self.capacity() - self.available_to_read()
    }

    /// Whole elements that can be drained.
    pub fn readable_elements(&self) -> usize {
        (self.used_bits() / self.geometry.bits_per_element()) as usize
    }

    /// Whole elements that can be filled.
    pub fn writable_elements(&self) -> usize {
        (self.free_bits() / self.geometry.bits_per_element()) as usize
    }

    /// Byte offset of the write cursor in `[0, capacity)`.
    pub fn write_cursor(&self) -> u64 {
        (self.write_head % self.capacity_bits) / 8
    }

    /// Byte offset of the read cursor in `[0, capacity)`.
    pub fn read_cursor(&self) -> u64 {
        (self.read_tail % self.capacity_bits) / 8
    }

    /// Bits filled since creation or the last reset.
    pub fn bits_written(&self) -> u64 {
        self.write_head
    }

    /// Bits drained or skipped since creation or the last reset.
    pub fn bits_read(&self) -> u64 {
        self.read_tail
    }

    /// Whether there is nothing to drain.
    pub fn is_empty(&self) -> bool {
        self.used_bits() == 0
    }

    /// Element geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Capacity policy.
    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    /// Byte order of stored scalars.
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Traffic counters.
    pub fn stats(&self) -> PipeStats {
        self.stats
    }

    /// Path of the mapped store, if any.
    pub fn store_path(&self) -> Option<&Path> {
        self.store.path()
    }

    /// Flush a mapped store to disk.
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    fn used_bits(&self) -> u64 {
        self.write_head - self.read_tail
    }

    fn free_bits(&self) -> u64 {
        self.capacity_bits - self.used_bits()
    }

    // =========================================================================
    // Taps
    // =========================================================================

    /// Register a tap receiving every `nth_frame`-th filled frame.
    ///
    /// # Example
    /// ```no_run
    /// # use sigdata_core::{derive_geometry, FormatDescriptor, Layout};
    /// # use sigdata_storage::pipe::{Pipe, PipeConfig};
    /// # async fn example() -> anyhow::Result<()> {
    /// let sf = FormatDescriptor::resolve("SF")?;
    /// let pipe = Pipe::new(&derive_geometry(sf, Layout::Flat, 0, 1)?, PipeConfig::new(4096))?;
    ///
    /// let mut rx = pipe.register_tap("preview".to_string(), 10)?;
    /// tokio::spawn(async move {
    ///     while let Some(frame) = rx.recv().await {
    ///         println!("Preview frame: {} scalars", frame.len());
    ///     }
    /// });
    /// # Ok(())
    /// # }
    /// ```
    pub fn register_tap(&self, id: String, nth_frame: usize) -> Result<mpsc::Receiver<TapFrame>> {
        let rx = self.taps.register(id.clone(), nth_frame)?;
        tracing::info!("Registered tap '{}' (every {}th frame)", id, nth_frame);
        Ok(rx)
    }

    /// Unregister a tap. Returns whether it existed.
    pub fn unregister_tap(&self, id: &str) -> bool {
        let removed = self.taps.unregister(id);
        if removed {
            tracing::info!("Unregistered tap '{}'", id);
        }
        removed
    }

    /// Number of registered taps.
    pub fn tap_count(&self) -> usize {
        self.taps.count()
    }

    /// Registered taps as (id, nth_frame, dropped_frames).
    pub fn list_taps(&self) -> Vec<(String, usize, u64)> {
        self.taps.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigdata_core::{derive_geometry, Atom, FormatDescriptor, Layout};

    fn flat(code: &str) -> Geometry {
        derive_geometry(FormatDescriptor::resolve(code).unwrap(), Layout::Flat, 0, 1).unwrap()
    }

    fn matrix(code: &str, subsize: u64) -> Geometry {
        derive_geometry(
            FormatDescriptor::resolve(code).unwrap(),
            Layout::Matrix,
            0,
            subsize,
        )
        .unwrap()
    }

    fn assert_conserved(pipe: &Pipe) {
        assert_eq!(
            pipe.available_to_read() + pipe.available_to_write(),
            pipe.capacity()
        );
    }

    #[test]
    fn test_real_float_partial_drain() {
        let mut pipe = Pipe::new(&flat("SF"), PipeConfig::new(16)).unwrap();
        assert_eq!(pipe.writable_elements(), 4);

        pipe.fill(&[1.0, 2.0], 2).unwrap();
        assert_eq!(pipe.available_to_read(), 8);

        let mut out = [0.0; 4];
        assert_eq!(pipe.drain(&mut out, 4), 2);
        assert_eq!(&out[..2], &[1.0, 2.0]);
        assert_eq!(pipe.available_to_read(), 0);
        assert_conserved(&pipe);
    }

    #[test]
    fn test_complex_full_then_retry() {
        let mut pipe = Pipe::new(&flat("CF"), PipeConfig::new(16)).unwrap();

        pipe.fill(&[1.0, 2.0, 3.0, 4.0], 2).unwrap();
        assert_eq!(pipe.available_to_write(), 0);

        let err = pipe.fill(&[5.0, 6.0], 1).unwrap_err();
        assert_eq!(
            err,
            DataError::PipeFull {
                needed_bytes: 8,
                available_bytes: 0
            }
        );
        assert_eq!(pipe.available_to_read(), 16);
        assert_eq!(pipe.write_cursor(), 0);
        assert_eq!(pipe.read_cursor(), 0);

        assert_eq!(pipe.drain_to_vec(1), vec![1.0, 2.0]);
        pipe.fill(&[5.0, 6.0], 1).unwrap();
        assert_eq!(pipe.drain_to_vec(2), vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(pipe.stats().rejected_fills, 1);
    }

    #[test]
    fn test_complex_atom_straddles_wrap() {
        // 12 bytes: one CF atom plus half of another.
        let mut pipe = Pipe::new(
            &flat("CF"),
            PipeConfig::new(12).with_policy(CapacityPolicy::OddRemainder),
        )
        .unwrap();

        pipe.fill(&[1.0, 2.0], 1).unwrap();
        assert_eq!(pipe.drain_to_vec(1), vec![1.0, 2.0]);

        // Write cursor at 8: the real part lands at 8..12, the imaginary at 0..4.
        pipe.fill(&[3.0, 4.0], 1).unwrap();
        assert_eq!(pipe.write_cursor(), 4);

        let view = pipe.unread_view().unwrap();
        assert_eq!(view.read_atom(0).unwrap(), Atom::Complex { re: 3.0, im: 4.0 });
        assert_eq!(pipe.drain_to_vec(1), vec![3.0, 4.0]);
    }

    #[test]
    fn test_strict_rejects_misaligned_capacity() {
        let err = Pipe::new(&matrix("CF", 4), PipeConfig::new(80)).unwrap_err();
        assert_eq!(
            err,
            DataError::MisalignedCapacity {
                capacity_bytes: 80,
                element_bits: 256
            }
        );
        assert!(Pipe::new(&flat("SF"), PipeConfig::new(0)).is_err());
        assert!(Pipe::new(
            &flat("SD"),
            PipeConfig::new(4).with_policy(CapacityPolicy::OddRemainder)
        )
        .is_err());
    }

    #[test]
    fn test_odd_remainder_free_byte_sequence() {
        let mut pipe = Pipe::new(
            &matrix("CF", 4),
            PipeConfig::new(80).with_policy(CapacityPolicy::OddRemainder),
        )
        .unwrap();
        let row: Vec<f64> = (0..8).map(f64::from).collect();

        assert_eq!(pipe.available_to_write(), 80);
        pipe.fill(&row, 1).unwrap();
        pipe.fill(&row, 1).unwrap();
        assert_eq!((pipe.available_to_read(), pipe.available_to_write()), (64, 16));

        assert!(pipe.fill(&row, 1).is_err());
        assert_eq!((pipe.available_to_read(), pipe.available_to_write()), (64, 16));

        assert_eq!(pipe.drain_to_vec(1), row);
        assert_eq!((pipe.available_to_read(), pipe.available_to_write()), (32, 48));

        let shifted: Vec<f64> = (10..18).map(f64::from).collect();
        pipe.fill(&shifted, 1).unwrap();
        assert_eq!(pipe.write_cursor(), 16);
        assert_eq!((pipe.available_to_read(), pipe.available_to_write()), (64, 16));

        assert_eq!(pipe.drain_to_vec(1), row);
        assert_eq!(pipe.drain_to_vec(1), shifted);
        assert_eq!((pipe.available_to_read(), pipe.available_to_write()), (0, 80));
    }

    #[test]
    fn test_packed_bits_pack_densely() {
        let mut pipe = Pipe::new(&flat("SP"), PipeConfig::new(2)).unwrap();
        assert_eq!(pipe.writable_elements(), 16);

        pipe.fill(&[1.0, 0.0, 1.0], 3).unwrap();
        assert_eq!(pipe.available_to_read(), 1);
        pipe.fill(&[0.0, 0.0, 0.0, 1.0, 1.0], 5).unwrap();
        assert_eq!(pipe.readable_elements(), 8);
        assert_conserved(&pipe);

        assert_eq!(
            pipe.drain_to_vec(8),
            vec![1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_packed_bits_wrap() {
        let mut pipe = Pipe::new(&flat("SP"), PipeConfig::new(1)).unwrap();
        pipe.fill(&[1.0; 6], 6).unwrap();
        assert_eq!(pipe.drain_to_vec(5).len(), 5);

        // 2 bits at the tail, 3 wrapped to the head of the byte.
        pipe.fill(&[0.0, 1.0, 0.0, 1.0, 0.0], 5).unwrap();
        assert_eq!(pipe.readable_elements(), 6);
        assert_eq!(
            pipe.drain_to_vec(6),
            vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0]
        );
    }

    #[test]
    fn test_short_source_rejected_without_mutation() {
        let mut pipe = Pipe::new(&flat("CF"), PipeConfig::new(32)).unwrap();
        assert!(matches!(
            pipe.fill(&[1.0, 2.0, 3.0], 2),
            Err(DataError::OutOfRange { .. })
        ));
        assert!(pipe.is_empty());
    }

    #[test]
    fn test_drain_limited_by_destination() {
        let mut pipe = Pipe::new(&flat("CI"), PipeConfig::new(16)).unwrap();
        pipe.fill(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0], 3).unwrap();

        let mut out = [0.0; 3];
        assert_eq!(pipe.drain(&mut out, 10), 1);
        assert_eq!(&out[..2], &[1.0, -1.0]);
        assert_eq!(pipe.readable_elements(), 2);
    }

    #[test]
    fn test_peek_and_skip() {
        let mut pipe = Pipe::new(&flat("SD"), PipeConfig::new(64)).unwrap();
        pipe.fill(&[1.0, 2.0, 3.0], 3).unwrap();

        let mut out = [0.0; 2];
        assert_eq!(pipe.peek(&mut out, 2), 2);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(pipe.readable_elements(), 3);

        assert_eq!(pipe.skip(2), 2);
        assert_eq!(pipe.drain_to_vec(5), vec![3.0]);
    }

    #[test]
    fn test_empty_drain_is_not_an_error() {
        let mut pipe = Pipe::new(&flat("SF"), PipeConfig::new(16)).unwrap();
        let mut out = [0.0; 4];
        assert_eq!(pipe.drain(&mut out, 4), 0);
        assert_eq!(pipe.stats().short_drains, 1);
    }

    #[test]
    fn test_reset_and_reconfigure() {
        let mut pipe = Pipe::new(&flat("SF"), PipeConfig::new(32)).unwrap();
        pipe.fill(&[1.0, 2.0, 3.0], 3).unwrap();
        pipe.drain_to_vec(1);

        pipe.reset();
        assert_eq!((pipe.write_cursor(), pipe.read_cursor()), (0, 0));
        assert!(pipe.is_empty());

        pipe.fill(&[1.0], 1).unwrap();
        assert!(pipe.reconfigure(&matrix("CF", 3)).is_err());
        assert_eq!(pipe.readable_elements(), 1);

        pipe.reconfigure(&matrix("CF", 2)).unwrap();
        assert!(pipe.is_empty());
        assert_eq!(pipe.writable_elements(), 2);
    }

    #[test]
    fn test_big_endian_store_roundtrip() {
        let header = HeaderModel::builder(*FormatDescriptor::resolve("SL").unwrap())
            .byte_order(ByteOrder::Big)
            .build()
            .unwrap();
        let mut pipe = Pipe::from_header(&header, PipeConfig::new(8)).unwrap();
        pipe.fill(&[258.0, -7.0], 2).unwrap();
        assert_eq!(pipe.byte_order(), ByteOrder::Big);
        assert_eq!(pipe.drain_to_vec(2), vec![258.0, -7.0]);
    }

    #[test]
    fn test_mapped_pipe() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("live.pipe");

        let mut pipe = Pipe::create_mapped(&path, &flat("SB"), PipeConfig::new(4)).unwrap();
        pipe.fill(&[1.0, 2.0, 3.0], 3).unwrap();
        pipe.flush().unwrap();
        assert_eq!(pipe.store_path(), Some(path.as_path()));

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 0]);
        assert_eq!(pipe.drain_to_vec(3), vec![1.0, 2.0, 3.0]);

        // A viewer mapping the same file sees a blank store after a reset.
        pipe.reset();
        pipe.flush().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_tap_receives_filled_frames() {
        let mut pipe = Pipe::new(&flat("SF"), PipeConfig::new(64)).unwrap();
        let mut rx = pipe.register_tap("preview".to_string(), 2).unwrap();
        assert_eq!(pipe.tap_count(), 1);

        for i in 0..4 {
            pipe.fill(&[f64::from(i)], 1).unwrap();
        }

        let first = tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&first[..], &[0.0]);
        let second = rx.recv().await.unwrap();
        assert_eq!(&second[..], &[2.0]);

        assert!(pipe.unregister_tap("preview"));
        assert_eq!(pipe.tap_count(), 0);
    }

    #[test]
    fn test_rejected_fill_does_not_notify_taps() {
        let mut pipe = Pipe::new(&flat("SF"), PipeConfig::new(4)).unwrap();
        let mut rx = pipe.register_tap("all".to_string(), 1).unwrap();
        pipe.fill(&[1.0], 1).unwrap();
        assert!(pipe.fill(&[2.0], 1).is_err());

        assert_eq!(&rx.try_recv().unwrap()[..], &[1.0]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_taps_are_pruned_on_fill() {
        let mut pipe = Pipe::new(&flat("SF"), PipeConfig::new(16)).unwrap();
        let gone = pipe.register_tap("gone".to_string(), 1).unwrap();
        let _kept = pipe.register_tap("kept".to_string(), 1).unwrap();
        drop(gone);

        pipe.fill(&[1.0], 1).unwrap();
        assert_eq!(pipe.tap_count(), 1);
        assert_eq!(pipe.list_taps()[0].0, "kept");
    }
}
