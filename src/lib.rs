//! # sigdata
//!
//! Binary data engine behind a signal/raster plotting widget: self-describing BLUE
//! headers, typed scalar views over raw bytes, and a fixed-capacity streaming pipe
//! that keeps typed elements aligned across wraparound.
//!
//! ## Crate Structure
//!
//! - **`sigdata-core`**: format descriptors, header model and
//!   geometry, typed views, and the `DataError` taxonomy.
//! - **`sigdata-storage`**: the `Pipe` ring buffer, heap and
//!   memory-mapped backing stores, live taps, and the BLUE file codec.
//! - **`config`**: Figment-based configuration from `sigdata.toml` and `SIGDATA_`
//!   environment variables.
//! - **`logging`**: `tracing-subscriber` initialisation.
//!
//! The `sigdata` binary (`inspect`, `replay`) is built on these modules.

pub mod config;
pub mod logging;

pub use sigdata_core::{
    derive_geometry, ByteOrder, DataError, DataResult, FormatDescriptor, Geometry, HeaderModel,
    Layout, TypedView,
};
pub use sigdata_storage::{BlueFile, CapacityPolicy, Pipe, PipeConfig, PipeHeader, PipeStats};
