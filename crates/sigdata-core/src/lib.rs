//! Core types for the sigdata data engine.
//!
//! Dependency order, leaf first:
//!
//! - [`format`]: two-letter format codes resolved to [`FormatDescriptor`]s
//! - [`header`]: [`HeaderModel`] geometry, axes and ordered keyword metadata
//! - [`view`]: [`TypedView`] scalar access over raw bytes, including packed bits and
//!   ring windows
//! - [`error`]: the [`DataError`] taxonomy shared by every layer
//!
//! The streaming pipe built on these types lives in `sigdata-storage`.

pub mod error;
pub mod format;
pub mod header;
pub mod limits;
pub mod view;

pub use error::{DataError, DataResult};
pub use format::{FormatDescriptor, ScalarKind, ScalarType, Shape};
pub use header::{
    derive_geometry, Axis, ByteOrder, ExtendedMetadata, Geometry, GeometryUpdate, HeaderBuilder,
    HeaderModel, Keyword, KeywordValue, Layout,
};
pub use view::{Atom, TypedView};
