//! Streaming pipe, backing stores, live taps and the BLUE file codec.

pub mod bluefile;
pub mod pipe;
pub mod store;
pub mod tap_registry;

pub use bluefile::{BlueFile, PipeHeader};
pub use pipe::{CapacityPolicy, Pipe, PipeConfig, PipeStats};
pub use store::BackingStore;
pub use tap_registry::{TapFrame, TapRegistry};
