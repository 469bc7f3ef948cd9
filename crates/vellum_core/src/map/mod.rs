//! Named maps: flags, ordering and the handle registry.

mod flags;
mod registry;

pub use flags::{KeyOrder, MapFlags, MapLayout, ValueOrder};
pub(crate) use registry::{FrameOwner, MapRegistry};
