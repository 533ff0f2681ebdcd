//! devicemgrd library exports for the binary, integration tests and fuzzing.
//!
//! The crate mirrors a hardware-configuration library's device tree onto
//! D-Bus. [`tree::ObjectTree`] owns the bus objects, each [`object::BusObject`]
//! holds a reference on its library handle through a
//! [`binding::HandleBinding`], and [`path`] derives every object path.

pub mod binding;
pub mod bus;
pub mod config;
pub mod daemon;
pub mod error;
pub mod hardware;
pub mod object;
pub mod panic_handler;
pub mod path;
pub mod tree;

// Re-export commonly used types for convenience
pub use binding::HandleBinding;
pub use config::Config;
pub use error::CoreError;
pub use hardware::{EntityKind, HandleId, HardwareLibrary, MemoryLibrary};
pub use object::BusObject;
pub use tree::ObjectTree;
