//! Data read from feeds: interfaces, implementations and everything needed to choose between them.

pub mod version;
pub use version::Version;

pub mod restriction;
pub use restriction::{Restriction, VersionBounds};

pub mod arch;
pub use arch::Architecture;

pub mod implementation;
pub use implementation::*;

pub mod interface;
pub use interface::*;
