pub mod error;
pub use error::Result;
pub use error::Error;

pub mod config;
pub use config::{Config, NetworkUse};

pub mod model;
pub use model::{Implementation, Interface, Feed, Stability};

pub mod catalog;
pub use catalog::IfaceCache;

pub mod store;
pub use store::Stores;

pub mod trust;
pub use trust::TrustDb;

pub mod fetch;
pub use fetch::Fetcher;

pub mod solver;
pub use solver::Solver;

pub mod policy;
pub use policy::Policy;

pub mod session;
pub use session::Session;

pub mod pipeline;
pub use pipeline::Pipeline;
