pub mod local;
pub mod provider;
pub mod tier;

pub use local::*;
pub use provider::*;
pub use tier::*;
