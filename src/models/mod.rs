pub mod delete_log;
pub mod file;

pub use delete_log::*;
pub use file::*;
