pub mod delete_log;
pub mod file;
pub mod policy;
pub mod token;

pub use delete_log::DeleteLogWriter;
pub use file::FileService;
pub use policy::AccessPolicy;
