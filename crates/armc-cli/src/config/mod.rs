pub mod builder;
pub mod defaults;
pub mod file;
pub mod models;

pub use builder::{build_config, build_parameter_set};
pub use file::FileConfig;
pub use models::AppConfig;
