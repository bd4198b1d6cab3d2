pub mod traits;
pub mod xyz;
