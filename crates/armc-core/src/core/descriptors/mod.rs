pub mod array;
pub mod registry;

pub use array::{Descriptor, DescriptorError};
pub use registry::{ArgValue, DescriptorArgs, DescriptorFn, DescriptorRegistry, DescriptorSpec};
