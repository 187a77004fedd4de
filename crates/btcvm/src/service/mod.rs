//! Service layer: the block builder, block adapter and the VM facade.

pub mod block;
pub mod builder;
pub mod vm;

pub use block::BlockAdapter;
pub use builder::BlockBuilder;
pub use vm::{BtcVm, VERSION};
