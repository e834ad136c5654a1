//! Block hand-off from miners to the validator.

mod block_channel;
pub mod codec;

pub use block_channel::{BlockReceiver, BlockSender, block_channel};
