pub mod comm;
pub mod runtime;

pub use comm::{ChannelComm, Communicator, HaloPayload, SerialComm};
pub use runtime::{AbortHandle, PartitionGroup};
