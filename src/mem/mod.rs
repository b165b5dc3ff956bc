pub mod addr_range;
pub mod block;
pub mod dispatcher;
pub mod event;
pub mod flat_mem;
pub mod packet;
pub mod port;

pub use addr_range::AddrRange;
pub use block::{BlockKey, BlockMatrix};
pub use dispatcher::{Dispatcher, DispatcherParams, DispatcherStats, PortId};
pub use event::{Event, EventHandle, EventQueue, Scheduler};
pub use flat_mem::{FlatMemory, FlatPort};
pub use packet::{Command, Packet, PacketId, Requester, Resource, Tick, Tier};
pub use port::{Fabric, Peer, Port, PortRole, RetryOutbox};
