pub mod allocator;
pub mod clock;
pub mod moment;
pub mod registry;
pub mod sender;
pub mod transport;

pub use allocator::{AllocationError, BlockAllocator, NodeIdAllocator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use moment::{Moment, MomentError, MomentScheduler};
pub use registry::{RegistryConfig, ResourceRegistry, ResponseHandler};
pub use sender::{spawn_sender, QueuedUdpSink};
pub use transport::{RecordingSink, TransportError, TransportSink, UdpSink};
