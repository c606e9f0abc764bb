//! Transport layer: broker seams and the two thin clients.
//!
//! The stream side ([`StreamProducer`] over [`StreamBroker`]) is a
//! buffered fire-and-forget publisher with a delivery-confirmation task;
//! the queue side ([`QueueClient`] over [`QueueBroker`]) is a lazy,
//! timeout-guarded connection shared process-wide. [`memory`] provides
//! the in-process implementations of both seams.

pub mod memory;
pub mod queue;
pub mod stream;

pub use memory::{MemoryQueueBroker, MemoryStreamBroker};
pub use queue::{DeliveryAck, QueueBroker, QueueClient, QueueConnection, QueueDelivery};
pub use stream::{
    DeliveryHandle, DeliveryReport, StreamBroker, StreamProducer, StreamRecord,
    StreamSubscription,
};
