//! External event ingestion: a durable Redis Streams listener that turns
//! bus events into jobs with at-least-once semantics.
//!
//! Acknowledgment is tied to job admission: an entry is XACK'd only after
//! the job manager accepted the job (or the message proved unprocessable).
//! Unacknowledged entries are re-delivered once their idle time passes the
//! visibility timeout.

pub mod listener;
pub mod message;
pub mod stream;

pub use listener::{BrokerConfig, BrokerListener, Disposition, JobManagerBridge};
pub use message::EventMessage;
pub use stream::{StreamClient, StreamEntry};
