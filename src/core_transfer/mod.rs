pub mod handler;
pub mod producer;
pub mod sendfile;
pub mod throttle;

pub use handler::{DataChannel, TransferDirection, TransferOutcome};
pub use producer::{BytesProducer, FileProducer, IteratorProducer, Producer};
pub use throttle::Throttler;
