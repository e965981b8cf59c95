pub mod filesystem;
pub mod listing;

pub use filesystem::{strerror, VirtualFs};
