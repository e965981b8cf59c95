pub mod poller;
pub mod reactor;
pub mod scheduler;

pub use poller::{Interest, IoEvent, OsPoller, Poller};
pub use reactor::{EventHandler, Reactor};
pub use scheduler::{Scheduler, TimerHandle};
