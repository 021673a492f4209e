//! Background job module.

mod dispatcher;

pub use dispatcher::{DispatchSnapshot, DispatchStats, DispatcherHandle, PublishDispatcher, PublishJob};
