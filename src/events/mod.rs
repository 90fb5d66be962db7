mod events;
pub mod handlers;
pub mod hub;
pub mod tasks;

pub use events::{ClientEvent, Event, EventBody, SyncEvent};
pub use hub::Hub;
