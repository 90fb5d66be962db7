pub mod api;
pub mod handlers;
mod models;

pub use models::{presence_window, User, UserStats, UserStatus};
