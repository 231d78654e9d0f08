pub mod auth;
pub mod lesson;
pub mod protocol;
pub mod rooms;
pub mod server;

pub use server::{AppState, run};
