pub mod handler;
pub mod hub;
pub mod protocol;
pub mod session;
