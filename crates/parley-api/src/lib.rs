pub mod auth;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
