pub mod connection;
pub mod message;
pub mod user;

pub use connection::ConnectionState;
pub use message::{ChatMessage, NewMessage};
pub use user::UserSummary;
