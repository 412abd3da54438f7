pub mod chat_event;
pub mod frame;

pub use chat_event::{Chatlist, ChatlistKind, ChatlistResponse, ClientEvent, ServerEvent};
pub use frame::{decode_client_frame, encode_frame};
