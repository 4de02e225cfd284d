mod logger;
pub use logger::*;

mod subscriber;
pub use subscriber::view::{log_event, message_for};
#[cfg(feature = "subscriber")]
pub use subscriber::journal::Journal;
