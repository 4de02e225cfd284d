#[cfg(feature = "subscriber")]
pub mod journal;
pub mod view;
