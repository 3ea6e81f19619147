//! Request and response models

pub mod channels;
pub mod messages;

pub use channels::*;
pub use messages::*;
