pub mod status_display;

pub use status_display::{StatusDisplay, StatusMeta};
