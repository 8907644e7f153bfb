//! Small helpers shared by the stores and the CLI.

pub mod format;
pub mod fs;

pub use format::{age_display, mask_phone, remaining_display};
pub use fs::{remove_if_exists, write_atomic};
