pub mod json_compact;

pub use json_compact::JsonCompactFormatter;
