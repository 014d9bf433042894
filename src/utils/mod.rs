//! Common utilities and helper functions
//!
//! Name normalization shared by the store, the gateway and the dump cache.

pub mod error;
pub mod retry;

/// Convert a nation or region name to its canonical id
///
/// `"North Dakota "` and `"north_dakota"` map to the same id.
pub fn to_id(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Truncate text to a maximum number of characters
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
