use sha2::{Digest, Sha256};

/// Hex SHA-256 over a page's final URL and its visible text.
///
/// Whitespace is collapsed first, so two fetches of an unchanged page hash the
/// same even when the markup was re-indented.
pub fn content_fingerprint(final_url: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(final_url.as_bytes());
    hasher.update(b"|");
    for word in text.split_whitespace() {
        hasher.update(word.as_bytes());
        hasher.update(b" ");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_does_not_change_fingerprint() {
        let a = content_fingerprint("https://example.com/", "Karaoke  Friday\n9pm");
        let b = content_fingerprint("https://example.com/", "Karaoke Friday 9pm ");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_url_is_part_of_fingerprint() {
        assert_ne!(
            content_fingerprint("https://a.example.com/", "same"),
            content_fingerprint("https://b.example.com/", "same")
        );
    }
}
