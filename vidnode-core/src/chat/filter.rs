use ammonia::clean;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ContentFilterError {
    #[error("Message exceeds maximum length of {max_length} characters")]
    MessageTooLong { max_length: usize },

    #[error("Message is empty")]
    EmptyMessage,
}

/// Sanitizer for live chat lines. Markup is never allowed through.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    pub max_chat_length: usize,
}

impl ContentFilter {
    #[must_use]
    pub const fn new(max_chat_length: usize) -> Self {
        Self { max_chat_length }
    }

    /// Returns the sanitized message or an error if invalid
    pub fn filter_chat(&self, message: &str) -> Result<String, ContentFilterError> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(ContentFilterError::EmptyMessage);
        }

        if trimmed.chars().count() > self.max_chat_length {
            return Err(ContentFilterError::MessageTooLong {
                max_length: self.max_chat_length,
            });
        }

        let sanitized = strip_all_html(trimmed);
        if sanitized.is_empty() {
            return Err(ContentFilterError::EmptyMessage);
        }
        Ok(sanitized)
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new(500)
    }
}

/// ammonia removes dangerous elements with their content, then the
/// remaining tags are dropped.
fn strip_all_html(text: &str) -> String {
    let cleaned = clean(text);

    let mut result = String::with_capacity(cleaned.len());
    let mut in_tag = false;

    for ch in cleaned.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_chat_normal() {
        let filter = ContentFilter::default();
        assert_eq!(filter.filter_chat("  hi there  ").unwrap(), "hi there");
    }

    #[test]
    fn test_filter_chat_rejects_empty_and_long() {
        let filter = ContentFilter::new(10);
        assert_eq!(filter.filter_chat("   "), Err(ContentFilterError::EmptyMessage));
        assert_eq!(
            filter.filter_chat("abcdefghijk"),
            Err(ContentFilterError::MessageTooLong { max_length: 10 })
        );
    }

    #[test]
    fn test_filter_chat_strips_markup() {
        let filter = ContentFilter::default();

        let result = filter
            .filter_chat("<script>alert('xss')</script>Hello")
            .unwrap();
        assert_eq!(result, "Hello");

        assert_eq!(filter.filter_chat("<b>Bold</b> text").unwrap(), "Bold text");

        // nothing left once the markup is gone
        assert_eq!(
            filter.filter_chat("<img src=x onerror=alert(1)>"),
            Err(ContentFilterError::EmptyMessage)
        );
    }
}
