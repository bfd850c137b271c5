//! Text sanitization for display names and message content.
//!
//! Both operations are pure: they never touch shared state and always return
//! either the sanitized text or a [`ValidationError`].

use thiserror::Error;

/// Default maximum display name length in bytes.
pub const MAX_NAME_LENGTH: usize = 50;

/// Default maximum content length in bytes.
pub const MAX_CONTENT_LENGTH: usize = 1024;

/// Characters removed from display names.
const UNSAFE_NAME_CHARS: [char; 5] = ['<', '>', '"', '\'', '&'];

/// Validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Display name was empty.
    #[error("username cannot be empty")]
    EmptyName,

    /// Display name exceeded the limit.
    #[error("username too long (max {0} characters)")]
    NameTooLong(usize),

    /// Nothing was left after stripping unsafe characters.
    #[error("username contains only invalid characters")]
    NameOnlyInvalid,

    /// Content was empty.
    #[error("message content cannot be empty")]
    EmptyContent,

    /// Content exceeded the limit.
    #[error("message too long (max {0} characters)")]
    ContentTooLong(usize),

    /// Nothing was left after stripping markup.
    #[error("message contains only HTML tags")]
    ContentOnlyMarkup,
}

/// Sanitization capability consumed by admission and the connection reader.
pub trait Validator: Send + Sync {
    /// Sanitize a candidate display name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, too long, or made only of
    /// characters that get stripped.
    fn validate_display_name(&self, raw: &str) -> Result<String, ValidationError>;

    /// Sanitize message content.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is empty, too long, or only markup.
    fn validate_content(&self, raw: &str) -> Result<String, ValidationError>;
}

/// Validator limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorLimits {
    /// Maximum display name length in bytes.
    pub max_name_length: usize,
    /// Maximum content length in bytes.
    pub max_content_length: usize,
}

impl Default for ValidatorLimits {
    fn default() -> Self {
        Self {
            max_name_length: MAX_NAME_LENGTH,
            max_content_length: MAX_CONTENT_LENGTH,
        }
    }
}

/// The standard validator: character filtering for names, tag stripping for
/// content.
#[derive(Debug, Clone, Default)]
pub struct TextValidator {
    limits: ValidatorLimits,
}

impl TextValidator {
    /// Create a validator with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator with custom limits.
    #[must_use]
    pub fn with_limits(limits: ValidatorLimits) -> Self {
        Self { limits }
    }

    /// Get the limits.
    #[must_use]
    pub fn limits(&self) -> ValidatorLimits {
        self.limits
    }
}

impl Validator for TextValidator {
    fn validate_display_name(&self, raw: &str) -> Result<String, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if raw.len() > self.limits.max_name_length {
            return Err(ValidationError::NameTooLong(self.limits.max_name_length));
        }

        let stripped: String = raw
            .chars()
            .filter(|c| !UNSAFE_NAME_CHARS.contains(c))
            .collect();
        let clean = stripped.trim();

        if clean.is_empty() {
            return Err(ValidationError::NameOnlyInvalid);
        }
        Ok(clean.to_string())
    }

    fn validate_content(&self, raw: &str) -> Result<String, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        if raw.len() > self.limits.max_content_length {
            return Err(ValidationError::ContentTooLong(
                self.limits.max_content_length,
            ));
        }

        let stripped = strip_tags(raw);
        let clean = stripped.trim();

        if clean.is_empty() {
            return Err(ValidationError::ContentOnlyMarkup);
        }
        Ok(clean.to_string())
    }
}

/// Elements whose text is dropped along with their tags.
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

/// Remove every `<...>` span, plus the bodies of `script` and `style`
/// elements.
///
/// A `<` with no later `>` is kept verbatim along with the rest of the input,
/// so the output never contains a `<` followed by a `>`.
#[must_use]
pub fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find('<') {
        let Some(close) = rest[open..].find('>') else {
            break;
        };
        out.push_str(&rest[..open]);
        let tag = &rest[open + 1..open + close];
        rest = &rest[open + close + 1..];

        if let Some(element) = raw_text_element(tag) {
            rest = match find_closing_tag(rest, element) {
                Some(end) => &rest[end..],
                None => "",
            };
        }
    }

    out.push_str(rest);
    out
}

/// The raw-text element opened by `tag` (the text between `<` and `>`).
fn raw_text_element(tag: &str) -> Option<&'static str> {
    if tag.ends_with('/') {
        return None;
    }
    let name = tag
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or_default();
    RAW_TEXT_ELEMENTS
        .into_iter()
        .find(|element| name.eq_ignore_ascii_case(element))
}

fn find_closing_tag(haystack: &str, element: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&format!("</{element}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_stripping() {
        let v = TextValidator::new();
        assert_eq!(v.validate_display_name("alice").unwrap(), "alice");
        assert_eq!(v.validate_display_name("  <bob>  ").unwrap(), "bob");
        assert_eq!(
            v.validate_display_name(r#"O'Neil & "Co""#).unwrap(),
            "ONeil  Co"
        );
    }

    #[test]
    fn test_display_name_rejections() {
        let v = TextValidator::new();
        assert_eq!(v.validate_display_name(""), Err(ValidationError::EmptyName));
        assert_eq!(
            v.validate_display_name(&"a".repeat(MAX_NAME_LENGTH + 1)),
            Err(ValidationError::NameTooLong(MAX_NAME_LENGTH))
        );
        assert_eq!(
            v.validate_display_name("<>&'\""),
            Err(ValidationError::NameOnlyInvalid)
        );
        assert_eq!(
            v.validate_display_name("  <  "),
            Err(ValidationError::NameOnlyInvalid)
        );
        assert!(v.validate_display_name(&"a".repeat(MAX_NAME_LENGTH)).is_ok());
    }

    #[test]
    fn test_content_tag_stripping() {
        let v = TextValidator::new();
        assert_eq!(v.validate_content("hello").unwrap(), "hello");
        assert_eq!(v.validate_content("  <b>bold</b> move ").unwrap(), "bold move");
        assert_eq!(v.validate_content("a < b").unwrap(), "a < b");
        assert_eq!(v.validate_content("x > y").unwrap(), "x > y");
    }

    #[test]
    fn test_content_rejections() {
        let v = TextValidator::new();
        assert_eq!(v.validate_content(""), Err(ValidationError::EmptyContent));
        assert_eq!(v.validate_content("<b></b>"), Err(ValidationError::ContentOnlyMarkup));
        assert_eq!(v.validate_content("   "), Err(ValidationError::ContentOnlyMarkup));
        assert_eq!(
            v.validate_content(&"a".repeat(MAX_CONTENT_LENGTH + 1)),
            Err(ValidationError::ContentTooLong(MAX_CONTENT_LENGTH))
        );
    }

    #[test]
    fn test_script_bodies_are_dropped() {
        let v = TextValidator::new();
        assert_eq!(
            v.validate_content("<script>evil</script>"),
            Err(ValidationError::ContentOnlyMarkup)
        );
        assert_eq!(
            v.validate_content("<SCRIPT type=\"x\">evil()</Script> hi").unwrap(),
            "hi"
        );
        assert_eq!(v.validate_content("ok <style>p{}</style>").unwrap(), "ok");
        assert_eq!(
            v.validate_content("<script>never closed"),
            Err(ValidationError::ContentOnlyMarkup)
        );
        assert_eq!(v.validate_content("<scripts>kept</scripts>").unwrap(), "kept");
    }

    #[test]
    fn test_strip_tags_edge_cases() {
        assert_eq!(strip_tags("<<a>b>"), "b>");
        assert_eq!(strip_tags("a<b<c>d"), "ad");
        assert_eq!(strip_tags("tail <open"), "tail <open");
        assert_eq!(strip_tags("<>"), "");
        assert_eq!(strip_tags("héllo <i>wörld</i>"), "héllo wörld");
        assert_eq!(strip_tags("<br/>line"), "line");
        assert_eq!(strip_tags("<script/>after"), "after");
    }

    #[test]
    fn test_sanitization_is_idempotent() {
        let v = TextValidator::new();
        let inputs = [
            "  <b>bold</b> move ",
            "<<a>b>",
            "a < b > c",
            "tail <open",
            "x > <y",
            " plain ",
            "a <script>x</script",
        ];
        for input in inputs {
            let once = v.validate_content(input).unwrap();
            assert_eq!(v.validate_content(&once).unwrap(), once, "input: {input:?}");
        }

        for input in ["  <bob>  ", r#"O'Neil & "Co""#, "carol"] {
            let once = v.validate_display_name(input).unwrap();
            assert_eq!(v.validate_display_name(&once).unwrap(), once);
        }
    }

    #[test]
    fn test_custom_limits() {
        let v = TextValidator::with_limits(ValidatorLimits {
            max_name_length: 3,
            max_content_length: 4,
        });
        assert!(v.validate_display_name("abcd").is_err());
        assert!(v.validate_content("abcde").is_err());
        assert_eq!(v.validate_content("abcd").unwrap(), "abcd");
    }
}
