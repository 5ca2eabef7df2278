//! Free-text query values restricted to a safe character set.

use std::fmt;

use super::error::DomainError;

const PUNCTUATION: &str = ".,-?!:;'\"()[]{}@#$%&*+=_/\\";
const VIETNAMESE_LOWER: &str = "àáạảãâầấậẩẫăằắặẳẵèéẹẻẽêềếệểễìíịỉĩòóọỏõôồốộổỗơờớợởỡùúụủũưừứựửữỳýỵỷỹđ";
const VIETNAMESE_UPPER: &str = "ÀÁẠẢÃÂẦẤẬẨẪĂẰẮẶẲẴÈÉẸẺẼÊỀẾỆỂỄÌÍỊỈĨÒÓỌỎÕÔỒỐỘỔỖƠỜỚỢỞỠÙÚỤỦŨƯỪỨỰỬỮỲÝỴỶỸĐ";

const REJECTION_MESSAGE: &str = "Chứa ký tự không hợp lệ (chỉ chấp nhận tiếng Việt, tiếng Anh, số và dấu câu cơ bản)";

/// A filter or sort value containing only ASCII letters and digits, whitespace,
/// Vietnamese letters and common punctuation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafeText(String);

impl SafeText {
    pub fn parse(field: &'static str, value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.chars().all(is_allowed) {
            Ok(Self(value))
        } else {
            Err(DomainError::validation(field, REJECTION_MESSAGE))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SafeText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_allowed(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || ch.is_whitespace()
        || PUNCTUATION.contains(ch)
        || VIETNAMESE_LOWER.contains(ch)
        || VIETNAMESE_UPPER.contains(ch)
}
