pub const MAX_INPUT_CHARS: usize = 32_768;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("message is empty")]
    Empty,
    #[error("message is too long: {chars} characters (limit {limit})")]
    TooLong { chars: usize, limit: usize },
}

/// Structural validation of user input, run before any side effect.
/// Tool-follow-up rounds carry synthetic empty input and skip this.
pub fn validate_user_text(text: &str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let chars = text.chars().count();
    if chars > MAX_INPUT_CHARS {
        return Err(ValidationError::TooLong {
            chars,
            limit: MAX_INPUT_CHARS,
        });
    }
    Ok(())
}
