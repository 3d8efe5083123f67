//! Usage: Token masking for log and error output.

const TOKEN_MASK_PREFIX_LEN: usize = 6;
const TOKEN_MASK_SUFFIX_LEN: usize = 4;

/// Redacts the middle of a token, keeping a short prefix and suffix so
/// operators can correlate log lines without exposing the secret.
/// Counts characters, not bytes; tokens are arbitrary strings.
pub(crate) fn mask_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let len = trimmed.chars().count();
    if len <= TOKEN_MASK_PREFIX_LEN + TOKEN_MASK_SUFFIX_LEN {
        return "*".repeat(len.min(8));
    }

    let prefix: String = trimmed.chars().take(TOKEN_MASK_PREFIX_LEN).collect();
    let suffix: String = trimmed.chars().skip(len - TOKEN_MASK_SUFFIX_LEN).collect();
    format!("{prefix}...{suffix}")
}
