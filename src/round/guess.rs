//! Guess Normalization
//!
//! Submissions arrive as free text. Before comparison they are split on
//! whitespace and commas, trimmed, and lowercased. The secret is stored in
//! the same normalized form, so matching is a plain ordered equality.

/// Normalize a single secret token.
pub fn normalize_token(token: &str) -> String {
    token.trim().to_lowercase()
}

/// Split and normalize a free-text submission into tokens.
pub fn normalize_submission(submission: &str) -> Vec<String> {
    submission
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(normalize_token)
        .collect()
}

/// Canonical single-line rendering of a submission.
pub fn canonical_submission(submission: &str) -> String {
    normalize_submission(submission).join(" ")
}

/// Exact ordered match against an already-normalized secret.
pub fn matches_secret(submission: &str, secret: &[String]) -> bool {
    let tokens = normalize_submission(submission);
    tokens.len() == secret.len() && tokens.iter().zip(secret).all(|(a, b)| a == b)
}
