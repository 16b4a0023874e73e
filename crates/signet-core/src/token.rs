//! Opaque token and slug generation.

use rand::distr::Alphanumeric;
use rand::Rng;

/// Length of a signer access token. 43 alphanumeric characters is ~256 bits
/// of entropy, enough that tokens double as unguessable capabilities.
const TOKEN_LEN: usize = 43;

const SLUG_SUFFIX_LEN: usize = 6;

/// Generate a signer access token.
pub fn generate_token() -> String {
    let rng = rand::rng();
    rng.sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Derive a URL slug from an envelope name plus a random suffix, so
/// same-named envelopes don't collide.
pub fn generate_slug(name: &str) -> String {
    let base: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let base: String = base
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let base = if base.is_empty() { "envelope" } else { &base };

    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SLUG_SUFFIX_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();

    format!("{}-{}", base, suffix)
}
