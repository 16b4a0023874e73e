//! Phone number normalization and masking.

use crate::OtpError;

/// Normalize a phone number to E.164-ish form: leading `+`, digits only.
///
/// Accepts spaces, dashes, dots and parentheses as formatting noise.
pub fn normalize_phone(input: &str) -> Result<String, OtpError> {
    let trimmed = input.trim();
    let rest = trimmed
        .strip_prefix('+')
        .ok_or_else(|| OtpError::InvalidPhone("must start with +".to_string()))?;

    let digits: String = rest
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(OtpError::InvalidPhone(
            "contains non-digit characters".to_string(),
        ));
    }
    if digits.len() < 8 || digits.len() > 15 {
        return Err(OtpError::InvalidPhone(format!(
            "expected 8-15 digits, got {}",
            digits.len()
        )));
    }

    Ok(format!("+{}", digits))
}

/// Mask a normalized phone number for display and audit details.
///
/// Everything but the last four digits is hidden: `+14155551234` becomes
/// `+*******1234`.
pub fn mask_phone(normalized: &str) -> String {
    let visible = 4;
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() <= visible + 1 {
        return normalized.to_string();
    }
    let mut out = String::with_capacity(chars.len());
    out.push('+');
    for _ in 1..chars.len() - visible {
        out.push('*');
    }
    out.extend(&chars[chars.len() - visible..]);
    out
}
