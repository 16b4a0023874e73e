//! SMS delivery and code-checking backends.

use crate::OtpError;
use async_trait::async_trait;
use std::sync::Mutex;

/// Verification backend in the style of Twilio Verify: the provider owns the
/// code lifecycle, we only ask it to send and to check.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Send a fresh verification code to a normalized phone number.
    async fn send_code(&self, phone: &str) -> Result<(), OtpError>;

    /// Check a submitted code; `Ok(false)` means the code was wrong,
    /// `Err` means the provider itself failed.
    async fn check_code(&self, phone: &str, code: &str) -> Result<bool, OtpError>;
}

/// Provider for development and tests: accepts exactly one hardcoded code
/// and records every send.
pub struct MockSmsProvider {
    accepted: String,
    sent: Mutex<Vec<String>>,
}

impl MockSmsProvider {
    pub const DEFAULT_CODE: &'static str = "123456";

    pub fn new() -> Self {
        Self::with_code(Self::DEFAULT_CODE)
    }

    pub fn with_code(code: &str) -> Self {
        Self {
            accepted: code.to_string(),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Phone numbers a code was sent to, in order.
    pub fn sent_to(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for MockSmsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SmsProvider for MockSmsProvider {
    async fn send_code(&self, phone: &str) -> Result<(), OtpError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(phone.to_string());
        Ok(())
    }

    async fn check_code(&self, _phone: &str, code: &str) -> Result<bool, OtpError> {
        // Constant-time comparison, same as a real provider client would use
        let matches: bool =
            subtle::ConstantTimeEq::ct_eq(code.as_bytes(), self.accepted.as_bytes()).into();
        Ok(matches)
    }
}
