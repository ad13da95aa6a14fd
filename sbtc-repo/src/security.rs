//! Secret generation for webhook endpoints.

/// Prefix that marks a string as a webhook signing secret.
pub const WEBHOOK_SECRET_PREFIX: &str = "whsec_";

/// Generates a signing secret: `whsec_` followed by 32 random bytes in hex.
pub fn generate_webhook_secret() -> String {
    let bytes: [u8; 32] = rand::random();
    format!("{}{}", WEBHOOK_SECRET_PREFIX, hex::encode(bytes))
}
