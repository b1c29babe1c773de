use std::fmt;

use sha2::{Digest, Sha256};

/// SHA-256 over From, To, Subject and body, in that order.
///
/// Only meaningful inside one dispatch batch. Files with identical content
/// share a receipt.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Receipt([u8; 32]);

impl Receipt {
    pub fn compute(from: &str, to: &str, subject: &str, body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(from.as_bytes());
        hasher.update(to.as_bytes());
        hasher.update(subject.as_bytes());
        hasher.update(body);
        Receipt(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// Hex, for log lines.
impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.as_bytes()))
    }
}

impl fmt::Debug for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Receipt({self})")
    }
}
