//! Cache keys for AI requests.
//!
//! Two requests share a fingerprint when they would produce the same AI result. Operation and
//! model names are case-insensitive and whitespace-trimmed. Content keeps its case and interior
//! whitespace, but line endings are normalized to `\n`, trailing whitespace is removed from
//! every line, and leading/trailing blank space is trimmed.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Bumped whenever canonicalization changes, so old and new keys never collide.
pub const FINGERPRINT_VERSION: u32 = 1;

/// SHA-256 of a canonicalized request.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

#[derive(Serialize)]
struct CanonicalRequest<'a> {
    v: u32,
    operation: &'a str,
    model: &'a str,
    content: &'a str,
}

impl Fingerprint {
    /// Fingerprints a request. A missing model is treated as the empty string.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the canonical form cannot be encoded.
    pub fn compute(
        operation: &str,
        model: Option<&str>,
        content: &str,
    ) -> Result<Self, serde_json::Error> {
        let operation = canonical_label(operation);
        let model = model.map(canonical_label).unwrap_or_default();
        let content = canonical_content(content);

        let mut hasher = Sha256::new();
        let canonical = CanonicalRequest {
            v: FINGERPRINT_VERSION,
            operation: &operation,
            model: &model,
            content: &content,
        };
        serde_json::to_writer(&mut hasher, &canonical)?;
        Ok(Self(hasher.finalize().into()))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

fn canonical_label(label: &str) -> String {
    label.trim().to_lowercase()
}

fn canonical_content(content: &str) -> String {
    let unified = content.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.split('\n').map(str::trim_end).collect();
    lines.join("\n").trim().to_string()
}
