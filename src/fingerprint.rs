// Interface fingerprints
//
// An interface is identified on the wire by a 64-bit digest of its canonical
// textual form: the fully-qualified interface name followed by the ordered
// method signatures. Comments, whitespace and declaration order of other
// members never enter the canonical form, so cosmetic edits keep the
// fingerprint stable while any change to a method signature produces a new
// one.

use crate::ids::InterfaceId;
use sha2::{Digest, Sha256};
use std::fmt;

/// Canonical description of an interface contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSignature {
    /// Fully-qualified interface name, e.g. `demo.Calculator`
    pub name: String,
    /// Method signatures in declaration order, e.g. `add(i32,i32)->i32`
    pub methods: Vec<String>,
}

impl InterfaceSignature {
    /// Build a signature from a name and ordered method signatures
    pub fn new(name: impl Into<String>, methods: &[&str]) -> Self {
        Self {
            name: name.into(),
            methods: methods.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// The canonical text the fingerprint is computed over
    ///
    /// One line for the name, one per method, joined with `\n`. Interior
    /// whitespace in the provided signatures is stripped so that formatting
    /// differences cannot leak into the digest.
    pub fn canonical_text(&self) -> String {
        let mut lines = Vec::with_capacity(self.methods.len() + 1);
        lines.push(strip_whitespace(&self.name));
        for method in &self.methods {
            lines.push(strip_whitespace(method));
        }
        lines.join("\n")
    }

    /// Compute the 64-bit interface fingerprint
    pub fn fingerprint(&self) -> InterfaceId {
        fingerprint_of(&self.canonical_text())
    }
}

impl fmt::Display for InterfaceSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, hex::encode(self.fingerprint().get().to_be_bytes()))
    }
}

/// Digest a canonical interface text down to an `InterfaceId`
///
/// The first eight bytes of the SHA-256 digest, big-endian. The all-zero
/// value is reserved as the unset sentinel; the astronomically unlikely zero
/// digest is remapped onto a fixed non-zero value.
pub fn fingerprint_of(canonical: &str) -> InterfaceId {
    let digest = Sha256::digest(canonical.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let raw = u64::from_be_bytes(bytes);
    if raw == 0 {
        InterfaceId::new(u64::MAX)
    } else {
        InterfaceId::new(raw)
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}
