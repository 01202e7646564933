//! Key chain
//!
//! Credentials keyed on (chain comparable, credential name). Credential
//! names are per type: `password`, `recovery_password`, `startup_key`,
//! `key`. Values are either text or raw key bytes.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::path_spec::PathSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl CredentialValue {
    /// Key material bytes: raw bytes as-is, text as its UTF-8 encoding.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            CredentialValue::Text(text) => text.as_bytes(),
            CredentialValue::Bytes(bytes) => bytes,
        }
    }
}

impl From<&str> for CredentialValue {
    fn from(value: &str) -> Self {
        CredentialValue::Text(value.to_string())
    }
}

impl From<Vec<u8>> for CredentialValue {
    fn from(value: Vec<u8>) -> Self {
        CredentialValue::Bytes(value)
    }
}

#[derive(Default)]
pub struct KeyChain {
    entries: Mutex<HashMap<String, HashMap<String, CredentialValue>>>,
}

impl KeyChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a credential for the exact chain.
    pub fn set_credential(
        &self,
        spec: &PathSpec,
        name: &str,
        value: impl Into<CredentialValue>,
    ) {
        let mut entries = self.entries.lock().expect("key chain poisoned");
        entries
            .entry(spec.comparable())
            .or_default()
            .insert(name.to_string(), value.into());
    }

    pub fn credential(&self, spec: &PathSpec, name: &str) -> Option<CredentialValue> {
        let entries = self.entries.lock().expect("key chain poisoned");
        entries
            .get(&spec.comparable())
            .and_then(|per_spec| per_spec.get(name))
            .cloned()
    }

    /// Drops every credential stored for the chain.
    pub fn forget(&self, spec: &PathSpec) {
        let mut entries = self.entries.lock().expect("key chain poisoned");
        entries.remove(&spec.comparable());
    }
}
