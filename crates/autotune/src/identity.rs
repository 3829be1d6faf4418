//! Stable hashes that scope persisted decisions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tunecache_kernels::Configuration;

/// Identity of a persisted decision table. Two engines share decisions only
/// when all four components match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheIdentity {
    pub kernel: String,
    pub configs_hash: String,
    pub key_hash: String,
    pub params_hash: String,
}

impl fmt::Display for CacheIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[configs={} key={} params={}]",
            self.kernel,
            short(&self.configs_hash),
            short(&self.key_hash),
            short(&self.params_hash)
        )
    }
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

pub fn hash_str(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

pub fn hash_list<S: AsRef<str>>(items: &[S]) -> String {
    let joined = items
        .iter()
        .map(|item| item.as_ref())
        .collect::<Vec<_>>()
        .join(",");
    hash_str(&format!("[{joined}]"))
}

/// Order-sensitive hash over the rendered configurations.
pub fn hash_configurations(configs: &[Configuration]) -> String {
    let rendered: Vec<String> = configs.iter().map(|config| config.to_string()).collect();
    hash_list(&rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_hex_sha256() {
        let hash = hash_str("abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn configuration_hash_depends_on_order_and_values() {
        let a = Configuration::default().with_param("BLOCK", 16);
        let b = Configuration::default().with_param("BLOCK", 32);
        let ab = hash_configurations(&[a.clone(), b.clone()]);
        assert_eq!(ab, hash_configurations(&[a.clone(), b.clone()]));
        assert_ne!(ab, hash_configurations(&[b, a]));
    }

    #[test]
    fn list_hash_distinguishes_names() {
        assert_ne!(hash_list(&["m", "n"]), hash_list(&["mn"]));
    }
}
