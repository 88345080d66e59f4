use std::collections::HashSet;
use std::str::FromStr;

use ethers::types::Address;
use serde::Deserialize;
use tracing::warn;

use crate::types::Chain;

#[derive(Debug, Deserialize)]
struct WalletEntry {
    chain: String,
    address: String,
}

/// The set of leader wallets to mirror, loaded once at startup and never mutated.
/// EVM addresses are normalized to their EIP-55 checksum form so every later lookup
/// (feed decoders, position book keys) compares equal regardless of input casing.
#[derive(Debug, Clone, Default)]
pub struct WatchList {
    evm: HashSet<String>,
    sol: HashSet<String>,
}

impl WatchList {
    pub fn contains(&self, chain: Chain, address: &str) -> bool {
        match chain {
            Chain::Evm => checksum_evm(address).map(|a| self.evm.contains(&a)).unwrap_or(false),
            Chain::Sol => self.sol.contains(address),
        }
    }

    pub fn len(&self) -> usize {
        self.evm.len() + self.sol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parses a wallet-list JSON file: an array of `{"chain": "...", "address": "..."}`
    /// entries. Entries naming an unrecognized chain or an unparseable EVM address are
    /// skipped with a warning rather than failing the whole load.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<WalletEntry> = serde_json::from_str(raw)?;
        let mut watch_list = WatchList::default();

        for entry in entries {
            match entry.chain.to_ascii_uppercase().as_str() {
                "EVM" => match checksum_evm(&entry.address) {
                    Some(checksummed) => {
                        watch_list.evm.insert(checksummed);
                    }
                    None => warn!(address = %entry.address, "skipping unparseable EVM wallet address"),
                },
                "SOL" => {
                    watch_list.sol.insert(entry.address);
                }
                other => warn!(chain = %other, address = %entry.address, "skipping wallet entry with unknown chain"),
            }
        }

        Ok(watch_list)
    }

    pub async fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(Self::from_json(&raw)?)
    }

    /// EVM addresses lower-cased, matching the case-normalization the feed decoders
    /// apply to `from`/`sender`/`recipient` before a watched-set lookup.
    pub fn to_lowercase_set(&self) -> HashSet<String> {
        self.evm.iter().map(|a| a.to_lowercase()).collect()
    }

    /// Solana-like addresses as-is (base58 has no casing concept to normalize).
    pub fn addresses_set(&self) -> HashSet<String> {
        self.sol.clone()
    }
}

/// Normalizes an EVM address to its EIP-55 mixed-case checksum representation.
/// Returns `None` if `raw` is not a syntactically valid 20-byte hex address.
fn checksum_evm(raw: &str) -> Option<String> {
    Address::from_str(raw).ok().map(|addr| format!("{addr:#x}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_evm_address_casing() {
        let json = r#"[{"chain":"evm","address":"0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"}]"#;
        let watch_list = WatchList::from_json(json).unwrap();

        assert!(watch_list.contains(Chain::Evm, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"));
        assert!(watch_list.contains(Chain::Evm, "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"));
        assert_eq!(watch_list.len(), 1);
    }

    #[test]
    fn solana_addresses_pass_through_unmodified() {
        let json = r#"[{"chain":"sol","address":"DYw8jCTfwHNRJhhmFcbXvVDTqWMEVFBX6ZKUmG5CNSKK"}]"#;
        let watch_list = WatchList::from_json(json).unwrap();

        assert!(watch_list.contains(Chain::Sol, "DYw8jCTfwHNRJhhmFcbXvVDTqWMEVFBX6ZKUmG5CNSKK"));
        assert!(!watch_list.contains(Chain::Sol, "someOtherAddress"));
    }

    #[test]
    fn unknown_chain_entries_are_skipped_not_fatal() {
        let json = r#"[
            {"chain":"evm","address":"0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"},
            {"chain":"bitcoin","address":"bc1qxyz"}
        ]"#;
        let watch_list = WatchList::from_json(json).unwrap();
        assert_eq!(watch_list.len(), 1);
    }

    #[test]
    fn malformed_evm_address_is_skipped_not_fatal() {
        let json = r#"[{"chain":"evm","address":"not-an-address"}]"#;
        let watch_list = WatchList::from_json(json).unwrap();
        assert!(watch_list.is_empty());
    }

    #[test]
    fn uppercase_chain_tags_per_wallet_file_format_are_accepted() {
        let json = r#"[
            {"chain":"EVM","address":"0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"},
            {"chain":"SOL","address":"DYw8jCTfwHNRJhhmFcbXvVDTqWMEVFBX6ZKUmG5CNSKK"}
        ]"#;
        let watch_list = WatchList::from_json(json).unwrap();
        assert_eq!(watch_list.len(), 2);
        assert!(watch_list.contains(Chain::Evm, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"));
        assert!(watch_list.contains(Chain::Sol, "DYw8jCTfwHNRJhhmFcbXvVDTqWMEVFBX6ZKUmG5CNSKK"));
    }
}
