//! Textual storage-network addresses.
//!
//! Addresses look like `f01234` or `t3abc...`: a network letter, a protocol
//! digit and a protocol-specific payload. Only the shape is checked here; the
//! chain client is the authority on whether an address actually exists.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SECP256K1_PAYLOAD_LEN: usize = 39;
const ACTOR_PAYLOAD_LEN: usize = 39;
const BLS_PAYLOAD_LEN: usize = 84;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Id,
    Secp256k1,
    Actor,
    Bls,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address is too short: {0:?}")]
    TooShort(String),
    #[error("unknown network prefix {0:?}")]
    UnknownNetwork(char),
    #[error("unknown address protocol {0:?}")]
    UnknownProtocol(char),
    #[error("invalid id payload {0:?}")]
    InvalidId(String),
    #[error("invalid base32 payload {0:?}")]
    InvalidPayload(String),
    #[error("payload length {actual} does not match protocol (expected {expected})")]
    PayloadLength { expected: usize, actual: usize },
}

/// A parsed address. Keeps the original text for display and for handing
/// back to the chain client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    network: Network,
    protocol: Protocol,
    raw: String,
}

impl Address {
    pub fn network(&self) -> Network {
        self.network
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let (Some(net), Some(proto)) = (chars.next(), chars.next()) else {
            return Err(AddressError::TooShort(s.to_string()));
        };
        let payload = chars.as_str();
        if payload.is_empty() {
            return Err(AddressError::TooShort(s.to_string()));
        }

        let network = match net {
            'f' => Network::Mainnet,
            't' => Network::Testnet,
            other => return Err(AddressError::UnknownNetwork(other)),
        };

        let protocol = match proto {
            '0' => Protocol::Id,
            '1' => Protocol::Secp256k1,
            '2' => Protocol::Actor,
            '3' => Protocol::Bls,
            other => return Err(AddressError::UnknownProtocol(other)),
        };

        match protocol {
            Protocol::Id => {
                payload
                    .parse::<u64>()
                    .map_err(|_| AddressError::InvalidId(payload.to_string()))?;
            }
            Protocol::Secp256k1 => check_base32(payload, SECP256K1_PAYLOAD_LEN)?,
            Protocol::Actor => check_base32(payload, ACTOR_PAYLOAD_LEN)?,
            Protocol::Bls => check_base32(payload, BLS_PAYLOAD_LEN)?,
        }

        Ok(Self {
            network,
            protocol,
            raw: s.to_string(),
        })
    }
}

fn check_base32(payload: &str, expected: usize) -> Result<(), AddressError> {
    if !payload
        .bytes()
        .all(|b| b.is_ascii_lowercase() || (b'2'..=b'7').contains(&b))
    {
        return Err(AddressError::InvalidPayload(payload.to_string()));
    }
    if payload.len() != expected {
        return Err(AddressError::PayloadLength {
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.raw
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_address() {
        let addr: Address = "f01234".parse().unwrap();
        assert_eq!(addr.network(), Network::Mainnet);
        assert_eq!(addr.protocol(), Protocol::Id);
        assert_eq!(addr.to_string(), "f01234");
    }

    #[test]
    fn test_parse_secp_address() {
        let payload = "a".repeat(SECP256K1_PAYLOAD_LEN);
        let addr: Address = format!("t1{payload}").parse().unwrap();
        assert_eq!(addr.network(), Network::Testnet);
        assert_eq!(addr.protocol(), Protocol::Secp256k1);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!("".parse::<Address>(), Err(AddressError::TooShort(_))));
        assert!(matches!("f0".parse::<Address>(), Err(AddressError::TooShort(_))));
        assert!(matches!("x01".parse::<Address>(), Err(AddressError::UnknownNetwork('x'))));
        assert!(matches!("f91".parse::<Address>(), Err(AddressError::UnknownProtocol('9'))));
        assert!(matches!("f0abc".parse::<Address>(), Err(AddressError::InvalidId(_))));
        assert!(matches!("f1ABC".parse::<Address>(), Err(AddressError::InvalidPayload(_))));
        assert!(matches!(
            "f3abc".parse::<Address>(),
            Err(AddressError::PayloadLength { expected: 84, actual: 3 })
        ));
    }
}
