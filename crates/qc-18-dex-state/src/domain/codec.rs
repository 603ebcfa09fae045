//! # Value Codecs
//!
//! RLP encodings for everything stored in the tries:
//!
//! - order queue value: `volume` (RLP integer)
//! - price level value: `[volume, queue_root]`
//! - exchange object:   `[nonce, asks_root, bids_root]`

use super::{ExchangeObject, Hash, PriceLevel, TrieError};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use sha3::{Digest, Keccak256};

/// Compute Keccak256 hash.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn decode_hash(rlp: &Rlp<'_>) -> Result<Hash, DecoderError> {
    let bytes = rlp.data()?;
    bytes.try_into().map_err(|_| DecoderError::RlpInvalidLength)
}

impl Encodable for PriceLevel {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.volume);
        s.append(&self.queue_root.to_vec());
    }
}

impl Decodable for PriceLevel {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(PriceLevel {
            volume: rlp.val_at(0)?,
            queue_root: decode_hash(&rlp.at(1)?)?,
        })
    }
}

impl Encodable for ExchangeObject {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.nonce);
        s.append(&self.asks_root.to_vec());
        s.append(&self.bids_root.to_vec());
    }
}

impl Decodable for ExchangeObject {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 3 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(ExchangeObject {
            nonce: rlp.val_at(0)?,
            asks_root: decode_hash(&rlp.at(1)?)?,
            bids_root: decode_hash(&rlp.at(2)?)?,
        })
    }
}

/// Encode any trie value.
pub fn encode_value<T: Encodable>(value: &T) -> Vec<u8> {
    rlp::encode(value).to_vec()
}

/// Decode a stored trie value, naming what was expected on failure.
pub fn decode_value<T: Decodable>(bytes: &[u8], what: impl Into<String>) -> Result<T, TrieError> {
    rlp::decode(bytes).map_err(|e| TrieError::Decode {
        what: what.into(),
        reason: e.to_string(),
    })
}
