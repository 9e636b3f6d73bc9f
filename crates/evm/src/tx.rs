//! ERC-20 transfer calldata and signed EIP-1559 envelopes.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_rlp::{length_of_length, BufMut, Encodable, Header};
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint as _;
use sha3::{Digest, Keccak256};
use thiserror::Error;

const EMPTY_ACCESS_LIST_RLP_LEN: usize = 1;
const EIP1559_TX_TYPE: u8 = 0x02;

/// `balanceOf(address)`
pub const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
/// `transfer(address,uint256)`
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("private key must be 32 bytes of hex: {0}")]
    InvalidKey(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

pub fn balance_of_calldata(owner: Address) -> Bytes {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&BALANCE_OF_SELECTOR);
    data.extend_from_slice(B256::left_padding_from(owner.as_slice()).as_slice());
    Bytes::from(data)
}

pub fn transfer_calldata(recipient: Address, amount: U256) -> Bytes {
    let mut data = Vec::with_capacity(68);
    data.extend_from_slice(&TRANSFER_SELECTOR);
    data.extend_from_slice(B256::left_padding_from(recipient.as_slice()).as_slice());
    data.extend_from_slice(&amount.to_be_bytes::<32>());
    Bytes::from(data)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Eip1559Transaction {
    pub chain_id: U256,
    pub nonce: U256,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: U256,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl Eip1559Transaction {
    fn fields_length(&self) -> usize {
        self.chain_id.length()
            + self.nonce.length()
            + self.max_priority_fee_per_gas.length()
            + self.max_fee_per_gas.length()
            + self.gas_limit.length()
            + self.to.length()
            + self.value.length()
            + self.data.length()
            + EMPTY_ACCESS_LIST_RLP_LEN
    }

    fn encode_fields(&self, out: &mut dyn BufMut) {
        self.chain_id.encode(out);
        self.nonce.encode(out);
        self.max_priority_fee_per_gas.encode(out);
        self.max_fee_per_gas.encode(out);
        self.gas_limit.encode(out);
        self.to.encode(out);
        self.value.encode(out);
        self.data.encode(out);
        Header { list: true, payload_length: 0 }.encode(out);
    }

    /// Typed payload the signature commits to.
    pub fn signing_payload(&self) -> Vec<u8> {
        typed(alloy_rlp::encode(self))
    }

    pub fn signing_hash(&self) -> B256 {
        keccak256(self.signing_payload())
    }
}

impl Encodable for Eip1559Transaction {
    fn encode(&self, out: &mut dyn BufMut) {
        Header { list: true, payload_length: self.fields_length() }.encode(out);
        self.encode_fields(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.fields_length();
        payload_length + length_of_length(payload_length)
    }
}

struct SignedEnvelope<'a> {
    tx: &'a Eip1559Transaction,
    y_parity: u8,
    r: U256,
    s: U256,
}

impl SignedEnvelope<'_> {
    fn payload_length(&self) -> usize {
        self.tx.fields_length() + self.y_parity.length() + self.r.length() + self.s.length()
    }
}

impl Encodable for SignedEnvelope<'_> {
    fn encode(&self, out: &mut dyn BufMut) {
        Header { list: true, payload_length: self.payload_length() }.encode(out);
        self.tx.encode_fields(out);
        self.y_parity.encode(out);
        self.r.encode(out);
        self.s.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.payload_length();
        payload_length + length_of_length(payload_length)
    }
}

/// Raw bytes ready for `eth_sendRawTransaction` and the hash nodes will report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
    pub hash: B256,
}

impl SignedTransaction {
    pub fn raw_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }

    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash.as_slice()))
    }
}

pub struct TransactionSigner {
    key: SigningKey,
    address: Address,
}

impl std::fmt::Debug for TransactionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSigner").field("address", &self.address).finish_non_exhaustive()
    }
}

impl TransactionSigner {
    /// Accepts 64 hex digits with or without a `0x` prefix.
    pub fn from_hex(raw: &str) -> Result<Self, SignerError> {
        let trimmed = raw.trim();
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(digits).map_err(|error| SignerError::InvalidKey(error.to_string()))?;
        if bytes.len() != 32 {
            return Err(SignerError::InvalidKey(format!("got {} bytes", bytes.len())));
        }
        let key = SigningKey::from_slice(&bytes)
            .map_err(|error| SignerError::InvalidKey(error.to_string()))?;
        let address = address_of(&key);
        Ok(Self { key, address })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn sign(&self, tx: &Eip1559Transaction) -> Result<SignedTransaction, SignerError> {
        let digest = tx.signing_hash();
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|error| SignerError::Signing(error.to_string()))?;
        let (r, s) = signature.split_bytes();

        let envelope = SignedEnvelope {
            tx,
            y_parity: u8::from(recovery_id.is_y_odd()),
            r: U256::from_be_slice(r.as_slice()),
            s: U256::from_be_slice(s.as_slice()),
        };
        let raw = typed(alloy_rlp::encode(envelope));
        let hash = keccak256(&raw);
        Ok(SignedTransaction { raw, hash })
    }
}

fn typed(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(EIP1559_TX_TYPE);
    out.extend_from_slice(&payload);
    out
}

/// Last 20 bytes of keccak-256 over the uncompressed public key.
fn address_of(key: &SigningKey) -> Address {
    let encoded = key.verifying_key().to_encoded_point(false);
    let digest = Keccak256::digest(&encoded.as_bytes()[1..]);
    Address::from_slice(&digest[12..])
}
