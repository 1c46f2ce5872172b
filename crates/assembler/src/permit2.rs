//! Permit2 typed data and signature encoding.
//!
//! Two message shapes are handled: `PermitSingle` (AllowanceTransfer), which
//! the engine builds itself, and `PermitTransferFrom` (SignatureTransfer),
//! which aggregators such as 0x hand back with their quotes. Both are checked
//! against the execution chain, the canonical Permit2 deployment and the
//! signature deadline before anything is offered for signing.

use alloy::primitives::{
    address,
    aliases::{U160, U48},
    Address, Bytes, B256, U256,
};
use alloy::sol;
use alloy::sol_types::{eip712_domain, Eip712Domain, SolCall, SolStruct};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use swap_engine_rpc::{CallRequest, ChainReader, RpcError};
use swap_engine_types::amount::parse_u256;
use tracing::warn;

use crate::PermitError;

/// Canonical Permit2 deployment, identical on every supported chain
pub const PERMIT2_ADDRESS: Address = address!("0x000000000022D473030F116dDEE9F6B43aC78BA3");

/// Signatures this close to their deadline are refused
pub const DEFAULT_DEADLINE_BUFFER: Duration = Duration::from_secs(300);

/// r ‖ s ‖ v
pub const EXPECTED_SIGNATURE_LEN: usize = 65;

const U48_MAX: u64 = (1u64 << 48) - 1;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct PermitDetails {
        address token;
        uint160 amount;
        uint48 expiration;
        uint48 nonce;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct PermitSingle {
        PermitDetails details;
        address spender;
        uint256 sigDeadline;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct TokenPermissions {
        address token;
        uint256 amount;
    }

    #[derive(Debug, PartialEq, Eq)]
    struct PermitTransferFrom {
        TokenPermissions permitted;
        address spender;
        uint256 nonce;
        uint256 deadline;
    }

    interface IPermit2 {
        function allowance(address user, address token, address spender)
            external view returns (uint160 amount, uint48 expiration, uint48 nonce);
    }
}

/// How to treat signatures that are not 65 bytes long
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStrictness {
    /// Log and encode anyway
    #[default]
    Permissive,
    /// Reject with `InvalidSignatureFormat`
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermitMessage {
    Single(PermitSingle),
    Transfer(PermitTransferFrom),
}

/// A Permit2 message bound to its EIP-712 domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitTypedData {
    pub chain_id: u64,
    pub verifying_contract: Address,
    pub message: PermitMessage,
}

impl PermitTypedData {
    pub fn primary_type(&self) -> &'static str {
        match self.message {
            PermitMessage::Single(_) => "PermitSingle",
            PermitMessage::Transfer(_) => "PermitTransferFrom",
        }
    }

    /// Unix seconds after which Permit2 rejects the signature
    pub fn sig_deadline(&self) -> u64 {
        let deadline = match &self.message {
            PermitMessage::Single(p) => p.sigDeadline,
            PermitMessage::Transfer(p) => p.deadline,
        };
        u64::try_from(deadline).unwrap_or(u64::MAX)
    }

    pub fn token(&self) -> Address {
        match &self.message {
            PermitMessage::Single(p) => p.details.token,
            PermitMessage::Transfer(p) => p.permitted.token,
        }
    }

    pub fn spender(&self) -> Address {
        match &self.message {
            PermitMessage::Single(p) => p.spender,
            PermitMessage::Transfer(p) => p.spender,
        }
    }

    /// Permit2 declares no version in its domain
    pub fn domain(&self) -> Eip712Domain {
        eip712_domain! {
            name: "Permit2",
            chain_id: self.chain_id,
            verifying_contract: self.verifying_contract,
        }
    }

    /// Digest the wallet signs
    pub fn signing_hash(&self) -> B256 {
        let domain = self.domain();
        match &self.message {
            PermitMessage::Single(p) => p.eip712_signing_hash(&domain),
            PermitMessage::Transfer(p) => p.eip712_signing_hash(&domain),
        }
    }

    /// `eth_signTypedData_v4` payload
    pub fn to_json(&self) -> Value {
        let domain = json!({
            "name": "Permit2",
            "chainId": self.chain_id,
            "verifyingContract": format!("{:#x}", self.verifying_contract),
        });
        let domain_type = json!([
            {"name": "name", "type": "string"},
            {"name": "chainId", "type": "uint256"},
            {"name": "verifyingContract", "type": "address"},
        ]);

        match &self.message {
            PermitMessage::Single(p) => json!({
                "types": {
                    "EIP712Domain": domain_type,
                    "PermitSingle": [
                        {"name": "details", "type": "PermitDetails"},
                        {"name": "spender", "type": "address"},
                        {"name": "sigDeadline", "type": "uint256"},
                    ],
                    "PermitDetails": [
                        {"name": "token", "type": "address"},
                        {"name": "amount", "type": "uint160"},
                        {"name": "expiration", "type": "uint48"},
                        {"name": "nonce", "type": "uint48"},
                    ],
                },
                "domain": domain,
                "primaryType": "PermitSingle",
                "message": {
                    "details": {
                        "token": format!("{:#x}", p.details.token),
                        "amount": p.details.amount.to_string(),
                        "expiration": p.details.expiration.to_string(),
                        "nonce": p.details.nonce.to_string(),
                    },
                    "spender": format!("{:#x}", p.spender),
                    "sigDeadline": p.sigDeadline.to_string(),
                },
            }),
            PermitMessage::Transfer(p) => json!({
                "types": {
                    "EIP712Domain": domain_type,
                    "PermitTransferFrom": [
                        {"name": "permitted", "type": "TokenPermissions"},
                        {"name": "spender", "type": "address"},
                        {"name": "nonce", "type": "uint256"},
                        {"name": "deadline", "type": "uint256"},
                    ],
                    "TokenPermissions": [
                        {"name": "token", "type": "address"},
                        {"name": "amount", "type": "uint256"},
                    ],
                },
                "domain": domain,
                "primaryType": "PermitTransferFrom",
                "message": {
                    "permitted": {
                        "token": format!("{:#x}", p.permitted.token),
                        "amount": p.permitted.amount.to_string(),
                    },
                    "spender": format!("{:#x}", p.spender),
                    "nonce": p.nonce.to_string(),
                    "deadline": p.deadline.to_string(),
                },
            }),
        }
    }

    /// Parse typed data as returned by an aggregator
    pub fn from_json(value: &Value) -> Result<Self, PermitError> {
        let domain = value.get("domain").ok_or(PermitError::MissingField("domain"))?;
        let chain_id = u64::try_from(json_u256(domain, "chainId")?)
            .map_err(|_| PermitError::InvalidFormat("chainId out of range".into()))?;
        let verifying_contract = json_address(domain, "verifyingContract")?;

        let primary = value
            .get("primaryType")
            .and_then(Value::as_str)
            .ok_or(PermitError::MissingField("primaryType"))?;
        let message = value.get("message").ok_or(PermitError::MissingField("message"))?;

        let message = match primary {
            "PermitSingle" => {
                let details = message.get("details").ok_or(PermitError::MissingField("details"))?;
                PermitMessage::Single(PermitSingle {
                    details: PermitDetails {
                        token: json_address(details, "token")?,
                        amount: to_u160(json_u256(details, "amount")?)?,
                        expiration: to_u48(json_u64(details, "expiration")?, "expiration")?,
                        nonce: to_u48(json_u64(details, "nonce")?, "nonce")?,
                    },
                    spender: json_address(message, "spender")?,
                    sigDeadline: json_u256(message, "sigDeadline")?,
                })
            }
            "PermitTransferFrom" => {
                let permitted = message
                    .get("permitted")
                    .ok_or(PermitError::MissingField("permitted"))?;
                PermitMessage::Transfer(PermitTransferFrom {
                    permitted: TokenPermissions {
                        token: json_address(permitted, "token")?,
                        amount: json_u256(permitted, "amount")?,
                    },
                    spender: json_address(message, "spender")?,
                    nonce: json_u256(message, "nonce")?,
                    deadline: json_u256(message, "deadline")?,
                })
            }
            other => {
                return Err(PermitError::InvalidFormat(format!(
                    "unsupported primaryType {other}"
                )))
            }
        };

        Ok(Self {
            chain_id,
            verifying_contract,
            message,
        })
    }
}

fn json_field<'a>(value: &'a Value, field: &'static str) -> Result<&'a Value, PermitError> {
    value.get(field).ok_or(PermitError::MissingField(field))
}

fn json_u256(value: &Value, field: &'static str) -> Result<U256, PermitError> {
    match json_field(value, field)? {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| PermitError::InvalidFormat(format!("{field} is not an unsigned integer"))),
        Value::String(s) => {
            parse_u256(s).map_err(|e| PermitError::InvalidFormat(format!("{field}: {e}")))
        }
        _ => Err(PermitError::InvalidFormat(format!("{field} has an unexpected type"))),
    }
}

fn json_u64(value: &Value, field: &'static str) -> Result<u64, PermitError> {
    u64::try_from(json_u256(value, field)?)
        .map_err(|_| PermitError::InvalidFormat(format!("{field} out of range")))
}

fn json_address(value: &Value, field: &'static str) -> Result<Address, PermitError> {
    json_field(value, field)?
        .as_str()
        .ok_or_else(|| PermitError::InvalidFormat(format!("{field} is not a string")))?
        .parse()
        .map_err(|e| PermitError::InvalidFormat(format!("{field}: {e}")))
}

fn to_u160(amount: U256) -> Result<U160, PermitError> {
    if amount > U256::from(U160::MAX) {
        return Err(PermitError::InvalidFormat("Permit2 amount exceeds uint160".into()));
    }
    let limbs = amount.as_limbs();
    Ok(U160::from_limbs([limbs[0], limbs[1], limbs[2]]))
}

fn to_u48(value: u64, field: &str) -> Result<U48, PermitError> {
    if value > U48_MAX {
        return Err(PermitError::InvalidFormat(format!("Permit2 {field} exceeds uint48")));
    }
    Ok(U48::from(value))
}

/// Inputs for a `PermitSingle` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitParams {
    pub token: Address,
    pub amount: U256,
    /// Unix seconds the allowance stays valid
    pub expiration: u64,
    pub nonce: u64,
    pub spender: Address,
    /// Unix seconds the signature stays valid
    pub sig_deadline: u64,
}

/// Builds and validates Permit2 typed data for one execution chain
#[derive(Debug, Clone)]
pub struct PermitBuilder {
    chain_id: u64,
    permit2: Address,
    deadline_buffer: Duration,
    strictness: SignatureStrictness,
}

impl PermitBuilder {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            permit2: PERMIT2_ADDRESS,
            deadline_buffer: DEFAULT_DEADLINE_BUFFER,
            strictness: SignatureStrictness::default(),
        }
    }

    pub fn with_permit2(mut self, permit2: Address) -> Self {
        self.permit2 = permit2;
        self
    }

    pub fn with_deadline_buffer(mut self, buffer: Duration) -> Self {
        self.deadline_buffer = buffer;
        self
    }

    pub fn with_strictness(mut self, strictness: SignatureStrictness) -> Self {
        self.strictness = strictness;
        self
    }

    pub fn strictness(&self) -> SignatureStrictness {
        self.strictness
    }

    pub fn permit_single(&self, params: PermitParams, now_secs: u64) -> Result<PermitTypedData, PermitError> {
        let typed = PermitTypedData {
            chain_id: self.chain_id,
            verifying_contract: self.permit2,
            message: PermitMessage::Single(PermitSingle {
                details: PermitDetails {
                    token: params.token,
                    amount: to_u160(params.amount)?,
                    expiration: to_u48(params.expiration, "expiration")?,
                    nonce: to_u48(params.nonce, "nonce")?,
                },
                spender: params.spender,
                sigDeadline: U256::from(params.sig_deadline),
            }),
        };
        self.validate(&typed, now_secs)?;
        Ok(typed)
    }

    /// Parse and validate typed data supplied by a liquidity source
    pub fn from_source(&self, eip712: &Value, now_secs: u64) -> Result<PermitTypedData, PermitError> {
        let typed = PermitTypedData::from_json(eip712)?;
        self.validate(&typed, now_secs)?;
        Ok(typed)
    }

    pub fn validate(&self, typed: &PermitTypedData, now_secs: u64) -> Result<(), PermitError> {
        if typed.chain_id != self.chain_id {
            return Err(PermitError::ChainMismatch {
                expected: self.chain_id,
                actual: typed.chain_id,
            });
        }
        if typed.verifying_contract != self.permit2 {
            return Err(PermitError::WrongVerifyingContract(format!(
                "{:#x}",
                typed.verifying_contract
            )));
        }

        let deadline = typed.sig_deadline();
        let buffer_secs = self.deadline_buffer.as_secs();
        if deadline.saturating_sub(buffer_secs) <= now_secs {
            return Err(PermitError::Expired {
                deadline,
                now: now_secs,
                buffer_secs,
            });
        }
        Ok(())
    }

    pub fn append_signature(&self, data: &Bytes, signature: &str) -> Result<Bytes, PermitError> {
        append_signature(data, signature, self.strictness)
    }
}

fn strip_hex<'a>(value: &'a str, what: &str) -> Result<&'a str, PermitError> {
    let stripped = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if stripped.len() % 2 != 0 {
        return Err(PermitError::InvalidFormat(format!("{what} has odd hex length")));
    }
    if !stripped.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(PermitError::InvalidFormat(format!("{what} is not hex")));
    }
    Ok(stripped)
}

/// Append a signature to swap call data: `data ‖ len(sig) as a 32-byte word ‖ sig`.
pub fn concat_signature(
    data: &str,
    signature: &str,
    strictness: SignatureStrictness,
) -> Result<String, PermitError> {
    let data = strip_hex(data, "call data")?;
    let signature = strip_hex(signature, "signature")?;
    if signature.is_empty() {
        return Err(PermitError::InvalidFormat("signature is empty".into()));
    }

    let sig_len = signature.len() / 2;
    if sig_len != EXPECTED_SIGNATURE_LEN {
        match strictness {
            SignatureStrictness::Strict => {
                return Err(PermitError::InvalidFormat(format!(
                    "expected {EXPECTED_SIGNATURE_LEN}-byte signature, got {sig_len}"
                )))
            }
            SignatureStrictness::Permissive => {
                warn!(sig_len, "Unexpected signature length, encoding anyway")
            }
        }
    }

    Ok(format!("0x{data}{sig_len:064x}{signature}"))
}

/// [`concat_signature`] over raw call data
pub fn append_signature(
    data: &Bytes,
    signature: &str,
    strictness: SignatureStrictness,
) -> Result<Bytes, PermitError> {
    let joined = concat_signature(&data.to_string(), signature, strictness)?;
    joined
        .parse()
        .map_err(|e| PermitError::InvalidFormat(format!("encoded payload: {e}")))
}

/// Current Permit2 allowance nonce for (owner, token, spender)
pub async fn permit2_nonce(
    reader: &dyn ChainReader,
    permit2: Address,
    owner: Address,
    token: Address,
    spender: Address,
) -> Result<u64, RpcError> {
    let call = IPermit2::allowanceCall {
        user: owner,
        token,
        spender,
    };
    let raw = reader
        .call(&CallRequest::new(permit2, Bytes::from(call.abi_encode())))
        .await?;
    let ret = IPermit2::allowanceCall::abi_decode_returns(&raw)
        .map_err(|e| RpcError::Decode(format!("Permit2 allowance: {e}")))?;
    Ok(ret.nonce.to::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use swap_engine_rpc::MockChainReader;
    use swap_engine_types::ErrorKind;

    const USDC: Address = address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
    const ROUTER: Address = address!("0x3fC91A3afd70395Cd496C647d5a6CC9D4B2b7FAD");
    const NOW: u64 = 1_700_000_000;

    fn params(sig_deadline: u64) -> PermitParams {
        PermitParams {
            token: USDC,
            amount: U256::from(1_000_000u64),
            expiration: NOW + 30 * 86_400,
            nonce: 3,
            spender: ROUTER,
            sig_deadline,
        }
    }

    fn signature() -> String {
        format!("0x{}1b", "ab".repeat(64))
    }

    #[test]
    fn test_concat_signature_layout() {
        let data = "0xdeadbeef";
        let sig = signature();
        let out = concat_signature(data, &sig, SignatureStrictness::Permissive).unwrap();

        assert_eq!(out.len(), 2 + 8 + 64 + 130);
        assert!(out.starts_with("0xdeadbeef"));
        assert!(out.ends_with(sig.trim_start_matches("0x")));
        assert_eq!(&out[10..74], &format!("{:064x}", 65));
    }

    #[test]
    fn test_concat_without_prefixes() {
        let sig = signature();
        let out = concat_signature("deadbeef", sig.trim_start_matches("0x"), SignatureStrictness::Strict).unwrap();
        assert!(out.starts_with("0xdeadbeef0000"));
    }

    #[test]
    fn test_odd_length_and_non_hex_rejected() {
        let err = concat_signature("0xabc", &signature(), SignatureStrictness::Permissive).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSignatureFormat);

        let err = concat_signature("0xab", "0xzz", SignatureStrictness::Permissive).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSignatureFormat);
    }

    #[test]
    fn test_strictness_on_short_signature() {
        let short = format!("0x{}", "cd".repeat(64));
        let permissive = concat_signature("0x01", &short, SignatureStrictness::Permissive).unwrap();
        assert_eq!(&permissive[4..68], &format!("{:064x}", 64));

        let err = concat_signature("0x01", &short, SignatureStrictness::Strict).unwrap_err();
        assert!(matches!(err, PermitError::InvalidFormat(_)));
    }

    #[test]
    fn test_append_signature_bytes() {
        let data = Bytes::from(vec![0x12, 0x34]);
        let out = append_signature(&data, &signature(), SignatureStrictness::Strict).unwrap();
        assert_eq!(out.len(), 2 + 32 + 65);
        assert_eq!(out[2 + 31], 65);
    }

    #[test]
    fn test_permit_single_round_trips_json() {
        let builder = PermitBuilder::new(1);
        let typed = builder.permit_single(params(NOW + 1800), NOW).unwrap();
        assert_eq!(typed.primary_type(), "PermitSingle");
        assert_eq!(typed.sig_deadline(), NOW + 1800);

        let json = typed.to_json();
        assert_eq!(json["domain"]["verifyingContract"], "0x000000000022d473030f116ddee9f6b43ac78ba3");
        assert_eq!(json["message"]["details"]["nonce"], "3");

        let parsed = PermitTypedData::from_json(&json).unwrap();
        assert_eq!(parsed, typed);
        assert_eq!(parsed.signing_hash(), typed.signing_hash());
    }

    #[test]
    fn test_signing_hash_depends_on_chain() {
        let mainnet = PermitBuilder::new(1).permit_single(params(NOW + 1800), NOW).unwrap();
        let base = PermitBuilder::new(8453).permit_single(params(NOW + 1800), NOW).unwrap();
        assert_ne!(mainnet.signing_hash(), base.signing_hash());
    }

    #[test]
    fn test_deadline_inside_buffer_is_expired() {
        let builder = PermitBuilder::new(1);
        let err = builder.permit_single(params(NOW + 299), NOW).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureExpired);

        let err = builder.permit_single(params(NOW + 300), NOW).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureExpired);

        assert!(builder.permit_single(params(NOW + 301), NOW).is_ok());
    }

    #[test]
    fn test_source_typed_data_validated() {
        let eip712 = json!({
            "types": {},
            "domain": {
                "name": "Permit2",
                "chainId": 1,
                "verifyingContract": "0x000000000022d473030f116ddee9f6b43ac78ba3"
            },
            "primaryType": "PermitTransferFrom",
            "message": {
                "permitted": {
                    "token": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                    "amount": "2500000000"
                },
                "spender": "0x0000000000001ff3684f28c67538d4d072c22734",
                "nonce": "2241959297937691820908574931991669",
                "deadline": (NOW + 600).to_string()
            }
        });

        let typed = PermitBuilder::new(1).from_source(&eip712, NOW).unwrap();
        assert_eq!(typed.token(), USDC);
        assert_eq!(typed.primary_type(), "PermitTransferFrom");

        let err = PermitBuilder::new(137).from_source(&eip712, NOW).unwrap_err();
        assert!(matches!(err, PermitError::ChainMismatch { expected: 137, actual: 1 }));

        let mut wrong = eip712.clone();
        wrong["domain"]["verifyingContract"] = json!("0x1111111111111111111111111111111111111111");
        let err = PermitBuilder::new(1).from_source(&wrong, NOW).unwrap_err();
        assert!(matches!(err, PermitError::WrongVerifyingContract(_)));

        let mut missing = eip712;
        missing["message"].as_object_mut().unwrap().remove("spender");
        let err = PermitBuilder::new(1).from_source(&missing, NOW).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredField);
    }

    #[test]
    fn test_amount_bounds() {
        let mut p = params(NOW + 1800);
        p.amount = U256::MAX;
        let err = PermitBuilder::new(1).permit_single(p, NOW).unwrap_err();
        assert!(matches!(err, PermitError::InvalidFormat(_)));
    }

    #[tokio::test]
    async fn test_reads_nonce_from_permit2() {
        let reader = MockChainReader::new(1).with_call_handler(|req| {
            assert_eq!(req.to, PERMIT2_ADDRESS);
            let mut ret = vec![0u8; 96];
            ret[63] = 0xff; // expiration
            ret[95] = 7; // nonce
            Ok(Bytes::from(ret))
        });
        let nonce = permit2_nonce(&reader, PERMIT2_ADDRESS, Address::repeat_byte(1), USDC, ROUTER)
            .await
            .unwrap();
        assert_eq!(nonce, 7);
    }
}
