//! On-chain transaction records and SIP-010 transfer decoding.
//!
//! The block explorer returns contract-call arguments as Clarity-serialized
//! hex. Only the handful of value types a token `transfer` carries are
//! understood here.

use serde::{Deserialize, Serialize};

use super::payment_intent::PaymentIntent;

const TYPE_UINT: u8 = 0x01;
const TYPE_BUFFER: u8 = 0x02;
const TYPE_NONE: u8 = 0x09;
const TYPE_SOME: u8 = 0x0a;
const TYPE_STRING_ASCII: u8 = 0x0d;
const TYPE_STRING_UTF8: u8 = 0x0e;

pub const TRANSFER_FUNCTION: &str = "transfer";
pub const TX_STATUS_SUCCESS: &str = "success";
pub const TX_TYPE_CONTRACT_CALL: &str = "contract_call";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("unexpected Clarity type tag 0x{0:02x}")]
    UnexpectedType(u8),

    #[error("value truncated")]
    Truncated,

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
}

/// A transaction as reported by the block explorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub tx_id: String,
    pub tx_status: String,
    pub tx_type: String,
    /// `None` while the transaction sits in the mempool.
    pub block_height: Option<u64>,
    pub sender_address: String,
    pub contract_call: Option<ContractCall>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    pub contract_id: String,
    pub function_name: String,
    #[serde(default)]
    pub function_args: Vec<FunctionArg>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionArg {
    pub name: String,
    pub hex: String,
    pub repr: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

fn hex_bytes(hex_str: &str) -> Result<Vec<u8>, DecodeError> {
    let trimmed = hex_str.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(digits).map_err(|e| DecodeError::InvalidHex(e.to_string()))
}

/// Decodes a serialized Clarity `uint` into base units.
pub fn decode_uint(hex_str: &str) -> Result<u128, DecodeError> {
    let bytes = hex_bytes(hex_str)?;
    let (&tag, rest) = bytes.split_first().ok_or(DecodeError::Truncated)?;
    if tag != TYPE_UINT {
        return Err(DecodeError::UnexpectedType(tag));
    }
    let raw: [u8; 16] = rest
        .get(..16)
        .and_then(|b| b.try_into().ok())
        .ok_or(DecodeError::Truncated)?;
    Ok(u128::from_be_bytes(raw))
}

/// Decodes a transfer memo into text.
///
/// Accepts `none`, `(some ...)` and bare buffer/string values. Null bytes
/// are dropped and invalid UTF-8 is replaced.
pub fn decode_memo(hex_str: &str) -> Result<Option<String>, DecodeError> {
    let bytes = hex_bytes(hex_str)?;
    decode_memo_bytes(&bytes)
}

fn decode_memo_bytes(bytes: &[u8]) -> Result<Option<String>, DecodeError> {
    let (&tag, rest) = bytes.split_first().ok_or(DecodeError::Truncated)?;
    match tag {
        TYPE_NONE => Ok(None),
        TYPE_SOME => decode_memo_bytes(rest),
        TYPE_BUFFER | TYPE_STRING_ASCII | TYPE_STRING_UTF8 => {
            let len_bytes: [u8; 4] = rest
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or(DecodeError::Truncated)?;
            let len = u32::from_be_bytes(len_bytes) as usize;
            let content = rest.get(4..4 + len).ok_or(DecodeError::Truncated)?;
            let cleaned: Vec<u8> = content.iter().copied().filter(|b| *b != 0).collect();
            Ok(Some(String::from_utf8_lossy(&cleaned).into_owned()))
        }
        other => Err(DecodeError::UnexpectedType(other)),
    }
}

/// Principal from its Clarity repr (`'SP...` or `'SP....contract`).
pub fn principal_from_repr(repr: &str) -> String {
    let trimmed = repr.trim();
    trimmed.strip_prefix('\'').unwrap_or(trimmed).to_string()
}

/// A decoded SIP-010 `transfer` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCall {
    pub tx_id: String,
    pub amount: u128,
    pub sender: String,
    pub recipient: String,
    pub memo: Option<String>,
}

impl TransferCall {
    /// Decodes `tx` as a transfer of the token at `contract_id`.
    ///
    /// Returns `None` when the transaction is not a confirmed, successful
    /// `transfer` call on that contract. Arguments are looked up by name,
    /// then by their SIP-010 position.
    pub fn from_transaction(
        tx: &ChainTransaction,
        contract_id: &str,
    ) -> Option<Result<Self, DecodeError>> {
        if tx.tx_status != TX_STATUS_SUCCESS
            || tx.tx_type != TX_TYPE_CONTRACT_CALL
            || tx.block_height.is_none()
        {
            return None;
        }
        let call = tx.contract_call.as_ref()?;
        if call.contract_id != contract_id || call.function_name != TRANSFER_FUNCTION {
            return None;
        }
        Some(Self::decode(&tx.tx_id, &call.function_args))
    }

    fn decode(tx_id: &str, args: &[FunctionArg]) -> Result<Self, DecodeError> {
        let arg = |name: &'static str, position: usize| {
            args.iter()
                .find(|a| a.name == name)
                .or_else(|| args.get(position))
        };

        let amount = arg("amount", 0).ok_or(DecodeError::MissingArgument("amount"))?;
        let sender = arg("sender", 1).ok_or(DecodeError::MissingArgument("sender"))?;
        let recipient = arg("recipient", 2).ok_or(DecodeError::MissingArgument("recipient"))?;
        let memo = match arg("memo", 3) {
            Some(memo) => decode_memo(&memo.hex)?,
            None => None,
        };

        Ok(Self {
            tx_id: tx_id.to_string(),
            amount: decode_uint(&amount.hex)?,
            sender: principal_from_repr(&sender.repr),
            recipient: principal_from_repr(&recipient.repr),
            memo,
        })
    }

    /// Exact amount, expected recipient, and a memo mentioning the intent id.
    pub fn matches(&self, intent: &PaymentIntent, receiving_address: &str) -> bool {
        self.recipient == receiving_address
            && intent.amount.equals_base_units(self.amount)
            && self
                .memo
                .as_deref()
                .is_some_and(|memo| memo.contains(intent.id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, MerchantId, Metadata, Money};

    const CONTRACT: &str = "SM3VDXK3WZZSA84XXFKAFAF15NNZX32CTSG82JFQ4.sbtc-token";
    const MERCHANT_ADDR: &str = "SP2MERCHANT000000000000000000000000000";

    fn uint_hex(value: u128) -> String {
        format!("0x01{}", hex::encode(value.to_be_bytes()))
    }

    fn memo_hex(text: &str) -> String {
        let mut bytes = vec![TYPE_SOME, TYPE_BUFFER];
        bytes.extend_from_slice(&(text.len() as u32).to_be_bytes());
        bytes.extend_from_slice(text.as_bytes());
        format!("0x{}", hex::encode(bytes))
    }

    fn arg(name: &str, hex: String, repr: &str, type_name: &str) -> FunctionArg {
        FunctionArg {
            name: name.into(),
            hex,
            repr: repr.into(),
            type_name: type_name.into(),
        }
    }

    fn transfer_tx(amount: u128, memo: &str) -> ChainTransaction {
        ChainTransaction {
            tx_id: "0xfeed".into(),
            tx_status: "success".into(),
            tx_type: "contract_call".into(),
            block_height: Some(100),
            sender_address: "SP1CUSTOMER".into(),
            contract_call: Some(ContractCall {
                contract_id: CONTRACT.into(),
                function_name: "transfer".into(),
                function_args: vec![
                    arg("amount", uint_hex(amount), &format!("u{}", amount), "uint"),
                    arg("sender", "0x05".into(), "'SP1CUSTOMER", "principal"),
                    arg("recipient", "0x05".into(), &format!("'{}", MERCHANT_ADDR), "principal"),
                    arg("memo", memo_hex(memo), "(some 0x)", "(optional (buff 34))"),
                ],
            }),
        }
    }

    fn intent() -> PaymentIntent {
        PaymentIntent::new(
            MerchantId::new(),
            Money::positive(50_000, Currency::Sbtc).unwrap(),
            None,
            None,
            Metadata::new(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_decode_uint_strips_type_tag() {
        assert_eq!(decode_uint(&uint_hex(50_000)).unwrap(), 50_000);
        assert_eq!(decode_uint("01000000000000000000000000000000ff").unwrap(), 255);
    }

    #[test]
    fn test_decode_uint_errors() {
        assert!(matches!(decode_uint("0x02"), Err(DecodeError::UnexpectedType(0x02))));
        assert!(matches!(decode_uint("0x0100"), Err(DecodeError::Truncated)));
        assert!(matches!(decode_uint("0xzz"), Err(DecodeError::InvalidHex(_))));
        assert!(matches!(decode_uint(""), Err(DecodeError::Truncated)));
    }

    #[test]
    fn test_decode_memo_variants() {
        assert_eq!(decode_memo("0x09").unwrap(), None);
        assert_eq!(decode_memo(&memo_hex("pi_abc")).unwrap().as_deref(), Some("pi_abc"));

        // buff 34 padded with trailing nulls
        let mut bytes = vec![TYPE_BUFFER, 0, 0, 0, 8];
        bytes.extend_from_slice(b"pi_x\0\0\0\0");
        assert_eq!(
            decode_memo(&hex::encode(bytes)).unwrap().as_deref(),
            Some("pi_x")
        );

        assert!(matches!(decode_memo("0x0a02000000ff00"), Err(DecodeError::Truncated)));
        assert!(matches!(decode_memo("0x05"), Err(DecodeError::UnexpectedType(0x05))));
    }

    #[test]
    fn test_principal_repr() {
        assert_eq!(principal_from_repr("'SP123"), "SP123");
        assert_eq!(principal_from_repr("SP123.token"), "SP123.token");
    }

    #[test]
    fn test_decodes_transfer_call() {
        let pi = intent();
        let tx = transfer_tx(50_000, &format!("order {}", pi.id));
        let call = TransferCall::from_transaction(&tx, CONTRACT).unwrap().unwrap();
        assert_eq!(call.amount, 50_000);
        assert_eq!(call.sender, "SP1CUSTOMER");
        assert_eq!(call.recipient, MERCHANT_ADDR);
        assert!(call.matches(&pi, MERCHANT_ADDR));
    }

    #[test]
    fn test_positional_arguments() {
        let pi = intent();
        let mut tx = transfer_tx(50_000, pi.id.as_str());
        if let Some(call) = tx.contract_call.as_mut() {
            for a in &mut call.function_args {
                a.name.clear();
            }
        }
        let call = TransferCall::from_transaction(&tx, CONTRACT).unwrap().unwrap();
        assert!(call.matches(&pi, MERCHANT_ADDR));
    }

    #[test]
    fn test_amount_must_match_exactly() {
        let pi = intent();
        for amount in [49_999, 50_001] {
            let tx = transfer_tx(amount, pi.id.as_str());
            let call = TransferCall::from_transaction(&tx, CONTRACT).unwrap().unwrap();
            assert!(!call.matches(&pi, MERCHANT_ADDR));
        }
    }

    #[test]
    fn test_memo_and_recipient_must_match() {
        let pi = intent();
        let tx = transfer_tx(50_000, "pi_someone_else");
        let call = TransferCall::from_transaction(&tx, CONTRACT).unwrap().unwrap();
        assert!(!call.matches(&pi, MERCHANT_ADDR));

        let tx = transfer_tx(50_000, pi.id.as_str());
        let call = TransferCall::from_transaction(&tx, CONTRACT).unwrap().unwrap();
        assert!(!call.matches(&pi, "SP_OTHER"));
    }

    #[test]
    fn test_filters_non_candidates() {
        let base = transfer_tx(50_000, "memo");

        let mut failed = base.clone();
        failed.tx_status = "abort_by_response".into();
        assert!(TransferCall::from_transaction(&failed, CONTRACT).is_none());

        let mut mempool = base.clone();
        mempool.block_height = None;
        assert!(TransferCall::from_transaction(&mempool, CONTRACT).is_none());

        assert!(TransferCall::from_transaction(&base, "SP000.other-token").is_none());

        let mut mint = base.clone();
        if let Some(call) = mint.contract_call.as_mut() {
            call.function_name = "mint".into();
        }
        assert!(TransferCall::from_transaction(&mint, CONTRACT).is_none());
    }
}
