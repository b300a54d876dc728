//! Versioned wire decoders: loose node JSON → typed [`RawBlock`].
//!
//! One decoder per protocol version's wire shape. Required fields raise
//! explicit errors — a missing field is a loud wire mismatch, never a
//! silently propagated null.

use serde_json::Value;

use stakeindex_core::error::IndexerError;
use stakeindex_core::types::{
    Mutez, OpStatus, RawBlock, RawContent, RawHeader, RawOperationGroup, RawStakingEvent,
    RawStakingKind, RawTransaction,
};

fn required<'a>(value: &'a Value, field: &str) -> Result<&'a Value, IndexerError> {
    value.get(field).ok_or_else(|| IndexerError::Wire(format!("missing field `{field}`")))
}

fn required_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, IndexerError> {
    required(value, field)?
        .as_str()
        .ok_or_else(|| IndexerError::Wire(format!("field `{field}` is not a string")))
}

fn required_i64(value: &Value, field: &str) -> Result<i64, IndexerError> {
    required(value, field)?
        .as_i64()
        .ok_or_else(|| IndexerError::Wire(format!("field `{field}` is not an integer")))
}

/// Timestamps arrive as unix seconds or RFC 3339 strings.
fn required_timestamp(value: &Value, field: &str) -> Result<i64, IndexerError> {
    match required(value, field)? {
        Value::Number(n) => {
            n.as_i64().ok_or_else(|| IndexerError::Wire(format!("field `{field}` overflows")))
        }
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp())
            .map_err(|_| IndexerError::Wire(format!("field `{field}` is not a timestamp"))),
        _ => Err(IndexerError::Wire(format!("field `{field}` is not a timestamp"))),
    }
}

/// Amounts arrive either as JSON numbers or decimal strings.
fn required_mutez(value: &Value, field: &str) -> Result<Mutez, IndexerError> {
    match required(value, field)? {
        Value::Number(n) => {
            n.as_i64().ok_or_else(|| IndexerError::Wire(format!("field `{field}` overflows")))
        }
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| IndexerError::Wire(format!("field `{field}` is not an amount"))),
        _ => Err(IndexerError::Wire(format!("field `{field}` is not an amount"))),
    }
}

fn header_of(value: &Value) -> Result<RawHeader, IndexerError> {
    let header = required(value, "header")?;
    let metadata = required(value, "metadata")?;
    let protocol = required_str(value, "protocol")?.to_string();
    let next_protocol = metadata
        .get("next_protocol")
        .and_then(|v| v.as_str())
        .unwrap_or(&protocol)
        .to_string();
    Ok(RawHeader {
        level: required_i64(header, "level")?,
        hash: required_str(value, "hash")?.to_string(),
        predecessor: required_str(header, "predecessor")?.to_string(),
        timestamp: required_timestamp(header, "timestamp")?,
        protocol,
        next_protocol,
    })
}

fn transaction_of(content: &Value) -> Result<RawTransaction, IndexerError> {
    let status = required_str(content, "status")?;
    Ok(RawTransaction {
        sender: required_str(content, "source")?.to_string(),
        target: required_str(content, "destination")?.to_string(),
        amount: required_mutez(content, "amount")?,
        fee: required_mutez(content, "fee")?,
        burned: match content.get("burned") {
            Some(_) => required_mutez(content, "burned")?,
            None => 0,
        },
        counter: required_i64(content, "counter")?,
        status: OpStatus::parse(status)
            .ok_or_else(|| IndexerError::Wire(format!("unknown operation status `{status}`")))?,
    })
}

fn operations_of(value: &Value) -> Result<Vec<RawOperationGroup>, IndexerError> {
    let list = required(value, "operations")?
        .as_array()
        .ok_or_else(|| IndexerError::Wire("field `operations` is not an array".into()))?;
    let mut groups = Vec::with_capacity(list.len());
    for group in list {
        let contents = required(group, "contents")?
            .as_array()
            .ok_or_else(|| IndexerError::Wire("field `contents` is not an array".into()))?;
        let mut decoded = Vec::with_capacity(contents.len());
        for content in contents {
            let kind = required_str(content, "kind")?;
            match kind {
                "transaction" => decoded.push(RawContent::Transaction(transaction_of(content)?)),
                other => {
                    return Err(IndexerError::Wire(format!("unsupported operation kind `{other}`")))
                }
            }
        }
        groups.push(RawOperationGroup {
            hash: required_str(group, "hash")?.to_string(),
            contents: decoded,
        });
    }
    Ok(groups)
}

fn staking_events_of(metadata: &Value) -> Result<Vec<RawStakingEvent>, IndexerError> {
    let Some(list) = metadata.get("staking_events") else {
        return Ok(vec![]);
    };
    let list = list
        .as_array()
        .ok_or_else(|| IndexerError::Wire("field `staking_events` is not an array".into()))?;
    list.iter()
        .map(|event| {
            let kind = required_str(event, "kind")?;
            let kind = match kind {
                "stake" => RawStakingKind::Stake,
                "unstake" => RawStakingKind::Unstake,
                "slash" => RawStakingKind::Slash,
                other => {
                    return Err(IndexerError::Wire(format!("unknown staking kind `{other}`")))
                }
            };
            Ok(RawStakingEvent {
                kind,
                staker: required_str(event, "staker")?.to_string(),
                delegate: required_str(event, "delegate")?.to_string(),
                amount: required_mutez(event, "amount")?,
            })
        })
        .collect()
}

/// First-generation wire shape: header, baker, operation groups. Stake
/// movements did not exist yet, so none are decoded.
pub fn decode_v1(value: &Value) -> Result<RawBlock, IndexerError> {
    let metadata = required(value, "metadata")?;
    Ok(RawBlock {
        header: header_of(value)?,
        baker: required_str(metadata, "baker")?.to_string(),
        operations: operations_of(value)?,
        staking_events: vec![],
    })
}

/// Second-generation wire shape: v1 plus stake movement events in block
/// metadata.
pub fn decode_v2(value: &Value) -> Result<RawBlock, IndexerError> {
    let metadata = required(value, "metadata")?;
    Ok(RawBlock {
        header: header_of(value)?,
        baker: required_str(metadata, "baker")?.to_string(),
        operations: operations_of(value)?,
        staking_events: staking_events_of(metadata)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_block() -> Value {
        json!({
            "protocol": "PtAlpha",
            "hash": "BL5",
            "header": { "level": 5, "predecessor": "BL4", "timestamp": 1000 },
            "metadata": {
                "baker": "tz1baker",
                "staking_events": [
                    { "kind": "stake", "staker": "tz1user", "delegate": "tz1baker", "amount": "250" }
                ]
            },
            "operations": [
                {
                    "hash": "opAAA",
                    "contents": [{
                        "kind": "transaction",
                        "source": "tz1user",
                        "destination": "tz1other",
                        "amount": 100,
                        "fee": 10,
                        "counter": 3,
                        "status": "applied"
                    }]
                }
            ]
        })
    }

    #[test]
    fn v1_decodes_and_ignores_staking_events() {
        let raw = decode_v1(&sample_block()).unwrap();
        assert_eq!(raw.header.level, 5);
        assert_eq!(raw.baker, "tz1baker");
        assert_eq!(raw.operations.len(), 1);
        assert!(raw.staking_events.is_empty());
        let RawContent::Transaction(tx) = &raw.operations[0].contents[0];
        assert_eq!(tx.amount, 100);
        assert_eq!(tx.burned, 0); // absent field defaults
    }

    #[test]
    fn v2_decodes_staking_events() {
        let raw = decode_v2(&sample_block()).unwrap();
        assert_eq!(raw.staking_events.len(), 1);
        assert_eq!(raw.staking_events[0].kind, RawStakingKind::Stake);
        assert_eq!(raw.staking_events[0].amount, 250);
    }

    #[test]
    fn missing_required_field_is_loud() {
        let mut value = sample_block();
        value["metadata"].as_object_mut().unwrap().remove("baker");
        let err = decode_v1(&value).unwrap_err();
        assert!(matches!(err, IndexerError::Wire(_)), "{err}");
    }

    #[test]
    fn unknown_operation_kind_is_rejected() {
        let mut value = sample_block();
        value["operations"][0]["contents"][0]["kind"] = json!("origination");
        let err = decode_v1(&value).unwrap_err();
        assert!(matches!(err, IndexerError::Wire(_)), "{err}");
    }

    #[test]
    fn timestamp_accepts_rfc3339() {
        let mut value = sample_block();
        value["header"]["timestamp"] = json!("2024-01-01T00:00:00Z");
        let raw = decode_v1(&value).unwrap();
        assert_eq!(raw.header.timestamp, 1_704_067_200);
    }

    #[test]
    fn next_protocol_defaults_to_protocol() {
        let raw = decode_v1(&sample_block()).unwrap();
        assert_eq!(raw.header.next_protocol, "PtAlpha");
    }
}
