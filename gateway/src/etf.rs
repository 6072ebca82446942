//! ETF (Erlang External Term Format) payload encoding, the binary-frame
//! alternative to [`json`](crate::json).
//!
//! Discord's ETF payloads map JSON objects to Erlang maps keyed by atoms or
//! binaries, JSON arrays to lists, `null`/`true`/`false` to the `nil`/`true`/
//! `false` atoms, and numbers to fixnums/bignums/floats. This module
//! translates between [`eetf::Term`] and [`serde_json::Value`] so the rest
//! of the crate can stay encoding-agnostic above `TransportCodec`.

use crate::model::{Opcode, PayloadEnvelope};
use eetf::{Atom, FixInteger, Map, Term};
use serde_json::{Map as JsonMap, Number, Value};
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
    io::Cursor,
};

/// An ETF encode or decode failure.
#[derive(Debug)]
pub struct EtfError {
    kind: EtfErrorType,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl EtfError {
    /// Return the type of error that occurred.
    pub const fn kind(&self) -> &EtfErrorType {
        &self.kind
    }
}

impl Display for EtfError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            EtfErrorType::Decode => f.write_str("failed to decode ETF term"),
            EtfErrorType::Encode => f.write_str("failed to encode ETF term"),
            EtfErrorType::MissingField { field } => {
                write!(f, "payload envelope missing required field `{field}`")
            }
            EtfErrorType::UnsupportedTerm => {
                f.write_str("ETF term has no JSON-compatible representation")
            }
        }
    }
}

impl Error for EtfError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`EtfError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum EtfErrorType {
    /// The byte stream was not a well-formed ETF term.
    Decode,
    /// The in-memory term could not be serialized to ETF.
    Encode,
    /// The decoded envelope map was missing a required field.
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },
    /// A term variant (fun, pid, port, reference) has no JSON equivalent.
    UnsupportedTerm,
}

/// Decode a complete binary ETF payload into a [`PayloadEnvelope`].
pub fn decode(bytes: &[u8]) -> Result<PayloadEnvelope, EtfError> {
    let term = Term::decode(Cursor::new(bytes)).map_err(|source| EtfError {
        kind: EtfErrorType::Decode,
        source: Some(Box::new(source)),
    })?;

    let Term::Map(map) = term else {
        return Err(EtfError {
            kind: EtfErrorType::MissingField { field: "op" },
            source: None,
        });
    };

    let raw_op = map_get(&map, "op")
        .and_then(term_as_u64)
        .ok_or(EtfError {
            kind: EtfErrorType::MissingField { field: "op" },
            source: None,
        })?;
    let raw_op = u8::try_from(raw_op).map_err(|source| EtfError {
        kind: EtfErrorType::Decode,
        source: Some(Box::new(source)),
    })?;
    let op = Opcode::from_u8(raw_op);

    let sequence = map_get(&map, "s").and_then(term_as_u64);
    let event_type = map_get(&map, "t").and_then(term_as_string);
    let data = map_get(&map, "d")
        .map(term_to_json)
        .transpose()?
        .unwrap_or(Value::Null);

    Ok(PayloadEnvelope {
        op,
        raw_op,
        data,
        sequence,
        event_type,
    })
}

/// Encode an outbound opcode/data pair as a binary ETF frame body.
pub fn encode(op: Opcode, data: &Value) -> Result<Vec<u8>, EtfError> {
    let mut entries = vec![
        (Term::from(Atom::from("op")), Term::from(FixInteger::from(i32::from(op.to_u8())))),
        (Term::from(Atom::from("d")), json_to_term(data)),
    ];
    entries.push((Term::from(Atom::from("s")), Term::from(Atom::from("nil"))));
    entries.push((Term::from(Atom::from("t")), Term::from(Atom::from("nil"))));

    let term = Term::Map(Map::from(entries));
    let mut buffer = Vec::new();
    term.encode(&mut buffer).map_err(|source| EtfError {
        kind: EtfErrorType::Encode,
        source: Some(Box::new(source)),
    })?;
    Ok(buffer)
}

fn map_get<'a>(map: &'a Map, key: &str) -> Option<&'a Term> {
    map.map.iter().find_map(|(k, v)| match k {
        Term::Atom(atom) if atom.name == key => Some(v),
        Term::Binary(bin) if bin.bytes == key.as_bytes() => Some(v),
        _ => None,
    })
}

fn term_as_u64(term: &Term) -> Option<u64> {
    match term {
        Term::FixInteger(n) => u64::try_from(n.value).ok(),
        Term::BigInteger(n) => n.value.to_string().parse().ok(),
        _ => None,
    }
}

fn term_as_string(term: &Term) -> Option<String> {
    match term {
        Term::Atom(atom) if atom.name == "nil" => None,
        Term::Atom(atom) => Some(atom.name.clone()),
        Term::Binary(bin) => String::from_utf8(bin.bytes.clone()).ok(),
        _ => None,
    }
}

fn term_to_json(term: &Term) -> Result<Value, EtfError> {
    Ok(match term {
        Term::Atom(atom) => match atom.name.as_str() {
            "nil" => Value::Null,
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            other => Value::String(other.to_owned()),
        },
        Term::FixInteger(n) => Value::Number(Number::from(n.value)),
        Term::BigInteger(n) => Value::Number(
            n.value
                .to_string()
                .parse::<i64>()
                .map(Number::from)
                .unwrap_or_else(|_| Number::from(0)),
        ),
        Term::Float(f) => Number::from_f64(f.value)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Term::Binary(bin) => Value::String(
            String::from_utf8(bin.bytes.clone()).map_err(|source| EtfError {
                kind: EtfErrorType::Decode,
                source: Some(Box::new(source)),
            })?,
        ),
        Term::List(list) => {
            let mut items = Vec::with_capacity(list.elements.len());
            for element in &list.elements {
                items.push(term_to_json(element)?);
            }
            Value::Array(items)
        }
        Term::Map(map) => {
            let mut object = JsonMap::with_capacity(map.map.len());
            for (key, value) in &map.map {
                let key = term_as_string(key).ok_or(EtfError {
                    kind: EtfErrorType::UnsupportedTerm,
                    source: None,
                })?;
                object.insert(key, term_to_json(value)?);
            }
            Value::Object(object)
        }
        _ => {
            return Err(EtfError {
                kind: EtfErrorType::UnsupportedTerm,
                source: None,
            })
        }
    })
}

fn json_to_term(value: &Value) -> Term {
    match value {
        Value::Null => Term::from(Atom::from("nil")),
        Value::Bool(b) => Term::from(Atom::from(if *b { "true" } else { "false" })),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Term::from(FixInteger::from(i32::try_from(i).unwrap_or(i32::MAX)))
            } else if let Some(f) = n.as_f64() {
                Term::from(eetf::Float::from(f))
            } else {
                Term::from(FixInteger::from(0))
            }
        }
        Value::String(s) => Term::from(eetf::Binary::from(s.as_bytes().to_vec())),
        Value::Array(items) => {
            Term::from(eetf::List::from(items.iter().map(json_to_term).collect::<Vec<_>>()))
        }
        Value::Object(map) => {
            let entries = map
                .iter()
                .map(|(k, v)| (Term::from(eetf::Binary::from(k.as_bytes().to_vec())), json_to_term(v)))
                .collect::<Vec<_>>();
            Term::Map(Map::from(entries))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_roundtrip_through_term() {
        let value = json!({"a": 1, "b": [true, false, null], "c": "hi"});
        let term = json_to_term(&value);
        let back = term_to_json(&term).unwrap();
        assert_eq!(back["a"], 1);
        assert_eq!(back["c"], "hi");
    }

    #[test]
    fn encode_decode_envelope_roundtrip() {
        let data = json!({"token": "abc"});
        let bytes = encode(Opcode::Identify, &data).unwrap();
        let envelope = decode(&bytes).unwrap();
        assert_eq!(envelope.op, Some(Opcode::Identify));
        assert_eq!(envelope.data["token"], "abc");
        assert!(envelope.sequence.is_none());
        assert!(envelope.event_type.is_none());
    }
}
