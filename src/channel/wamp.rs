use serde_json::{json, Value};

use crate::error::{protocol_error, DlResult};

/// WAMP v1 frame. Every frame travels as a JSON array whose first element is the type id.
#[derive(Clone, Debug, PartialEq)]
pub enum WampMessage {
    Welcome {
        session_id: String,
        protocol_version: u64,
        server_ident: String,
    },
    Prefix {
        prefix: String,
        uri: String,
    },
    Call {
        call_id: String,
        procedure: String,
        args: Vec<Value>,
    },
    CallResult {
        call_id: String,
        result: Value,
    },
    CallError {
        call_id: String,
        error_uri: String,
        description: String,
        details: Option<Value>,
    },
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        event: Value,
        exclude: Vec<String>,
        eligible: Vec<String>,
    },
    Event {
        topic: String,
        event: Value,
    },
}

impl WampMessage {
    pub fn type_id(&self) -> u64 {
        match self {
            WampMessage::Welcome { .. } => 0,
            WampMessage::Prefix { .. } => 1,
            WampMessage::Call { .. } => 2,
            WampMessage::CallResult { .. } => 3,
            WampMessage::CallError { .. } => 4,
            WampMessage::Subscribe { .. } => 5,
            WampMessage::Unsubscribe { .. } => 6,
            WampMessage::Publish { .. } => 7,
            WampMessage::Event { .. } => 8,
        }
    }

    pub fn to_value(&self) -> Value {
        let id = self.type_id();
        match self {
            WampMessage::Welcome {
                session_id,
                protocol_version,
                server_ident,
            } => json!([id, session_id, protocol_version, server_ident]),
            WampMessage::Prefix { prefix, uri } => json!([id, prefix, uri]),
            WampMessage::Call {
                call_id,
                procedure,
                args,
            } => {
                let mut frame = vec![json!(id), json!(call_id), json!(procedure)];
                frame.extend(args.iter().cloned());
                Value::Array(frame)
            }
            WampMessage::CallResult { call_id, result } => json!([id, call_id, result]),
            WampMessage::CallError {
                call_id,
                error_uri,
                description,
                details,
            } => {
                let mut frame = vec![json!(id), json!(call_id), json!(error_uri), json!(description)];
                if let Some(details) = details {
                    frame.push(details.clone());
                }
                Value::Array(frame)
            }
            WampMessage::Subscribe { topic } | WampMessage::Unsubscribe { topic } => {
                json!([id, topic])
            }
            WampMessage::Publish {
                topic,
                event,
                exclude,
                eligible,
            } => json!([id, topic, event, exclude, eligible]),
            WampMessage::Event { topic, event } => json!([id, topic, event]),
        }
    }

    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    pub fn decode(text: &str) -> DlResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| protocol_error(format!("invalid WAMP frame: {err}")))?;
        let Value::Array(frame) = value else {
            return Err(protocol_error("WAMP frame must be an array"));
        };
        let type_id = frame
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| protocol_error("WAMP frame without a type id"))?;

        let message = match type_id {
            0 => WampMessage::Welcome {
                session_id: text_at(&frame, 1)?,
                protocol_version: frame.get(2).and_then(Value::as_u64).unwrap_or(1),
                server_ident: frame
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            1 => WampMessage::Prefix {
                prefix: text_at(&frame, 1)?,
                uri: text_at(&frame, 2)?,
            },
            2 => WampMessage::Call {
                call_id: text_at(&frame, 1)?,
                procedure: text_at(&frame, 2)?,
                args: frame.iter().skip(3).cloned().collect(),
            },
            3 => WampMessage::CallResult {
                call_id: text_at(&frame, 1)?,
                result: frame.get(2).cloned().unwrap_or(Value::Null),
            },
            4 => WampMessage::CallError {
                call_id: text_at(&frame, 1)?,
                error_uri: text_at(&frame, 2)?,
                description: frame
                    .get(3)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                details: frame.get(4).cloned(),
            },
            5 => WampMessage::Subscribe {
                topic: text_at(&frame, 1)?,
            },
            6 => WampMessage::Unsubscribe {
                topic: text_at(&frame, 1)?,
            },
            7 => WampMessage::Publish {
                topic: text_at(&frame, 1)?,
                event: frame.get(2).cloned().unwrap_or(Value::Null),
                exclude: ids_at(&frame, 3),
                eligible: ids_at(&frame, 4),
            },
            8 => WampMessage::Event {
                topic: text_at(&frame, 1)?,
                event: frame.get(2).cloned().unwrap_or(Value::Null),
            },
            other => return Err(protocol_error(format!("unknown WAMP message type {other}"))),
        };
        Ok(message)
    }
}

fn text_at(frame: &[Value], index: usize) -> DlResult<String> {
    frame
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| protocol_error(format!("WAMP frame is missing string element {index}")))
}

fn ids_at(frame: &[Value], index: usize) -> Vec<String> {
    frame
        .get(index)
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
