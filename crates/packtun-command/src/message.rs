use std::collections::BTreeMap;

use ciborium::Value;

use crate::error::{CommandError, Result};

/// Named arguments of a command or values of a response.
pub type Body = BTreeMap<String, Value>;

const NAME: u64 = 1;
const BODY: u64 = 2;

/// A named request with arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub body: Body,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: Body::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_message("command", &self.name, &self.body)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (name, body) = decode_message("command", bytes)?;
        if name.is_empty() {
            return Err(CommandError::Decode {
                what: "command",
                message: "missing name".to_string(),
            });
        }
        Ok(Self { name, body })
    }
}

/// The answer to a [`Command`]; `name` echoes the command it answers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub name: String,
    pub body: Body,
}

impl Response {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: Body::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_text)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_message("response", &self.name, &self.body)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (name, body) = decode_message("response", bytes)?;
        Ok(Self { name, body })
    }
}

fn encode_message(what: &'static str, name: &str, body: &Body) -> Result<Vec<u8>> {
    let body = body
        .iter()
        .map(|(key, value)| (Value::Text(key.clone()), value.clone()))
        .collect();
    let message = Value::Map(vec![
        (Value::Integer(NAME.into()), Value::Text(name.to_string())),
        (Value::Integer(BODY.into()), Value::Map(body)),
    ]);

    let mut out = Vec::new();
    ciborium::ser::into_writer(&message, &mut out).map_err(|err| CommandError::Encode {
        what,
        message: err.to_string(),
    })?;
    Ok(out)
}

fn decode_message(what: &'static str, bytes: &[u8]) -> Result<(String, Body)> {
    let invalid = |message: String| CommandError::Decode { what, message };

    let value: Value =
        ciborium::de::from_reader(bytes).map_err(|err| invalid(err.to_string()))?;
    let entries = value
        .into_map()
        .map_err(|_| invalid("expected a map".to_string()))?;

    let mut name = String::new();
    let mut body = Body::new();
    for (key, value) in entries {
        let key = key.as_integer().and_then(|key| u64::try_from(key).ok());
        match key {
            Some(NAME) => {
                name = value
                    .into_text()
                    .map_err(|_| invalid("name must be text".to_string()))?;
            }
            Some(BODY) => {
                let fields = value
                    .into_map()
                    .map_err(|_| invalid("body must be a map".to_string()))?;
                for (field, value) in fields {
                    let field = field
                        .into_text()
                        .map_err(|_| invalid("body keys must be text".to_string()))?;
                    body.insert(field, value);
                }
            }
            _ => {}
        }
    }
    Ok((name, body))
}
