//! XML-RPC value model, request encoding and response decoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use quick_xml::escape::escape;
use std::collections::BTreeMap;

use super::xml::{self, Element};
use super::RemoteError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Double(f64),
    String(String),
    DateTime(String),
    Base64(Vec<u8>),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Nil,
}

impl Value {
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) => members.get(key),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Integer view; servers send some numeric fields as strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::String(s) => s.trim().parse().ok(),
            Value::Base64(bytes) => String::from_utf8_lossy(bytes).trim().parse().ok(),
            _ => None,
        }
    }

    /// Text view. Base64 payloads are decoded as UTF-8, replacing invalid bytes.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::String(s) | Value::DateTime(s) => Some(s.clone()),
            Value::Base64(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Value::Int(i) => Some(i.to_string()),
            Value::Double(d) => Some(d.to_string()),
            Value::Bool(b) => Some(if *b { "1".into() } else { "0".into() }),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Int(i) => J::from(*i),
            Value::Bool(b) => J::Bool(*b),
            Value::Double(d) => J::from(*d),
            Value::String(s) | Value::DateTime(s) => J::String(s.clone()),
            Value::Base64(bytes) => J::String(String::from_utf8_lossy(bytes).into_owned()),
            Value::Array(items) => J::Array(items.iter().map(Value::to_json).collect()),
            Value::Struct(members) => J::Object(
                members
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Nil => J::Null,
        }
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<value>");
        match self {
            Value::Int(i) => {
                out.push_str("<int>");
                out.push_str(&i.to_string());
                out.push_str("</int>");
            }
            Value::Bool(b) => {
                out.push_str(if *b {
                    "<boolean>1</boolean>"
                } else {
                    "<boolean>0</boolean>"
                });
            }
            Value::Double(d) => {
                out.push_str("<double>");
                out.push_str(&d.to_string());
                out.push_str("</double>");
            }
            Value::String(s) => {
                out.push_str("<string>");
                out.push_str(&escape(s.as_str()));
                out.push_str("</string>");
            }
            Value::DateTime(s) => {
                out.push_str("<dateTime.iso8601>");
                out.push_str(&escape(s.as_str()));
                out.push_str("</dateTime.iso8601>");
            }
            Value::Base64(bytes) => {
                out.push_str("<base64>");
                out.push_str(&STANDARD.encode(bytes));
                out.push_str("</base64>");
            }
            Value::Array(items) => {
                out.push_str("<array><data>");
                for item in items {
                    item.write_xml(out);
                }
                out.push_str("</data></array>");
            }
            Value::Struct(members) => {
                out.push_str("<struct>");
                for (name, value) in members {
                    out.push_str("<member><name>");
                    out.push_str(&escape(name.as_str()));
                    out.push_str("</name>");
                    value.write_xml(out);
                    out.push_str("</member>");
                }
                out.push_str("</struct>");
            }
            Value::Nil => out.push_str("<nil/>"),
        }
        out.push_str("</value>");
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

/// Builder for the single struct argument every journal method takes.
#[derive(Debug, Clone, Default)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn into_value(self) -> Value {
        Value::Struct(self.0)
    }
}

pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for p in params {
        out.push_str("<param>");
        p.write_xml(&mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

/// Decode a `methodResponse`, turning a `<fault>` into [`RemoteError::Fault`].
pub fn decode_response(body: &str) -> Result<Value, RemoteError> {
    let root = xml::parse(body)?;
    if root.name != "methodResponse" {
        return Err(RemoteError::Malformed(format!(
            "expected methodResponse, got <{}>",
            root.name
        )));
    }
    if let Some(fault) = root.child("fault") {
        let value = fault
            .child("value")
            .map(decode_value)
            .transpose()?
            .unwrap_or(Value::Nil);
        let code = value.get("faultCode").and_then(Value::as_i64).unwrap_or(0);
        let message = value
            .get("faultString")
            .and_then(Value::as_text)
            .unwrap_or_default();
        return Err(RemoteError::Fault { code, message });
    }
    let value = root
        .child("params")
        .and_then(|p| p.child("param"))
        .and_then(|p| p.child("value"))
        .ok_or_else(|| RemoteError::Malformed("response without params".into()))?;
    decode_value(value)
}

fn decode_value(el: &Element) -> Result<Value, RemoteError> {
    let Some(typed) = el.children.first() else {
        return Ok(Value::String(el.text.clone()));
    };
    let text = typed.text.as_str();
    let value = match typed.name.as_str() {
        "i4" | "int" | "i8" => Value::Int(
            text.trim()
                .parse()
                .map_err(|_| RemoteError::Malformed(format!("bad integer {text:?}")))?,
        ),
        "boolean" => Value::Bool(text.trim() == "1"),
        "double" => Value::Double(
            text.trim()
                .parse()
                .map_err(|_| RemoteError::Malformed(format!("bad double {text:?}")))?,
        ),
        "string" => Value::String(text.to_string()),
        "dateTime.iso8601" => Value::DateTime(text.trim().to_string()),
        "base64" => {
            let compact: String = text.split_whitespace().collect();
            Value::Base64(
                STANDARD
                    .decode(compact)
                    .map_err(|err| RemoteError::Malformed(format!("bad base64: {err}")))?,
            )
        }
        "array" => {
            let data = typed
                .child("data")
                .ok_or_else(|| RemoteError::Malformed("array without data".into()))?;
            Value::Array(
                data.children_named("value")
                    .map(decode_value)
                    .collect::<Result<_, _>>()?,
            )
        }
        "struct" => {
            let mut members = BTreeMap::new();
            for member in typed.children_named("member") {
                let name = member
                    .child_text("name")
                    .ok_or_else(|| RemoteError::Malformed("member without name".into()))?;
                let value = member
                    .child("value")
                    .map(decode_value)
                    .transpose()?
                    .unwrap_or(Value::Nil);
                members.insert(name.to_string(), value);
            }
            Value::Struct(members)
        }
        "nil" => Value::Nil,
        other => {
            return Err(RemoteError::Malformed(format!(
                "unknown XML-RPC type <{other}>"
            )))
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_struct_params_with_escaping() {
        let params = Params::new()
            .with("username", "a<b")
            .with("ver", 1i64)
            .into_value();
        let xml = encode_call("LJ.XMLRPC.login", &[params]);
        assert!(xml.contains("<methodName>LJ.XMLRPC.login</methodName>"));
        assert!(xml.contains(
            "<member><name>username</name><value><string>a&lt;b</string></value></member>"
        ));
        assert!(xml.contains("<member><name>ver</name><value><int>1</int></value></member>"));
    }

    #[test]
    fn decodes_nested_response() {
        let body = r#"<?xml version="1.0"?>
<methodResponse><params><param><value><struct>
  <member><name>syncitems</name><value><array><data>
    <value><struct>
      <member><name>item</name><value><string>L-5</string></value></member>
      <member><name>time</name><value>2024-01-01 00:00:00</value></member>
    </struct></value>
  </data></array></value></member>
  <member><name>count</name><value><int>1</int></value></member>
  <member><name>subject</name><value><base64>aMOpbGxv</base64></value></member>
</struct></value></param></params></methodResponse>"#;
        let value = decode_response(body).unwrap();
        assert_eq!(value.get("count").and_then(Value::as_i64), Some(1));
        assert_eq!(
            value.get("subject").and_then(Value::as_text).as_deref(),
            Some("héllo")
        );
        let items = value.get("syncitems").and_then(Value::as_array).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].get("time").and_then(Value::as_text).as_deref(),
            Some("2024-01-01 00:00:00")
        );
    }

    #[test]
    fn fault_becomes_error() {
        let body = r#"<methodResponse><fault><value><struct>
<member><name>faultCode</name><value><int>101</int></value></member>
<member><name>faultString</name><value><string>Invalid password</string></value></member>
</struct></value></fault></methodResponse>"#;
        match decode_response(body) {
            Err(RemoteError::Fault { code, message }) => {
                assert_eq!(code, 101);
                assert_eq!(message, "Invalid password");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn numeric_strings_read_as_integers() {
        assert_eq!(Value::String(" 12 ".into()).as_i64(), Some(12));
        assert_eq!(Value::String("x".into()).as_i64(), None);
    }
}
