//! Built-in transforms.
//!
//! | name          | input                | output                         |
//! |---------------|----------------------|--------------------------------|
//! | `passthrough` | anything             | unchanged                      |
//! | `utf8`        | bytes                | text (split chars reassembled) |
//! | `lines`       | bytes / text         | one text item per line         |
//! | `json`        | bytes / text         | parsed JSON value              |

use std::sync::Arc;

use crate::error::TransformError;
use crate::middleware::{Outlet, Transform, TransformFactory};
use crate::peer::PeerConnection;
use crate::protocol::Payload;

/// Names accepted by [`resolve_builtin`].
pub const BUILTIN_NAMES: &[&str] = &["passthrough", "utf8", "lines", "json"];

/// Forwards every item unchanged.
#[derive(Debug, Default)]
pub struct Passthrough;

impl Transform for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn transform(&mut self, item: Payload, out: &mut Outlet) -> Result<(), TransformError> {
        out.push(item);
        Ok(())
    }
}

/// Boxed [`Passthrough`].
pub fn passthrough() -> Box<dyn Transform> {
    Box::new(Passthrough)
}

/// Decodes byte chunks into text, holding back a trailing partial character.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        // Incomplete sequence at the end, wait for more.
                        None => {
                            self.pending.drain(..valid_up_to);
                            return text;
                        }
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + bad);
                        }
                    }
                }
            }
        }
    }
}

impl Transform for Utf8Decoder {
    fn name(&self) -> &str {
        "utf8"
    }

    fn transform(&mut self, item: Payload, out: &mut Outlet) -> Result<(), TransformError> {
        match item {
            Payload::Bytes(bytes) => {
                let text = self.decode(&bytes);
                if !text.is_empty() {
                    out.push(text);
                }
            }
            other => {
                out.push(other);
            }
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Outlet) -> Result<(), TransformError> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            out.push(String::from_utf8_lossy(&rest).into_owned());
        }
        Ok(())
    }
}

/// Splits a byte or text stream into lines.
///
/// `\r\n` and `\n` both end a line; an unterminated tail is emitted when
/// the input ends.
#[derive(Debug, Default)]
pub struct LineSplitter {
    decoder: Utf8Decoder,
    buffer: String,
}

impl LineSplitter {
    fn emit_lines(&mut self, out: &mut Outlet) {
        while let Some(pos) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            out.push(line);
        }
    }
}

impl Transform for LineSplitter {
    fn name(&self) -> &str {
        "lines"
    }

    fn transform(&mut self, item: Payload, out: &mut Outlet) -> Result<(), TransformError> {
        match item {
            Payload::Bytes(bytes) => {
                let text = self.decoder.decode(&bytes);
                self.buffer.push_str(&text);
            }
            Payload::Text(text) => self.buffer.push_str(&text),
            json @ Payload::Json(_) => {
                out.push(json);
                return Ok(());
            }
        }
        self.emit_lines(out);
        Ok(())
    }

    fn finish(&mut self, out: &mut Outlet) -> Result<(), TransformError> {
        if !self.buffer.is_empty() {
            out.push(std::mem::take(&mut self.buffer));
        }
        Ok(())
    }
}

/// Parses each item as one JSON document.
#[derive(Debug, Default)]
pub struct JsonDecoder;

impl Transform for JsonDecoder {
    fn name(&self) -> &str {
        "json"
    }

    fn transform(&mut self, item: Payload, out: &mut Outlet) -> Result<(), TransformError> {
        let parsed = match item {
            Payload::Json(value) => {
                out.push(Payload::Json(value));
                return Ok(());
            }
            Payload::Text(text) => serde_json::from_str(&text),
            Payload::Bytes(bytes) => serde_json::from_slice(&bytes),
        };
        let value = parsed.map_err(|e| TransformError::new("json", e.to_string()))?;
        out.push(Payload::Json(value));
        Ok(())
    }
}

/// Transform backed by a closure.
pub struct FnTransform<F> {
    name: String,
    f: F,
}

impl<F> Transform for FnTransform<F>
where
    F: FnMut(Payload, &mut Outlet) -> Result<(), TransformError> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn transform(&mut self, item: Payload, out: &mut Outlet) -> Result<(), TransformError> {
        (self.f)(item, out)
    }
}

/// Build a transform from a closure.
pub fn from_fn<F>(name: impl Into<String>, f: F) -> Box<dyn Transform>
where
    F: FnMut(Payload, &mut Outlet) -> Result<(), TransformError> + Send + 'static,
{
    Box::new(FnTransform { name: name.into(), f })
}

/// Factory for one of the built-in transforms.
#[derive(Debug, Clone, Copy)]
pub struct Builtin {
    name: &'static str,
    make: fn() -> Box<dyn Transform>,
}

impl Builtin {
    /// The factory every overlay starts with.
    pub const PASSTHROUGH: Builtin = Builtin {
        name: "passthrough",
        make: passthrough,
    };
}

impl TransformFactory for Builtin {
    fn name(&self) -> &str {
        self.name
    }

    fn create(&self, _peer: &Arc<PeerConnection>) -> Result<Box<dyn Transform>, TransformError> {
        Ok((self.make)())
    }
}

/// Look up a built-in factory by name.
pub fn resolve_builtin(name: &str) -> Option<Builtin> {
    let (name, make): (&'static str, fn() -> Box<dyn Transform>) = match name {
        "passthrough" => return Some(Builtin::PASSTHROUGH),
        "utf8" => ("utf8", || -> Box<dyn Transform> { Box::new(Utf8Decoder::default()) }),
        "lines" => ("lines", || -> Box<dyn Transform> { Box::new(LineSplitter::default()) }),
        "json" => ("json", || -> Box<dyn Transform> { Box::new(JsonDecoder) }),
        _ => return None,
    };
    Some(Builtin { name, make })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn bytes(data: &'static [u8]) -> Payload {
        Payload::Bytes(Bytes::from_static(data))
    }

    fn run(transform: &mut dyn Transform, items: Vec<Payload>) -> Vec<Payload> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut out = Outlet::new(tx);
        for item in items {
            let _ = transform.transform(item, &mut out);
        }
        transform.finish(&mut out).unwrap();
        drop(out);

        let mut collected = Vec::new();
        while let Ok(item) = rx.try_recv() {
            collected.push(item);
        }
        collected
    }

    #[test]
    fn test_utf8_reassembles_split_char() {
        // "é" is 0xC3 0xA9.
        let mut decoder = Utf8Decoder::default();
        let out = run(
            &mut decoder,
            vec![Payload::from(vec![b'a', 0xC3]), Payload::from(vec![0xA9, b'b'])],
        );
        assert_eq!(out, vec![Payload::from("a"), Payload::from("éb")]);
    }

    #[test]
    fn test_utf8_replaces_invalid() {
        let mut decoder = Utf8Decoder::default();
        let out = run(&mut decoder, vec![Payload::from(vec![b'x', 0xFF, b'y'])]);
        assert_eq!(out, vec![Payload::from("x\u{fffd}y")]);
    }

    #[test]
    fn test_lines_across_chunks() {
        let mut lines = LineSplitter::default();
        let out = run(
            &mut lines,
            vec![bytes(b"one\r\ntw"), bytes(b"o\nthree"), Payload::from("\n\nfour")],
        );
        assert_eq!(
            out,
            vec![
                Payload::from("one"),
                Payload::from("two"),
                Payload::from("three"),
                Payload::from(""),
                Payload::from("four"),
            ]
        );
    }

    #[test]
    fn test_json_decoder() {
        let mut decoder = JsonDecoder;
        let out = run(
            &mut decoder,
            vec![Payload::from(r#"{"a":1}"#), Payload::from("not json"), bytes(b"[1,2]")],
        );
        assert_eq!(out, vec![Payload::from(json!({"a": 1})), Payload::from(json!([1, 2]))]);
    }

    #[test]
    fn test_json_decoder_error_names_middleware() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut out = Outlet::new(tx);
        let err = JsonDecoder.transform(Payload::from("{"), &mut out).unwrap_err();
        assert_eq!(err.middleware, "json");
    }

    #[test]
    fn test_from_fn() {
        let mut upper = from_fn("upper", |item, out| {
            let text = item.as_text().unwrap_or_default().to_uppercase();
            out.push(text);
            Ok(())
        });
        assert_eq!(upper.name(), "upper");
        assert_eq!(run(upper.as_mut(), vec![Payload::from("abc")]), vec![Payload::from("ABC")]);
    }

    #[test]
    fn test_resolve_builtin() {
        for name in BUILTIN_NAMES {
            assert_eq!(resolve_builtin(name).unwrap().name(), *name);
        }
        assert!(resolve_builtin("gzip").is_none());
    }
}
