//! # Structured Field Codec
//!
//! Parses and emits the RFC 8941 subset used by `Signature-Input` and
//! `Signature` headers:
//!
//! - `Signature-Input` is a dictionary of inner lists with parameters:
//!   `sig1=("@method" "@path");keyid="ab12";created=1700000000`
//! - `Signature` is a dictionary of byte sequences:
//!   `sig1=:MEUCIQ...:`
//!
//! Multiple labels may coexist in either header. Parameter names are
//! treated case-insensitively and surrounding whitespace is ignored;
//! emission is deterministic and canonical.

use std::collections::BTreeMap;

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64URL};
use base64::Engine as _;

use crate::error::{Error, Result};
use crate::httpsig::{ComponentId, SignatureParams};

// ============================================================================
// SCANNER
// ============================================================================

struct Scanner<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        match self.bump() {
            Some(b) if b == byte => Ok(()),
            other => Err(Error::MalformedHeader(format!(
                "Expected '{}' at byte {}, found {:?}",
                byte as char,
                self.pos,
                other.map(|b| b as char)
            ))),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Dictionary member key / parameter key
    fn read_key(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'*') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(Error::MalformedHeader(format!(
                "Expected key at byte {}",
                start
            )));
        }
        let key = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| Error::MalformedHeader("Non-UTF8 key".into()))?;
        Ok(key.to_ascii_lowercase())
    }

    /// Quoted sf-string with backslash escapes
    fn read_string(&mut self) -> Result<String> {
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(b'"') => return Ok(out),
                Some(b'\\') => match self.bump() {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    _ => {
                        return Err(Error::MalformedHeader(
                            "Invalid escape in quoted string".into(),
                        ))
                    }
                },
                Some(b) => out.push(b as char),
                None => return Err(Error::MalformedHeader("Unterminated quoted string".into())),
            }
        }
    }

    /// Signed sf-integer
    fn read_integer(&mut self) -> Result<i64> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| Error::MalformedHeader("Non-UTF8 integer".into()))?;
        text.parse::<i64>()
            .map_err(|_| Error::MalformedHeader(format!("Invalid integer '{}'", text)))
    }

    /// Byte sequence `:base64:`; accepts standard and url-safe alphabets
    fn read_byte_sequence(&mut self) -> Result<Vec<u8>> {
        self.expect(b':')?;
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b != b':') {
            self.pos += 1;
        }
        let body = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| Error::MalformedHeader("Non-UTF8 byte sequence".into()))?;
        self.expect(b':')?;
        BASE64
            .decode(body)
            .or_else(|_| BASE64URL.decode(body))
            .map_err(|e| Error::MalformedHeader(format!("Invalid base64: {}", e)))
    }
}

// ============================================================================
// PARSING
// ============================================================================

/// Parameter value: quoted string or bare integer
enum ParamValue {
    Str(String),
    Int(i64),
}

fn read_param(scanner: &mut Scanner<'_>) -> Result<(String, ParamValue)> {
    // caller consumed the ';'
    scanner.skip_ws();
    let key = scanner.read_key()?;
    scanner.expect(b'=')?;
    let value = match scanner.peek() {
        Some(b'"') => ParamValue::Str(scanner.read_string()?),
        Some(b) if b.is_ascii_digit() || b == b'-' => ParamValue::Int(scanner.read_integer()?),
        other => {
            return Err(Error::MalformedHeader(format!(
                "Unsupported parameter value starting with {:?}",
                other.map(|b| b as char)
            )))
        }
    };
    Ok((key, value))
}

fn read_inner_list(scanner: &mut Scanner<'_>) -> Result<SignatureParams> {
    scanner.expect(b'(')?;
    let mut components = Vec::new();
    loop {
        scanner.skip_ws();
        match scanner.peek() {
            Some(b')') => {
                scanner.bump();
                break;
            }
            Some(b'"') => {
                let name = scanner.read_string()?;
                let mut params = Vec::new();
                while scanner.peek() == Some(b';') {
                    scanner.bump();
                    let (key, value) = read_param(scanner)?;
                    match value {
                        ParamValue::Str(s) => params.push((key, s)),
                        ParamValue::Int(i) => params.push((key, i.to_string())),
                    }
                }
                components.push(ComponentId { name, params });
            }
            other => {
                return Err(Error::MalformedHeader(format!(
                    "Unexpected byte in inner list: {:?}",
                    other.map(|b| b as char)
                )))
            }
        }
    }

    let mut sig_params = SignatureParams {
        components,
        ..Default::default()
    };

    while scanner.peek() == Some(b';') {
        scanner.bump();
        let (key, value) = read_param(scanner)?;
        match (key.as_str(), value) {
            ("keyid", ParamValue::Str(s)) => sig_params.key_id = Some(s),
            ("alg", ParamValue::Str(s)) => sig_params.algorithm = Some(s),
            ("created", ParamValue::Int(i)) => sig_params.created = Some(i),
            ("expires", ParamValue::Int(i)) => sig_params.expires = Some(i),
            ("nonce", ParamValue::Str(s)) => sig_params.nonce = Some(s),
            ("tag", ParamValue::Str(s)) => sig_params.tag = Some(s),
            (other, _) => {
                return Err(Error::MalformedHeader(format!(
                    "Unknown or mistyped signature parameter '{}'",
                    other
                )))
            }
        }
    }

    Ok(sig_params)
}

/// Parse a `Signature-Input` header value into labelled parameter sets
///
/// Multiple labelled signatures may coexist:
/// `sig1=("@method");created=1, sig2=("@path");created=2`
pub fn parse_signature_input(header_value: &str) -> Result<BTreeMap<String, SignatureParams>> {
    let mut scanner = Scanner::new(header_value.trim());
    let mut out = BTreeMap::new();

    loop {
        scanner.skip_ws();
        let label = scanner.read_key()?;
        scanner.expect(b'=')?;
        let params = read_inner_list(&mut scanner)?;
        out.insert(label, params);

        scanner.skip_ws();
        if scanner.at_end() {
            return Ok(out);
        }
        scanner.expect(b',')?;
    }
}

/// Parse a `Signature` header value into labelled signature bytes
pub fn parse_signature(header_value: &str) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut scanner = Scanner::new(header_value.trim());
    let mut out = BTreeMap::new();

    loop {
        scanner.skip_ws();
        let label = scanner.read_key()?;
        scanner.expect(b'=')?;
        let bytes = scanner.read_byte_sequence()?;
        out.insert(label, bytes);

        scanner.skip_ws();
        if scanner.at_end() {
            return Ok(out);
        }
        scanner.expect(b',')?;
    }
}

// ============================================================================
// EMISSION
// ============================================================================

/// Render one `Signature` dictionary member: `label=:base64:`
pub fn render_signature(label: &str, signature: &[u8]) -> String {
    format!("{}=:{}:", label, BASE64.encode(signature))
}

// ============================================================================
// TESTS
// ============================================================================
