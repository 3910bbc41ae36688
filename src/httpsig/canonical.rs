//! # Signature Base Construction
//!
//! Builds the RFC 9421 *signature base*: the exact byte string that gets
//! signed and verified. One line per covered component, then the
//! `@signature-params` line:
//!
//! ```text
//! "@method": GET
//! "@authority": example.com
//! "@path": /foo
//! "@query": ?bar=baz
//! "@signature-params": ("@method" "@authority" "@path" "@query");alg="ed25519";created=1700000000
//! ```
//!
//! ## Derived components
//!
//! | Component | Value |
//! |-----------|-------|
//! | `@method` | Request method, uppercased |
//! | `@target-uri` | Full absolute request URI |
//! | `@authority` | `host[:port]`, lowercased |
//! | `@scheme` | URI scheme |
//! | `@request-target` | Path plus query as sent on the request line |
//! | `@path` | URI path; empty path canonicalizes to `/` |
//! | `@query` | Query with leading `?`; absent/empty query is `?` |
//! | `@query-param;name="x"` | URL-decoded value of the named parameter |
//!
//! Header components use the lowercase header name; multiple values join
//! with `", "` in insertion order, each trimmed of surrounding
//! whitespace. Percent-encoded path bytes are signed verbatim;
//! `@query-param` names match case-sensitively after decoding.

use crate::error::{Error, Result};
use crate::httpsig::{ComponentId, SignatureParams};

/// Build the signature base string for a request under the given
/// parameter set
///
/// Fails with `ComponentNotFound` when a covered component does not
/// exist on the request.
pub fn build_signature_base<B>(
    req: &http::Request<B>,
    params: &SignatureParams,
) -> Result<String> {
    let mut lines = Vec::with_capacity(params.components.len() + 1);

    for component in &params.components {
        if component.name.starts_with('@') {
            for value in derived_values(req, component)? {
                lines.push(format!("{}: {}", component.render(), value));
            }
        } else {
            lines.push(format!(
                "{}: {}",
                component.render(),
                header_value(req, &component.name)?
            ));
        }
    }

    lines.push(format!("\"@signature-params\": {}", params.render()));
    Ok(lines.join("\n"))
}

/// Resolve a derived (`@`-prefixed) component to its value(s)
///
/// `@query-param` can legitimately produce several lines when the
/// parameter repeats; every other component produces exactly one.
fn derived_values<B>(req: &http::Request<B>, component: &ComponentId) -> Result<Vec<String>> {
    let uri = req.uri();
    let one = |v: String| Ok(vec![v]);

    match component.name.as_str() {
        "@method" => one(req.method().as_str().to_uppercase()),
        "@target-uri" => {
            if uri.scheme().is_none() || uri.authority().is_none() {
                return Err(Error::ComponentNotFound(
                    "@target-uri requires an absolute request URI".into(),
                ));
            }
            one(uri.to_string())
        }
        "@authority" => match uri.authority() {
            Some(authority) => one(authority.as_str().to_ascii_lowercase()),
            None => Err(Error::ComponentNotFound(
                "@authority requires a URI with an authority".into(),
            )),
        },
        "@scheme" => match uri.scheme_str() {
            Some(scheme) => one(scheme.to_string()),
            None => Err(Error::ComponentNotFound(
                "@scheme requires an absolute request URI".into(),
            )),
        },
        "@request-target" => match uri.path_and_query() {
            Some(pq) => one(pq.as_str().to_string()),
            None => one("/".to_string()),
        },
        "@path" => {
            let path = uri.path();
            one(if path.is_empty() { "/".into() } else { path.into() })
        }
        "@query" => match uri.query() {
            Some(query) => one(format!("?{}", query)),
            None => one("?".to_string()),
        },
        "@query-param" => {
            let name = component.param("name").ok_or_else(|| {
                Error::MalformedHeader("@query-param requires a name parameter".into())
            })?;
            let values = query_param_values(uri.query().unwrap_or(""), name)?;
            if values.is_empty() {
                return Err(Error::ComponentNotFound(format!(
                    "Query parameter '{}' not present",
                    name
                )));
            }
            Ok(values)
        }
        "@status" => Err(Error::ComponentNotFound(
            "@status applies only to responses".into(),
        )),
        other => Err(Error::ComponentNotFound(format!(
            "Unknown derived component '{}'",
            other
        ))),
    }
}

/// All URL-decoded values of a named query parameter, in order.
/// Name comparison is case-sensitive.
fn query_param_values(query: &str, name: &str) -> Result<Vec<String>> {
    let mut values = Vec::new();
    if query.is_empty() {
        return Ok(values);
    }
    for pair in query.split('&') {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        if percent_decode(raw_key)? == name {
            values.push(percent_decode(raw_value)?);
        }
    }
    Ok(values)
}

fn percent_decode(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input
                .get(i + 1..i + 3)
                .ok_or_else(|| Error::ComponentNotFound("Truncated percent escape".into()))?;
            let byte = u8::from_str_radix(hex, 16).map_err(|_| {
                Error::ComponentNotFound(format!("Invalid percent escape '%{}'", hex))
            })?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|_| Error::ComponentNotFound("Query parameter is not valid UTF-8".into()))
}

/// Canonical value of a header component: values in insertion order,
/// trimmed, joined with `", "`
fn header_value<B>(req: &http::Request<B>, name: &str) -> Result<String> {
    let mut values = Vec::new();
    for value in req.headers().get_all(name) {
        let text = value.to_str().map_err(|_| {
            Error::ComponentNotFound(format!("Header '{}' is not visible ASCII", name))
        })?;
        values.push(text.trim().to_string());
    }
    if values.is_empty() {
        return Err(Error::ComponentNotFound(format!(
            "Header '{}' not present",
            name
        )));
    }
    Ok(values.join(", "))
}

// ============================================================================
// TESTS
// ============================================================================
