//! URI-Template based address mapping.
//!
//! An [`AddressTemplate`] maps a digest to a location (forward expansion) and,
//! with the help of a caller-supplied [`DigestExtractor`], a storage path back
//! to a digest. The grammar is the RFC 6570 subset that makes sense for
//! digests:
//!
//! - variables: `algorithm`, `encoded`, `digest`
//! - prefix modifier: `{encoded:2}` (1-9999 characters)
//! - operators: none (simple), `+` (reserved) and `#` (fragment)
//! - comma-separated variable lists: `{algorithm,encoded}`
//!
//! Malformed templates are rejected by [`AddressTemplate::compile`], never at
//! expansion time.

use crate::digest::{Algorithm, Digest};
use crate::error::{CasError, Result};
use crate::extractor::DigestExtractor;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Characters escaped by simple expansion: everything but unreserved.
const SIMPLE_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Characters escaped by reserved and fragment expansion.
const RESERVED_ENCODE: &AsciiSet = &SIMPLE_ENCODE
    .remove(b':')
    .remove(b'/')
    .remove(b'?')
    .remove(b'#')
    .remove(b'[')
    .remove(b']')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=');

/// Literal template text keeps existing percent-escapes.
const LITERAL_ENCODE: &AsciiSet = &RESERVED_ENCODE.remove(b'%');

const MAX_PREFIX_LEN: usize = 9999;

const GLOB_WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Simple,
    Reserved,
    Fragment,
}

impl Operator {
    fn encode_set(&self) -> &'static AsciiSet {
        match self {
            Operator::Simple => SIMPLE_ENCODE,
            Operator::Reserved | Operator::Fragment => RESERVED_ENCODE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variable {
    Algorithm,
    Encoded,
    Digest,
}

impl Variable {
    fn name(&self) -> &'static str {
        match self {
            Variable::Algorithm => "algorithm",
            Variable::Encoded => "encoded",
            Variable::Digest => "digest",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VarSpec {
    variable: Variable,
    prefix: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Expression {
        operator: Operator,
        vars: Vec<VarSpec>,
    },
}

/// What the template variables are bound to during expansion.
enum Bindings<'a> {
    Digest(&'a Digest),
    /// Wildcards for every value not pinned by an algorithm filter.
    Glob(Option<Algorithm>),
}

/// Compiled, immutable address template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressTemplate {
    source: String,
    parts: Vec<Part>,
}

impl AddressTemplate {
    pub fn compile(template: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices();

        while let Some((start, c)) = chars.next() {
            match c {
                '{' => {
                    let mut body = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(malformed(template, start, "nested '{'"));
                            }
                            c => body.push(c),
                        }
                    }
                    if !closed {
                        return Err(malformed(template, start, "unterminated expression"));
                    }

                    if !literal.is_empty() {
                        parts.push(Part::Literal(encode_literal(&literal)));
                        literal.clear();
                    }
                    parts.push(parse_expression(template, start, &body)?);
                }
                '}' => {
                    return Err(malformed(template, start, "unbalanced '}'"));
                }
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            parts.push(Part::Literal(encode_literal(&literal)));
        }

        Ok(Self {
            source: template.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Substitute the digest's fields without resolving against any base.
    pub fn expand_reference(&self, digest: &Digest) -> Result<String> {
        self.render(&Bindings::Digest(digest))
    }

    /// Expand the template for `digest` and resolve the result against `base`.
    ///
    /// Without a base the expansion must already be an absolute location.
    pub fn expand(&self, digest: &Digest, base: Option<&Url>) -> Result<Url> {
        let reference = self.expand_reference(digest)?;
        resolve(base, &reference)
    }

    /// Location pattern with `*` wildcards in place of the digest fields,
    /// pinning the algorithm segment when `algorithm` is set.
    pub fn glob(&self, algorithm: Option<Algorithm>, base: Option<&Url>) -> Result<Url> {
        let reference = self.render(&Bindings::Glob(algorithm))?;
        resolve(base, &reference)
    }

    /// Reverse mapping from a root-relative storage path to a digest.
    ///
    /// Expansion is not generally invertible, so this is delegated to the
    /// extractor.
    pub fn match_path(&self, path: &str, extractor: &dyn DigestExtractor) -> Result<Digest> {
        extractor.extract(path)
    }

    fn render(&self, bindings: &Bindings<'_>) -> Result<String> {
        let mut out = String::with_capacity(self.source.len() + 128);
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Expression { operator, vars } => {
                    if *operator == Operator::Fragment {
                        out.push('#');
                    }
                    for (i, spec) in vars.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        out.push_str(&render_var(spec, *operator, bindings)?);
                    }
                }
            }
        }
        Ok(out)
    }
}

impl FromStr for AddressTemplate {
    type Err = CasError;

    fn from_str(template: &str) -> Result<Self> {
        AddressTemplate::compile(template)
    }
}

impl fmt::Display for AddressTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn malformed(template: &str, offset: usize, reason: &str) -> CasError {
    CasError::MalformedTemplate(format!("{reason} at offset {offset} in {template:?}"))
}

fn encode_literal(literal: &str) -> String {
    utf8_percent_encode(literal, LITERAL_ENCODE).to_string()
}

fn parse_expression(template: &str, offset: usize, body: &str) -> Result<Part> {
    let (operator, list) = match body.chars().next() {
        Some('+') => (Operator::Reserved, &body[1..]),
        Some('#') => (Operator::Fragment, &body[1..]),
        Some(c @ ('.' | '/' | ';' | '?' | '&' | '=' | ',' | '!' | '@' | '|')) => {
            return Err(malformed(
                template,
                offset,
                &format!("unsupported operator {c:?}"),
            ));
        }
        Some(_) => (Operator::Simple, body),
        None => return Err(malformed(template, offset, "empty expression")),
    };

    let vars = list
        .split(',')
        .map(|spec| parse_varspec(template, offset, spec))
        .collect::<Result<Vec<_>>>()?;

    Ok(Part::Expression { operator, vars })
}

fn parse_varspec(template: &str, offset: usize, spec: &str) -> Result<VarSpec> {
    if spec.ends_with('*') {
        return Err(malformed(template, offset, "explode modifier is not supported"));
    }

    let (name, prefix) = match spec.split_once(':') {
        Some((name, length)) => (name, Some(parse_prefix(template, offset, length)?)),
        None => (spec, None),
    };

    let variable = match name {
        "algorithm" => Variable::Algorithm,
        "encoded" => Variable::Encoded,
        "digest" => Variable::Digest,
        "" => return Err(malformed(template, offset, "empty variable name")),
        other => {
            return Err(malformed(
                template,
                offset,
                &format!("unknown variable {other:?}"),
            ));
        }
    };

    Ok(VarSpec { variable, prefix })
}

fn parse_prefix(template: &str, offset: usize, length: &str) -> Result<usize> {
    let valid = !length.is_empty()
        && length.len() <= 4
        && length.bytes().all(|b| b.is_ascii_digit())
        && !length.starts_with('0');
    let prefix = if valid { length.parse::<usize>().ok() } else { None };
    match prefix {
        Some(prefix) if prefix <= MAX_PREFIX_LEN => Ok(prefix),
        _ => Err(malformed(
            template,
            offset,
            &format!("invalid prefix length {length:?}"),
        )),
    }
}

fn render_var(spec: &VarSpec, operator: Operator, bindings: &Bindings<'_>) -> Result<String> {
    let encode = |raw: &str| utf8_percent_encode(raw, operator.encode_set()).to_string();

    match bindings {
        Bindings::Digest(digest) => {
            let raw = match spec.variable {
                Variable::Algorithm => digest.algorithm().as_str().to_string(),
                Variable::Encoded => digest.encoded().to_string(),
                Variable::Digest => digest.to_string(),
            };
            Ok(encode(apply_prefix(spec, &raw)?))
        }
        Bindings::Glob(algorithm) => match (spec.variable, algorithm) {
            (Variable::Algorithm, Some(algorithm)) => {
                Ok(encode(apply_prefix(spec, algorithm.as_str())?))
            }
            (Variable::Digest, Some(algorithm)) if spec.prefix.is_none() => Ok(format!(
                "{}{}{GLOB_WILDCARD}",
                encode(algorithm.as_str()),
                encode(":")
            )),
            _ => Ok(GLOB_WILDCARD.to_string()),
        },
    }
}

fn apply_prefix<'a>(spec: &VarSpec, raw: &'a str) -> Result<&'a str> {
    let Some(prefix) = spec.prefix else {
        return Ok(raw);
    };

    match raw.char_indices().nth(prefix) {
        Some((end, _)) => Ok(&raw[..end]),
        None if raw.chars().count() == prefix => Ok(raw),
        None => Err(CasError::TemplateExpansion(format!(
            "prefix length {} exceeds {} value {:?}",
            prefix,
            spec.variable.name(),
            raw
        ))),
    }
}

fn resolve(base: Option<&Url>, reference: &str) -> Result<Url> {
    let resolved = match base {
        Some(base) => base.join(reference),
        None => Url::parse(reference),
    };
    let mut url = resolved.map_err(|error| {
        CasError::InvalidLocation(format!("cannot resolve {reference:?}: {error}"))
    })?;
    normalize_path_escapes(&mut url);
    Ok(url)
}

/// Decode escapes of characters that are legal verbatim in a path, so that
/// e.g. an escaped `:` from `{digest}` comes out as `sha256:...`.
fn normalize_path_escapes(url: &mut Url) {
    if url.cannot_be_a_base() || !url.path().contains('%') {
        return;
    }

    let path = url.path();
    let bytes = path.as_bytes();
    let mut normalized = String::with_capacity(path.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 3 <= bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .filter(|b| is_path_safe(*b));
            if let Some(decoded) = decoded {
                normalized.push(decoded as char);
                i += 3;
                continue;
            }
        }
        normalized.push(bytes[i] as char);
        i += 1;
    }

    url.set_path(&normalized);
}

fn is_path_safe(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"-._~$&+,:;=@".contains(&b)
}
