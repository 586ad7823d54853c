//! Shared encoding/decoding helpers for the two persisted formats.
//!
//! The JSON format is an object tree whose scalar properties are all
//! string-valued (`{"_dim": "2", ...}`); values are assembled and picked
//! apart property by property rather than derived, so the helpers here
//! centralize the "missing property" and "malformed field" failure paths.
//! The plain-text format is a flat whitespace-delimited token stream read
//! through [`Tokens`].
//!
//! All failures are [`Error::Format`]: recoverable, and loaders built on
//! them construct nothing on failure.

use crate::error::{Error, Result};
use nalgebra::DVector;
use serde_json::{json, Value};
use std::io::{Read, Write};

/// Fetch a named property, failing if the node is not an object or the
/// property is absent.
pub fn prop<'a>(node: &'a Value, name: &str) -> Result<&'a Value> {
    node.get(name)
        .ok_or_else(|| Error::Format(format!("missing property '{name}'")))
}

/// Fetch a named string-valued property.
pub fn str_prop<'a>(node: &'a Value, name: &str) -> Result<&'a str> {
    prop(node, name)?
        .as_str()
        .ok_or_else(|| Error::Format(format!("property '{name}' is not a string")))
}

/// Fetch a named array-valued property.
pub fn array_prop<'a>(node: &'a Value, name: &str) -> Result<&'a [Value]> {
    prop(node, name)?
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| Error::Format(format!("property '{name}' is not an array")))
}

/// Parse a string-valued property as `f64`.
pub fn f64_prop(node: &Value, name: &str) -> Result<f64> {
    let raw = str_prop(node, name)?;
    raw.parse()
        .map_err(|_| Error::Format(format!("property '{name}' is not a number: '{raw}'")))
}

/// Parse a string-valued property as `usize`.
pub fn usize_prop(node: &Value, name: &str) -> Result<usize> {
    let raw = str_prop(node, name)?;
    raw.parse()
        .map_err(|_| Error::Format(format!("property '{name}' is not a count: '{raw}'")))
}

/// Parse a string-valued property holding an integer flag (`"0"`/`"1"`).
pub fn bool_prop(node: &Value, name: &str) -> Result<bool> {
    let raw = str_prop(node, name)?;
    let flag: i64 = raw
        .parse()
        .map_err(|_| Error::Format(format!("property '{name}' is not a flag: '{raw}'")))?;
    Ok(flag != 0)
}

/// Encode a vector as `{"_dim": "D", "_val": ["c0", ..]}`.
pub fn vec_to_json(v: &DVector<f64>) -> Value {
    let vals: Vec<Value> = v.iter().map(|c| Value::from(c.to_string())).collect();
    json!({
        "_dim": v.len().to_string(),
        "_val": vals,
    })
}

/// Decode a vector from its JSON form, validating the declared dimension
/// against the component count.
pub fn vec_from_json(node: &Value) -> Result<DVector<f64>> {
    let dim = usize_prop(node, "_dim")?;
    if dim == 0 {
        return Err(Error::Format("vector dimension must be > 0".into()));
    }
    let vals = array_prop(node, "_val")?;
    if vals.len() != dim {
        return Err(Error::Format(format!(
            "vector declares {dim} components but carries {}",
            vals.len()
        )));
    }
    let mut out = DVector::zeros(dim);
    for (k, val) in vals.iter().enumerate() {
        let raw = val
            .as_str()
            .ok_or_else(|| Error::Format("vector component is not a string".into()))?;
        out[k] = raw
            .parse()
            .map_err(|_| Error::Format(format!("vector component is not a number: '{raw}'")))?;
    }
    Ok(out)
}

/// Write a vector as one text line: `<dim> <c0> .. <cD-1>`.
pub fn write_vec<W: Write>(w: &mut W, v: &DVector<f64>) -> Result<()> {
    write!(w, "{}", v.len())?;
    for c in v.iter() {
        write!(w, " {c}")?;
    }
    writeln!(w)?;
    Ok(())
}

/// Read a vector from the token stream, leading dimension first.
pub fn read_vec(t: &mut Tokens) -> Result<DVector<f64>> {
    let dim = t.next_usize()?;
    if dim == 0 {
        return Err(Error::Format("vector dimension must be > 0".into()));
    }
    let mut out = DVector::zeros(dim);
    for k in 0..dim {
        out[k] = t.next_f64()?;
    }
    Ok(out)
}

/// Whitespace-delimited token stream over a fully buffered text input.
///
/// Line structure in the persisted format is purely cosmetic; decoding only
/// depends on token order.
#[derive(Debug)]
pub struct Tokens {
    toks: Vec<String>,
    pos: usize,
}

impl Tokens {
    /// Buffer the whole stream and split it into tokens.
    pub fn from_reader<R: Read>(r: &mut R) -> Result<Self> {
        let mut buf = String::new();
        r.read_to_string(&mut buf)?;
        Ok(Self {
            toks: buf.split_whitespace().map(str::to_owned).collect(),
            pos: 0,
        })
    }

    /// Next raw token, failing on exhausted input.
    pub fn next_tok(&mut self) -> Result<&str> {
        let tok = self
            .toks
            .get(self.pos)
            .ok_or_else(|| Error::Format("unexpected end of input".into()))?;
        self.pos += 1;
        Ok(tok)
    }

    /// Next token parsed as `f64`.
    pub fn next_f64(&mut self) -> Result<f64> {
        let tok = self.next_tok()?;
        tok.parse()
            .map_err(|_| Error::Format(format!("expected a number, got '{tok}'")))
    }

    /// Next token parsed as `usize`.
    pub fn next_usize(&mut self) -> Result<usize> {
        let tok = self.next_tok()?;
        tok.parse()
            .map_err(|_| Error::Format(format!("expected a count, got '{tok}'")))
    }

    /// Next token parsed as an integer flag (`0` false, anything else true).
    pub fn next_flag(&mut self) -> Result<bool> {
        let tok = self.next_tok()?;
        let flag: i64 = tok
            .parse()
            .map_err(|_| Error::Format(format!("expected a flag, got '{tok}'")))?;
        Ok(flag != 0)
    }
}
