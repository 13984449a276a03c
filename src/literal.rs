//! SQL literal encoding for template values.
//!
//! Every emitting pipeline in a parsed template ends in a call to the
//! encoder hook, which turns the pipeline's value into one of these
//! literals before it reaches the output.

use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, Timelike};

use crate::error::EncodeError;
use crate::value::{RawSql, Value};

/// Signature of the function installed under the encoder hook name.
pub type Encoder = Arc<dyn Fn(&Value) -> Result<RawSql, EncodeError> + Send + Sync>;

/// The encoder installed in new templates: [`postgres_literal`].
pub fn default_encoder() -> Encoder {
    Arc::new(postgres_literal)
}

/// Trait for converting values to SQL literals.
pub trait ToSqlLiteral {
    /// Convert this value to a PostgreSQL literal.
    fn to_sql_literal(&self) -> Result<RawSql, EncodeError>;
}

impl ToSqlLiteral for Value {
    fn to_sql_literal(&self) -> Result<RawSql, EncodeError> {
        postgres_literal(self)
    }
}

/// Format `v` as a literal suitable for queries run against PostgreSQL.
///
/// A [`Value::Valuer`] is resolved first; its error is returned unchanged.
/// The resolved value is then formatted as:
///
/// | Value | Literal |
/// |-------|---------|
/// | `Null` | `NULL` |
/// | `Raw` | the SQL text, unmodified |
/// | `Identifier` | `"name"` with embedded `"` doubled |
/// | `Bool` | `TRUE` or `FALSE` |
/// | `Int` | decimal |
/// | `Float` | `%g` formatting, or `'Infinity'`, `'-Infinity'`, `'NaN'` |
/// | `Bytes` | bytea hex format, `'\x74657374'` |
/// | `String` | `'text'` with embedded `'` doubled |
/// | `Time` | RFC3339 string literal with nanoseconds when non-zero |
///
/// Lists, maps and valuers that resolve to another valuer have no literal
/// form and fail with [`EncodeError::UnsupportedType`].
pub fn postgres_literal(v: &Value) -> Result<RawSql, EncodeError> {
    let resolved;
    let v = match v {
        Value::Valuer(valuer) => {
            resolved = valuer.value().map_err(EncodeError::Valuer)?;
            &resolved
        }
        v => v,
    };

    let sql = match v {
        Value::Null => "NULL".to_string(),
        Value::Raw(raw) => return Ok(raw.clone()),
        Value::Identifier(ident) => format!("\"{}\"", ident.as_str().replace('"', "\"\"")),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => float_literal(*f),
        Value::Bytes(bytes) => format!("'\\x{}'", hex::encode_upper(bytes)),
        Value::String(s) => quote_string(s),
        Value::Time(t) => format!("'{}'", format_timestamp(t)),
        Value::List(_) | Value::Map(_) | Value::Valuer(_) => {
            return Err(EncodeError::unsupported(v.kind()));
        }
    };
    Ok(RawSql(sql))
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn float_literal(f: f64) -> String {
    if f.is_nan() {
        "'NaN'".to_string()
    } else if f == f64::INFINITY {
        "'Infinity'".to_string()
    } else if f == f64::NEG_INFINITY {
        "'-Infinity'".to_string()
    } else {
        format_float(f)
    }
}

/// RFC3339 with up to nine fractional digits, trailing zeros removed.
fn format_timestamp(t: &DateTime<FixedOffset>) -> String {
    // chrono's %Y signs years past 9999; RFC3339 output must not.
    let year = t.year();
    let mut out = if year < 0 {
        format!("-{:04}", year.unsigned_abs())
    } else {
        format!("{:04}", year)
    };
    out.push_str(&t.format("-%m-%dT%H:%M:%S").to_string());
    let nanos = t.nanosecond() % 1_000_000_000;
    if nanos != 0 {
        let frac = format!("{:09}", nanos);
        out.push('.');
        out.push_str(frac.trim_end_matches('0'));
    }
    if t.offset().local_minus_utc() == 0 {
        out.push('Z');
    } else {
        out.push_str(&t.format("%:z").to_string());
    }
    out
}

/// Shortest round-trip formatting with Go's `%g` layout: exponent form when
/// the decimal exponent is below -4 or at least 6, two-digit minimum
/// exponent.
pub fn format_float(f: f64) -> String {
    format_general(f, None)
}

/// `%g` formatting, optionally limited to `precision` significant digits.
pub(crate) fn format_general(f: f64, precision: Option<usize>) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }

    // `{:e}` yields the shortest digits that round-trip, e.g. "-1.25e-7".
    let sci = match precision {
        Some(p) => format!("{:.*e}", p.max(1) - 1, f),
        None => format!("{:e}", f),
    };
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let (neg, mantissa) = match mantissa.strip_prefix('-') {
        Some(m) => (true, m),
        None => (false, mantissa),
    };
    let mut digits: Vec<u8> = mantissa.bytes().filter(|b| *b != b'.').collect();
    while digits.len() > 1 && digits.last() == Some(&b'0') {
        digits.pop();
    }

    // Position of the decimal point relative to the digit string.
    let dp = exp + 1;
    let eprec = match precision {
        None => 6,
        Some(p) => {
            let p = p.max(1) as i32;
            let nd = digits.len() as i32;
            if p > nd && nd >= dp { nd } else { p }
        }
    };

    let mut out = String::new();
    if neg {
        out.push('-');
    }
    if exp < -4 || exp >= eprec {
        out.push(digits[0] as char);
        if digits.len() > 1 {
            out.push('.');
            out.extend(digits[1..].iter().map(|b| *b as char));
        }
        out.push('e');
        out.push(if exp < 0 { '-' } else { '+' });
        out.push_str(&format!("{:02}", exp.unsigned_abs()));
        return out;
    }

    let digit_at = |i: i32| -> char {
        if i >= 0 && (i as usize) < digits.len() {
            digits[i as usize] as char
        } else {
            '0'
        }
    };
    if dp > 0 {
        for i in 0..dp {
            out.push(digit_at(i));
        }
    } else {
        out.push('0');
    }
    let frac = digits.len() as i32 - dp;
    if frac > 0 {
        out.push('.');
        for i in 0..frac {
            out.push(digit_at(dp + i));
        }
    }
    out
}
