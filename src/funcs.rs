//! Functions callable from templates.
//!
//! Every template can call the builtins below plus whatever was registered
//! with [`Template::funcs`](crate::Template::funcs). The encoder hook is not
//! part of any [`FuncMap`]; the executor resolves it on its own.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::BoxError;
use crate::literal::{format_float, format_general};
use crate::value::Value;

/// A function callable from a template pipeline.
///
/// When used in a pipeline stage other than the first, the previous stage's
/// value arrives as the last argument.
pub type Func = Arc<dyn Fn(&[Value]) -> Result<Value, BoxError> + Send + Sync>;

/// Named template functions.
#[derive(Clone, Default)]
pub struct FuncMap {
    funcs: BTreeMap<String, Func>,
}

impl FuncMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` under `name`, replacing any previous function.
    pub fn insert<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.funcs.insert(name.into(), Arc::new(f));
        self
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        self.insert(name, f);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Func> {
        self.funcs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.funcs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    pub(crate) fn extend(&mut self, other: FuncMap) {
        self.funcs.extend(other.funcs);
    }
}

impl fmt::Debug for FuncMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.funcs.keys()).finish()
    }
}

/// True when `name` can be written as a function call in a template.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric())
}

/// The functions every template starts with.
pub fn builtins() -> &'static FuncMap {
    static BUILTINS: OnceLock<FuncMap> = OnceLock::new();
    BUILTINS.get_or_init(|| {
        FuncMap::new()
            .with("and", and)
            .with("or", or)
            .with("not", not)
            .with("len", len)
            .with("index", index)
            .with("eq", eq)
            .with("ne", |args| compare_pair("ne", args).map(|o| Value::Bool(o != Some(std::cmp::Ordering::Equal))))
            .with("lt", |args| ordered("lt", args, |o| o.is_lt()))
            .with("le", |args| ordered("le", args, |o| o.is_le()))
            .with("gt", |args| ordered("gt", args, |o| o.is_gt()))
            .with("ge", |args| ordered("ge", args, |o| o.is_ge()))
            .with("print", |args| Ok(Value::String(sprint(args))))
            .with("println", |args| Ok(Value::String(sprintln(args))))
            .with("printf", printf)
    })
}

fn want_args(name: &str, args: &[Value], want: usize) -> Result<(), BoxError> {
    if args.len() != want {
        return Err(format!("wrong number of args for {}: want {} got {}", name, want, args.len()).into());
    }
    Ok(())
}

fn and(args: &[Value]) -> Result<Value, BoxError> {
    let Some(last) = args.last() else {
        return Err("wrong number of args for and: want at least 1 got 0".into());
    };
    Ok(args.iter().find(|v| !v.is_true()).unwrap_or(last).clone())
}

fn or(args: &[Value]) -> Result<Value, BoxError> {
    let Some(last) = args.last() else {
        return Err("wrong number of args for or: want at least 1 got 0".into());
    };
    Ok(args.iter().find(|v| v.is_true()).unwrap_or(last).clone())
}

fn not(args: &[Value]) -> Result<Value, BoxError> {
    want_args("not", args, 1)?;
    Ok(Value::Bool(!args[0].is_true()))
}

fn len(args: &[Value]) -> Result<Value, BoxError> {
    want_args("len", args, 1)?;
    let n = match &args[0] {
        Value::String(s) => s.len(),
        Value::Bytes(b) => b.len(),
        Value::List(l) => l.len(),
        Value::Map(m) => m.len(),
        other => return Err(format!("len of type {}", other.kind()).into()),
    };
    Ok(Value::Int(n as i64))
}

fn index(args: &[Value]) -> Result<Value, BoxError> {
    let Some((item, indexes)) = args.split_first() else {
        return Err("wrong number of args for index: want at least 1 got 0".into());
    };
    let mut current = item.clone();
    for idx in indexes {
        current = match (&current, idx) {
            (Value::List(list), Value::Int(i)) => {
                let i = usize::try_from(*i)
                    .ok()
                    .filter(|i| *i < list.len())
                    .ok_or_else(|| format!("index out of range: {}", i))?;
                list[i].clone()
            }
            (Value::Bytes(bytes), Value::Int(i)) => {
                let i = usize::try_from(*i)
                    .ok()
                    .filter(|i| *i < bytes.len())
                    .ok_or_else(|| format!("index out of range: {}", i))?;
                Value::Int(bytes[i] as i64)
            }
            (Value::String(s), Value::Int(i)) => {
                let i = usize::try_from(*i)
                    .ok()
                    .filter(|i| *i < s.len())
                    .ok_or_else(|| format!("index out of range: {}", i))?;
                Value::Int(s.as_bytes()[i] as i64)
            }
            (Value::Map(map), Value::String(key)) => map.get(key).cloned().unwrap_or_default(),
            (Value::Null, _) => return Err("index of untyped nil".into()),
            (Value::List(_) | Value::Bytes(_) | Value::String(_), other) => {
                return Err(format!("cannot index slice/array with type {}", other.kind()).into());
            }
            (Value::Map(_), other) => {
                return Err(format!("value has type {}; should be string", other.kind()).into());
            }
            (other, _) => return Err(format!("can't index item of type {}", other.kind()).into()),
        };
    }
    Ok(current)
}

/// Compare two basic values. `None` means comparable but unordered (NaN).
fn compare(a: &Value, b: &Value) -> Result<Option<std::cmp::Ordering>, BoxError> {
    Ok(match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Time(x), Value::Time(y)) => Some(x.cmp(y)),
        _ => return Err("incompatible types for comparison".into()),
    })
}

fn eq(args: &[Value]) -> Result<Value, BoxError> {
    let Some((first, rest)) = args.split_first() else {
        return Err("missing argument for comparison".into());
    };
    if rest.is_empty() {
        return Err("missing argument for comparison".into());
    }
    for other in rest {
        let equal = match (first, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            _ => compare(first, other)? == Some(std::cmp::Ordering::Equal),
        };
        if equal {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn compare_pair(name: &str, args: &[Value]) -> Result<Option<std::cmp::Ordering>, BoxError> {
    want_args(name, args, 2)?;
    match (&args[0], &args[1]) {
        (Value::Null, Value::Null) => Ok(Some(std::cmp::Ordering::Equal)),
        (Value::Null, _) | (_, Value::Null) => Ok(None),
        (a, b) => compare(a, b),
    }
}

fn ordered(
    name: &str,
    args: &[Value],
    pred: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, BoxError> {
    want_args(name, args, 2)?;
    if matches!(args[0], Value::Bool(_)) || matches!(args[1], Value::Bool(_)) {
        return Err("invalid type for comparison".into());
    }
    let ordering = compare(&args[0], &args[1])?;
    Ok(Value::Bool(ordering.is_some_and(pred)))
}

/// Go's `fmt.Sprint`: operands separated by a space when neither side is a
/// string.
pub fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 && !matches!(arg, Value::String(_)) && !matches!(args[i - 1], Value::String(_)) {
            out.push(' ');
        }
        out.push_str(&arg.to_string());
    }
    out
}

/// Go's `fmt.Sprintln`: operands always separated by a space, newline at the
/// end.
pub fn sprintln(args: &[Value]) -> String {
    let mut out = args.iter().map(Value::to_string).collect::<Vec<_>>().join(" ");
    out.push('\n');
    out
}

fn printf(args: &[Value]) -> Result<Value, BoxError> {
    let Some((format, args)) = args.split_first() else {
        return Err("wrong number of args for printf: want at least 1 got 0".into());
    };
    let Value::String(format) = format else {
        return Err(format!("wrong type for value; expected string; got {}", format.kind()).into());
    };
    Ok(Value::String(sprintf(format, args)))
}

/// Go-style `Sprintf` supporting `%v %s %d %q %g %f %x %X %t %%` with an
/// optional `.N` precision.
pub fn sprintf(format: &str, args: &[Value]) -> String {
    let mut out = String::new();
    let mut args_iter = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(*d);
                chars.next();
            }
            precision = Some(digits.parse().unwrap_or(0));
        }

        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        match args_iter.next() {
            Some(arg) => out.push_str(&format_verb(verb, precision, arg)),
            None => {
                out.push_str("%!");
                out.push(verb);
                out.push_str("(MISSING)");
            }
        }
    }

    let extra: Vec<String> = args_iter.map(|v| format!("{}={}", v.kind(), v)).collect();
    if !extra.is_empty() {
        out.push_str(&format!("%!(EXTRA {})", extra.join(", ")));
    }
    out
}

fn format_verb(verb: char, precision: Option<usize>, arg: &Value) -> String {
    let bad = || format!("%!{}({}={})", verb, arg.kind(), arg);
    match (verb, arg) {
        ('v', _) | ('s', Value::String(_) | Value::Raw(_) | Value::Identifier(_)) => {
            arg.to_string()
        }
        ('s', Value::Bytes(b)) => String::from_utf8_lossy(b).into_owned(),
        ('d', Value::Int(n)) => n.to_string(),
        ('t', Value::Bool(b)) => b.to_string(),
        ('q', Value::String(s)) => quote(s),
        ('q', Value::Bytes(b)) => quote(&String::from_utf8_lossy(b)),
        ('q', Value::Int(n)) => match u32::try_from(*n).ok().and_then(char::from_u32) {
            Some(c) => format!("{:?}", c),
            None => bad(),
        },
        ('g', Value::Float(f)) => match precision {
            Some(p) => format_general(*f, Some(p)),
            None => format_float(*f),
        },
        ('f', Value::Float(f)) => format_fixed(*f, precision.unwrap_or(6)),
        ('g' | 'f', Value::Int(n)) => bad_int_float(verb, *n),
        ('x', Value::Int(n)) => signed_hex(*n, false),
        ('X', Value::Int(n)) => signed_hex(*n, true),
        ('x', Value::String(s)) => hex::encode(s),
        ('X', Value::String(s)) => hex::encode_upper(s),
        ('x', Value::Bytes(b)) => hex::encode(b),
        ('X', Value::Bytes(b)) => hex::encode_upper(b),
        _ => bad(),
    }
}

fn bad_int_float(verb: char, n: i64) -> String {
    format!("%!{}(int={})", verb, n)
}

fn format_fixed(f: f64, precision: usize) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        format!("{:.*}", precision, f)
    }
}

fn signed_hex(n: i64, upper: bool) -> String {
    let magnitude = n.unsigned_abs();
    let digits = if upper {
        format!("{:X}", magnitude)
    } else {
        format!("{:x}", magnitude)
    };
    if n < 0 { format!("-{}", digits) } else { digits }
}

/// Double-quoted string with Go escapes for control characters.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 || c == '\x7f' => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(name: &str, args: &[Value]) -> Result<Value, BoxError> {
        (builtins().get(name).unwrap())(args)
    }

    #[test]
    fn test_printf_verbs() {
        let s = |f: &str, args: &[Value]| sprintf(f, args);
        assert_eq!(s("~%s~", &["A".into()]), "~A~");
        assert_eq!(s("%d rows", &[42.into()]), "42 rows");
        assert_eq!(s("%v|%v", &[Value::Null, true.into()]), "<nil>|true");
        assert_eq!(s("%q", &["it's \"x\"\n".into()]), "\"it's \\\"x\\\"\\n\"");
        assert_eq!(s("%.2f", &[3.14159.into()]), "3.14");
        assert_eq!(s("%f", &[1.5.into()]), "1.500000");
        assert_eq!(s("%g", &[1e6.into()]), "1e+06");
        assert_eq!(s("%x %X", &[255.into(), "hi".into()]), "ff 6869");
        assert_eq!(s("%t", &[false.into()]), "false");
        assert_eq!(s("100%%", &[]), "100%");
    }

    #[test]
    fn test_printf_bad_args() {
        assert_eq!(sprintf("%d", &[]), "%!d(MISSING)");
        assert_eq!(sprintf("%d", &["x".into()]), "%!d(string=x)");
        assert_eq!(sprintf("a", &[1.into()]), "a%!(EXTRA int=1)");
    }

    #[test]
    fn test_print_spacing() {
        assert_eq!(sprint(&[1.into(), 2.into()]), "1 2");
        assert_eq!(sprint(&["a".into(), 1.into(), "b".into()]), "a1b");
        assert_eq!(sprintln(&["a".into(), 1.into()]), "a 1\n");
    }

    #[test]
    fn test_logic() {
        assert_eq!(call("and", &[1.into(), 0.into(), 2.into()]).unwrap(), Value::Int(0));
        assert_eq!(call("and", &[1.into(), 2.into()]).unwrap(), Value::Int(2));
        assert_eq!(call("or", &["".into(), "x".into()]).unwrap(), Value::from("x"));
        assert_eq!(call("not", &[Value::Null]).unwrap(), Value::Bool(true));
        assert!(call("not", &[]).is_err());
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(call("eq", &[1.into(), 2.into(), 1.into()]).unwrap(), Value::Bool(true));
        assert_eq!(call("eq", &["a".into(), "b".into()]).unwrap(), Value::Bool(false));
        assert_eq!(call("ne", &[1.into(), 2.into()]).unwrap(), Value::Bool(true));
        assert_eq!(call("lt", &[1.into(), 2.5.into()]).unwrap(), Value::Bool(true));
        assert_eq!(call("ge", &["b".into(), "a".into()]).unwrap(), Value::Bool(true));
        let err = call("lt", &[1.into(), "a".into()]).unwrap_err();
        assert_eq!(err.to_string(), "incompatible types for comparison");
    }

    #[test]
    fn test_len_and_index() {
        let list = Value::List(vec!["a".into(), "b".into()]);
        assert_eq!(call("len", &[list.clone()]).unwrap(), Value::Int(2));
        assert_eq!(call("index", &[list.clone(), 1.into()]).unwrap(), Value::from("b"));
        assert!(call("index", &[list, 5.into()]).is_err());

        let map: BTreeMap<String, Value> = [("k".to_string(), Value::Int(1))].into();
        assert_eq!(call("index", &[map.clone().into(), "k".into()]).unwrap(), Value::Int(1));
        assert_eq!(call("index", &[map.into(), "z".into()]).unwrap(), Value::Null);
        assert_eq!(
            call("len", &[3.into()]).unwrap_err().to_string(),
            "len of type int"
        );
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("quote_ident"));
        assert!(is_valid_name("_x1"));
        assert!(!is_valid_name("1x"));
        assert!(!is_valid_name("a-b"));
        assert!(!is_valid_name(""));
    }
}
