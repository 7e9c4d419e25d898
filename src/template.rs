//! printf-style template engine.
//!
//! Templates are rendered on the consumer thread, long after the call site
//! returned, so the engine pulls its arguments from a decoder instead of a
//! slice. A placeholder has the shape
//! `%[flags][width][.precision][length]conversion`:
//!
//! * flags: `-` `0` `+` space `#`
//! * length modifiers (`hh h l ll z j t L q`) are accepted and ignored; every
//!   argument already knows its own width
//! * conversions: `d i u x X o f F e E g G s c p` and `%%` for a literal `%`
//!
//! Too few or too many arguments for a template is an error, as is an unknown
//! conversion. The consumer isolates such records instead of stopping.

use std::fmt::Write;

use crate::error::RenderError;
use crate::record::ArgValue;

#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alt: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conversion: char,
}

/// Renders `template`, pulling one argument per placeholder from `args`.
///
/// The output is appended to `out`; on error `out` holds whatever was rendered
/// before the failing placeholder.
pub fn render_into<'a, I>(template: &str, args: I, out: &mut String) -> Result<(), RenderError>
where
    I: IntoIterator<Item = Result<ArgValue<'a>, RenderError>>,
{
    let mut args = args.into_iter();
    let bytes = template.as_bytes();
    let mut used = 0usize;
    let mut literal_start = 0usize;
    let mut pos = 0usize;

    while pos < bytes.len() {
        if bytes[pos] != b'%' {
            pos += 1;
            continue;
        }
        out.push_str(&template[literal_start..pos]);
        if bytes.get(pos + 1) == Some(&b'%') {
            out.push('%');
            pos += 2;
            literal_start = pos;
            continue;
        }
        let (spec, next) = parse_spec(template, pos)?;
        let value = match args.next() {
            Some(value) => value?,
            None => return Err(RenderError::MissingArgument { index: used }),
        };
        used += 1;
        write_value(&spec, &value, out)?;
        pos = next;
        literal_start = pos;
    }
    out.push_str(&template[literal_start..]);

    let extra = args.count();
    if extra > 0 {
        return Err(RenderError::ExtraArguments { used, supplied: used + extra });
    }
    Ok(())
}

fn parse_spec(template: &str, percent: usize) -> Result<(Spec, usize), RenderError> {
    let bytes = template.as_bytes();
    let mut spec = Spec::default();
    let mut pos = percent + 1;

    while let Some(&b) = bytes.get(pos) {
        match b {
            b'-' => spec.left = true,
            b'0' => spec.zero = true,
            b'+' => spec.plus = true,
            b' ' => spec.space = true,
            b'#' => spec.alt = true,
            _ => break,
        }
        pos += 1;
    }

    let (width, next) = parse_number(bytes, pos);
    spec.width = width;
    pos = next;

    if bytes.get(pos) == Some(&b'.') {
        let (precision, next) = parse_number(bytes, pos + 1);
        spec.precision = Some(precision.unwrap_or(0));
        pos = next;
    }

    while matches!(bytes.get(pos), Some(b'h' | b'l' | b'j' | b'z' | b't' | b'L' | b'q')) {
        pos += 1;
    }

    let Some(conversion) = template[pos..].chars().next() else {
        return Err(RenderError::BadSpecifier { offset: percent, found: '%' });
    };
    match conversion {
        'd' | 'i' | 'u' | 'x' | 'X' | 'o' | 'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 's' | 'c' | 'p' => {
            spec.conversion = conversion;
            Ok((spec, pos + 1))
        }
        found => Err(RenderError::BadSpecifier { offset: pos, found }),
    }
}

fn parse_number(bytes: &[u8], mut pos: usize) -> (Option<usize>, usize) {
    let mut value: Option<usize> = None;
    while let Some(&b) = bytes.get(pos) {
        if !b.is_ascii_digit() {
            break;
        }
        let digit = (b - b'0') as usize;
        value = Some(value.unwrap_or(0).saturating_mul(10).saturating_add(digit));
        pos += 1;
    }
    (value, pos)
}

fn mismatch(spec: &Spec, value: &ArgValue<'_>) -> RenderError {
    RenderError::TypeMismatch { conversion: spec.conversion, kind: value.kind_name() }
}

fn write_value(spec: &Spec, value: &ArgValue<'_>, out: &mut String) -> Result<(), RenderError> {
    match spec.conversion {
        'd' | 'i' => {
            let (negative, magnitude) = match *value {
                ArgValue::Int(v) => (v < 0, v.unsigned_abs() as u128),
                ArgValue::UInt(v) => (false, v as u128),
                ArgValue::Bool(b) => (false, b as u128),
                ArgValue::Char(c) => (false, c as u128),
                ArgValue::Duration(d) => (false, d.as_nanos()),
                _ => return Err(mismatch(spec, value)),
            };
            write_integer(spec, negative, &magnitude.to_string(), "", out);
        }
        'u' | 'x' | 'X' | 'o' => {
            let bits: u128 = match *value {
                ArgValue::Int(v) => v as u64 as u128,
                ArgValue::UInt(v) => v as u128,
                ArgValue::Bool(b) => b as u128,
                ArgValue::Char(c) => c as u128,
                ArgValue::Duration(d) => d.as_nanos(),
                _ => return Err(mismatch(spec, value)),
            };
            let (digits, prefix) = match spec.conversion {
                'x' => (format!("{bits:x}"), if spec.alt && bits != 0 { "0x" } else { "" }),
                'X' => (format!("{bits:X}"), if spec.alt && bits != 0 { "0X" } else { "" }),
                'o' => (format!("{bits:o}"), if spec.alt && bits != 0 { "0" } else { "" }),
                _ => (bits.to_string(), ""),
            };
            write_integer(&Spec { plus: false, space: false, ..*spec }, false, &digits, prefix, out);
        }
        'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
            let v = match *value {
                ArgValue::Float(v) => v,
                ArgValue::Int(v) => v as f64,
                ArgValue::UInt(v) => v as f64,
                ArgValue::Duration(d) => d.as_secs_f64(),
                _ => return Err(mismatch(spec, value)),
            };
            write_float(spec, v, out);
        }
        's' => {
            let mut text = String::new();
            let _ = write!(text, "{value}");
            if let Some(precision) = spec.precision {
                if let Some((cut, _)) = text.char_indices().nth(precision) {
                    text.truncate(cut);
                }
            }
            pad(spec, "", &text, false, out);
        }
        'c' => {
            let c = match *value {
                ArgValue::Char(c) => c,
                ArgValue::Int(v) => u32::try_from(v).ok().and_then(char::from_u32).ok_or_else(|| mismatch(spec, value))?,
                ArgValue::UInt(v) => u32::try_from(v).ok().and_then(char::from_u32).ok_or_else(|| mismatch(spec, value))?,
                _ => return Err(mismatch(spec, value)),
            };
            let mut buf = [0u8; 4];
            pad(spec, "", c.encode_utf8(&mut buf), false, out);
        }
        'p' => {
            let address = match *value {
                ArgValue::UInt(v) => v,
                ArgValue::Int(v) => v as u64,
                _ => return Err(mismatch(spec, value)),
            };
            pad(spec, "0x", &format!("{address:x}"), false, out);
        }
        found => return Err(RenderError::BadSpecifier { offset: 0, found }),
    }
    Ok(())
}

fn sign_prefix(spec: &Spec, negative: bool) -> &'static str {
    if negative {
        "-"
    } else if spec.plus {
        "+"
    } else if spec.space {
        " "
    } else {
        ""
    }
}

fn write_integer(spec: &Spec, negative: bool, digits: &str, radix_prefix: &str, out: &mut String) {
    let mut body = String::with_capacity(digits.len() + 8);
    if let Some(precision) = spec.precision {
        for _ in digits.len()..precision {
            body.push('0');
        }
    }
    body.push_str(digits);

    let mut prefix = String::from(sign_prefix(spec, negative));
    prefix.push_str(radix_prefix);
    // A precision disables zero padding for integers.
    let spec = Spec { zero: spec.zero && spec.precision.is_none(), ..*spec };
    pad(&spec, &prefix, &body, true, out);
}

fn write_float(spec: &Spec, v: f64, out: &mut String) {
    let upper = spec.conversion.is_ascii_uppercase();
    let prefix = sign_prefix(spec, v.is_sign_negative() && !v.is_nan());
    let abs = v.abs();

    if !abs.is_finite() {
        let body = match (abs.is_nan(), upper) {
            (true, false) => "nan",
            (true, true) => "NAN",
            (false, false) => "inf",
            (false, true) => "INF",
        };
        let spec = Spec { zero: false, ..*spec };
        pad(&spec, prefix, body, true, out);
        return;
    }

    let precision = spec.precision.unwrap_or(6);
    let mut body = match spec.conversion {
        'f' | 'F' => format!("{:.*}", precision, abs),
        'e' | 'E' => format_exponent(abs, precision, upper),
        _ => format_general(abs, precision, spec.alt, upper),
    };
    if spec.alt && precision == 0 && matches!(spec.conversion, 'f' | 'F') {
        body.push('.');
    }
    pad(spec, prefix, &body, true, out);
}

/// `%e`: mantissa with `precision` digits, exponent signed and at least two digits.
fn format_exponent(abs: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{:.*e}", precision, abs);
    let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    let e = if upper { 'E' } else { 'e' };
    format!("{mantissa}{e}{sign}{:02}", exponent.unsigned_abs())
}

/// `%g`: `%e` or `%f` depending on the decimal exponent, trailing zeros removed.
fn format_general(abs: f64, precision: usize, alt: bool, upper: bool) -> String {
    let p = precision.max(1);
    let exponent = if abs == 0.0 {
        0
    } else {
        let raw = format!("{:.*e}", p - 1, abs);
        raw.split_once('e').and_then(|(_, e)| e.parse::<i64>().ok()).unwrap_or(0)
    };

    let mut text = if exponent < -4 || exponent >= p as i64 {
        format_exponent(abs, p - 1, upper)
    } else {
        let decimals = (p as i64 - 1 - exponent).max(0) as usize;
        format!("{:.*}", decimals, abs)
    };

    if !alt {
        let split = text.find(['e', 'E']).unwrap_or(text.len());
        let (number, exponent_part) = text.split_at(split);
        if number.contains('.') {
            let trimmed = number.trim_end_matches('0').trim_end_matches('.');
            text = format!("{trimmed}{exponent_part}");
        }
    }
    text
}

fn pad(spec: &Spec, prefix: &str, body: &str, numeric: bool, out: &mut String) {
    let len = prefix.chars().count() + body.chars().count();
    let fill = spec.width.unwrap_or(0).saturating_sub(len);
    if fill == 0 {
        out.push_str(prefix);
        out.push_str(body);
    } else if spec.left {
        out.push_str(prefix);
        out.push_str(body);
        out.extend(std::iter::repeat(' ').take(fill));
    } else if spec.zero && numeric {
        out.push_str(prefix);
        out.extend(std::iter::repeat('0').take(fill));
        out.push_str(body);
    } else {
        out.extend(std::iter::repeat(' ').take(fill));
        out.push_str(prefix);
        out.push_str(body);
    }
}

/// Counts the placeholders in a template, or `None` if it is malformed.
///
/// Usable in constant context, which is how `submit!` checks templates and
/// argument counts at compile time.
pub const fn count_placeholders(template: &str) -> Option<usize> {
    let bytes = template.as_bytes();
    let mut count = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] != b'%' {
            i += 1;
            continue;
        }
        i += 1;
        if i < bytes.len() && bytes[i] == b'%' {
            i += 1;
            continue;
        }
        while i < bytes.len() && matches!(bytes[i], b'-' | b'0' | b'+' | b' ' | b'#') {
            i += 1;
        }
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'.' {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
        while i < bytes.len() && matches!(bytes[i], b'h' | b'l' | b'j' | b'z' | b't' | b'L' | b'q') {
            i += 1;
        }
        if i >= bytes.len() {
            return None;
        }
        match bytes[i] {
            b'd' | b'i' | b'u' | b'x' | b'X' | b'o' | b'f' | b'F' | b'e' | b'E' | b'g' | b'G'
            | b's' | b'c' | b'p' => {}
            _ => return None,
        }
        count += 1;
        i += 1;
    }
    Some(count)
}

/// Whether `template` parses.
pub const fn validate_template(template: &str) -> bool {
    count_placeholders(template).is_some()
}
