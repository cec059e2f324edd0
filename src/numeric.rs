//! Integer/float arithmetic, string<->number conversion, UTF-8 code point
//! escaping, and the `%`-directive string builder used by `concat`/`format`
//! style Host API entry points.
//!
//! Grounded on the reference runtime's `lvm.c`/`lobject.c` numeric core, in
//! the idiom this crate's `stdlib::string::format` and `stdlib::math`
//! already use for argument coercion (`as_integer().or_else(|| as_number()
//! ...)`) and for the directive dispatch loop.

use crate::error::LuaError;
use crate::limits;

/// The closed set of arithmetic operator codes named by SPEC_FULL.md
/// §4.4/§6; order is fixed because it indexes the (external) metamethod
/// name table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
}

impl ArithOp {
    /// Bitwise/shift ops require integer operands on both sides.
    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot
        )
    }

    /// `/` and `^` always produce floats, even for two integer operands.
    pub fn is_float_only(self) -> bool {
        matches!(self, ArithOp::Div | ArithOp::Pow)
    }

    pub fn is_unary(self) -> bool {
        matches!(self, ArithOp::Unm | ArithOp::BNot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
}

/// Either half of the integer/float duality; `arith_int`/`arith_float`
/// operate on this directly so callers (the Host API's `arith`) don't
/// need to know which representation a `LuaValue` carries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LuaNumber {
    Int(i64),
    Float(f64),
}

impl LuaNumber {
    pub fn as_f64(self) -> f64 {
        match self {
            LuaNumber::Int(i) => i as f64,
            LuaNumber::Float(f) => f,
        }
    }

    pub fn is_int(self) -> bool {
        matches!(self, LuaNumber::Int(_))
    }
}

/// Two's-complement wrapping arithmetic: cast to unsigned, operate, cast
/// back, matching the reference runtime's integer overflow semantics
/// (wrap, never panic or trap) for `+ - *`.
fn wrapping_binop(op: ArithOp, a: i64, b: i64) -> Option<i64> {
    let (ua, ub) = (a as u64, b as u64);
    Some(match op {
        ArithOp::Add => ua.wrapping_add(ub) as i64,
        ArithOp::Sub => ua.wrapping_sub(ub) as i64,
        ArithOp::Mul => ua.wrapping_mul(ub) as i64,
        _ => return None,
    })
}

/// Floor division and floor modulo raise on a zero divisor; negative
/// floor-modulo follows "result has the same sign as the divisor".
pub fn int_floor_div(a: i64, b: i64) -> Result<i64, LuaError> {
    if b == 0 {
        return Err(LuaError::RuntimeError);
    }
    if b == -1 {
        // a / -1 can overflow i64::MIN; wrap like the rest of integer arith.
        return Ok((a as u64).wrapping_neg() as i64);
    }
    let q = a / b;
    let r = a % b;
    Ok(if (r != 0) && ((r < 0) != (b < 0)) { q - 1 } else { q })
}

pub fn int_floor_mod(a: i64, b: i64) -> Result<i64, LuaError> {
    if b == 0 {
        return Err(LuaError::RuntimeError);
    }
    if b == -1 {
        return Ok(0);
    }
    let r = a % b;
    Ok(if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
}

pub fn float_floor_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

/// Integer-path arithmetic for ops where `is_bitwise() || (!is_float_only()
/// && both operands integer)`. `Div`/`Pow` never reach here (routed to
/// `arith_float` by the caller per `is_float_only`).
pub fn arith_int(op: ArithOp, a: i64, b: i64) -> Result<i64, LuaError> {
    Ok(match op {
        ArithOp::Add | ArithOp::Sub | ArithOp::Mul => {
            wrapping_binop(op, a, b).expect("covered above")
        }
        ArithOp::Mod => int_floor_mod(a, b)?,
        ArithOp::IDiv => int_floor_div(a, b)?,
        ArithOp::BAnd => a & b,
        ArithOp::BOr => a | b,
        ArithOp::BXor => a ^ b,
        ArithOp::Shl => shift_left(a, b),
        ArithOp::Shr => shift_left(a, -b),
        ArithOp::Unm => (a as u64).wrapping_neg() as i64,
        ArithOp::BNot => !a,
        ArithOp::Div | ArithOp::Pow => unreachable!("float-only op routed to arith_float"),
    })
}

/// Logical shift by `n` bits; `n <= -64` or `n >= 64` shifts everything
/// out (result `0`), matching the reference runtime's `luaV_shiftl`.
fn shift_left(a: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((a as u64) << n) as i64
    } else {
        ((a as u64) >> (-n)) as i64
    }
}

pub fn arith_float(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Pow => a.powf(b),
        ArithOp::Mod => float_floor_mod(a, b),
        ArithOp::IDiv => (a / b).floor(),
        ArithOp::Unm => -a,
        _ => unreachable!("integer-only op routed to arith_int"),
    }
}

/// Dispatches by the operation's typing rule (SPEC_FULL.md §4.4):
/// bitwise/shift require integer operands (coercing via `as_integer`,
/// falling through to `None` — the caller's metamethod path — on
/// failure); `/`/`^` always float; everything else picks the integer path
/// iff both operands already are integers.
pub fn arith(op: ArithOp, a: LuaNumber, b: LuaNumber) -> Result<LuaNumber, LuaError> {
    if op.is_bitwise() {
        let (Some(ia), Some(ib)) = (to_coerced_integer(a), to_coerced_integer(b)) else {
            return Err(LuaError::TypeError);
        };
        return Ok(LuaNumber::Int(arith_int(op, ia, ib)?));
    }
    if op.is_float_only() {
        return Ok(LuaNumber::Float(arith_float(op, a.as_f64(), b.as_f64())));
    }
    match (a, b) {
        (LuaNumber::Int(ia), LuaNumber::Int(ib)) => Ok(LuaNumber::Int(arith_int(op, ia, ib)?)),
        _ => Ok(LuaNumber::Float(arith_float(op, a.as_f64(), b.as_f64()))),
    }
}

fn to_coerced_integer(n: LuaNumber) -> Option<i64> {
    match n {
        LuaNumber::Int(i) => Some(i),
        LuaNumber::Float(f) => {
            if f.fract() == 0.0 && f >= -(1i64 << 63) as f64 && f < (1u64 << 63) as f64 {
                Some(f as i64)
            } else {
                None
            }
        }
    }
}

// --- string -> number ---

/// Parses a decimal or `0x`-prefixed hexadecimal integer with overflow
/// detection: the next digit is rejected the instant it would push the
/// accumulator past `i64::MAX` (or, for the negative case, past
/// `i64::MIN`), matching "reject exactly at 2^63".
fn str2int(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() || s.len() > limits::MAX_STRING_TO_NUMBER_LEN {
        return None;
    }
    let (neg, rest) = match s.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        // Hex integers wrap (two's complement), matching the reference
        // runtime's `lua_strx2number`/`l_str2int` hex path: no overflow
        // rejection, just modular truncation to 64 bits.
        let mut acc: u64 = 0;
        for c in hex.bytes() {
            acc = acc.wrapping_mul(16).wrapping_add((c as char).to_digit(16)? as u64);
        }
        let v = acc as i64;
        return Some(if neg { v.wrapping_neg() } else { v });
    }
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut acc: i64 = 0;
    for c in rest.bytes() {
        let digit = (c - b'0') as i64;
        acc = acc.checked_mul(10)?.checked_add(digit)?;
    }
    Some(if neg { acc.checked_neg()? } else { acc })
}

/// Parses a float, including `0x...p...` hex-float notation. Tries the
/// native parse first; on failure, retries once with the locale radix
/// character (always `.` here, since this crate doesn't link `libc`
/// locale support, but the retry structure is kept so a future
/// locale-aware build can substitute a different mark without touching
/// callers) substituted in a scratch copy — mirroring `l_str2d`'s two-pass
/// shape. Rejects explicit "inf"/"nan" spellings.
fn str2float(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() || t.len() > limits::MAX_STRING_TO_NUMBER_LEN {
        return None;
    }
    let lower = t.to_ascii_lowercase();
    if lower.contains("inf") || lower.contains("nan") {
        return None;
    }
    if let Some(v) = parse_hex_float(t) {
        return Some(v);
    }
    if let Ok(v) = t.parse::<f64>() {
        return Some(v);
    }
    const LOCALE_RADIX: char = '.';
    let retried: String = t.chars().map(|c| if c == ',' { LOCALE_RADIX } else { c }).collect();
    retried.parse::<f64>().ok()
}

/// `0x1.8p3`-style hex float: optional sign, `0x`, hex digits, optional
/// `.` + hex digits, mandatory `p`/`P` binary exponent.
fn parse_hex_float(s: &str) -> Option<f64> {
    let (neg, rest) = match s.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let hex = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X"))?;
    let p_pos = hex.find(|c| c == 'p' || c == 'P')?;
    let (mantissa, exp_part) = hex.split_at(p_pos);
    let exp_str = &exp_part[1..];
    let exp: i32 = exp_str.parse().ok()?;
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let mut value: f64 = 0.0;
    for c in int_part.bytes() {
        value = value * 16.0 + (c as char).to_digit(16)? as f64;
    }
    let mut scale = 1.0 / 16.0;
    for c in frac_part.bytes() {
        value += (c as char).to_digit(16)? as f64 * scale;
        scale /= 16.0;
    }
    value *= 2f64.powi(exp);
    Some(if neg { -value } else { value })
}

/// `tonumber`/implicit-coercion entry point: integer if the text parses as
/// one (decimal or hex), else float, else `None`.
pub fn str_to_number(s: &str) -> Option<LuaNumber> {
    if let Some(i) = str2int(s) {
        return Some(LuaNumber::Int(i));
    }
    str2float(s).map(LuaNumber::Float)
}

/// Number -> string using `itoa` for the integer fast path (the same
/// crate `stdlib`'s other numeric-formatting call sites reach for instead
/// of hand-rolled `write!`); a float whose rendering has neither `.` nor
/// `e`/`inf`/`nan` gets a `.0` suffix appended so the round-trip through
/// `str_to_number` still yields a float.
pub fn num_to_str(n: LuaNumber) -> String {
    match n {
        LuaNumber::Int(i) => {
            let mut buf = itoa::Buffer::new();
            buf.format(i).to_string()
        }
        LuaNumber::Float(f) => {
            if f.is_nan() {
                return "nan".to_string();
            }
            if f.is_infinite() {
                return if f < 0.0 { "-inf".to_string() } else { "inf".to_string() };
            }
            let mut s = shortest_round_trip(f);
            if !s.contains('.') && !s.contains('e') && !s.contains('E') {
                s.push_str(".0");
            }
            s
        }
    }
}

/// Rust's default `{}` float formatting already produces the shortest
/// string that round-trips; reuse it rather than re-deriving `%.14g`
/// manually.
fn shortest_round_trip(f: f64) -> String {
    format!("{}", f)
}

// --- UTF-8 code point escape ---

/// Writes the canonical UTF-8 encoding of `code_point` left-aligned into
/// `buf` (which must be at least 4 bytes) starting at `buf[0]`, returning
/// the byte count. Accepts up to `0x7FFFFFFF` (the reference runtime's
/// extended six-byte range for `utf8.char`'s escape helper), though this
/// crate only ever produces the standard 1-4 byte forms for
/// `code_point <= 0x10FFFF` per SPEC_FULL.md.
pub fn utf8_escape(code_point: u32, buf: &mut [u8; 4]) -> Result<usize, LuaError> {
    if code_point > 0x10FFFF {
        return Err(LuaError::RuntimeError);
    }
    match char::from_u32(code_point) {
        Some(c) => {
            let s = c.encode_utf8(buf);
            Ok(s.len())
        }
        None => {
            // Surrogate code points (0xD800-0xDFFF) have no `char` but are
            // still representable as raw UTF-8 bytes for this escape's
            // purposes (matching `utf8.char`'s tolerance of surrogates).
            let n = encode_utf8_raw(code_point, buf);
            Ok(n)
        }
    }
}

fn encode_utf8_raw(cp: u32, buf: &mut [u8; 4]) -> usize {
    if cp < 0x80 {
        buf[0] = cp as u8;
        1
    } else if cp < 0x800 {
        buf[0] = 0xC0 | (cp >> 6) as u8;
        buf[1] = 0x80 | (cp & 0x3F) as u8;
        2
    } else if cp < 0x10000 {
        buf[0] = 0xE0 | (cp >> 12) as u8;
        buf[1] = 0x80 | ((cp >> 6) & 0x3F) as u8;
        buf[2] = 0x80 | (cp & 0x3F) as u8;
        3
    } else {
        buf[0] = 0xF0 | (cp >> 18) as u8;
        buf[1] = 0x80 | ((cp >> 12) & 0x3F) as u8;
        buf[2] = 0x80 | ((cp >> 6) & 0x3F) as u8;
        buf[3] = 0x80 | (cp & 0x3F) as u8;
        4
    }
}

// --- %-directive string builder ---

/// One piece of a format directive, as the Host API's `push_fstring`
/// assembles them before concatenating to a single result, matching the
/// directive set `%s %c %d %I %f %p %U %%`.
#[derive(Debug, Clone)]
pub enum FormatArg<'a> {
    Str(&'a str),
    Char(u8),
    Int(i64),
    WideInt(i64),
    Float(f64),
    Pointer(usize),
    CodePoint(u32),
}

/// Builds the `%`-directive format string the way `push_fstring` does:
/// each directive consumes the next `args` entry; `%%` needs none.
/// Unknown directives raise, mirroring the reference runtime's
/// `luaO_pushvfstring` assertion that it only ever emits directives the
/// caller already validated.
pub fn format_string(fmt: &str, args: &[FormatArg<'_>]) -> Result<String, LuaError> {
    let mut out = String::new();
    let mut arg_iter = args.iter();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(&directive) = chars.peek() else {
            return Err(LuaError::RuntimeError);
        };
        chars.next();
        match directive {
            '%' => out.push('%'),
            's' => match arg_iter.next() {
                Some(FormatArg::Str(s)) => out.push_str(s),
                _ => return Err(LuaError::RuntimeError),
            },
            'c' => match arg_iter.next() {
                Some(&FormatArg::Char(b)) => {
                    if b.is_ascii_graphic() || b == b' ' {
                        out.push(b as char);
                    } else {
                        out.push_str(&format!("<\\{}>", b));
                    }
                }
                _ => return Err(LuaError::RuntimeError),
            },
            'd' => match arg_iter.next() {
                Some(&FormatArg::Int(i)) => {
                    let mut buf = itoa::Buffer::new();
                    out.push_str(buf.format(i));
                }
                _ => return Err(LuaError::RuntimeError),
            },
            'I' => match arg_iter.next() {
                Some(&FormatArg::WideInt(i)) => {
                    let mut buf = itoa::Buffer::new();
                    out.push_str(buf.format(i));
                }
                _ => return Err(LuaError::RuntimeError),
            },
            'f' => match arg_iter.next() {
                Some(&FormatArg::Float(f)) => out.push_str(&format!("{:.6}", f)),
                _ => return Err(LuaError::RuntimeError),
            },
            'p' => match arg_iter.next() {
                Some(&FormatArg::Pointer(p)) => out.push_str(&format!("0x{:012x}", p)),
                _ => return Err(LuaError::RuntimeError),
            },
            'U' => match arg_iter.next() {
                Some(&FormatArg::CodePoint(cp)) => {
                    let mut buf = [0u8; 4];
                    let n = utf8_escape(cp, &mut buf)?;
                    out.push_str(std::str::from_utf8(&buf[..n]).map_err(|_| LuaError::RuntimeError)?);
                }
                _ => return Err(LuaError::RuntimeError),
            },
            _ => return Err(LuaError::RuntimeError),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str2int_rejects_exactly_at_2_63() {
        assert_eq!(str2int("9223372036854775807"), Some(i64::MAX));
        assert_eq!(str2int("9223372036854775808"), None);
        assert_eq!(str2int("-9223372036854775808"), Some(i64::MIN));
    }

    #[test]
    fn hex_integer_parses() {
        assert_eq!(str2int("0x1F"), Some(31));
        assert_eq!(str2int("-0x10"), Some(-16));
    }

    #[test]
    fn float_round_trips() {
        let n = str_to_number("3.5").unwrap();
        assert_eq!(n, LuaNumber::Float(3.5));
        assert_eq!(num_to_str(n).parse::<f64>().unwrap(), 3.5);
    }

    #[test]
    fn integer_float_round_trip_preserves_tag() {
        let s = num_to_str(LuaNumber::Float(4.0));
        assert_eq!(s, "4.0");
        assert_eq!(str_to_number(&s), Some(LuaNumber::Float(4.0)));
    }

    #[test]
    fn rejects_inf_and_nan_text() {
        assert_eq!(str_to_number("inf"), None);
        assert_eq!(str_to_number("nan"), None);
    }

    #[test]
    fn hex_float_parses() {
        assert_eq!(parse_hex_float("0x1.8p3"), Some(12.0));
    }

    #[test]
    fn floor_div_and_mod_match_divisor_sign_rule() {
        assert_eq!(int_floor_div(-7, 2).unwrap(), -4);
        assert_eq!(int_floor_mod(-7, 2).unwrap(), 1);
        assert_eq!(int_floor_div(7, -2).unwrap(), -4);
        assert_eq!(int_floor_mod(7, -2).unwrap(), -1);
    }

    #[test]
    fn div_by_zero_raises() {
        assert_eq!(int_floor_div(1, 0), Err(LuaError::RuntimeError));
        assert_eq!(int_floor_mod(1, 0), Err(LuaError::RuntimeError));
    }

    #[test]
    fn integer_arith_wraps() {
        assert_eq!(
            arith(ArithOp::Add, LuaNumber::Int(i64::MAX), LuaNumber::Int(1)).unwrap(),
            LuaNumber::Int(i64::MIN)
        );
    }

    #[test]
    fn div_and_pow_are_always_float() {
        let r = arith(ArithOp::Div, LuaNumber::Int(6), LuaNumber::Int(3)).unwrap();
        assert_eq!(r, LuaNumber::Float(2.0));
    }

    #[test]
    fn bitwise_rejects_non_integral_float() {
        let r = arith(ArithOp::BAnd, LuaNumber::Float(1.5), LuaNumber::Int(1));
        assert_eq!(r, Err(LuaError::TypeError));
    }

    #[test]
    fn utf8_escape_boundaries() {
        let mut buf = [0u8; 4];
        assert_eq!(utf8_escape(0x7F, &mut buf).unwrap(), 1);
        assert_eq!(utf8_escape(0x80, &mut buf).unwrap(), 2);
        assert_eq!(utf8_escape(0x800, &mut buf).unwrap(), 3);
        assert_eq!(utf8_escape(0x10000, &mut buf).unwrap(), 4);
    }

    #[test]
    fn format_string_directives() {
        let args = [FormatArg::Str("x"), FormatArg::Int(7)];
        let out = format_string("%s=%d%%", &args).unwrap();
        assert_eq!(out, "x=7%");
    }
}
