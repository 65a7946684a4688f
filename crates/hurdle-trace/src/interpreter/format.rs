//! String formatting: the `format()` mini-language, `%` interpolation and
//! `str.format` templates.

use smallvec::smallvec;

use super::error::{Exc, ExcType, Flow};
use super::eval::{ascii_escape, Index};
use super::state::Interpreter;
use super::value::{float_repr, Args, Kwargs, Value};

/// A parsed `[[fill]align][sign][z][#][0][width][grouping][.precision][type]`.
#[derive(Debug, Clone, PartialEq)]
struct Spec {
    fill: char,
    align: Option<char>,
    sign: Option<char>,
    coerce_zero: bool,
    alternate: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    ty: Option<char>,
}

impl Default for Spec {
    fn default() -> Self {
        Spec {
            fill: ' ',
            align: None,
            sign: None,
            coerce_zero: false,
            alternate: false,
            width: 0,
            grouping: None,
            precision: None,
            ty: None,
        }
    }
}

fn too_many_digits() -> Exc {
    Exc::value_error("Too many decimal digits in format string")
}

fn parse_number(digits: &[char]) -> Result<usize, Exc> {
    digits
        .iter()
        .collect::<String>()
        .parse()
        .map_err(|_| too_many_digits())
}

fn parse_spec(text: &str, type_name: &str) -> Result<Spec, Exc> {
    let chars: Vec<char> = text.chars().collect();
    let is_align = |c: char| matches!(c, '<' | '>' | '=' | '^');
    let mut spec = Spec::default();
    let mut explicit_fill = false;
    let mut i = 0;

    if chars.len() >= 2 && is_align(chars[1]) {
        spec.fill = chars[0];
        spec.align = Some(chars[1]);
        explicit_fill = true;
        i = 2;
    } else if chars.first().is_some_and(|c| is_align(*c)) {
        spec.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&sign @ ('+' | '-' | ' ')) = chars.get(i) {
        spec.sign = Some(sign);
        i += 1;
    }
    if chars.get(i) == Some(&'z') {
        spec.coerce_zero = true;
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        spec.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        if !explicit_fill {
            spec.fill = '0';
            spec.align.get_or_insert('=');
        }
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    if i > start {
        spec.width = parse_number(&chars[start..i])?;
    }
    if let Some(&sep @ (',' | '_')) = chars.get(i) {
        spec.grouping = Some(sep);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return Err(Exc::value_error("Format specifier missing precision"));
        }
        spec.precision = Some(parse_number(&chars[start..i])?);
    }
    match &chars[i..] {
        [] => {}
        [ty] => spec.ty = Some(*ty),
        _ => {
            return Err(Exc::value_error(format!(
                "Invalid format specifier '{text}' for object of type '{type_name}'"
            )))
        }
    }
    Ok(spec)
}

fn unknown_code(ty: char, type_name: &str) -> Exc {
    Exc::value_error(format!(
        "Unknown format code '{ty}' for object of type '{type_name}'"
    ))
}

/// Places `prefix` and `body` in a field of `spec.width` characters. With
/// `=` alignment the fill goes between the two.
fn pad(prefix: &str, body: &str, spec: &Spec, default_align: char) -> String {
    let len = prefix.chars().count() + body.chars().count();
    if spec.width <= len {
        return format!("{prefix}{body}");
    }
    let margin = spec.width - len;
    let fill = |n: usize| std::iter::repeat(spec.fill).take(n).collect::<String>();
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{prefix}{body}{}", fill(margin)),
        '^' => format!("{}{prefix}{body}{}", fill(margin / 2), fill(margin - margin / 2)),
        '=' => format!("{prefix}{}{body}", fill(margin)),
        _ => format!("{}{prefix}{body}", fill(margin)),
    }
}

fn group(digits: &str, sep: char, every: usize) -> String {
    let count = digits.chars().count();
    let mut out = String::with_capacity(count + count / every);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (count - i) % every == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out
}

/// Joins sign/prefix, grouped integer digits and the remainder of a number,
/// then pads. Zero padding with grouping keeps inserting separators into the
/// padding.
fn finish_number(prefix: &str, int_digits: &str, rest: &str, spec: &Spec, every: usize) -> String {
    let grouped = match spec.grouping {
        Some(sep) if spec.fill == '0' && spec.align == Some('=') => {
            let target = spec
                .width
                .saturating_sub(prefix.chars().count() + rest.chars().count());
            let mut digits = int_digits.to_string();
            let mut grouped = group(&digits, sep, every);
            while grouped.chars().count() < target {
                digits.insert(0, '0');
                grouped = group(&digits, sep, every);
            }
            grouped
        }
        Some(sep) => group(int_digits, sep, every),
        None => int_digits.to_string(),
    };
    pad(prefix, &format!("{grouped}{rest}"), spec, '>')
}

fn sign_text(negative: bool, sign: Option<char>) -> &'static str {
    match (negative, sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    }
}

fn render_int(n: i64, spec: &Spec) -> Result<String, Exc> {
    let ty = spec.ty;
    if let Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') = ty {
        return render_float(n as f64, spec);
    }
    if spec.precision.is_some() {
        return Err(Exc::value_error(
            "Precision not allowed in integer format specifier",
        ));
    }
    if ty == Some('c') {
        if spec.sign.is_some() {
            return Err(Exc::value_error(
                "Sign not allowed with integer format specifier 'c'",
            ));
        }
        if spec.alternate {
            return Err(Exc::value_error(
                "Alternate form (#) not allowed with integer format specifier 'c'",
            ));
        }
        let c = u32::try_from(n)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| Exc::new(ExcType::OverflowError, "%c arg not in range(0x110000)"))?;
        return Ok(pad("", &c.to_string(), spec, '>'));
    }
    let radix = match ty {
        None | Some('d') | Some('n') => 10,
        Some('b') => 2,
        Some('o') => 8,
        Some('x') | Some('X') => 16,
        Some(other) => return Err(unknown_code(other, "int")),
    };
    if let (Some(sep), Some(ty)) = (spec.grouping, ty) {
        if ty == 'n' || (sep == ',' && radix != 10) {
            return Err(Exc::value_error(format!("Cannot specify '{sep}' with '{ty}'.")));
        }
    }
    let magnitude = n.unsigned_abs();
    let digits = match ty {
        Some('b') => format!("{magnitude:b}"),
        Some('o') => format!("{magnitude:o}"),
        Some('x') => format!("{magnitude:x}"),
        Some('X') => format!("{magnitude:X}"),
        _ => magnitude.to_string(),
    };
    let radix_prefix = match (spec.alternate, ty) {
        (true, Some('b')) => "0b",
        (true, Some('o')) => "0o",
        (true, Some('x')) => "0x",
        (true, Some('X')) => "0X",
        _ => "",
    };
    let prefix = format!("{}{radix_prefix}", sign_text(n < 0, spec.sign));
    let every = if radix == 10 { 3 } else { 4 };
    Ok(finish_number(&prefix, &digits, "", spec, every))
}

fn fixed(v: f64, precision: usize, alternate: bool) -> String {
    let mut text = format!("{v:.precision$}");
    if alternate && precision == 0 {
        text.push('.');
    }
    text
}

fn scientific(v: f64, precision: usize, alternate: bool) -> String {
    let text = format!("{v:.precision$e}");
    let (mantissa, exp) = text.split_once('e').unwrap_or((text.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let dot = if alternate && precision == 0 { "." } else { "" };
    let exp_sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}{dot}e{exp_sign}{:02}", exp.abs())
}

/// The `g` presentation: fixed or scientific depending on the exponent,
/// trailing zeros removed unless `alternate`.
fn general(v: f64, precision: usize, alternate: bool) -> String {
    let precision = precision.max(1);
    let exp = if v == 0.0 {
        0
    } else {
        let text = format!("{v:.prec$e}", prec = precision - 1);
        text.split_once('e')
            .and_then(|(_, exp)| exp.parse::<i32>().ok())
            .unwrap_or(0)
    };
    let text = if (-4..precision as i32).contains(&exp) {
        fixed(v, (precision as i32 - 1 - exp) as usize, alternate)
    } else {
        scientific(v, precision - 1, alternate)
    };
    if alternate {
        return text;
    }
    let (mantissa, exponent) = text.split_at(text.find('e').unwrap_or(text.len()));
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    format!("{mantissa}{exponent}")
}

fn render_float(x: f64, spec: &Spec) -> Result<String, Exc> {
    let ty = spec.ty;
    if let Some(other) = ty.filter(|c| !matches!(*c, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | 'n' | '%')) {
        return Err(unknown_code(other, "float"));
    }
    let mut negative = x.is_sign_negative() && !x.is_nan();
    let v = x.abs();
    let mut suffix = "";
    let mut body = if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        "inf".to_string()
    } else {
        match ty {
            Some('f' | 'F') => fixed(v, spec.precision.unwrap_or(6), spec.alternate),
            Some('%') => {
                suffix = "%";
                fixed(v * 100.0, spec.precision.unwrap_or(6), spec.alternate)
            }
            Some('e' | 'E') => scientific(v, spec.precision.unwrap_or(6), spec.alternate),
            Some(_) => general(v, spec.precision.unwrap_or(6), spec.alternate),
            None => match spec.precision {
                None => float_repr(v),
                Some(precision) => {
                    let mut text = general(v, precision, spec.alternate);
                    if !text.contains(['.', 'e']) {
                        text.push_str(".0");
                    }
                    text
                }
            },
        }
    };
    if v.is_nan() && ty == Some('%') {
        suffix = "%";
    }
    if matches!(ty, Some('E' | 'F' | 'G')) {
        body = body.to_uppercase();
    }
    if negative && spec.coerce_zero && !body.chars().any(|c| matches!(c, '1'..='9')) {
        negative = false;
    }
    let split = body
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(body.len());
    let (int_digits, rest) = body.split_at(split);
    let rest = format!("{rest}{suffix}");
    Ok(finish_number(
        sign_text(negative, spec.sign),
        int_digits,
        &rest,
        spec,
        3,
    ))
}

fn render_str(text: &str, spec: &Spec) -> Result<String, Exc> {
    if let Some(ty) = spec.ty.filter(|c| *c != 's') {
        return Err(unknown_code(ty, "str"));
    }
    if spec.sign.is_some() {
        return Err(Exc::value_error("Sign not allowed in string format specifier"));
    }
    if spec.alternate {
        return Err(Exc::value_error(
            "Alternate form (#) not allowed in string format specifier",
        ));
    }
    if spec.align == Some('=') {
        return Err(Exc::value_error(
            "'=' alignment not allowed in string format specifier",
        ));
    }
    if let Some(sep) = spec.grouping {
        return Err(Exc::value_error(format!("Cannot specify '{sep}' with 's'.")));
    }
    let body: String = match spec.precision {
        Some(precision) => text.chars().take(precision).collect(),
        None => text.to_string(),
    };
    Ok(pad("", &body, spec, '<'))
}

/// Field numbering state of one `str.format` call.
enum Numbering {
    Unset,
    Auto(usize),
    Manual,
}

fn percent_int(value: &Value, conv: char) -> Result<i64, Exc> {
    match value {
        Value::Int(_) | Value::Bool(_) => Ok(value.as_int().unwrap_or(0)),
        Value::Float(x) if matches!(conv, 'd' | 'i' | 'u') => {
            if x.is_nan() {
                Err(Exc::value_error("cannot convert float NaN to integer"))
            } else if x.is_infinite() || x.abs() >= 9.223_372_036_854_776e18 {
                Err(Exc::new(
                    ExcType::OverflowError,
                    "cannot convert float infinity to integer",
                ))
            } else {
                Ok(x.trunc() as i64)
            }
        }
        other if matches!(conv, 'd' | 'i' | 'u') => Err(Exc::type_error(format!(
            "%{conv} format: a real number is required, not {}",
            other.type_name()
        ))),
        other => Err(Exc::type_error(format!(
            "%{conv} format: an integer is required, not {}",
            other.type_name()
        ))),
    }
}

impl<'h> Interpreter<'h> {
    /// `format(value, spec)`, running a user `__format__` when defined.
    pub(crate) fn format_value(&mut self, value: &Value, spec: &str) -> Result<String, Flow> {
        if let Some(func) = self.user_dunder(value, "__format__") {
            return match self.call_function(&func, smallvec![value.clone(), Value::str(spec)], Vec::new())? {
                Value::Str(text) => Ok(text.to_string()),
                other => Err(Exc::type_error(format!(
                    "__format__ must return a str, not {}",
                    other.type_name()
                ))
                .into()),
            };
        }
        if spec.is_empty() {
            return self.str_of(value);
        }
        let type_name = value.type_name();
        let parsed = parse_spec(spec, &type_name)?;
        self.check_len(parsed.width)?;
        self.check_len(parsed.precision.unwrap_or(0))?;
        let text = match value {
            Value::Bool(_) | Value::Int(_) => render_int(value.as_int().unwrap_or(0), &parsed)?,
            Value::Float(x) => render_float(*x, &parsed)?,
            Value::Str(s) => render_str(s, &parsed)?,
            _ => {
                return Err(Exc::type_error(format!(
                    "unsupported format string passed to {type_name}.__format__"
                ))
                .into())
            }
        };
        Ok(text)
    }

    /// `template % args`.
    pub(crate) fn percent_format(&mut self, template: &str, args: &Value) -> Result<String, Flow> {
        let positional: Vec<Value> = match args {
            Value::Tuple(items) => items.to_vec(),
            other => vec![other.clone()],
        };
        let lenient = matches!(args, Value::Dict(_) | Value::List(_) | Value::Instance(_));
        let chars: Vec<char> = template.chars().collect();
        let mut out = String::new();
        let mut next = 0;
        let mut i = 0;

        while i < chars.len() {
            if chars[i] != '%' {
                out.push(chars[i]);
                i += 1;
                continue;
            }
            i += 1;

            let mut keyed = None;
            if chars.get(i) == Some(&'(') {
                if !matches!(args, Value::Dict(_)) {
                    return Err(Exc::type_error("format requires a mapping").into());
                }
                let mut depth = 1;
                let start = i + 1;
                i += 1;
                while i < chars.len() && depth > 0 {
                    match chars[i] {
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        _ => {}
                    }
                    i += 1;
                }
                if depth > 0 {
                    return Err(Exc::value_error("incomplete format key").into());
                }
                let key: String = chars[start..i - 1].iter().collect();
                keyed = Some(self.get_item(args, Index::Item(Value::str(&key)))?);
            }

            let mut spec = Spec {
                align: Some('>'),
                ..Spec::default()
            };
            let mut zero = false;
            while let Some(&flag) = chars.get(i) {
                match flag {
                    '-' => spec.align = Some('<'),
                    '+' => spec.sign = Some('+'),
                    ' ' => {
                        spec.sign.get_or_insert(' ');
                    }
                    '#' => spec.alternate = true,
                    '0' => zero = true,
                    _ => break,
                }
                i += 1;
            }
            if zero && spec.align != Some('<') {
                spec.fill = '0';
                spec.align = Some('=');
            }

            let take_arg = |next: &mut usize| -> Result<Value, Exc> {
                let value = positional
                    .get(*next)
                    .cloned()
                    .ok_or_else(|| Exc::type_error("not enough arguments for format string"))?;
                *next += 1;
                Ok(value)
            };

            if chars.get(i) == Some(&'*') {
                i += 1;
                let width = take_arg(&mut next)?;
                let width = width
                    .as_int()
                    .filter(|_| !matches!(width, Value::Float(_)))
                    .ok_or_else(|| Exc::type_error("* wants int"))?;
                if width < 0 {
                    spec.align = Some('<');
                }
                spec.width = width.unsigned_abs() as usize;
            } else {
                let start = i;
                while chars.get(i).is_some_and(char::is_ascii_digit) {
                    i += 1;
                }
                if i > start {
                    spec.width = parse_number(&chars[start..i])?;
                }
            }
            if chars.get(i) == Some(&'.') {
                i += 1;
                if chars.get(i) == Some(&'*') {
                    i += 1;
                    let precision = take_arg(&mut next)?;
                    let precision = precision
                        .as_int()
                        .filter(|_| !matches!(precision, Value::Float(_)))
                        .ok_or_else(|| Exc::type_error("* wants int"))?;
                    spec.precision = Some(precision.max(0) as usize);
                } else {
                    let start = i;
                    while chars.get(i).is_some_and(char::is_ascii_digit) {
                        i += 1;
                    }
                    spec.precision = Some(if i > start {
                        parse_number(&chars[start..i])?
                    } else {
                        0
                    });
                }
            }
            while matches!(chars.get(i), Some('h' | 'l' | 'L')) {
                i += 1;
            }
            let Some(&conv) = chars.get(i) else {
                return Err(Exc::value_error("incomplete format").into());
            };
            i += 1;
            if conv == '%' {
                out.push('%');
                continue;
            }
            self.check_len(spec.width)?;
            self.check_len(spec.precision.unwrap_or(0))?;

            let value = match keyed {
                Some(value) => value,
                None => take_arg(&mut next)?,
            };
            let text = match conv {
                's' | 'r' | 'a' => {
                    let text = match conv {
                        's' => self.str_of(&value)?,
                        'r' => self.repr_of(&value)?,
                        _ => ascii_escape(&self.repr_of(&value)?),
                    };
                    let text: String = match spec.precision {
                        Some(precision) => text.chars().take(precision).collect(),
                        None => text,
                    };
                    spec.fill = ' ';
                    if spec.align == Some('=') {
                        spec.align = Some('>');
                    }
                    pad("", &text, &spec, '>')
                }
                'd' | 'i' | 'u' | 'x' | 'X' | 'o' => {
                    let n = percent_int(&value, conv)?;
                    let magnitude = n.unsigned_abs();
                    let mut digits = match conv {
                        'x' => format!("{magnitude:x}"),
                        'X' => format!("{magnitude:X}"),
                        'o' => format!("{magnitude:o}"),
                        _ => magnitude.to_string(),
                    };
                    if let Some(precision) = spec.precision {
                        while digits.len() < precision {
                            digits.insert(0, '0');
                        }
                    }
                    let radix_prefix = match (spec.alternate, conv) {
                        (true, 'x') => "0x",
                        (true, 'X') => "0X",
                        (true, 'o') => "0o",
                        _ => "",
                    };
                    let prefix = format!("{}{radix_prefix}", sign_text(n < 0, spec.sign));
                    finish_number(&prefix, &digits, "", &spec, 3)
                }
                'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
                    let x = match &value {
                        Value::Float(x) => *x,
                        Value::Int(_) | Value::Bool(_) => value.as_int().unwrap_or(0) as f64,
                        other => {
                            return Err(Exc::type_error(format!(
                                "must be real number, not {}",
                                other.type_name()
                            ))
                            .into())
                        }
                    };
                    spec.ty = Some(conv);
                    spec.precision.get_or_insert(6);
                    render_float(x, &spec)?
                }
                'c' => {
                    let c = match &value {
                        Value::Int(n) => u32::try_from(*n).ok().and_then(char::from_u32).ok_or_else(|| {
                            Exc::new(ExcType::OverflowError, "%c arg not in range(0x110000)")
                        })?,
                        Value::Str(s) if s.chars().count() == 1 => s.chars().next().unwrap_or(' '),
                        other => {
                            return Err(Exc::type_error(format!(
                                "%c requires an int or a unicode character, not {}",
                                other.type_name()
                            ))
                            .into())
                        }
                    };
                    spec.fill = ' ';
                    pad("", &c.to_string(), &spec, '>')
                }
                other => {
                    return Err(Exc::value_error(format!(
                        "unsupported format character '{other}' ({:#x}) at index {}",
                        other as u32,
                        i - 1
                    ))
                    .into())
                }
            };
            out.push_str(&text);
            self.check_len(out.len())?;
        }

        if next < positional.len() && !lenient {
            return Err(Exc::type_error("not all arguments converted during string formatting").into());
        }
        Ok(out)
    }

    /// `template.format(*args, **kwargs)`.
    pub(crate) fn str_format(&mut self, template: &str, args: &Args, kwargs: &Kwargs) -> Result<String, Flow> {
        let mut numbering = Numbering::Unset;
        self.expand_template(template, args, kwargs, &mut numbering, 2)
    }

    fn expand_template(
        &mut self,
        template: &str,
        args: &Args,
        kwargs: &Kwargs,
        numbering: &mut Numbering,
        depth: u8,
    ) -> Result<String, Flow> {
        if depth == 0 {
            return Err(Exc::value_error("Max string recursion exceeded").into());
        }
        let mut out = String::new();
        let mut chars = template.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            match c {
                '{' if chars.peek().is_some_and(|(_, d)| *d == '{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek().is_some_and(|(_, d)| *d == '}') => {
                    chars.next();
                    out.push('}');
                }
                '}' => {
                    return Err(Exc::value_error("Single '}' encountered in format string").into())
                }
                '{' => {
                    let mut level = 1;
                    let mut end = None;
                    for (j, d) in chars.by_ref() {
                        match d {
                            '{' => level += 1,
                            '}' => {
                                level -= 1;
                                if level == 0 {
                                    end = Some(j);
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    let Some(end) = end else {
                        let message = if i + 1 == template.len() {
                            "Single '{' encountered in format string"
                        } else {
                            "expected '}' before end of string"
                        };
                        return Err(Exc::value_error(message).into());
                    };
                    let text = self.replacement_field(&template[i + 1..end], args, kwargs, numbering, depth)?;
                    out.push_str(&text);
                    self.check_len(out.len())?;
                }
                _ => out.push(c),
            }
        }
        Ok(out)
    }

    /// One `{name!conversion:spec}` field.
    fn replacement_field(
        &mut self,
        field: &str,
        args: &Args,
        kwargs: &Kwargs,
        numbering: &mut Numbering,
        depth: u8,
    ) -> Result<String, Flow> {
        let mut in_brackets = false;
        let split = field
            .char_indices()
            .find(|(_, c)| {
                match c {
                    '[' => in_brackets = true,
                    ']' => in_brackets = false,
                    _ => {}
                }
                !in_brackets && matches!(c, '!' | ':')
            })
            .map_or(field.len(), |(i, _)| i);
        let (name, mut rest) = field.split_at(split);

        let mut conversion = None;
        if let Some(after) = rest.strip_prefix('!') {
            let mut chars = after.chars();
            let Some(conv) = chars.next() else {
                return Err(Exc::value_error(
                    "end of string while looking for conversion specifier",
                )
                .into());
            };
            rest = chars.as_str();
            if !rest.is_empty() && !rest.starts_with(':') {
                return Err(Exc::value_error("expected ':' after conversion specifier").into());
            }
            conversion = Some(conv);
        }
        let spec = rest.strip_prefix(':').unwrap_or("");
        let spec = if spec.contains('{') {
            self.expand_template(spec, args, kwargs, numbering, depth - 1)?
        } else {
            spec.to_string()
        };

        let value = self.resolve_field(name, args, kwargs, numbering)?;
        let value = match conversion {
            None => value,
            Some('s') => Value::str(&self.str_of(&value)?),
            Some('r') => Value::str(&self.repr_of(&value)?),
            Some('a') => Value::str(&ascii_escape(&self.repr_of(&value)?)),
            Some(other) => {
                return Err(Exc::value_error(format!(
                    "Unknown conversion specifier {other}"
                ))
                .into())
            }
        };
        self.format_value(&value, &spec)
    }

    /// Looks up `0`, `name`, `name.attr` or `name[key]` for a format field.
    fn resolve_field(
        &mut self,
        name: &str,
        args: &Args,
        kwargs: &Kwargs,
        numbering: &mut Numbering,
    ) -> Result<Value, Flow> {
        let head_end = name.find(['.', '[']).unwrap_or(name.len());
        let (head, mut rest) = name.split_at(head_end);

        let positional = |index: usize| -> Result<Value, Exc> {
            args.get(index).cloned().ok_or_else(|| {
                Exc::index_error(format!(
                    "Replacement index {index} out of range for positional args tuple"
                ))
            })
        };
        let mut value = if head.is_empty() {
            let index = match numbering {
                Numbering::Manual => {
                    return Err(Exc::value_error(
                        "cannot switch from manual field specification to automatic field numbering",
                    )
                    .into())
                }
                Numbering::Unset => 0,
                Numbering::Auto(n) => *n,
            };
            *numbering = Numbering::Auto(index + 1);
            positional(index)?
        } else if head.chars().all(|c| c.is_ascii_digit()) {
            if let Numbering::Auto(_) = numbering {
                return Err(Exc::value_error(
                    "cannot switch from automatic field numbering to manual field specification",
                )
                .into());
            }
            *numbering = Numbering::Manual;
            let index: usize = head.parse().map_err(|_| too_many_digits())?;
            positional(index)?
        } else {
            kwargs
                .iter()
                .find(|(key, _)| key == head)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| Exc::key_error(Value::str(head)))?
        };

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(['.', '[']).unwrap_or(after.len());
                let attr = &after[..end];
                if attr.is_empty() {
                    return Err(Exc::value_error("Empty attribute in format string").into());
                }
                value = self.get_attr(&value, attr)?;
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let Some(close) = after.find(']') else {
                    return Err(Exc::value_error("Missing ']' in format string").into());
                };
                let key = &after[..close];
                if key.is_empty() {
                    return Err(Exc::value_error("Empty attribute in format string").into());
                }
                let key = match key.parse::<i64>() {
                    Ok(n) if key.chars().all(|c| c.is_ascii_digit()) => Value::Int(n),
                    _ => Value::str(key),
                };
                value = self.get_item(&value, Index::Item(key))?;
                rest = &after[close + 1..];
                if !rest.is_empty() && !rest.starts_with(['.', '[']) {
                    return Err(Exc::value_error(
                        "Only '.' or '[' may follow ']' in format field specifier",
                    )
                    .into());
                }
            } else {
                break;
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64, spec: &str) -> String {
        render_int(n, &parse_spec(spec, "int").unwrap()).unwrap()
    }

    fn float(x: f64, spec: &str) -> String {
        render_float(x, &parse_spec(spec, "float").unwrap()).unwrap()
    }

    fn string(s: &str, spec: &str) -> Result<String, Exc> {
        render_str(s, &parse_spec(spec, "str")?)
    }

    #[test]
    fn spec_parsing() {
        let spec = parse_spec("*^+#012,.3f", "float").unwrap();
        assert_eq!(spec.fill, '*');
        assert_eq!(spec.align, Some('^'));
        assert_eq!(spec.sign, Some('+'));
        assert!(spec.alternate);
        assert_eq!(spec.width, 12);
        assert_eq!(spec.grouping, Some(','));
        assert_eq!(spec.precision, Some(3));
        assert_eq!(spec.ty, Some('f'));

        assert!(parse_spec("abc", "int").is_err());
        assert!(parse_spec(".f", "float").is_err());
    }

    #[test]
    fn integers() {
        assert_eq!(int(1234567, ","), "1,234,567");
        assert_eq!(int(255, "#010x"), "0x000000ff");
        assert_eq!(int(1234, "010,"), "00,001,234");
        assert_eq!(int(42, "+06"), "+00042");
        assert_eq!(int(-42, ">6"), "   -42");
        assert_eq!(int(5, "^5"), "  5  ");
        assert_eq!(int(10, "b"), "1010");
        assert_eq!(int(65, "c"), "A");
        assert_eq!(int(3, ".2f"), "3.00");
        assert!(render_int(5, &parse_spec(".2", "int").unwrap()).is_err());
    }

    #[test]
    fn floats() {
        assert_eq!(float(3.14159, ".2f"), "3.14");
        assert_eq!(float(1234.5, ",.2f"), "1,234.50");
        assert_eq!(float(0.5, ".1%"), "50.0%");
        assert_eq!(float(12345.678, "e"), "1.234568e+04");
        assert_eq!(float(1e-5, "g"), "1e-05");
        assert_eq!(float(0.0001, "g"), "0.0001");
        assert_eq!(float(123456789.0, "g"), "1.23457e+08");
        assert_eq!(float(2.5, ".0f"), "2");
        assert_eq!(float(-0.0001, "z.2f"), "0.00");
        assert_eq!(float(-0.0001, ".2f"), "-0.00");
        assert_eq!(float(1.5, "10"), "       1.5");
        assert_eq!(float(10.0, ".2"), "10.0");
        assert_eq!(float(f64::INFINITY, "F"), "INF");
    }

    #[test]
    fn strings() {
        assert_eq!(string("hi", "*^6").unwrap(), "**hi**");
        assert_eq!(string("hello", ".3").unwrap(), "hel");
        assert_eq!(string("ab", ">4").unwrap(), "  ab");
        assert!(string("x", "+").is_err());
        assert!(string("x", "d").is_err());
    }

    #[test]
    fn grouping_by_four_for_binary() {
        assert_eq!(int(255, "_b"), "1111_1111");
        assert_eq!(int(65535, "_x"), "ffff");
    }
}
