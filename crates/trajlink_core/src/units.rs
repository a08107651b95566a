//! Unit strings: parsing, affine conversion factors and derivative units.
//!
//! Unit expressions are products and quotients of named units, numeric factors and integer
//! powers, e.g. `m/s**2`, `1.0/s`, `kg*m/(s*s)`. `None` means "no units".

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::UnitError;

/// Units of a variable. `None` means the variable is unitless.
pub type Units = Option<String>;

/// Length, mass, time, temperature, current, amount, angle.
type Dims = [i32; 7];

const NONE: Dims = [0; 7];
const LENGTH: Dims = [1, 0, 0, 0, 0, 0, 0];
const MASS: Dims = [0, 1, 0, 0, 0, 0, 0];
const TIME: Dims = [0, 0, 1, 0, 0, 0, 0];
const TEMPERATURE: Dims = [0, 0, 0, 1, 0, 0, 0];
const CURRENT: Dims = [0, 0, 0, 0, 1, 0, 0];
const AMOUNT: Dims = [0, 0, 0, 0, 0, 1, 0];
const ANGLE: Dims = [0, 0, 0, 0, 0, 0, 1];
const FORCE: Dims = [1, 1, -2, 0, 0, 0, 0];
const PRESSURE: Dims = [-1, 1, -2, 0, 0, 0, 0];
const ENERGY: Dims = [2, 1, -2, 0, 0, 0, 0];
const POWER: Dims = [2, 1, -3, 0, 0, 0, 0];
const FREQUENCY: Dims = [0, 0, -1, 0, 0, 0, 0];

/// A parsed unit expression: a value `x` in these units is `scale * (x + offset)` in base units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitQuantity {
    pub scale: f64,
    pub offset: f64,
    dims: Dims,
}

impl UnitQuantity {
    const fn new(scale: f64, offset: f64, dims: Dims) -> Self {
        Self {
            scale,
            offset,
            dims,
        }
    }

    fn dimensionless(scale: f64) -> Self {
        Self::new(scale, 0.0, NONE)
    }

    fn mul(self, other: Self) -> Self {
        let mut dims = self.dims;
        for (d, o) in dims.iter_mut().zip(other.dims.iter()) {
            *d += o;
        }
        // Offsets only survive on a lone unit; in a compound they describe a difference.
        Self::new(self.scale * other.scale, 0.0, dims)
    }

    fn div(self, other: Self) -> Self {
        self.mul(other.powi(-1))
    }

    fn powi(self, exp: i32) -> Self {
        let mut dims = self.dims;
        for d in dims.iter_mut() {
            *d *= exp;
        }
        Self::new(self.scale.powi(exp), 0.0, dims)
    }

    pub fn is_compatible(&self, other: &Self) -> bool {
        self.dims == other.dims
    }
}

fn unit_table() -> &'static HashMap<&'static str, UnitQuantity> {
    static TABLE: OnceLock<HashMap<&'static str, UnitQuantity>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let entries: [(&'static str, UnitQuantity); 46] = [
            ("m", UnitQuantity::new(1.0, 0.0, LENGTH)),
            ("km", UnitQuantity::new(1000.0, 0.0, LENGTH)),
            ("cm", UnitQuantity::new(0.01, 0.0, LENGTH)),
            ("mm", UnitQuantity::new(0.001, 0.0, LENGTH)),
            ("ft", UnitQuantity::new(0.3048, 0.0, LENGTH)),
            ("inch", UnitQuantity::new(0.0254, 0.0, LENGTH)),
            ("mi", UnitQuantity::new(1609.344, 0.0, LENGTH)),
            ("NM", UnitQuantity::new(1852.0, 0.0, LENGTH)),
            ("kg", UnitQuantity::new(1.0, 0.0, MASS)),
            ("g", UnitQuantity::new(1e-3, 0.0, MASS)),
            ("lbm", UnitQuantity::new(0.45359237, 0.0, MASS)),
            ("slug", UnitQuantity::new(14.593902937206364, 0.0, MASS)),
            ("s", UnitQuantity::new(1.0, 0.0, TIME)),
            ("ms", UnitQuantity::new(1e-3, 0.0, TIME)),
            ("min", UnitQuantity::new(60.0, 0.0, TIME)),
            ("h", UnitQuantity::new(3600.0, 0.0, TIME)),
            ("d", UnitQuantity::new(86400.0, 0.0, TIME)),
            ("K", UnitQuantity::new(1.0, 0.0, TEMPERATURE)),
            ("degK", UnitQuantity::new(1.0, 0.0, TEMPERATURE)),
            ("degR", UnitQuantity::new(5.0 / 9.0, 0.0, TEMPERATURE)),
            ("degC", UnitQuantity::new(1.0, 273.15, TEMPERATURE)),
            ("degF", UnitQuantity::new(5.0 / 9.0, 459.67, TEMPERATURE)),
            ("A", UnitQuantity::new(1.0, 0.0, CURRENT)),
            ("mol", UnitQuantity::new(1.0, 0.0, AMOUNT)),
            ("rad", UnitQuantity::new(1.0, 0.0, ANGLE)),
            ("deg", UnitQuantity::new(std::f64::consts::PI / 180.0, 0.0, ANGLE)),
            ("rev", UnitQuantity::new(2.0 * std::f64::consts::PI, 0.0, ANGLE)),
            ("N", UnitQuantity::new(1.0, 0.0, FORCE)),
            ("kN", UnitQuantity::new(1000.0, 0.0, FORCE)),
            ("lbf", UnitQuantity::new(4.4482216152605, 0.0, FORCE)),
            ("Pa", UnitQuantity::new(1.0, 0.0, PRESSURE)),
            ("kPa", UnitQuantity::new(1000.0, 0.0, PRESSURE)),
            ("MPa", UnitQuantity::new(1e6, 0.0, PRESSURE)),
            ("bar", UnitQuantity::new(1e5, 0.0, PRESSURE)),
            ("atm", UnitQuantity::new(101325.0, 0.0, PRESSURE)),
            ("psi", UnitQuantity::new(6894.757293168361, 0.0, PRESSURE)),
            ("J", UnitQuantity::new(1.0, 0.0, ENERGY)),
            ("kJ", UnitQuantity::new(1000.0, 0.0, ENERGY)),
            ("MJ", UnitQuantity::new(1e6, 0.0, ENERGY)),
            ("W", UnitQuantity::new(1.0, 0.0, POWER)),
            ("kW", UnitQuantity::new(1000.0, 0.0, POWER)),
            ("hp", UnitQuantity::new(745.69987158227, 0.0, POWER)),
            ("Hz", UnitQuantity::new(1.0, 0.0, FREQUENCY)),
            ("rpm", UnitQuantity::new(2.0 * std::f64::consts::PI / 60.0, 0.0, [0, 0, -1, 0, 0, 0, 1])),
            ("kn", UnitQuantity::new(1852.0 / 3600.0, 0.0, [1, 0, -1, 0, 0, 0, 0])),
            ("percent", UnitQuantity::new(0.01, 0.0, NONE)),
        ];
        entries.into_iter().collect()
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Mul,
    Div,
    Pow,
    Open,
    Close,
}

fn tokenize(units: &str) -> Result<Vec<Token>, UnitError> {
    let parse_err = |what: String| UnitError::Parse {
        units: units.to_string(),
        what,
    };
    let chars: Vec<char> = units.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            '^' => {
                tokens.push(Token::Pow);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Mul);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Div);
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() {
                    let d = chars[i];
                    let exponent_sign =
                        (d == '-' || d == '+') && matches!(chars[i - 1], 'e' | 'E');
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| parse_err(format!("invalid number '{text}'")))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(parse_err(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    units: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, what: impl Into<String>) -> UnitError {
        UnitError::Parse {
            units: self.units.to_string(),
            what: what.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<UnitQuantity, UnitError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Mul) => {
                    self.pos += 1;
                    value = value.mul(self.term()?);
                }
                Some(Token::Div) => {
                    self.pos += 1;
                    value = value.div(self.term()?);
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<UnitQuantity, UnitError> {
        let base = self.atom()?;
        if self.peek() == Some(&Token::Pow) {
            self.pos += 1;
            let exp = match self.next() {
                Some(Token::Number(n)) if n.fract() == 0.0 => n as i32,
                Some(Token::Open) => {
                    let n = match self.next() {
                        Some(Token::Number(n)) if n.fract() == 0.0 => n as i32,
                        _ => return Err(self.error("expected an integer exponent")),
                    };
                    if self.next() != Some(Token::Close) {
                        return Err(self.error("expected ')' after exponent"));
                    }
                    n
                }
                _ => return Err(self.error("expected an integer exponent")),
            };
            return Ok(base.powi(exp));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<UnitQuantity, UnitError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(UnitQuantity::dimensionless(n)),
            Some(Token::Ident(name)) => unit_table()
                .get(name.as_str())
                .copied()
                .ok_or_else(|| UnitError::UnknownUnit {
                    unit: name,
                    units: self.units.to_string(),
                }),
            Some(Token::Open) => {
                let inner = self.expr()?;
                if self.next() != Some(Token::Close) {
                    return Err(self.error("unbalanced parentheses"));
                }
                Ok(inner)
            }
            Some(other) => Err(self.error(format!("unexpected token {other:?}"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

/// Parse a unit expression.
pub fn parse_units(units: &str) -> Result<UnitQuantity, UnitError> {
    let mut parser = Parser {
        units,
        tokens: tokenize(units)?,
        pos: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing tokens"));
    }
    Ok(value)
}

/// Affine conversion from `from` to `to`: `out = scale * (value + offset)`.
pub fn unit_conversion(from: &str, to: &str) -> Result<(f64, f64), UnitError> {
    let src = parse_units(from)?;
    let dst = parse_units(to)?;
    if !src.is_compatible(&dst) {
        return Err(UnitError::Incompatible {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    let scale = src.scale / dst.scale;
    let offset = src.offset - dst.offset * dst.scale / src.scale;
    Ok((scale, offset))
}

/// Units of the `deriv`-th time derivative of a quantity with `units`.
pub fn rate_units(units: Option<&str>, time_units: Option<&str>, deriv: u32) -> Units {
    let time = match (time_units, deriv) {
        (None, _) => None,
        (Some(t), 1) => Some(t.to_string()),
        (Some(t), n) => Some(format!("{t}**{n}")),
    };
    match (units, time) {
        (None, None) => None,
        (Some(u), None) => Some(u.to_string()),
        (None, Some(t)) => Some(format!("1.0/{t}")),
        (Some(u), Some(t)) => Some(format!("{u}/{t}")),
    }
}

/// Units of a quantity whose first time derivative has units `rate`.
pub fn integral_units(rate: Option<&str>, time_units: Option<&str>) -> Units {
    match (rate, time_units) {
        (Some(u), Some(t)) => Some(format!("({u})*{t}")),
        (u, _) => u.map(str::to_string),
    }
}

/// Units as printed in reports and error messages.
pub fn display_units(units: Option<&str>) -> &str {
    units.unwrap_or("None")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_conversion_is_pure_scale() {
        let (scale, offset) = unit_conversion("ft", "m").unwrap();
        assert!((scale - 0.3048).abs() < 1e-15);
        assert_eq!(offset, 0.0);
    }

    #[test]
    fn temperature_conversion_carries_offset() {
        let (scale, offset) = unit_conversion("degF", "degC").unwrap();
        let celsius = scale * (212.0 + offset);
        assert!((celsius - 100.0).abs() < 1e-10);

        let (scale, offset) = unit_conversion("K", "degC").unwrap();
        assert!((scale * (273.15 + offset)).abs() < 1e-12);
    }

    #[test]
    fn compound_expressions_parse() {
        let accel = parse_units("ft/s**2").unwrap();
        assert!((accel.scale - 0.3048).abs() < 1e-15);
        let inverse = parse_units("1.0/min").unwrap();
        assert!((inverse.scale - 1.0 / 60.0).abs() < 1e-15);
        assert!(parse_units("kg*m/(s*s)").unwrap().is_compatible(&parse_units("N").unwrap()));
        assert!(parse_units("m/s/s").unwrap().is_compatible(&parse_units("m/s**2").unwrap()));
    }

    #[test]
    fn incompatible_units_are_rejected() {
        let err = unit_conversion("m", "s").unwrap_err();
        assert_eq!(
            err,
            UnitError::Incompatible {
                from: "m".to_string(),
                to: "s".to_string()
            }
        );
        assert!(matches!(
            parse_units("furlong"),
            Err(UnitError::UnknownUnit { .. })
        ));
        assert!(matches!(parse_units("m/(s"), Err(UnitError::Parse { .. })));
    }

    #[test]
    fn rate_units_follow_derivative_order() {
        assert_eq!(rate_units(Some("m"), Some("s"), 1).as_deref(), Some("m/s"));
        assert_eq!(rate_units(Some("m"), Some("s"), 2).as_deref(), Some("m/s**2"));
        assert_eq!(rate_units(None, Some("s"), 1).as_deref(), Some("1.0/s"));
        assert_eq!(rate_units(None, Some("s"), 2).as_deref(), Some("1.0/s**2"));
        assert_eq!(rate_units(Some("rad"), None, 1).as_deref(), Some("rad"));
        assert_eq!(rate_units(None, None, 1), None);

        let derived = rate_units(Some("deg"), Some("min"), 2).unwrap();
        let (scale, _) = unit_conversion(&derived, "rad/s**2").unwrap();
        let expected = (std::f64::consts::PI / 180.0) / 3600.0;
        assert!((scale - expected).abs() < 1e-15);
    }

    #[test]
    fn integral_units_undo_one_derivative() {
        let value = integral_units(Some("m/s"), Some("s")).unwrap();
        assert_eq!(value, "(m/s)*s");
        assert_eq!(unit_conversion(&value, "m").unwrap(), (1.0, 0.0));
        let value = integral_units(Some("ft/min"), Some("min")).unwrap();
        let (scale, _) = unit_conversion(&value, "m").unwrap();
        assert!((scale - 0.3048).abs() < 1e-15);
        assert_eq!(integral_units(Some("rad"), None).as_deref(), Some("rad"));
        assert_eq!(integral_units(None, Some("s")), None);
    }
}

