//! Dimensional signatures and the unit registry.
//!
//! A [`Dimension`] is a vector of rational exponents over the seven SI base
//! units. Rational exponents are required because square roots of
//! dimensioned quantities occur in thermodynamic models (e.g. `sqrt(a_i)`
//! inside mixing rules). A [`Unit`] pairs a dimension with a scale and a
//! display offset; all quantity storage is in offset-free base SI, so scale
//! and offset apply only when values enter or leave the engine.
//!
//! The registry knows the common SI and engineering units, metric prefixes,
//! the `dimless` alias, and three gauge-pressure variants (`bar_gauge`,
//! `atm_gauge`, `kilo_pascal_gauge`) that only ever appear at I/O
//! boundaries.

use std::fmt;
use std::sync::OnceLock;

use crate::error::QuantityError;

/// A reduced rational number used as a dimension exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    num: i32,
    den: i32,
}

impl Rational {
    pub const ZERO: Rational = Rational { num: 0, den: 1 };

    pub fn new(num: i32, den: i32) -> Rational {
        assert!(den != 0, "zero denominator in dimension exponent");
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1) as i32;
        Rational {
            num: num / g,
            den: den / g,
        }
    }

    pub fn integer(num: i32) -> Rational {
        Rational { num, den: 1 }
    }

    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    fn add(self, other: Rational) -> Rational {
        Rational::new(self.num * other.den + other.num * self.den, self.den * other.den)
    }

    fn neg(self) -> Rational {
        Rational {
            num: -self.num,
            den: self.den,
        }
    }

    fn mul(self, other: Rational) -> Rational {
        Rational::new(self.num * other.num, self.den * other.den)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Number of SI base units tracked.
const N_BASES: usize = 7;

/// Symbols of the SI base units, in storage order.
const BASE_SYMBOLS: [&str; N_BASES] = ["m", "kg", "s", "A", "K", "mol", "cd"];

/// A dimensional signature: rational exponents over the 7 SI bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimension {
    exponents: [Rational; N_BASES],
}

impl Dimension {
    /// The dimensionless signature.
    pub const NONE: Dimension = Dimension {
        exponents: [Rational::ZERO; N_BASES],
    };

    fn base(index: usize) -> Dimension {
        let mut exponents = [Rational::ZERO; N_BASES];
        exponents[index] = Rational::integer(1);
        Dimension { exponents }
    }

    pub fn is_dimensionless(&self) -> bool {
        self.exponents.iter().all(Rational::is_zero)
    }

    pub fn multiply(&self, other: &Dimension) -> Dimension {
        let mut exponents = [Rational::ZERO; N_BASES];
        for (i, e) in exponents.iter_mut().enumerate() {
            *e = self.exponents[i].add(other.exponents[i]);
        }
        Dimension { exponents }
    }

    pub fn divide(&self, other: &Dimension) -> Dimension {
        self.multiply(&other.invert())
    }

    pub fn invert(&self) -> Dimension {
        let mut exponents = [Rational::ZERO; N_BASES];
        for (i, e) in exponents.iter_mut().enumerate() {
            *e = self.exponents[i].neg();
        }
        Dimension { exponents }
    }

    pub fn powi(&self, exponent: i32) -> Dimension {
        self.pow_rational(Rational::integer(exponent))
    }

    /// Exact square root of the signature, e.g. `Pa*m**6` -> `Pa**1/2*m**3`.
    pub fn sqrt(&self) -> Dimension {
        self.pow_rational(Rational::new(1, 2))
    }

    pub fn pow_rational(&self, exponent: Rational) -> Dimension {
        let mut exponents = [Rational::ZERO; N_BASES];
        for (i, e) in exponents.iter_mut().enumerate() {
            *e = self.exponents[i].mul(exponent);
        }
        Dimension { exponents }
    }
}

impl fmt::Display for Dimension {
    /// Render as a product of base symbols, e.g. `kg*m**2/(s**2*mol)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut numerator = Vec::new();
        let mut denominator = Vec::new();
        for (i, e) in self.exponents.iter().enumerate() {
            if e.is_zero() {
                continue;
            }
            let target = if e.num > 0 {
                &mut numerator
            } else {
                &mut denominator
            };
            let abs = Rational::new(e.num.abs(), e.den);
            if abs == Rational::integer(1) {
                target.push(BASE_SYMBOLS[i].to_string());
            } else {
                target.push(format!("{}**{}", BASE_SYMBOLS[i], abs));
            }
        }
        if numerator.is_empty() && denominator.is_empty() {
            return write!(f, "dimless");
        }
        let num = if numerator.is_empty() {
            "1".to_string()
        } else {
            numerator.join("*")
        };
        match denominator.len() {
            0 => write!(f, "{num}"),
            1 => write!(f, "{num}/{}", denominator[0]),
            _ => write!(f, "{num}/({})", denominator.join("*")),
        }
    }
}

/// A named unit: dimension, scale to base SI, and a display offset.
///
/// A value `v` expressed in this unit corresponds to the base-SI magnitude
/// `v * scale + offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub dimension: Dimension,
    pub scale: f64,
    pub offset: f64,
}

impl Unit {
    fn plain(dimension: Dimension, scale: f64) -> Unit {
        Unit {
            dimension,
            scale,
            offset: 0.0,
        }
    }

    /// Convert a displayed value to the base-SI magnitude.
    pub fn to_si(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    /// Convert a base-SI magnitude to the displayed value.
    pub fn from_si(&self, magnitude: f64) -> f64 {
        (magnitude - self.offset) / self.scale
    }
}

struct Entry {
    unit: Unit,
    /// Whether metric prefixes may be attached (offset units may not).
    prefixable: bool,
}

/// The process-wide unit registry.
///
/// The registry is initialized once at first use and read-only afterwards.
pub struct UnitRegistry {
    entries: Vec<(&'static str, Entry)>,
}

fn dim(m: i32, kg: i32, s: i32, a: i32, k: i32, mol: i32, cd: i32) -> Dimension {
    let mut d = Dimension::NONE;
    for (i, e) in [m, kg, s, a, k, mol, cd].into_iter().enumerate() {
        if e != 0 {
            d = d.multiply(&Dimension::base(i).powi(e));
        }
    }
    d
}

impl UnitRegistry {
    fn bootstrap() -> UnitRegistry {
        let length = dim(1, 0, 0, 0, 0, 0, 0);
        let mass = dim(0, 1, 0, 0, 0, 0, 0);
        let time = dim(0, 0, 1, 0, 0, 0, 0);
        let current = dim(0, 0, 0, 1, 0, 0, 0);
        let temperature = dim(0, 0, 0, 0, 1, 0, 0);
        let amount = dim(0, 0, 0, 0, 0, 1, 0);
        let luminosity = dim(0, 0, 0, 0, 0, 0, 1);
        let force = dim(1, 1, -2, 0, 0, 0, 0);
        let pressure = dim(-1, 1, -2, 0, 0, 0, 0);
        let energy = dim(2, 1, -2, 0, 0, 0, 0);
        let power = dim(2, 1, -3, 0, 0, 0, 0);
        let volume = length.powi(3);

        let mut entries: Vec<(&'static str, Entry)> = Vec::new();
        let mut plain = |name: &'static str, dimension: Dimension, scale: f64, prefixable| {
            entries.push((
                name,
                Entry {
                    unit: Unit::plain(dimension, scale),
                    prefixable,
                },
            ));
        };

        plain("m", length, 1.0, true);
        plain("g", mass, 1e-3, true);
        plain("s", time, 1.0, true);
        plain("A", current, 1.0, true);
        plain("K", temperature, 1.0, true);
        plain("mol", amount, 1.0, true);
        plain("cd", luminosity, 1.0, true);
        plain("N", force, 1.0, true);
        plain("Pa", pressure, 1.0, true);
        plain("J", energy, 1.0, true);
        plain("W", power, 1.0, true);
        plain("L", volume, 1e-3, true);
        plain("bar", pressure, 1e5, false);
        plain("atm", pressure, 101_325.0, false);
        plain("min", time, 60.0, false);
        plain("h", time, 3600.0, false);
        plain("hour", time, 3600.0, false);
        plain("day", time, 86_400.0, false);
        plain("dimless", Dimension::NONE, 1.0, false);
        plain("dimensionless", Dimension::NONE, 1.0, false);

        let mut offset = |name: &'static str, dimension, scale: f64, offset: f64| {
            entries.push((
                name,
                Entry {
                    unit: Unit {
                        dimension,
                        scale,
                        offset,
                    },
                    prefixable: false,
                },
            ));
        };

        offset("degC", temperature, 1.0, 273.15);
        // gauge-pressure aliases, only meaningful at I/O boundaries
        offset("bar_gauge", pressure, 1e5, 101_325.0);
        offset("barg", pressure, 1e5, 101_325.0);
        offset("atm_gauge", pressure, 101_325.0, 101_325.0);
        offset("atmg", pressure, 101_325.0, 101_325.0);
        offset("kilo_pascal_gauge", pressure, 1e3, 101_325.0);
        offset("kPag", pressure, 1e3, 101_325.0);

        UnitRegistry { entries }
    }

    fn lookup(&self, name: &str) -> Option<(&Entry, f64)> {
        if let Some((_, entry)) = self.entries.iter().find(|(n, _)| *n == name) {
            return Some((entry, 1.0));
        }
        // metric prefix resolution, longest prefix first
        const PREFIXES: [(&str, f64); 10] = [
            ("da", 1e1),
            ("G", 1e9),
            ("M", 1e6),
            ("k", 1e3),
            ("c", 1e-2),
            ("m", 1e-3),
            ("u", 1e-6),
            ("µ", 1e-6),
            ("n", 1e-9),
            ("p", 1e-12),
        ];
        for (prefix, factor) in PREFIXES {
            if let Some(rest) = name.strip_prefix(prefix) {
                if let Some((_, entry)) = self.entries.iter().find(|(n, _)| *n == rest) {
                    if entry.prefixable {
                        return Some((entry, factor));
                    }
                }
            }
        }
        None
    }

    /// Parse a unit expression such as `"J/(mol*K)"` or `"m**3/mol"`.
    ///
    /// Offset units (`degC`, gauge pressures) are only accepted as the
    /// entire expression; inside products and quotients they have no
    /// consistent meaning.
    pub fn parse(&self, expression: &str) -> Result<Unit, QuantityError> {
        let text = expression.trim();
        if text.is_empty() || text == "-" {
            return Ok(Unit::plain(Dimension::NONE, 1.0));
        }
        // whole-expression match first, so offset units resolve
        if let Some((entry, factor)) = self.lookup(text) {
            let mut unit = entry.unit.clone();
            unit.scale *= factor;
            return Ok(unit);
        }
        let mut parser = Parser {
            registry: self,
            tokens: tokenize(text)?,
            pos: 0,
            expression: text,
        };
        let unit = parser.expression()?;
        if parser.pos != parser.tokens.len() {
            return Err(QuantityError::UnitParse(text.to_string()));
        }
        Ok(unit)
    }
}

static REGISTRY: OnceLock<UnitRegistry> = OnceLock::new();

/// Access the process-wide unit registry.
pub fn unit_registry() -> &'static UnitRegistry {
    REGISTRY.get_or_init(UnitRegistry::bootstrap)
}

/// Parse a unit expression through the process-wide registry.
pub fn parse_unit(expression: &str) -> Result<Unit, QuantityError> {
    unit_registry().parse(expression)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Integer(i32),
    Star,
    Slash,
    Power,
    Open,
    Close,
}

fn tokenize(text: &str) -> Result<Vec<Token>, QuantityError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' => {
                chars.next();
            }
            '*' => {
                chars.next();
                if chars.peek() == Some(&'*') {
                    chars.next();
                    tokens.push(Token::Power);
                } else {
                    tokens.push(Token::Star);
                }
            }
            '^' => {
                chars.next();
                tokens.push(Token::Power);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '-' | '0'..='9' => {
                let mut number = String::new();
                number.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        number.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = number
                    .parse()
                    .map_err(|_| QuantityError::UnitParse(text.to_string()))?;
                tokens.push(Token::Integer(value));
            }
            _ if c.is_alphabetic() || c == 'µ' || c == '_' => {
                let mut name = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == 'µ' {
                        name.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Name(name));
            }
            _ => return Err(QuantityError::UnitParse(text.to_string())),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    registry: &'a UnitRegistry,
    tokens: Vec<Token>,
    pos: usize,
    expression: &'a str,
}

impl Parser<'_> {
    fn error(&self) -> QuantityError {
        QuantityError::UnitParse(self.expression.to_string())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expression(&mut self) -> Result<Unit, QuantityError> {
        let mut unit = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    let rhs = self.term()?;
                    unit = Unit::plain(
                        unit.dimension.multiply(&rhs.dimension),
                        unit.scale * rhs.scale,
                    );
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    let rhs = self.term()?;
                    unit = Unit::plain(
                        unit.dimension.divide(&rhs.dimension),
                        unit.scale / rhs.scale,
                    );
                }
                _ => return Ok(unit),
            }
        }
    }

    fn term(&mut self) -> Result<Unit, QuantityError> {
        let base = self.factor()?;
        if self.peek() == Some(&Token::Power) {
            self.pos += 1;
            let exponent = match self.peek() {
                Some(&Token::Integer(e)) => {
                    self.pos += 1;
                    e
                }
                _ => return Err(self.error()),
            };
            return Ok(Unit::plain(
                base.dimension.powi(exponent),
                base.scale.powi(exponent),
            ));
        }
        Ok(base)
    }

    fn factor(&mut self) -> Result<Unit, QuantityError> {
        match self.peek().cloned() {
            Some(Token::Open) => {
                self.pos += 1;
                let unit = self.expression()?;
                if self.peek() != Some(&Token::Close) {
                    return Err(self.error());
                }
                self.pos += 1;
                Ok(unit)
            }
            Some(Token::Integer(1)) => {
                // allow "1/s" style reciprocals
                self.pos += 1;
                Ok(Unit::plain(Dimension::NONE, 1.0))
            }
            Some(Token::Name(name)) => {
                self.pos += 1;
                let (entry, factor) = self
                    .registry
                    .lookup(&name)
                    .ok_or_else(|| QuantityError::UndefinedUnit(name.clone()))?;
                if entry.unit.offset != 0.0 {
                    // offset units are whole-expression only
                    return Err(QuantityError::UnitParse(self.expression.to_string()));
                }
                let mut unit = entry.unit.clone();
                unit.scale *= factor;
                Ok(unit)
            }
            _ => Err(self.error()),
        }
    }
}
