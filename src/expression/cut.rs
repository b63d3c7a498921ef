use std::{fmt::Display, str::FromStr};

use super::formula::Formula;
use crate::{VarmanError, VarmanResult};

/// A comparison operator inside a cut.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Comparison {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
}

impl Comparison {
    /// Apply the comparison. Any comparison involving NaN is `false`, except `!=`.
    pub fn apply(&self, a: f64, b: f64) -> bool {
        match self {
            Comparison::Equal => a == b,
            Comparison::NotEqual => a != b,
            Comparison::Less => a < b,
            Comparison::LessEqual => a <= b,
            Comparison::Greater => a > b,
            Comparison::GreaterEqual => a >= b,
        }
    }
}

impl Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparison::Equal => write!(f, "=="),
            Comparison::NotEqual => write!(f, "!="),
            Comparison::Less => write!(f, "<"),
            Comparison::LessEqual => write!(f, "<="),
            Comparison::Greater => write!(f, ">"),
            Comparison::GreaterEqual => write!(f, ">="),
        }
    }
}

impl FromStr for Comparison {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(Self::Equal),
            "!=" => Ok(Self::NotEqual),
            "<" => Ok(Self::Less),
            "<=" => Ok(Self::LessEqual),
            ">" => Ok(Self::Greater),
            ">=" => Ok(Self::GreaterEqual),
            _ => Err("Invalid comparison operator".to_string()),
        }
    }
}

/// A boolean selection such as `"0.130 < M < 0.140 and [isSignal or E > 3]"`.
///
/// Cuts combine comparisons with `and`, `or` and `not`, group with square brackets, and allow
/// chained comparisons. Both sides of a comparison are [`Formula`]s. A bare operand without a
/// comparison is true when it is nonzero.
#[derive(Clone, Debug, PartialEq)]
pub enum Cut {
    /// The empty cut, which passes everything.
    Always,
    /// Either side passes.
    Or(Box<Cut>, Box<Cut>),
    /// Both sides pass.
    And(Box<Cut>, Box<Cut>),
    /// The inner cut fails.
    Not(Box<Cut>),
    /// A (possibly chained) comparison, `first op rest[0] op rest[1] ...`.
    Relation {
        /// Leftmost operand
        first: Formula,
        /// Following operators and operands
        rest: Vec<(Comparison, Formula)>,
    },
    /// A single operand interpreted as a truth value.
    Truth(Formula),
}

impl Cut {
    /// Parse a cut string. An empty string gives [`Cut::Always`].
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`](VarmanError::ParseError) for unbalanced brackets, dangling
    /// logical operators, comparisons chained more than twice, or malformed operands.
    pub fn parse(s: &str) -> VarmanResult<Cut> {
        if s.trim().is_empty() {
            return Ok(Cut::Always);
        }
        parse_cut(s.trim(), s)
    }

    /// Evaluate the cut, looking up variable values with `value_of`.
    pub fn check(&self, value_of: &dyn Fn(&str) -> f64) -> bool {
        match self {
            Cut::Always => true,
            Cut::Or(a, b) => a.check(value_of) || b.check(value_of),
            Cut::And(a, b) => a.check(value_of) && b.check(value_of),
            Cut::Not(a) => !a.check(value_of),
            Cut::Relation { first, rest } => {
                let mut lhs = first.evaluate(value_of);
                for (comparison, operand) in rest {
                    let rhs = operand.evaluate(value_of);
                    if !comparison.apply(lhs, rhs) {
                        return false;
                    }
                    lhs = rhs;
                }
                true
            }
            Cut::Truth(operand) => operand.evaluate(value_of) != 0.0,
        }
    }

    /// The distinct variable expressions used by the cut, in order of appearance.
    pub fn variable_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut Vec<String>) {
        match self {
            Cut::Always => {}
            Cut::Or(a, b) | Cut::And(a, b) => {
                a.collect_variables(names);
                b.collect_variables(names);
            }
            Cut::Not(a) => a.collect_variables(names),
            Cut::Relation { first, rest } => {
                push_variables(first, names);
                for (_, operand) in rest {
                    push_variables(operand, names);
                }
            }
            Cut::Truth(operand) => push_variables(operand, names),
        }
    }
}

fn push_variables(formula: &Formula, names: &mut Vec<String>) {
    for name in formula.variables() {
        if !names.contains(&name) {
            names.push(name);
        }
    }
}

fn parse_error(source: &str) -> VarmanError {
    VarmanError::ParseError {
        name: source.to_string(),
        object: "cut".to_string(),
    }
}

fn parse_cut(s: &str, source: &str) -> VarmanResult<Cut> {
    if s.is_empty() {
        return Err(parse_error(source));
    }
    if let Some(inner) = strip_group(s, source)? {
        return parse_cut(inner.trim(), source);
    }
    if let Some(position) = find_keyword(s, "or", source)? {
        return Ok(Cut::Or(
            Box::new(parse_cut(s[..position].trim(), source)?),
            Box::new(parse_cut(s[position + 2..].trim(), source)?),
        ));
    }
    if let Some(position) = find_keyword(s, "and", source)? {
        return Ok(Cut::And(
            Box::new(parse_cut(s[..position].trim(), source)?),
            Box::new(parse_cut(s[position + 3..].trim(), source)?),
        ));
    }
    if let Some(rest) = s.strip_prefix("not") {
        if rest.starts_with(|c: char| c.is_whitespace() || c == '[') {
            return Ok(Cut::Not(Box::new(parse_cut(rest.trim(), source)?)));
        }
    }
    parse_relation(s, source)
}

// The inner text if `s` is entirely enclosed by one pair of square brackets.
fn strip_group<'a>(s: &'a str, source: &str) -> VarmanResult<Option<&'a str>> {
    if !s.starts_with('[') || !s.ends_with(']') {
        return Ok(None);
    }
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(parse_error(source));
                }
                if depth == 0 && i != s.len() - 1 {
                    return Ok(None);
                }
            }
            _ => {}
        }
    }
    Ok(Some(&s[1..s.len() - 1]))
}

fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

// Byte offset of the first top-level occurrence of a logical keyword.
fn find_keyword(s: &str, keyword: &str, source: &str) -> VarmanResult<Option<usize>> {
    let bytes = s.as_bytes();
    let key = keyword.as_bytes();
    let mut depth = 0i32;
    let mut found = None;
    for (i, byte) in bytes.iter().enumerate() {
        match byte {
            b'(' | b'[' => depth += 1,
            b')' | b']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(parse_error(source));
                }
            }
            _ => {
                if found.is_none()
                    && depth == 0
                    && bytes[i..].starts_with(key)
                    && (i == 0 || !is_word_char(bytes[i - 1]))
                    && bytes
                        .get(i + key.len())
                        .map_or(true, |b| !is_word_char(*b))
                {
                    found = Some(i);
                }
            }
        }
    }
    if depth != 0 {
        return Err(parse_error(source));
    }
    Ok(found)
}

fn parse_relation(s: &str, source: &str) -> VarmanResult<Cut> {
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut operands = Vec::new();
    let mut comparisons = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            b'=' | b'!' | b'<' | b'>' if depth == 0 => {
                let width = if bytes.get(i + 1) == Some(&b'=') { 2 } else { 1 };
                let comparison = s[i..i + width]
                    .parse::<Comparison>()
                    .map_err(|_| parse_error(source))?;
                operands.push(&s[start..i]);
                comparisons.push(comparison);
                i += width;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    operands.push(&s[start..]);
    let formulas = operands
        .iter()
        .map(|operand| Formula::parse(operand.trim()).map_err(|_| parse_error(source)))
        .collect::<VarmanResult<Vec<Formula>>>()?;
    let mut formulas = formulas.into_iter();
    let first = formulas.next().ok_or_else(|| parse_error(source))?;
    match comparisons.len() {
        0 => Ok(Cut::Truth(first)),
        1 | 2 => Ok(Cut::Relation {
            first,
            rest: comparisons.into_iter().zip(formulas).collect(),
        }),
        _ => Err(parse_error(source)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(name: &str) -> f64 {
        match name {
            "E" => 0.8,
            "M" => 0.135,
            "PDG" => 111.0,
            "isSignal" => 1.0,
            "isMisidentified" => 0.0,
            "color" => 2.0,
            "daughter(0, E)" => 0.4,
            _ => f64::NAN,
        }
    }

    fn passes(s: &str) -> bool {
        Cut::parse(s).unwrap().check(&values)
    }

    #[test]
    fn enum_displays() {
        assert_eq!(format!("{}", Comparison::Equal), "==");
        assert_eq!(format!("{}", Comparison::NotEqual), "!=");
        assert_eq!(format!("{}", Comparison::Less), "<");
        assert_eq!(format!("{}", Comparison::LessEqual), "<=");
        assert_eq!(format!("{}", Comparison::Greater), ">");
        assert_eq!(format!("{}", Comparison::GreaterEqual), ">=");
        assert_eq!("<=".parse::<Comparison>(), Ok(Comparison::LessEqual));
        assert!("=<".parse::<Comparison>().is_err());
    }

    #[test]
    fn simple_comparisons() {
        assert!(passes(""));
        assert!(passes("   "));
        assert!(passes("E < 1"));
        assert!(!passes("E > 1"));
        assert!(passes("PDG == 111"));
        assert!(passes("PDG != 211"));
        assert!(passes("E >= 0.8"));
        assert!(passes("E<=0.8"));
        assert!(passes("0.130 < M < 0.140"));
        assert!(!passes("0.130 < M < 0.134"));
        assert!(passes("2 * daughter(0, E) == E"));
    }

    #[test]
    fn logic_and_grouping() {
        assert!(passes("E < 1 and PDG == 111"));
        assert!(!passes("E > 1 and PDG == 111"));
        assert!(passes("E > 1 or PDG == 111"));
        assert!(passes("[E > 1 or PDG == 111] and M < 0.2"));
        assert!(!passes("[E > 1 or PDG == 211] and M < 0.2"));
        assert!(passes("not E > 1"));
        assert!(!passes("not [E < 1 and M < 0.2]"));
        assert!(passes("isSignal"));
        assert!(!passes("isMisidentified"));
        assert!(passes("isMisidentified or isSignal"));
        // keywords inside names are not operators
        assert!(passes("color > 1"));
    }

    #[test]
    fn nan_fails_all_but_not_equal() {
        assert!(!passes("unknown < 1"));
        assert!(!passes("unknown >= 1"));
        assert!(!passes("unknown == 1"));
        assert!(passes("unknown != 1"));
    }

    #[test]
    fn variable_names() {
        let cut = Cut::parse("[E > 1 or daughter(0, E) < 2] and 0.1 < M < E").unwrap();
        assert_eq!(cut.variable_names(), vec!["E", "daughter(0, E)", "M"]);
    }

    #[test]
    fn malformed() {
        assert!(Cut::parse("E < ").is_err());
        assert!(Cut::parse("E < 1 and").is_err());
        assert!(Cut::parse("[E < 1").is_err());
        assert!(Cut::parse("E < 1]").is_err());
        assert!(Cut::parse("0 < E < 1 < 2").is_err());
        assert!(Cut::parse("[]").is_err());
    }
}
