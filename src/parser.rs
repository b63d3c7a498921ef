use log::warn;

use crate::{
    data::{Event, Particle},
    utils::{enums::Detector, pdg},
    VarmanError, VarmanResult,
};

/// Split a comma-separated argument string at the top level, ignoring commas nested inside
/// parentheses or square brackets. Each argument is trimmed.
///
/// # Errors
///
/// Unbalanced brackets return a [`ParseError`](VarmanError::ParseError).
pub fn split_arguments(s: &str) -> VarmanResult<Vec<String>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut args = Vec::new();
    let mut depth: i32 = 0;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(unbalanced(s));
                }
            }
            ',' if depth == 0 => {
                args.push(s[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(unbalanced(s));
    }
    args.push(s[start..].trim().to_string());
    Ok(args)
}

fn unbalanced(s: &str) -> VarmanError {
    VarmanError::ParseError {
        name: s.to_string(),
        object: "balanced expression".to_string(),
    }
}

/// Split `name(arg, ...)` into the name and its arguments. A bare `name` has no argument
/// list.
///
/// # Errors
///
/// Returns a [`ParseError`](VarmanError::ParseError) if the expression has parentheses but is
/// not a single call (e.g. `a(b)c` or `a(b)+c(d)`).
pub fn parse_call(expression: &str) -> VarmanResult<(String, Option<Vec<String>>)> {
    let expression = expression.trim();
    let Some(open) = expression.find('(') else {
        return Ok((expression.to_string(), None));
    };
    if !expression.ends_with(')') {
        return Err(VarmanError::ParseError {
            name: expression.to_string(),
            object: "variable expression".to_string(),
        });
    }
    let inner = &expression[open + 1..expression.len() - 1];
    // the first '(' must close at the very end
    let mut depth = 0;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(VarmanError::ParseError {
                        name: expression.to_string(),
                        object: "variable expression".to_string(),
                    });
                }
            }
            _ => {}
        }
    }
    let name = expression[..open].trim().to_string();
    Ok((name, Some(split_arguments(inner)?)))
}

/// Parse a numeric literal. Words like `inf` or `nan` are not numbers here, so they stay
/// available as variable names.
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    let first = s.chars().next()?;
    if first.is_ascii_digit() || matches!(first, '.' | '+' | '-') {
        s.parse::<f64>().ok()
    } else {
        None
    }
}

/// Arguments of a meta-variable call, with typed accessors which produce resolution errors
/// naming the meta-variable.
#[derive(Clone, Debug)]
pub struct Arguments<'a> {
    /// Name of the meta-variable
    pub name: &'a str,
    /// Raw, trimmed argument strings
    pub args: &'a [String],
}

impl<'a> Arguments<'a> {
    /// Bundle a meta-variable name with its arguments.
    pub fn new(name: &'a str, args: &'a [String]) -> Self {
        Self { name, args }
    }
    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.args.len()
    }
    /// `true` if no arguments were given.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
    /// The raw argument at position `i`.
    pub fn get(&self, i: usize) -> &'a str {
        self.args.get(i).map(String::as_str).unwrap_or("")
    }
    /// Require exactly `n` arguments.
    pub fn expect(&self, n: usize) -> VarmanResult<()> {
        self.expect_range(n, n)
    }
    /// Require between `min` and `max` arguments (inclusive).
    pub fn expect_range(&self, min: usize, max: usize) -> VarmanResult<()> {
        if self.len() < min || self.len() > max {
            let expected = if min == max {
                format!("{min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(self.count_error(expected));
        }
        Ok(())
    }
    /// Require at least `min` arguments.
    pub fn expect_at_least(&self, min: usize) -> VarmanResult<()> {
        if self.len() < min {
            return Err(self.count_error(format!("at least {min}")));
        }
        Ok(())
    }
    fn count_error(&self, expected: String) -> VarmanError {
        VarmanError::ArgumentCountError {
            name: self.name.to_string(),
            expected,
            found: self.len(),
        }
    }
    /// Parse argument `i` as an integer.
    pub fn int(&self, i: usize) -> VarmanResult<i64> {
        self.get(i)
            .parse::<i64>()
            .map_err(|_| VarmanError::ParseError {
                name: self.get(i).to_string(),
                object: format!("integer argument of {}", self.name),
            })
    }
    /// Parse argument `i` as a non-negative index.
    pub fn index(&self, i: usize) -> VarmanResult<usize> {
        self.get(i)
            .parse::<usize>()
            .map_err(|_| VarmanError::ParseError {
                name: self.get(i).to_string(),
                object: format!("index argument of {}", self.name),
            })
    }
    /// Parse argument `i` as a floating-point number.
    pub fn float(&self, i: usize) -> VarmanResult<f64> {
        parse_number(self.get(i)).ok_or_else(|| VarmanError::ParseError {
            name: self.get(i).to_string(),
            object: format!("numeric argument of {}", self.name),
        })
    }
    /// Parse argument `i` as a PDG code, given either as an integer or as a particle name.
    pub fn pdg(&self, i: usize) -> VarmanResult<i32> {
        let arg = self.get(i);
        if let Ok(code) = arg.parse::<i32>() {
            return Ok(code);
        }
        pdg::code(arg).ok_or_else(|| VarmanError::ParseError {
            name: arg.to_string(),
            object: format!("PDG code or particle name for {}", self.name),
        })
    }
    /// Parse the arguments from position `from` onwards as detector names. No arguments means
    /// every detector.
    pub fn detectors(&self, from: usize) -> VarmanResult<Vec<Detector>> {
        if self.len() <= from {
            return Ok(Detector::ALL.to_vec());
        }
        let mut detectors = Vec::new();
        for arg in &self.args[from..] {
            let set = Detector::parse_set(arg).map_err(|_| VarmanError::ParseError {
                name: arg.to_string(),
                object: "detector".to_string(),
            })?;
            for d in set {
                if !detectors.contains(&d) {
                    detectors.push(d);
                }
            }
        }
        Ok(detectors)
    }
    /// Parse argument `i` as a generalized daughter index.
    pub fn daughter_path(&self, i: usize) -> VarmanResult<DaughterPath> {
        DaughterPath::parse(self.get(i)).map_err(|_| VarmanError::ParseError {
            name: self.get(i).to_string(),
            object: format!("generalized daughter index for {}", self.name),
        })
    }
}

/// A generalized daughter index such as `0:1:0`: each colon-separated integer selects a
/// daughter one generation further down the decay tree.
///
/// The path is only checked for its alphabet when parsed. Negative or missing components and
/// indices past the number of daughters are reported with a warning when the path is followed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DaughterPath(String);

impl DaughterPath {
    /// Accept any non-empty string of digits, colons and minus signs.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == ':' || c == '-') {
            return Err(format!("\"{s}\" is not a generalized daughter index"));
        }
        Ok(Self(s.to_string()))
    }

    /// Follow the path from `particle`, or warn and return [`None`] if it cannot be followed.
    pub fn resolve<'a>(&self, particle: &'a Particle, event: &'a Event) -> Option<&'a Particle> {
        let mut current = particle;
        for component in self.0.split(':') {
            let Ok(i) = component.parse::<usize>() else {
                warn!(
                    "Generalized index \"{}\" is malformed at \"{}\"",
                    self.0, component
                );
                return None;
            };
            match current.daughter(event, i) {
                Some(daughter) => current = daughter,
                None => {
                    warn!(
                        "Generalized index \"{}\" refers to daughter {} of a particle with {} daughters",
                        self.0,
                        i,
                        current.daughters.len()
                    );
                    return None;
                }
            }
        }
        Some(current)
    }
}

/// Encode an expression into a string usable as an extra-info key. Every character that is
/// not alphanumeric becomes a `__xx` token, and underscores are escaped too, so distinct
/// expressions never share a key.
pub fn encode_name(expression: &str) -> String {
    let mut out = String::with_capacity(expression.len() * 2);
    for c in expression.chars() {
        let token = match c {
            '_' => "__us",
            '(' => "__bo",
            ')' => "__bc",
            '[' => "__so",
            ']' => "__sc",
            ',' => "__cm",
            ' ' => "__sp",
            ':' => "__cl",
            '.' => "__pt",
            '+' => "__pl",
            '-' => "__mi",
            '*' => "__st",
            '/' => "__sl",
            '^' => "__ha",
            '<' => "__lt",
            '>' => "__gt",
            '=' => "__eq",
            '!' => "__ex",
            other => {
                if other.is_ascii_alphanumeric() {
                    out.push(other);
                } else {
                    out.push_str(&format!("__{:x}_", other as u32));
                }
                continue;
            }
        };
        out.push_str(token);
    }
    out
}
