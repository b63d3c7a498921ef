use std::fmt::{Debug, Display};

use auto_ops::*;

use crate::{VarmanError, VarmanResult};

/// An arithmetic expression tree over named variables, as written inside `formula(...)`.
///
/// Supported are `+ - * /`, exponentiation with `^` or `**` (right-associative and binding
/// tighter than unary minus), unary minus, parentheses, numeric literals and variable names,
/// which may carry their own argument lists (e.g. `daughter(0, E)`).
#[derive(Clone, PartialEq)]
pub enum Formula {
    /// A numeric literal.
    Constant(f64),
    /// A variable expression, evaluated on the particle.
    Variable(String),
    /// The sum of two [`Formula`]s.
    Add(Box<Formula>, Box<Formula>),
    /// The difference of two [`Formula`]s.
    Sub(Box<Formula>, Box<Formula>),
    /// The product of two [`Formula`]s.
    Mul(Box<Formula>, Box<Formula>),
    /// The quotient of two [`Formula`]s.
    Div(Box<Formula>, Box<Formula>),
    /// The first [`Formula`] raised to the power of the second.
    Pow(Box<Formula>, Box<Formula>),
    /// The negation of a [`Formula`].
    Neg(Box<Formula>),
}

impl_op_ex!(+|a: &Formula, b: &Formula| -> Formula {
    Formula::Add(Box::new(a.clone()), Box::new(b.clone()))
});
impl_op_ex!(-|a: &Formula, b: &Formula| -> Formula {
    Formula::Sub(Box::new(a.clone()), Box::new(b.clone()))
});
impl_op_ex!(*|a: &Formula, b: &Formula| -> Formula {
    Formula::Mul(Box::new(a.clone()), Box::new(b.clone()))
});
impl_op_ex!(/|a: &Formula, b: &Formula| -> Formula {
    Formula::Div(Box::new(a.clone()), Box::new(b.clone()))
});
impl_op_ex!(-|a: &Formula| -> Formula { Formula::Neg(Box::new(a.clone())) });

impl Debug for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.write_tree(f, "", "", "")
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Formula {
    /// Parse a formula string.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`](VarmanError::ParseError) for malformed input.
    pub fn parse(s: &str) -> VarmanResult<Formula> {
        let mut parser = FormulaParser {
            source: s,
            chars: s.char_indices().collect(),
            pos: 0,
        };
        let formula = parser.expression()?;
        parser.skip_whitespace();
        if parser.pos != parser.chars.len() {
            return Err(parser.error());
        }
        Ok(formula)
    }

    /// Raise to a power.
    pub fn pow(&self, exponent: &Formula) -> Formula {
        Formula::Pow(Box::new(self.clone()), Box::new(exponent.clone()))
    }

    /// The distinct variable expressions used, in order of appearance.
    pub fn variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut Vec<String>) {
        match self {
            Formula::Constant(_) => {}
            Formula::Variable(name) => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            Formula::Add(a, b)
            | Formula::Sub(a, b)
            | Formula::Mul(a, b)
            | Formula::Div(a, b)
            | Formula::Pow(a, b) => {
                a.collect_variables(names);
                b.collect_variables(names);
            }
            Formula::Neg(a) => a.collect_variables(names),
        }
    }

    /// Evaluate the formula, looking up variable values with `value_of`.
    pub fn evaluate(&self, value_of: &dyn Fn(&str) -> f64) -> f64 {
        match self {
            Formula::Constant(v) => *v,
            Formula::Variable(name) => value_of(name),
            Formula::Add(a, b) => a.evaluate(value_of) + b.evaluate(value_of),
            Formula::Sub(a, b) => a.evaluate(value_of) - b.evaluate(value_of),
            Formula::Mul(a, b) => a.evaluate(value_of) * b.evaluate(value_of),
            Formula::Div(a, b) => a.evaluate(value_of) / b.evaluate(value_of),
            Formula::Pow(a, b) => a.evaluate(value_of).powf(b.evaluate(value_of)),
            Formula::Neg(a) => -a.evaluate(value_of),
        }
    }

    /// Credit to Daniel Janus: <https://blog.danieljanus.pl/2023/07/20/iterating-trees/>
    fn write_tree(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        parent_prefix: &str,
        immediate_prefix: &str,
        parent_suffix: &str,
    ) -> std::fmt::Result {
        let display_string = match self {
            Self::Constant(v) => format!("{v}"),
            Self::Variable(name) => name.clone(),
            Self::Add(_, _) => "+".to_string(),
            Self::Sub(_, _) => "-".to_string(),
            Self::Mul(_, _) => "*".to_string(),
            Self::Div(_, _) => "/".to_string(),
            Self::Pow(_, _) => "^".to_string(),
            Self::Neg(_) => "-".to_string(),
        };
        writeln!(f, "{}{}{}", parent_prefix, immediate_prefix, display_string)?;
        match self {
            Self::Constant(_) | Self::Variable(_) => {}
            Self::Add(a, b)
            | Self::Sub(a, b)
            | Self::Mul(a, b)
            | Self::Div(a, b)
            | Self::Pow(a, b) => {
                let terms = [a, b];
                let mut it = terms.iter().peekable();
                let child_prefix = format!("{}{}", parent_prefix, parent_suffix);
                while let Some(child) = it.next() {
                    match it.peek() {
                        Some(_) => child.write_tree(f, &child_prefix, "├─ ", "│  "),
                        None => child.write_tree(f, &child_prefix, "└─ ", "   "),
                    }?;
                }
            }
            Self::Neg(a) => {
                let child_prefix = format!("{}{}", parent_prefix, parent_suffix);
                a.write_tree(f, &child_prefix, "└─ ", "   ")?;
            }
        }
        Ok(())
    }
}

struct FormulaParser<'a> {
    source: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl FormulaParser<'_> {
    fn error(&self) -> VarmanError {
        VarmanError::ParseError {
            name: self.source.to_string(),
            object: "formula".to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|(_, c)| *c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn offset(&self, pos: usize) -> usize {
        self.chars
            .get(pos)
            .map_or(self.source.len(), |(offset, _)| *offset)
    }

    // expression := term (('+' | '-') term)*
    fn expression(&mut self) -> VarmanResult<Formula> {
        let mut lhs = self.term()?;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('+') => {
                    self.pos += 1;
                    lhs = lhs + self.term()?;
                }
                Some('-') => {
                    self.pos += 1;
                    lhs = lhs - self.term()?;
                }
                _ => return Ok(lhs),
            }
        }
    }

    // term := unary (('*' | '/') unary)*
    fn term(&mut self) -> VarmanResult<Formula> {
        let mut lhs = self.unary()?;
        loop {
            self.skip_whitespace();
            match (self.peek(), self.peek_at(1)) {
                (Some('*'), Some('*')) => return Ok(lhs),
                (Some('*'), _) => {
                    self.pos += 1;
                    lhs = lhs * self.unary()?;
                }
                (Some('/'), _) => {
                    self.pos += 1;
                    lhs = lhs / self.unary()?;
                }
                _ => return Ok(lhs),
            }
        }
    }

    // unary := ('-' | '+') unary | power
    fn unary(&mut self) -> VarmanResult<Formula> {
        self.skip_whitespace();
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some('+') => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    // power := atom (('^' | '**') unary)?
    fn power(&mut self) -> VarmanResult<Formula> {
        let base = self.atom()?;
        self.skip_whitespace();
        match (self.peek(), self.peek_at(1)) {
            (Some('^'), _) => {
                self.pos += 1;
                Ok(base.pow(&self.unary()?))
            }
            (Some('*'), Some('*')) => {
                self.pos += 2;
                Ok(base.pow(&self.unary()?))
            }
            _ => Ok(base),
        }
    }

    // atom := number | '(' expression ')' | variable
    fn atom(&mut self) -> VarmanResult<Formula> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.expression()?;
                self.skip_whitespace();
                if self.peek() != Some(')') {
                    return Err(self.error());
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.variable(),
            _ => Err(self.error()),
        }
    }

    fn number(&mut self) -> VarmanResult<Formula> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let exponent_digit = match self.peek_at(1) {
                Some('+' | '-') => self.peek_at(2).is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                None => false,
            };
            if exponent_digit {
                self.pos += 2;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let text = &self.source[self.offset(start)..self.offset(self.pos)];
        text.parse::<f64>()
            .map(Formula::Constant)
            .map_err(|_| self.error())
    }

    fn variable(&mut self) -> VarmanResult<Formula> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | ':'))
        {
            self.pos += 1;
        }
        if self.peek() == Some('(') {
            let mut depth = 0;
            loop {
                match self.peek() {
                    Some('(') => depth += 1,
                    Some(')') => {
                        depth -= 1;
                        if depth == 0 {
                            self.pos += 1;
                            break;
                        }
                    }
                    Some(_) => {}
                    None => return Err(self.error()),
                }
                self.pos += 1;
            }
        }
        let text = &self.source[self.offset(start)..self.offset(self.pos)];
        Ok(Formula::Variable(text.to_string()))
    }
}
