// src/filter.rs

//! Attribute filter expressions
//!
//! A filter is a boolean expression over `name=value` terms joined with `&`
//! and `|`, grouped with parentheses. `&` binds tighter than `|`.
//!
//! A term only rejects an action that carries the attribute with a
//! different value; actions without the attribute pass.
//!
//! ```text
//! arch=sparc & debug=false & (locale=sv | locale=fr)
//! ```

use crate::actions::{Action, AttrValue, Attrs};
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Parsed filter expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    Term { name: String, value: String },
    /// Two or more operands, all of which must hold
    And(Vec<FilterExpr>),
    /// Two or more operands, one of which must hold
    Or(Vec<FilterExpr>),
}

impl FilterExpr {
    pub fn eval(&self, attrs: &Attrs) -> bool {
        match self {
            FilterExpr::Term { name, value } => match attrs.get(name) {
                None => true,
                Some(AttrValue::Single(v)) => v == value,
                Some(AttrValue::List(_)) => false,
            },
            FilterExpr::And(terms) => terms.iter().all(|t| t.eval(attrs)),
            FilterExpr::Or(terms) => terms.iter().any(|t| t.eval(attrs)),
        }
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::Term { name, value } => write!(f, "{}={}", name, value),
            FilterExpr::And(terms) => write_joined(f, terms, " & "),
            FilterExpr::Or(terms) => write_joined(f, terms, " | "),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, terms: &[FilterExpr], op: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, term) in terms.iter().enumerate() {
        if i > 0 {
            f.write_str(op)?;
        }
        write!(f, "{}", term)?;
    }
    f.write_str(")")
}

/// A compiled filter together with its source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    source: String,
    expr: FilterExpr,
}

impl Filter {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &FilterExpr {
        &self.expr
    }

    pub fn matches(&self, attrs: &Attrs) -> bool {
        self.expr.eval(attrs)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        compile_filter(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Eq,
    And,
    Or,
    Open,
    Close,
    End,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Word(w) => w.clone(),
            Token::Eq => "=".to_string(),
            Token::And => "&".to_string(),
            Token::Or => "|".to_string(),
            Token::Open => "(".to_string(),
            Token::Close => ")".to_string(),
            Token::End => "end of filter".to_string(),
        }
    }
}

fn tokenize(s: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&c) = chars.peek() {
        let single = match c {
            '=' => Some(Token::Eq),
            '&' => Some(Token::And),
            '|' => Some(Token::Or),
            '(' => Some(Token::Open),
            ')' => Some(Token::Close),
            _ => None,
        };
        if let Some(tok) = single {
            tokens.push(tok);
            chars.next();
        } else if c.is_whitespace() {
            chars.next();
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || "=&|()".contains(c) {
                    break;
                }
                word.push(c);
                chars.next();
            }
            tokens.push(Token::Word(word));
        }
    }
    tokens.push(Token::End);
    tokens
}

/// Deepest parenthesis nesting a filter may use
pub const MAX_FILTER_NESTING: usize = 32;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::End)
    }

    fn next(&mut self) -> Token {
        let tok = self.peek().clone();
        self.pos += 1;
        tok
    }

    fn unexpected(tok: &Token, expected: &[&str]) -> Error {
        Error::FilterSyntax {
            token: tok.describe(),
            expected: expected.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn parse_or(&mut self) -> Result<FilterExpr> {
        let mut terms = vec![self.parse_and()?];
        while *self.peek() == Token::Or {
            self.next();
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            FilterExpr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<FilterExpr> {
        let mut terms = vec![self.parse_primary()?];
        while *self.peek() == Token::And {
            self.next();
            terms.push(self.parse_primary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            FilterExpr::And(terms)
        })
    }

    fn parse_primary(&mut self) -> Result<FilterExpr> {
        match self.next() {
            Token::Open => {
                if self.depth == MAX_FILTER_NESTING {
                    return Err(Error::FilterSyntax {
                        token: "(".to_string(),
                        expected: vec![format!("at most {} nested groups", MAX_FILTER_NESTING)],
                    });
                }
                self.depth += 1;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.next() {
                    Token::Close => Ok(inner),
                    other => Err(Self::unexpected(&other, &["&", "|", ")"])),
                }
            }
            Token::Word(name) => {
                match self.next() {
                    Token::Eq => {}
                    other => return Err(Self::unexpected(&other, &["="])),
                }
                match self.next() {
                    Token::Word(value) => Ok(FilterExpr::Term { name, value }),
                    other => Err(Self::unexpected(&other, &["NAME"])),
                }
            }
            other => Err(Self::unexpected(&other, &["(", "NAME"])),
        }
    }
}

/// Compile a filter expression
pub fn compile_filter(s: &str) -> Result<Filter> {
    let mut parser = Parser {
        tokens: tokenize(s),
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    match parser.next() {
        Token::End => Ok(Filter {
            source: s.to_string(),
            expr,
        }),
        other => Err(Parser::unexpected(&other, &["&", "|", "end of filter"])),
    }
}

/// Whether an action survives every filter in the chain
pub fn apply_filters(action: &Action, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(action.attrs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "\
        file path=/usr/bin/ls arch=i386 debug=true
        file path=/usr/bin/ls arch=i386 debug=false
        file path=/usr/bin/ls arch=sparc debug=true
        file path=/usr/bin/ls arch=sparc debug=false
        file path=/usr/bin/hostname arch=386 version=0.9
        file path=/usr/bin/hostname arch=sparc version=9
        file path=/usr/bin/hostid arch=386 version=0.9.9
        file path=/usr/bin/hostid arch=sparc version=9.9
        file path=/usr/sbin/6to4relay arch=386 version=0.a6.b5.c4.d3.e2.f1
        file path=/usr/sbin/6to4relay arch=sparcv9 version=0.6.5.4.3.2.1
        file path=/usr/bin/i386 386=true 0.i.3.8.6=cpuarch
        file path=/usr/bin/sparc 386=false 0.9.9=cpuarch
        file path=/var/svc/manifest/intrd.xml opensolaris.zone=global
        file path=/path/to/french/text doc=true locale=fr
        file path=/path/to/swedish/text doc=true locale=sv
        file path=/path/to/english/text doc=true locale=en
        file path=/path/to/us-english/text doc=true locale=en_US";

    fn count(filters: &[&str]) -> usize {
        let filters: Vec<Filter> = filters.iter().map(|f| compile_filter(f).unwrap()).collect();
        FIXTURE
            .lines()
            .map(|l| l.trim().parse::<Action>().unwrap())
            .filter(|a| apply_filters(a, &filters))
            .count()
    }

    #[test]
    fn test_simple_terms() {
        assert_eq!(count(&["arch=i386"]), 9);
        assert_eq!(count(&["arch=sparc"]), 11);
        assert_eq!(count(&["doc=true"]), 17);
        assert_eq!(count(&["doc=false"]), 13);
        assert_eq!(count(&["arch=386"]), 10);
        assert_eq!(count(&["version=0.9"]), 12);
        assert_eq!(count(&["version=0.9.9"]), 12);
        assert_eq!(count(&["version=0.a6.b5.c4.d3.e2.f1"]), 12);
    }

    #[test]
    fn test_numeric_attribute_names() {
        assert_eq!(count(&["386=true"]), 16);
        assert_eq!(count(&["0.9.9=foobar"]), 16);
        assert_eq!(count(&["0.i.3.8.6=foobar"]), 16);
    }

    #[test]
    fn test_and_or() {
        assert_eq!(count(&["arch=i386 & debug=true"]), 8);
        assert_eq!(count(&["arch=i386 & debug=false"]), 8);
        assert_eq!(count(&["locale=sv | locale=fr"]), 15);
        assert_eq!(count(&["version=0.9 & arch=386"]), 8);
        assert_eq!(count(&["version=0.6.5.4.3.2.1 & arch=386"]), 7);
        assert_eq!(count(&["version=0.a6.b5.c4.d3.e2.f1 & arch=sparcv9"]), 7);
        assert_eq!(
            count(&["arch=sparc & debug=false & (locale=sv | locale=fr)"]),
            8
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        assert_eq!(
            count(&["version=0.9 & (0.i.3.8.6=cpuarch | 0.9.9=foobar) | version=0.a6.b5.c4.d3.e2.f1"]),
            13
        );
        let f = compile_filter("a=1 | b=2 & c=3").unwrap();
        assert_eq!(f.expr().to_string(), "(a=1 | (b=2 & c=3))");
    }

    #[test]
    fn test_multiple_filters_are_anded() {
        assert_ne!(count(&["arch=i386", "debug=false"]), count(&["arch=i386"]));
        assert_eq!(
            count(&["arch=i386", "debug=false"]),
            count(&["arch=i386 & debug=false"])
        );
    }

    #[test]
    fn test_list_value_never_matches() {
        let a: Action = "driver name=foo alias=a alias=b".parse().unwrap();
        let f = compile_filter("alias=a").unwrap();
        assert!(!apply_filters(&a, &[f]));
    }

    #[test]
    fn test_syntax_errors() {
        match compile_filter("arch=") {
            Err(Error::FilterSyntax { token, expected }) => {
                assert_eq!(token, "end of filter");
                assert_eq!(expected, vec!["NAME"]);
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
        assert!(compile_filter("arch").is_err());
        assert!(compile_filter("(arch=x").is_err());
        assert!(compile_filter("arch=x debug=y").is_err());
        assert!(compile_filter("& arch=x").is_err());
        assert!(compile_filter("").is_err());
    }

    #[test]
    fn test_nesting_is_bounded() {
        let nested = |n: usize| format!("{}a=1{}", "(".repeat(n), ")".repeat(n));
        assert!(compile_filter(&nested(MAX_FILTER_NESTING)).is_ok());
        match compile_filter(&nested(MAX_FILTER_NESTING + 1)) {
            Err(Error::FilterSyntax { token, .. }) => assert_eq!(token, "("),
            other => panic!("expected syntax error, got {:?}", other),
        }
        assert!(compile_filter(&"(".repeat(100_000)).is_err());

        // long flat chains stay shallow
        let chain = vec!["a=1"; 50_000].join(" & ");
        let f = compile_filter(&chain).unwrap();
        match f.expr() {
            FilterExpr::And(terms) => assert_eq!(terms.len(), 50_000),
            other => panic!("expected a flat chain, got {:?}", other),
        }
        assert!(f.matches(&Attrs::new()));
    }
}
