//! Label selectors.
//!
//! A selector is a boolean expression over a label map, for example:
//!
//! ```text
//! role == "db" && has(tier) && !(env in {"dev", "test"})
//! ```
//!
//! Selectors are parsed once, when a resource is loaded, into a [`Selector`] tree. Matching is a
//! pure walk of that tree. The empty string parses to `all()`.

use crate::labels::Labels;
use std::{collections::BTreeSet, fmt, str::FromStr};

/// Limits how deeply parentheses and negations may nest.
const MAX_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Matches every label set.
    All,

    Equals {
        key: String,
        value: String,
    },

    /// Also matches when the key is absent.
    NotEquals {
        key: String,
        value: String,
    },

    Has(String),

    In {
        key: String,
        values: BTreeSet<String>,
    },

    /// Also matches when the key is absent.
    NotIn {
        key: String,
        values: BTreeSet<String>,
    },

    Contains {
        key: String,
        value: String,
    },

    StartsWith {
        key: String,
        value: String,
    },

    EndsWith {
        key: String,
        value: String,
    },

    And(Box<Selector>, Box<Selector>),
    Or(Box<Selector>, Box<Selector>),
    Not(Box<Selector>),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid selector {selector:?} at offset {position}: {reason}")]
pub struct SelectorParseError {
    selector: String,
    position: usize,
    reason: &'static str,
}

struct Parser<'s> {
    input: &'s str,
    pos: usize,
    depth: usize,
}

// === impl Selector ===

impl Selector {
    pub fn parse(s: &str) -> Result<Self, SelectorParseError> {
        if s.trim().is_empty() {
            return Ok(Self::All);
        }

        let mut parser = Parser {
            input: s,
            pos: 0,
            depth: 0,
        };
        let selector = parser.parse_or()?;
        parser.skip_whitespace();
        if parser.pos != s.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(selector)
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        match self {
            Self::All => true,
            Self::Equals { key, value } => labels.get(key) == Some(value.as_str()),
            Self::NotEquals { key, value } => labels.get(key) != Some(value.as_str()),
            Self::Has(key) => labels.contains_key(key),
            Self::In { key, values } => labels.get(key).is_some_and(|v| values.contains(v)),
            Self::NotIn { key, values } => !labels.get(key).is_some_and(|v| values.contains(v)),
            Self::Contains { key, value } => {
                labels.get(key).is_some_and(|v| v.contains(value.as_str()))
            }
            Self::StartsWith { key, value } => {
                labels.get(key).is_some_and(|v| v.starts_with(value.as_str()))
            }
            Self::EndsWith { key, value } => {
                labels.get(key).is_some_and(|v| v.ends_with(value.as_str()))
            }
            Self::And(a, b) => a.matches(labels) && b.matches(labels),
            Self::Or(a, b) => a.matches(labels) || b.matches(labels),
            Self::Not(inner) => !inner.matches(labels),
        }
    }

    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::All, other) | (other, Self::All) => other,
            (a, b) => Self::And(Box::new(a), Box::new(b)),
        }
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::All
    }
}

impl FromStr for Selector {
    type Err = SelectorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Writes the selector in a form that parses back to an equal selector. Selector strings have no
/// escapes, so a value holding both `'` and `"` cannot be written; the parser never produces one.
impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all()"),
            Self::Equals { key, value } => write!(f, "{} == {}", key, Quoted(value)),
            Self::NotEquals { key, value } => write!(f, "{} != {}", key, Quoted(value)),
            Self::Has(key) => write!(f, "has({})", key),
            Self::In { key, values } => write!(f, "{} in {}", key, Set(values)),
            Self::NotIn { key, values } => write!(f, "{} not in {}", key, Set(values)),
            Self::Contains { key, value } => write!(f, "{} contains {}", key, Quoted(value)),
            Self::StartsWith { key, value } => write!(f, "{} starts with {}", key, Quoted(value)),
            Self::EndsWith { key, value } => write!(f, "{} ends with {}", key, Quoted(value)),
            Self::And(a, b) => write!(f, "({} && {})", a, b),
            Self::Or(a, b) => write!(f, "({} || {})", a, b),
            Self::Not(inner) => write!(f, "!{}", inner),
        }
    }
}

struct Quoted<'v>(&'v str);

impl fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.contains('"') {
            write!(f, "'{}'", self.0)
        } else {
            write!(f, "\"{}\"", self.0)
        }
    }
}

struct Set<'v>(&'v BTreeSet<String>);

impl fmt::Display for Set<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            Quoted(value).fmt(f)?;
        }
        f.write_str("}")
    }
}

// === impl SelectorParseError ===

impl SelectorParseError {
    /// The byte offset at which parsing failed.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

// === impl Parser ===

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-')
}

impl Parser<'_> {
    fn error(&self, reason: &'static str) -> SelectorParseError {
        SelectorParseError {
            selector: self.input.to_string(),
            position: self.pos,
            reason,
        }
    }

    fn rest(&self) -> &str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    /// Consumes `token` if the remaining input starts with it.
    fn eat(&mut self, token: &str) -> bool {
        self.skip_whitespace();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            return true;
        }
        false
    }

    /// Consumes `word` only if it is not a prefix of a longer key.
    fn eat_keyword(&mut self, word: &str) -> bool {
        self.skip_whitespace();
        let rest = self.rest();
        if rest.starts_with(word) && !rest[word.len()..].starts_with(is_key_char) {
            self.pos += word.len();
            return true;
        }
        false
    }

    /// Consumes `name(` so that function names remain usable as label keys.
    fn eat_call(&mut self, name: &str) -> bool {
        let start = self.pos;
        if self.eat_keyword(name) && self.eat("(") {
            return true;
        }
        self.pos = start;
        false
    }

    fn expect(&mut self, token: &str, reason: &'static str) -> Result<(), SelectorParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(reason))
        }
    }

    fn enter(&mut self) -> Result<(), SelectorParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("selector is nested too deeply"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Selector, SelectorParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat("||") {
            let rhs = self.parse_and()?;
            lhs = Selector::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Selector, SelectorParseError> {
        let mut lhs = self.parse_unary()?;
        while self.eat("&&") {
            let rhs = self.parse_unary()?;
            lhs = Selector::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Selector, SelectorParseError> {
        if self.eat("!") {
            self.enter()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Selector::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Selector, SelectorParseError> {
        if self.eat("(") {
            self.enter()?;
            let inner = self.parse_or()?;
            self.expect(")", "expected ')'")?;
            self.depth -= 1;
            return Ok(inner);
        }

        if self.eat_call("all") {
            self.expect(")", "expected ')' after 'all('")?;
            return Ok(Selector::All);
        }

        if self.eat_call("has") {
            let key = self.parse_key()?;
            self.expect(")", "expected ')' after label key")?;
            return Ok(Selector::Has(key));
        }

        let key = self.parse_key()?;
        if self.eat("==") {
            let value = self.parse_string()?;
            return Ok(Selector::Equals { key, value });
        }
        if self.eat("!=") {
            let value = self.parse_string()?;
            return Ok(Selector::NotEquals { key, value });
        }
        if self.eat_keyword("in") {
            let values = self.parse_set()?;
            return Ok(Selector::In { key, values });
        }
        if self.eat_keyword("not") {
            if !self.eat_keyword("in") {
                return Err(self.error("expected 'in' after 'not'"));
            }
            let values = self.parse_set()?;
            return Ok(Selector::NotIn { key, values });
        }
        if self.eat_keyword("contains") {
            let value = self.parse_string()?;
            return Ok(Selector::Contains { key, value });
        }
        if self.eat_keyword("starts") {
            if !self.eat_keyword("with") {
                return Err(self.error("expected 'with' after 'starts'"));
            }
            let value = self.parse_string()?;
            return Ok(Selector::StartsWith { key, value });
        }
        if self.eat_keyword("ends") {
            if !self.eat_keyword("with") {
                return Err(self.error("expected 'with' after 'ends'"));
            }
            let value = self.parse_string()?;
            return Ok(Selector::EndsWith { key, value });
        }

        Err(self.error("expected an operator after label key"))
    }

    fn parse_key(&mut self) -> Result<String, SelectorParseError> {
        self.skip_whitespace();
        let rest = self.rest();
        let len = rest.find(|c| !is_key_char(c)).unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected a label key"));
        }
        let key = rest[..len].to_string();
        self.pos += len;
        Ok(key)
    }

    fn parse_string(&mut self) -> Result<String, SelectorParseError> {
        self.skip_whitespace();
        let mut chars = self.rest().chars();
        let quote = match chars.next() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("expected a quoted string")),
        };
        let body = &self.rest()[1..];
        match body.find(quote) {
            Some(end) => {
                let value = body[..end].to_string();
                self.pos += end + 2;
                Ok(value)
            }
            None => Err(self.error("unterminated string")),
        }
    }

    fn parse_set(&mut self) -> Result<BTreeSet<String>, SelectorParseError> {
        self.expect("{", "expected '{'")?;
        let mut values = BTreeSet::new();
        if self.eat("}") {
            return Ok(values);
        }
        loop {
            values.insert(self.parse_string()?);
            if self.eat("}") {
                return Ok(values);
            }
            self.expect(",", "expected ',' or '}'")?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn labels(map: crate::Map) -> Labels {
        map.into()
    }

    fn parse(s: &str) -> Selector {
        s.parse()
            .unwrap_or_else(|e| panic!("failed to parse {:?}: {}", s, e))
    }

    #[test]
    fn matches_operators() {
        let db = labels(btreemap! {
            "role".to_string() => "db".to_string(),
            "env".to_string() => "prod-eu".to_string(),
        });
        let empty = Labels::default();

        for (selector, labels, matches, msg) in [
            ("", &empty, true, "empty selector"),
            ("all()", &empty, true, "all"),
            ("role == 'db'", &db, true, "equality"),
            ("role == 'db'", &empty, false, "equality with missing key"),
            ("role != 'db'", &db, false, "inequality"),
            ("role != 'db'", &empty, true, "inequality with missing key"),
            ("has(role)", &db, true, "has"),
            ("!has(role)", &db, false, "not has"),
            ("!has(role)", &empty, true, "not has with missing key"),
            ("role in {'db', 'web'}", &db, true, "set membership"),
            ("role in {}", &db, false, "empty set"),
            ("role in {'web'}", &empty, false, "in with missing key"),
            ("role not in {'web'}", &db, true, "set exclusion"),
            ("role not in {'db'}", &db, false, "set exclusion of value"),
            ("role not in {'db'}", &empty, true, "not in with missing key"),
            ("env contains 'od-'", &db, true, "contains"),
            ("env starts with 'prod'", &db, true, "starts with"),
            ("env ends with 'us'", &db, false, "ends with"),
            ("env ends with 'us'", &empty, false, "ends with missing key"),
        ] {
            assert_eq!(parse(selector).matches(labels), matches, "{}", msg);
        }
    }

    #[test]
    fn combinators_and_precedence() {
        let l = labels(btreemap! {
            "a".to_string() => "1".to_string(),
            "b".to_string() => "2".to_string(),
        });

        assert!(parse("a == '1' && b == '2'").matches(&l));
        assert!(!parse("a == '1' && b == '3'").matches(&l));
        assert!(parse("a == '9' || b == '2'").matches(&l));
        // && binds tighter than ||.
        assert!(parse("a == '9' && b == '9' || has(a)").matches(&l));
        assert!(!parse("a == '9' && (b == '9' || has(a))").matches(&l));
        assert!(parse("!(a == '9')").matches(&l));
        assert!(parse("!!has(b)").matches(&l));
    }

    #[test]
    fn function_names_are_valid_keys() {
        let l = labels(btreemap! {
            "has".to_string() => "x".to_string(),
            "all".to_string() => "y".to_string(),
            "projectcalico.org/namespace".to_string() => "default".to_string(),
        });
        assert!(parse("has == 'x' && all == \"y\"").matches(&l));
        assert!(parse("has(has)").matches(&l));
        assert!(parse("projectcalico.org/namespace == 'default'").matches(&l));
        assert!(!parse("index in {'a'}").matches(&Labels::default()));
    }

    #[test]
    fn negation_is_complement() {
        let labelsets = [
            Labels::default(),
            Labels::from_iter([("role", "x")]),
            Labels::from_iter([("role", "y")]),
            Labels::from_iter([("other", "x")]),
        ];
        let selector = parse("role == 'x'");
        let negated = Selector::Not(Box::new(selector.clone()));
        for l in &labelsets {
            assert_ne!(selector.matches(l), negated.matches(l), "{:?}", l);
        }
    }

    #[test]
    fn display_reparses() {
        for s in [
            "all()",
            "a == 'b' && (c != \"d\" || !has(e))",
            "k not in {'x', 'y'} && k2 in {}",
            "v contains 'x\"y' || v starts with 'p' || v ends with 's'",
            "v == \"it's\" && w in {\"it's\", 'say \"hi\"'}",
        ] {
            let selector = parse(s);
            assert_eq!(parse(&selector.to_string()), selector, "{}", s);
        }
    }

    #[test]
    fn values_hold_one_kind_of_quote() {
        // A string ends at its first closing quote.
        assert!(Selector::parse("v == \"it's \"quoted\"\"").is_err());
        assert!(Selector::parse("v == 'say \"it's\"'").is_err());
    }

    #[test]
    fn rejects_malformed() {
        for (s, position) in [
            ("role ==", 7),
            ("role == 'db", 8),
            ("role = 'db'", 5),
            ("has(role", 8),
            ("(a == 'b'", 9),
            ("a == 'b' &&", 11),
            ("a in {'x' 'y'}", 10),
            ("a not 'x'", 6),
            ("== 'x'", 0),
            ("a == 'b' c", 9),
        ] {
            let error = Selector::parse(s).expect_err(s);
            assert_eq!(error.position(), position, "{}: {}", s, error);
        }
    }

    #[test]
    fn rejects_deep_nesting() {
        let s = format!("{}has(a){}", "(".repeat(100), ")".repeat(100));
        let error = Selector::parse(&s).expect_err("must reject deep nesting");
        assert_eq!(error.reason(), "selector is nested too deeply");
    }

    #[test]
    fn and_elides_all() {
        let has_a = parse("has(a)");
        assert_eq!(Selector::All.and(has_a.clone()), has_a);
        assert_eq!(has_a.clone().and(Selector::All), has_a);
    }
}
