use crate::rule::{EvaluationError, InvalidRuleError};
use std::{fmt, str::FromStr};

/// An inclusive range of ports. A single port is a range with equal bounds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

/// Matches a port against a list of ranges.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PortMatch(Vec<PortRange>);

// === impl PortRange ===

impl PortRange {
    pub fn new(min: u16, max: u16) -> Result<Self, InvalidRuleError> {
        if min > max {
            return Err(InvalidRuleError::PortRange(format!("{}:{}", min, max)));
        }
        Ok(Self { min, max })
    }

    #[inline]
    pub fn single(port: u16) -> Self {
        Self {
            min: port,
            max: port,
        }
    }

    /// Fails if the range's bounds are inverted, which validation normally prevents.
    pub fn contains(&self, port: u16) -> Result<bool, EvaluationError> {
        if self.min > self.max {
            return Err(EvaluationError::InvertedPortRange {
                min: self.min,
                max: self.max,
            });
        }
        Ok(self.min <= port && port <= self.max)
    }
}

impl FromStr for PortRange {
    type Err = InvalidRuleError;

    /// Reads either a port number or a `min:max` range.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| InvalidRuleError::Port(s.to_string()))
        };

        match s.split_once(':') {
            None => parse(s).map(Self::single),
            Some((min, max)) => {
                let (min, max) = (parse(min)?, parse(max)?);
                if min > max {
                    return Err(InvalidRuleError::PortRange(s.to_string()));
                }
                Ok(Self { min, max })
            }
        }
    }
}

impl From<u16> for PortRange {
    fn from(port: u16) -> Self {
        Self::single(port)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            self.min.fmt(f)
        } else {
            write!(f, "{}:{}", self.min, self.max)
        }
    }
}

// === impl PortMatch ===

impl PortMatch {
    pub fn matches(&self, port: u16) -> Result<bool, EvaluationError> {
        for range in &self.0 {
            if range.contains(port)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    #[inline]
    pub fn ranges(&self) -> &[PortRange] {
        &self.0
    }
}

impl std::iter::FromIterator<PortRange> for PortMatch {
    fn from_iter<T: IntoIterator<Item = PortRange>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
