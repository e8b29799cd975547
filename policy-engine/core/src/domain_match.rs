use std::fmt;

/// Matches a destination's DNS name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DomainMatch {
    /// An exact match.
    Name(String),

    /// Matches any name with at least one label before the suffix, e.g. `*.example.com`.
    Suffix(Vec<String>),
}

// === impl DomainMatch ===

impl DomainMatch {
    pub fn matches(&self, name: &str) -> bool {
        let name = normalize(name);
        match self {
            Self::Name(n) => *n == name,
            Self::Suffix(suffix) => {
                let mut labels = name.rsplit('.');
                for part in suffix.iter().rev() {
                    if labels.next() != Some(part.as_str()) {
                        return false;
                    }
                }
                labels.next().is_some_and(|l| !l.is_empty())
            }
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

impl std::str::FromStr for DomainMatch {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = normalize(s);
        match s.strip_prefix("*.") {
            Some(suffix) => Ok(Self::Suffix(suffix.split('.').map(String::from).collect())),
            None => Ok(Self::Name(s)),
        }
    }
}

impl fmt::Display for DomainMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use std::fmt::Write;
        match self {
            Self::Name(name) => name.fmt(f),
            Self::Suffix(suffix) => {
                f.write_char('*')?;
                for part in suffix {
                    write!(f, ".{}", part)?;
                }
                Ok(())
            }
        }
    }
}
