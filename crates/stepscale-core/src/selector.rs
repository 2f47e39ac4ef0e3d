//! Equality-based label selectors (`app=web,tier!=cache,canary,!legacy`).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("couldn't parse label selector {selector:?}: {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

/// A conjunction of label requirements. The empty selector matches everything.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: &str| SelectorError {
            selector: s.to_string(),
            reason: reason.to_string(),
        };

        let mut requirements = Vec::new();
        for term in s.split(',').map(str::trim) {
            if term.is_empty() {
                if s.trim().is_empty() {
                    continue;
                }
                return Err(fail("empty requirement"));
            }

            let requirement = if let Some((k, v)) = term.split_once("!=") {
                Requirement::NotEquals(key(k).map_err(fail)?, value(v).map_err(fail)?)
            } else if let Some((k, v)) = term.split_once("==") {
                Requirement::Equals(key(k).map_err(fail)?, value(v).map_err(fail)?)
            } else if let Some((k, v)) = term.split_once('=') {
                Requirement::Equals(key(k).map_err(fail)?, value(v).map_err(fail)?)
            } else if let Some(k) = term.strip_prefix('!') {
                Requirement::DoesNotExist(key(k).map_err(fail)?)
            } else {
                Requirement::Exists(key(term).map_err(fail)?)
            };
            requirements.push(requirement);
        }
        Ok(Self { requirements })
    }
}

fn key(raw: &str) -> Result<String, &'static str> {
    let k = raw.trim();
    if k.is_empty() {
        return Err("empty label key");
    }
    if !k
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err("invalid character in label key");
    }
    Ok(k.to_string())
}

fn value(raw: &str) -> Result<String, &'static str> {
    let v = raw.trim();
    if !v
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err("invalid character in label value");
    }
    Ok(v.to_string())
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self
            .requirements
            .iter()
            .map(|r| match r {
                Requirement::Equals(k, v) => format!("{k}={v}"),
                Requirement::NotEquals(k, v) => format!("{k}!={v}"),
                Requirement::Exists(k) => k.clone(),
                Requirement::DoesNotExist(k) => format!("!{k}"),
            })
            .collect();
        f.write_str(&terms.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_selector_matches_everything() {
        let sel: LabelSelector = "".parse().unwrap();
        assert!(sel.is_empty());
        assert!(sel.matches(&labels(&[])));
        assert!(sel.matches(&labels(&[("app", "web")])));
    }

    #[test]
    fn equality_and_inequality() {
        let sel: LabelSelector = "app=web, tier!=cache".parse().unwrap();
        assert!(sel.matches(&labels(&[("app", "web"), ("tier", "front")])));
        assert!(sel.matches(&labels(&[("app", "web")])));
        assert!(!sel.matches(&labels(&[("app", "web"), ("tier", "cache")])));
        assert!(!sel.matches(&labels(&[("app", "api")])));
    }

    #[test]
    fn existence_requirements() {
        let sel: LabelSelector = "canary,!legacy".parse().unwrap();
        assert!(sel.matches(&labels(&[("canary", "")])));
        assert!(!sel.matches(&labels(&[("canary", "1"), ("legacy", "1")])));
        assert!(!sel.matches(&labels(&[])));
    }

    #[test]
    fn double_equals_is_equality() {
        let sel: LabelSelector = "app==web".parse().unwrap();
        assert_eq!(sel.to_string(), "app=web");
    }

    #[test]
    fn rejects_garbage() {
        assert!("app=web,".parse::<LabelSelector>().is_err());
        assert!("=web".parse::<LabelSelector>().is_err());
        assert!("app=w b".parse::<LabelSelector>().is_err());
    }
}
