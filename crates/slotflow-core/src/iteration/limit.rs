//! `StepLimit`: selección de pasos por posición.
//!
//! Se expresa como lista de índices y rangos inclusivos (`"0-2,5,8-9"`) y se
//! evalúa sobre la lista ya ordenada y filtrada. Índices fuera de `[0, len)`
//! simplemente no seleccionan nada.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::errors::BatchingError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepLimit {
    ranges: Vec<RangeInclusive<usize>>,
}

impl StepLimit {
    pub fn indices(indices: impl IntoIterator<Item = usize>) -> Self {
        Self { ranges: indices.into_iter().map(|i| i..=i).collect() }
    }

    /// Rango inclusivo `[first, last]`.
    pub fn range(first: usize, last: usize) -> Self {
        Self { ranges: vec![first..=last] }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.ranges.iter().any(|r| r.contains(&index))
    }

    pub fn parse(text: &str) -> Result<Self, BatchingError> {
        let invalid = || BatchingError::InvalidLimit(text.to_string());
        let mut ranges = Vec::new();
        for item in text.split(|c: char| c == ',' || c == ';') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let range = match item.split_once('-') {
                Some((a, b)) => {
                    let first: usize = a.trim().parse().map_err(|_| invalid())?;
                    let last: usize = b.trim().parse().map_err(|_| invalid())?;
                    if first > last {
                        return Err(invalid());
                    }
                    first..=last
                }
                None => {
                    let i: usize = item.parse().map_err(|_| invalid())?;
                    i..=i
                }
            };
            ranges.push(range);
        }
        Ok(Self { ranges })
    }
}

impl FromStr for StepLimit {
    type Err = BatchingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepLimit::parse(s)
    }
}

impl TryFrom<String> for StepLimit {
    type Error = BatchingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StepLimit::parse(&value)
    }
}

impl From<StepLimit> for String {
    fn from(limit: StepLimit) -> Self {
        limit.to_string()
    }
}

impl fmt::Display for StepLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.ranges
                                     .iter()
                                     .map(|r| {
                                         if r.start() == r.end() {
                                             r.start().to_string()
                                         } else {
                                             format!("{}-{}", r.start(), r.end())
                                         }
                                     })
                                     .collect();
        f.write_str(&parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_indices_and_ranges() {
        let l = StepLimit::parse(" 0-2, 5;8-9 ").unwrap();
        assert!(l.contains(0) && l.contains(2) && l.contains(5) && l.contains(9));
        assert!(!l.contains(3) && !l.contains(7) && !l.contains(10));
        assert_eq!(l.to_string(), "0-2,5,8-9");
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["a", "3-1", "-2", "1-x"] {
            assert!(matches!(StepLimit::parse(bad), Err(BatchingError::InvalidLimit(_))), "{bad}");
        }
    }

    #[test]
    fn empty_expression_selects_nothing() {
        let l: StepLimit = "".parse().unwrap();
        assert!(!l.contains(0));
    }
}
