//! Sample values and sample-time arguments
//!
//! [`SampleValue`] is the hashable currency shared by bins, cross bins and
//! randomization domains. [`SampleArgs`] carries the named arguments of a
//! single sampling call, in declaration order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A hashable value a bin can hold and a sample can be tested against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleValue {
    /// Signed integer
    Int(i64),
    /// String label or enumerated value
    Str(String),
    /// Ordered tuple of values (cross bins, range bins)
    Tuple(Vec<SampleValue>),
}

impl SampleValue {
    /// Build a tuple value from anything convertible.
    pub fn tuple<I>(values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<SampleValue>,
    {
        SampleValue::Tuple(values.into_iter().map(Into::into).collect())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SampleValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer content, panicking on a non-integer value.
    ///
    /// Intended for call sites that declared the value as an integer
    /// themselves (bins, domains); a mismatch is a programming error.
    pub fn int(&self) -> i64 {
        match self {
            SampleValue::Int(v) => *v,
            other => panic!("expected integer sample value, got {other}"),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SampleValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[SampleValue]> {
        match self {
            SampleValue::Tuple(vs) => Some(vs),
            _ => None,
        }
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleValue::Int(v) => write!(f, "{v}"),
            SampleValue::Str(s) => write!(f, "{s}"),
            SampleValue::Tuple(vs) => {
                write!(f, "(")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<i64> for SampleValue {
    fn from(v: i64) -> Self {
        SampleValue::Int(v)
    }
}

impl From<i32> for SampleValue {
    fn from(v: i32) -> Self {
        SampleValue::Int(v as i64)
    }
}

impl From<u32> for SampleValue {
    fn from(v: u32) -> Self {
        SampleValue::Int(v as i64)
    }
}

impl From<usize> for SampleValue {
    fn from(v: usize) -> Self {
        SampleValue::Int(v as i64)
    }
}

impl From<&str> for SampleValue {
    fn from(v: &str) -> Self {
        SampleValue::Str(v.to_string())
    }
}

impl From<String> for SampleValue {
    fn from(v: String) -> Self {
        SampleValue::Str(v)
    }
}

impl<A, B> From<(A, B)> for SampleValue
where
    A: Into<SampleValue>,
    B: Into<SampleValue>,
{
    fn from((a, b): (A, B)) -> Self {
        SampleValue::Tuple(vec![a.into(), b.into()])
    }
}

impl<A, B, C> From<(A, B, C)> for SampleValue
where
    A: Into<SampleValue>,
    B: Into<SampleValue>,
    C: Into<SampleValue>,
{
    fn from((a, b, c): (A, B, C)) -> Self {
        SampleValue::Tuple(vec![a.into(), b.into(), c.into()])
    }
}

/// Named arguments of one sampling call, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct SampleArgs {
    values: IndexMap<String, SampleValue>,
}

impl SampleArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named argument (builder style).
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<SampleValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&SampleValue> {
        self.values.get(name)
    }

    /// Argument by name, panicking when absent.
    ///
    /// Convenience for user transformations that know their sampler's
    /// signature; a missing name is a programming error.
    pub fn value(&self, name: &str) -> &SampleValue {
        self.values
            .get(name)
            .unwrap_or_else(|| panic!("sample has no argument named {name:?}"))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|s| s.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &SampleValue> {
        self.values.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_forms() {
        assert_eq!(SampleValue::from(25).to_string(), "25");
        assert_eq!(SampleValue::from("small").to_string(), "small");
        assert_eq!(SampleValue::from((0, 2)).to_string(), "(0, 2)");
        assert_eq!(SampleValue::tuple([1, 2, 3]).to_string(), "(1, 2, 3)");
    }

    #[test]
    fn test_args_preserve_order() {
        let args = SampleArgs::new().arg("addr", 25).arg("par", 0).arg("rw", 1);
        let names: Vec<&str> = args.names().collect();
        assert_eq!(names, vec!["addr", "par", "rw"]);
        assert_eq!(args.get("par"), Some(&SampleValue::Int(0)));
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn test_tuple_equality() {
        let a = SampleValue::from((0, 50));
        let b = SampleValue::tuple([0, 50]);
        assert_eq!(a, b);
    }
}
