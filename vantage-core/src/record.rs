//! Records of values obtained during optimization passes.
use chrono::prelude::{DateTime, Local};
use std::collections::HashMap;

/// Possible types of values in a [`Record`].
#[derive(Debug, Clone)]
pub enum RecordValue {
    /// Scalar, e.g. a loss value.
    Scalar(f32),

    /// Date and time.
    DateTime(DateTime<Local>),

    /// String, e.g. a resolved configuration description.
    String(String),
}

/// Key-value pairs.
#[derive(Debug, Default)]
pub struct Record(HashMap<String, RecordValue>);

impl Record {
    /// Construct an empty record.
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Construct a record from a scalar.
    pub fn from_scalar(name: impl Into<String>, value: f32) -> Self {
        Self(HashMap::from([(name.into(), RecordValue::Scalar(value))]))
    }

    /// Insert a key-value pair into the record.
    pub fn insert(&mut self, k: impl Into<String>, v: RecordValue) {
        self.0.insert(k.into(), v);
    }

    /// Get the value of the given key.
    pub fn get(&self, k: &str) -> Option<&RecordValue> {
        self.0.get(k)
    }

    /// Merge records; entries of `record` overwrite entries of `self`.
    pub fn merge(self, record: Record) -> Self {
        Record(self.0.into_iter().chain(record.0).collect())
    }

    /// Get scalar value of the given key, if present and scalar.
    pub fn get_scalar(&self, k: &str) -> Option<f32> {
        match self.0.get(k) {
            Some(RecordValue::Scalar(v)) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Record, RecordValue::Scalar};

    #[test]
    fn merge_overwrites() {
        let mut r1 = Record::from_scalar("loss", 1.0);
        r1.insert("update", Scalar(3.0));
        let r2 = Record::from_scalar("loss", 0.5);
        let merged = r1.merge(r2);
        assert_eq!(merged.get_scalar("loss"), Some(0.5));
        assert_eq!(merged.get_scalar("update"), Some(3.0));
        assert_eq!(merged.get_scalar("missing"), None);
    }
}
