//! Reply model: ordered rows of string keys to string values.

use std::collections::HashMap;

/// One `!re` sentence, parsed into key/value pairs.
///
/// Lookups never fail: a key the device did not send reads as the empty
/// string, mirroring how the wire omits unset properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: HashMap<String, String>,
}

impl Row {
    /// Parse attribute words (`=key=value`) of a reply sentence. Words that
    /// are not attributes (`.tag=` routing words and the like) are skipped.
    pub fn from_words(words: &[String]) -> Self {
        let mut values = HashMap::new();
        for word in words {
            if let Some(rest) = word.strip_prefix('=') {
                if let Some((key, value)) = rest.split_once('=') {
                    values.insert(key.to_string(), value.to_string());
                }
            }
        }
        Self { values }
    }

    /// Value for `key`, or `""` when the device omitted it.
    pub fn get(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or("")
    }

    /// Numeric counter for `key`. Absent or malformed values read as 0; the
    /// device only ever sends plain decimal for byte/packet counters.
    pub fn get_i64(&self, key: &str) -> i64 {
        self.get(key).parse().unwrap_or(0)
    }

    /// Whether the device sent this key at all.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A complete reply to one command: the `!re` rows in arrival order plus the
/// optional `=ret=` value from the closing `!done`.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub rows: Vec<Row>,
    pub done_ret: Option<String>,
}

impl Reply {
    /// The first row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }
}
