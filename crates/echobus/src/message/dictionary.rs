// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ordered string map used as the control-command envelope.
//!
//! Wire format:
//!
//! ```text
//! +-------------+---------------------------------------------+
//! | count (i32) | count x (key: string, value: string)        |
//! +-------------+---------------------------------------------+
//! ```
//!
//! Values are stored as text; typed accessors convert on the way in and out.

use std::collections::BTreeMap;

use super::{MessageReader, MessageWriter, Pack, Unpack};
use crate::error::{Error, Result};

/// String key/value map with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictionary {
    entries: BTreeMap<String, String>,
}

/// Keys may only contain ASCII alphanumerics, `.` and `_`.
pub fn is_valid_key(key: &str) -> bool {
    key.bytes()
        .all(|c| c.is_ascii_alphanumeric() || c == b'.' || c == b'_')
}

fn parse_bool(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_uppercase().as_str(),
        "FALSE" | "F" | "NO" | "N" | "0" | "NONE"
    )
}

impl Dictionary {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw string value. Invalid keys are ignored.
    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        if !is_valid_key(key) {
            log::debug!("[dictionary] ignoring invalid key {:?}", key);
            return;
        }
        self.entries.insert(key.to_string(), value.into());
    }

    pub fn set_i32(&mut self, key: &str, value: i32) {
        self.set_str(key, value.to_string());
    }

    pub fn set_i64(&mut self, key: &str, value: i64) {
        self.set_str(key, value.to_string());
    }

    /// Booleans are stored as `"1"` / `"0"`.
    pub fn set_bool(&mut self, key: &str, value: bool) {
        self.set_str(key, if value { "1" } else { "0" });
    }

    /// Raw value lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// String value, or `default` when absent.
    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Integer value, or `default` when absent. Unparseable text reads as 0.
    pub fn get_i32(&self, key: &str, default: i32) -> i32 {
        match self.get(key) {
            Some(v) => v.trim().parse().unwrap_or(0),
            None => default,
        }
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(v) => v.trim().parse().unwrap_or(0),
            None => default,
        }
    }

    /// Boolean value, or `default` when absent.
    ///
    /// `false`, `f`, `no`, `n`, `0` and `none` (any case) read as false;
    /// everything else reads as true.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).map_or(default, parse_bool)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Pack for Dictionary {
    fn pack(&self, writer: &mut MessageWriter) {
        writer.write_i32(self.entries.len() as i32);
        for (key, value) in &self.entries {
            writer.write_string(key);
            writer.write_string(value);
        }
    }
}

impl Unpack for Dictionary {
    fn unpack(reader: &mut MessageReader<'_>) -> Result<Self> {
        let count = reader.read_i32()?;
        if count < 0 {
            return Err(Error::InvalidData(format!(
                "negative dictionary size {}",
                count
            )));
        }
        let mut dictionary = Dictionary::new();
        for _ in 0..count {
            let key = reader.read_string()?;
            let value = reader.read_string()?;
            dictionary.set_str(&key, value);
        }
        Ok(dictionary)
    }
}

// ============================================================================
// Tests
// ============================================================================
