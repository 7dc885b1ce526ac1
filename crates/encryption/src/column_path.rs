// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Paths of (possibly nested) columns.

use std::fmt;

/// Path of a (possibly nested) column, e.g. `a.b.c`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnPath {
    parts: Vec<String>,
}

impl ColumnPath {
    /// Creates a path from its segments.
    pub fn new(parts: Vec<String>) -> Self {
        Self { parts }
    }

    /// Parses a dot separated path.
    pub fn from_dot_string(path: &str) -> Self {
        Self {
            parts: path.split('.').map(str::to_string).collect(),
        }
    }

    /// Returns the path segments.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Returns the dot separated form.
    pub fn to_dot_string(&self) -> String {
        self.parts.join(".")
    }
}

impl fmt::Display for ColumnPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_dot_string())
    }
}

impl From<&str> for ColumnPath {
    fn from(path: &str) -> Self {
        Self::from_dot_string(path)
    }
}

impl From<String> for ColumnPath {
    fn from(path: String) -> Self {
        Self::from_dot_string(&path)
    }
}

impl From<Vec<String>> for ColumnPath {
    fn from(parts: Vec<String>) -> Self {
        Self::new(parts)
    }
}
