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

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::{Error, ErrorKind, Result};

/// External store of wrapped key material, scoped by file id.
pub trait WrappedKeyStore: Send + Sync {
    /// Stores `key_material` under `key_name` for the file `file_id`.
    fn store_wrapped_key(&self, key_material: &str, file_id: &str, key_name: &str) -> Result<()>;

    /// Fetches the material stored under `key_name` for `file_id`.
    ///
    /// Fails with [`ErrorKind::NotFound`] when nothing is stored there.
    fn fetch_wrapped_key(&self, file_id: &str, key_name: &str) -> Result<String>;
}

/// In-memory key store for testing and development.
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    materials: RwLock<HashMap<(String, String), String>>,
}

impl InMemoryKeyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all files.
    pub fn len(&self) -> usize {
        self.materials.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.materials.read().is_empty()
    }
}

impl WrappedKeyStore for InMemoryKeyStore {
    fn store_wrapped_key(&self, key_material: &str, file_id: &str, key_name: &str) -> Result<()> {
        self.materials.write().insert(
            (file_id.to_string(), key_name.to_string()),
            key_material.to_string(),
        );
        Ok(())
    }

    fn fetch_wrapped_key(&self, file_id: &str, key_name: &str) -> Result<String> {
        self.materials
            .read()
            .get(&(file_id.to_string(), key_name.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::new(ErrorKind::NotFound, "No wrapped key stored")
                    .with_context("file_id", file_id)
                    .with_context("key_name", key_name)
            })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_in_memory_key_store_is_scoped_by_file() {
        let store = InMemoryKeyStore::new();
        assert!(store.is_empty());

        store.store_wrapped_key("material-a", "file-a", "k0").unwrap();
        store.store_wrapped_key("material-b", "file-b", "k0").unwrap();
        assert_eq!(store.len(), 2);

        assert_eq!(store.fetch_wrapped_key("file-a", "k0").unwrap(), "material-a");
        assert_eq!(store.fetch_wrapped_key("file-b", "k0").unwrap(), "material-b");

        let err = store.fetch_wrapped_key("file-a", "k1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
