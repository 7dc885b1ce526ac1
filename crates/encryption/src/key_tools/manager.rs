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

//! Data key generation and retrieval over a KMS.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::{KeyCache, KeyMaterial, KmsClient, WrappedKeyStore};
use crate::config::EncryptionConfig;
use crate::crypto::SecureKey;
use crate::decrypt::KeyRetriever;
use crate::utils::display_metadata;
use crate::{Error, ErrorKind, Result};

/// A generated data key with the metadata to store next to the data.
#[derive(Debug, Clone)]
pub struct DataKey {
    key: SecureKey,
    metadata: Vec<u8>,
}

impl DataKey {
    /// Plaintext data key, for the encryption properties.
    pub fn key(&self) -> &SecureKey {
        &self.key
    }

    /// Key metadata: a key store name, or the serialized [`KeyMaterial`].
    pub fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    /// Splits into key and metadata.
    pub fn into_parts(self) -> (SecureKey, Vec<u8>) {
        (self.key, self.metadata)
    }
}

fn local_wrapping_unsupported() -> Error {
    Error::new(
        ErrorKind::FeatureUnsupported,
        "Local key wrapping is not supported yet",
    )
}

/// Generates data keys wrapped by a KMS master key, and builds the matching
/// [`WrappedKeyRetriever`].
///
/// With a key store, wrapped material is stored under short names (`k0`,
/// `k1`, ...) scoped to the file id and the names become key metadata.
/// Without one, the serialized material itself is the key metadata.
pub struct WrappedKeyManager {
    kms: Arc<dyn KmsClient>,
    wrap_locally: bool,
    key_store: Option<Arc<dyn WrappedKeyStore>>,
    file_id: Option<String>,
    data_key_length: usize,
    key_cache: Arc<KeyCache>,
    key_counter: u64,
}

impl WrappedKeyManager {
    /// Creates a manager with the default [`EncryptionConfig`].
    ///
    /// # Errors
    /// * [`ErrorKind::FeatureUnsupported`] when `wrap_locally` is false and the
    ///   KMS does not wrap keys server side.
    /// * [`ErrorKind::Configuration`] when a key store is given without a file id.
    pub fn new(
        kms: Arc<dyn KmsClient>,
        wrap_locally: bool,
        key_store: Option<Arc<dyn WrappedKeyStore>>,
        file_id: Option<String>,
    ) -> Result<Self> {
        let config = EncryptionConfig {
            wrap_locally,
            ..EncryptionConfig::default()
        };
        Self::with_config(kms, &config, key_store, file_id)
    }

    /// Creates a manager from parsed configuration.
    pub fn with_config(
        kms: Arc<dyn KmsClient>,
        config: &EncryptionConfig,
        key_store: Option<Arc<dyn WrappedKeyStore>>,
        file_id: Option<String>,
    ) -> Result<Self> {
        if !config.wrap_locally && !kms.supports_server_side_wrapping() {
            return Err(Error::new(
                ErrorKind::FeatureUnsupported,
                "KMS client doesn't support server-side wrapping",
            ));
        }
        if key_store.is_some() && file_id.is_none() {
            return Err(Error::new(
                ErrorKind::Configuration,
                "File id must be supplied with a wrapped key store",
            ));
        }
        let capacity = NonZeroUsize::new(config.key_cache_capacity).ok_or_else(|| {
            Error::new(ErrorKind::Configuration, "Key cache capacity must be positive")
        })?;

        Ok(Self {
            kms,
            wrap_locally: config.wrap_locally,
            key_store,
            file_id,
            data_key_length: config.data_key_length(),
            key_cache: Arc::new(KeyCache::with_capacity(config.key_cache_lifetime, capacity)),
            key_counter: 0,
        })
    }

    /// Generates a data key wrapped with `master_key_id`.
    pub fn generate_key(&mut self, master_key_id: &str) -> Result<DataKey> {
        if self.wrap_locally {
            return Err(local_wrapping_unsupported());
        }

        let key = SecureKey::generate(self.data_key_length)?;
        let wrapped_key = self
            .kms
            .wrap_key(key.as_bytes(), master_key_id)
            .map_err(|e| e.with_context("master_key_id", master_key_id))?;
        let material = KeyMaterial::new(wrapped_key, master_key_id).serialize();

        let metadata = match (&self.key_store, &self.file_id) {
            (Some(store), Some(file_id)) => {
                let key_name = format!("k{}", self.key_counter);
                store.store_wrapped_key(&material, file_id, &key_name)?;
                self.key_counter += 1;
                log::debug!("Stored wrapped key {key_name} for file {file_id}");
                key_name.into_bytes()
            }
            _ => material.into_bytes(),
        };
        log::debug!("Generated data key wrapped with master key {master_key_id}");

        Ok(DataKey { key, metadata })
    }

    /// Retriever reversing [`generate_key`](Self::generate_key). It shares this
    /// manager's key cache.
    pub fn key_retriever(&self) -> WrappedKeyRetriever {
        WrappedKeyRetriever {
            kms: self.kms.clone(),
            unwrap_locally: self.wrap_locally,
            key_store: self.key_store.clone(),
            file_id: self.file_id.clone(),
            key_cache: self.key_cache.clone(),
        }
    }

    /// Drops expired entries from the shared key cache.
    pub fn evict_expired(&self) {
        self.key_cache.evict_expired();
    }

    /// Drops every cached unwrapped key.
    pub fn clear_cache(&self) {
        self.key_cache.clear();
    }
}

impl fmt::Debug for WrappedKeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedKeyManager")
            .field("wrap_locally", &self.wrap_locally)
            .field("has_key_store", &self.key_store.is_some())
            .field("file_id", &self.file_id)
            .field("data_key_length", &self.data_key_length)
            .field("key_counter", &self.key_counter)
            .finish()
    }
}

/// [`KeyRetriever`] unwrapping keys produced by a [`WrappedKeyManager`].
#[derive(Clone)]
pub struct WrappedKeyRetriever {
    kms: Arc<dyn KmsClient>,
    unwrap_locally: bool,
    key_store: Option<Arc<dyn WrappedKeyStore>>,
    file_id: Option<String>,
    key_cache: Arc<KeyCache>,
}

impl WrappedKeyRetriever {
    fn key_material(&self, key_metadata: &[u8]) -> Result<KeyMaterial> {
        let metadata = String::from_utf8(key_metadata.to_vec())?;
        match (&self.key_store, &self.file_id) {
            (Some(store), Some(file_id)) => {
                KeyMaterial::deserialize(&store.fetch_wrapped_key(file_id, &metadata)?)
            }
            _ => KeyMaterial::deserialize(&metadata),
        }
    }
}

impl KeyRetriever for WrappedKeyRetriever {
    fn retrieve_key(&self, key_metadata: &[u8]) -> Result<Vec<u8>> {
        if let Some(key) = self.key_cache.get(key_metadata) {
            return Ok(key.as_bytes().to_vec());
        }
        if self.unwrap_locally {
            return Err(local_wrapping_unsupported());
        }

        let material = self
            .key_material(key_metadata)
            .map_err(|e| e.with_context("key_metadata", display_metadata(key_metadata)))?;
        let key = SecureKey::new(
            self.kms
                .unwrap_key(material.wrapped_key(), material.master_key_id())?,
        )?;

        self.key_cache.insert(key_metadata.to_vec(), key.clone());
        Ok(key.as_bytes().to_vec())
    }
}
