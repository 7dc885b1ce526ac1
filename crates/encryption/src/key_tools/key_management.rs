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

//! Key Management Service (KMS) client abstraction.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use crate::crypto::{AesDecryptor, AesEncryptor, AesMode, SecureKey};
use crate::{Error, ErrorKind, Result};

/// Client of a KMS holding master keys.
///
/// Implementations integrate services such as AWS KMS or HashiCorp Vault. Calls
/// are synchronous and may block.
pub trait KmsClient: Send + Sync {
    /// Wraps `key` with the master key `master_key_id`.
    fn wrap_key(&self, key: &[u8], master_key_id: &str) -> Result<Vec<u8>>;

    /// Unwraps `wrapped_key` with the master key `master_key_id`.
    ///
    /// Fails with [`ErrorKind::MissingKey`] when the master key is unknown.
    fn unwrap_key(&self, wrapped_key: &[u8], master_key_id: &str) -> Result<Vec<u8>>;

    /// Whether the KMS wraps keys itself, so master keys never leave it.
    fn supports_server_side_wrapping(&self) -> bool;
}

/// In-memory KMS for testing and development.
///
/// Wraps keys with AES-GCM under the named master key, using the master key id
/// as AAD.
///
/// # Security Warning
/// Master keys are held in process memory without access control. Do not use
/// in production.
#[derive(Default)]
pub struct InMemoryKms {
    master_keys: RwLock<HashMap<String, SecureKey>>,
}

impl InMemoryKms {
    /// Creates a KMS with no master keys.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a KMS with a single master key.
    pub fn new_with_master_key(
        master_key_id: impl Into<String>,
        master_key: Vec<u8>,
    ) -> Result<Self> {
        let kms = Self::new();
        kms.add_master_key(master_key_id, master_key)?;
        Ok(kms)
    }

    /// Adds or replaces a master key.
    pub fn add_master_key(
        &self,
        master_key_id: impl Into<String>,
        master_key: Vec<u8>,
    ) -> Result<()> {
        let master_key = SecureKey::new(master_key)?;
        self.master_keys.write().insert(master_key_id.into(), master_key);
        Ok(())
    }

    fn master_key(&self, master_key_id: &str) -> Result<SecureKey> {
        self.master_keys
            .read()
            .get(master_key_id)
            .cloned()
            .ok_or_else(|| {
                Error::new(ErrorKind::MissingKey, "Master key not found")
                    .with_context("master_key_id", master_key_id)
            })
    }
}

impl fmt::Debug for InMemoryKms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryKms")
            .field(
                "master_key_ids",
                &self.master_keys.read().keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl KmsClient for InMemoryKms {
    fn wrap_key(&self, key: &[u8], master_key_id: &str) -> Result<Vec<u8>> {
        let master_key = self.master_key(master_key_id)?;
        AesEncryptor::with_key(AesMode::Gcm, &master_key)?.encrypt(key, master_key_id.as_bytes())
    }

    fn unwrap_key(&self, wrapped_key: &[u8], master_key_id: &str) -> Result<Vec<u8>> {
        let master_key = self.master_key(master_key_id)?;
        AesDecryptor::with_key(AesMode::Gcm, &master_key)?
            .decrypt(wrapped_key, master_key_id.as_bytes())
            .map_err(|e| e.with_context("master_key_id", master_key_id))
    }

    fn supports_server_side_wrapping(&self) -> bool {
        true
    }
}
