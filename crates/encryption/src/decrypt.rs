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

//! Read side configuration: explicit keys, key retrievers and AAD prefix
//! sources.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::column_path::ColumnPath;
use crate::crypto::SecureKey;
use crate::utils::display_metadata;
use crate::{ensure_config, Error, ErrorKind, Result};

/// Resolves key metadata stored in a file to key bytes.
///
/// Implementations should fail with [`ErrorKind::MissingKey`] or
/// [`ErrorKind::NotFound`] when the key is unknown to them; readers treat a
/// column as hidden in that case. Other failures abort the read.
pub trait KeyRetriever: Send + Sync {
    /// Returns the key identified by `key_metadata`.
    fn retrieve_key(&self, key_metadata: &[u8]) -> Result<Vec<u8>>;
}

/// Resolves the AAD metadata stored in a file to the writer's AAD prefix.
pub trait AadPrefixRetriever: Send + Sync {
    /// Returns the AAD prefix identified by `aad_metadata`.
    fn retrieve_aad_prefix(&self, aad_metadata: &[u8]) -> Result<Vec<u8>>;
}

/// Key retriever over an in-memory map from UTF-8 key ids to keys.
#[derive(Default)]
pub struct StringKeyIdRetriever {
    keys: RwLock<HashMap<String, Vec<u8>>>,
}

impl StringKeyIdRetriever {
    /// Creates an empty retriever.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` under `key_id`, replacing any previous key.
    pub fn put_key(&self, key_id: impl Into<String>, key: Vec<u8>) {
        self.keys.write().insert(key_id.into(), key);
    }
}

impl KeyRetriever for StringKeyIdRetriever {
    fn retrieve_key(&self, key_metadata: &[u8]) -> Result<Vec<u8>> {
        let key_id = std::str::from_utf8(key_metadata).map_err(|e| {
            Error::new(ErrorKind::MissingKey, "Key metadata is not a UTF-8 key id")
                .with_source(e)
        })?;
        self.keys.read().get(key_id).cloned().ok_or_else(|| {
            Error::new(ErrorKind::MissingKey, "Key id not found")
                .with_context("key_id", key_id)
        })
    }
}

impl fmt::Debug for StringKeyIdRetriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringKeyIdRetriever")
            .field("key_ids", &self.keys.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Explicit decryption key of one column.
#[derive(Debug, Clone)]
pub struct ColumnDecryptionProperties {
    path: ColumnPath,
    key: SecureKey,
}

impl ColumnDecryptionProperties {
    /// Validates the key length.
    pub fn new(path: impl Into<ColumnPath>, key: Vec<u8>) -> Result<Self> {
        let path = path.into();
        let key = SecureKey::new(key).map_err(|e| e.with_context("column", path.to_string()))?;
        Ok(Self { path, key })
    }

    /// Column path.
    pub fn path(&self) -> &ColumnPath {
        &self.path
    }

    /// Column key.
    pub fn key(&self) -> &SecureKey {
        &self.key
    }
}

/// Immutable read side configuration, shareable across files.
pub struct FileDecryptionProperties {
    footer_key: Option<SecureKey>,
    footer_signing_key: Option<SecureKey>,
    column_keys: HashMap<ColumnPath, SecureKey>,
    key_retriever: Option<Arc<dyn KeyRetriever>>,
    aad_prefix: Option<Vec<u8>>,
    aad_prefix_retriever: Option<Arc<dyn AadPrefixRetriever>>,
    check_footer_integrity: bool,
}

impl FileDecryptionProperties {
    /// Starts a builder. Footer integrity checking is off by default.
    pub fn builder() -> FileDecryptionPropertiesBuilder {
        FileDecryptionPropertiesBuilder {
            footer_key: None,
            footer_signing_key: None,
            column_keys: Vec::new(),
            key_retriever: None,
            aad_prefix: None,
            aad_prefix_retriever: None,
            check_footer_integrity: false,
        }
    }

    /// Explicit footer key.
    pub fn footer_key(&self) -> Option<&SecureKey> {
        self.footer_key.as_ref()
    }

    /// Explicit footer signing key.
    pub fn footer_signing_key(&self) -> Option<&SecureKey> {
        self.footer_signing_key.as_ref()
    }

    /// Explicit key of `path`.
    pub fn column_key(&self, path: &ColumnPath) -> Option<&SecureKey> {
        self.column_keys.get(path)
    }

    /// Retriever consulted for keys not supplied explicitly.
    pub fn key_retriever(&self) -> Option<&Arc<dyn KeyRetriever>> {
        self.key_retriever.as_ref()
    }

    /// Explicit AAD prefix.
    pub fn aad_prefix(&self) -> Option<&[u8]> {
        self.aad_prefix.as_deref()
    }

    /// Retriever for the AAD prefix.
    pub fn aad_prefix_retriever(&self) -> Option<&Arc<dyn AadPrefixRetriever>> {
        self.aad_prefix_retriever.as_ref()
    }

    /// Whether plaintext footer signatures must be verified.
    pub fn check_footer_integrity(&self) -> bool {
        self.check_footer_integrity
    }

    pub(crate) fn retrieve_key(&self, key_metadata: Option<&[u8]>) -> Result<Option<SecureKey>> {
        let (Some(retriever), Some(metadata)) = (&self.key_retriever, key_metadata) else {
            return Ok(None);
        };
        let key = retriever
            .retrieve_key(metadata)
            .map_err(|e| e.with_context("key_metadata", display_metadata(metadata)))?;
        SecureKey::new(key)
            .map(Some)
            .map_err(|e| e.with_context("key_metadata", display_metadata(metadata)))
    }
}

impl fmt::Debug for FileDecryptionProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDecryptionProperties")
            .field("footer_key", &self.footer_key)
            .field("footer_signing_key", &self.footer_signing_key)
            .field("column_keys", &self.column_keys.keys().collect::<Vec<_>>())
            .field("has_key_retriever", &self.key_retriever.is_some())
            .field("aad_prefix", &self.aad_prefix.as_deref().map(display_metadata))
            .field(
                "has_aad_prefix_retriever",
                &self.aad_prefix_retriever.is_some(),
            )
            .field("check_footer_integrity", &self.check_footer_integrity)
            .finish()
    }
}

/// Builder for [`FileDecryptionProperties`]. Checks run in [`build`](Self::build).
pub struct FileDecryptionPropertiesBuilder {
    footer_key: Option<Vec<u8>>,
    footer_signing_key: Option<Vec<u8>>,
    column_keys: Vec<(ColumnPath, Vec<u8>)>,
    key_retriever: Option<Arc<dyn KeyRetriever>>,
    aad_prefix: Option<Vec<u8>>,
    aad_prefix_retriever: Option<Arc<dyn AadPrefixRetriever>>,
    check_footer_integrity: bool,
}

impl FileDecryptionPropertiesBuilder {
    /// Explicit footer key. Without it the footer key is retrieved with the
    /// footer key metadata.
    pub fn with_footer_key(mut self, key: Vec<u8>) -> Self {
        self.footer_key = Some(key);
        self
    }

    /// Explicit key for one column.
    pub fn with_column_key(mut self, path: impl Into<ColumnPath>, key: Vec<u8>) -> Self {
        self.column_keys.push((path.into(), key));
        self
    }

    /// Explicit key for one column, taken from validated properties.
    pub fn with_column(self, column: ColumnDecryptionProperties) -> Self {
        let key = column.key.as_bytes().to_vec();
        self.with_column_key(column.path, key)
    }

    /// Retriever for keys not supplied explicitly.
    pub fn with_key_retriever(mut self, retriever: Arc<dyn KeyRetriever>) -> Self {
        self.key_retriever = Some(retriever);
        self
    }

    /// Explicit key verifying plaintext footer signatures.
    pub fn with_footer_signing_key(mut self, key: Vec<u8>) -> Self {
        self.footer_signing_key = Some(key);
        self
    }

    /// Turns plaintext footer signature verification on or off. Off by default.
    pub fn with_check_footer_integrity(mut self, check: bool) -> Self {
        self.check_footer_integrity = check;
        self
    }

    /// Explicit AAD prefix. Exclusive with
    /// [`with_aad_prefix_retriever`](Self::with_aad_prefix_retriever).
    pub fn with_aad_prefix(mut self, aad_prefix: Vec<u8>) -> Self {
        self.aad_prefix = Some(aad_prefix);
        self
    }

    /// Retriever for the AAD prefix, keyed by the AAD metadata in the file.
    pub fn with_aad_prefix_retriever(mut self, retriever: Arc<dyn AadPrefixRetriever>) -> Self {
        self.aad_prefix_retriever = Some(retriever);
        self
    }

    /// Validates the settings.
    pub fn build(self) -> Result<FileDecryptionProperties> {
        ensure_config!(
            self.footer_key.is_some()
                || self.key_retriever.is_some()
                || !self.column_keys.is_empty(),
            "No footer key, key retriever or column keys: nothing can be decrypted"
        );
        ensure_config!(
            self.aad_prefix.is_none() || self.aad_prefix_retriever.is_none(),
            "AAD prefix and AAD prefix retriever are mutually exclusive"
        );

        let footer_key = self
            .footer_key
            .map(SecureKey::new)
            .transpose()
            .map_err(|e| e.with_context("key", "footer"))?;
        let footer_signing_key = self
            .footer_signing_key
            .map(SecureKey::new)
            .transpose()
            .map_err(|e| e.with_context("key", "footer signing"))?;

        let mut column_keys = HashMap::with_capacity(self.column_keys.len());
        for (path, key) in self.column_keys {
            let key = SecureKey::new(key).map_err(|e| e.with_context("column", path.to_string()))?;
            if column_keys.insert(path.clone(), key).is_some() {
                return Err(Error::new(
                    ErrorKind::Configuration,
                    format!("Column key already set for {path}"),
                ));
            }
        }

        Ok(FileDecryptionProperties {
            footer_key,
            footer_signing_key,
            column_keys,
            key_retriever: self.key_retriever,
            aad_prefix: self.aad_prefix,
            aad_prefix_retriever: self.aad_prefix_retriever,
            check_footer_integrity: self.check_footer_integrity,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const KEY: &[u8] = b"0123456789012345";

    struct FixedAadPrefix;

    impl AadPrefixRetriever for FixedAadPrefix {
        fn retrieve_aad_prefix(&self, _aad_metadata: &[u8]) -> Result<Vec<u8>> {
            Ok(b"prefix".to_vec())
        }
    }

    #[test]
    fn test_string_key_id_retriever() {
        let retriever = StringKeyIdRetriever::new();
        retriever.put_key("kf", KEY.to_vec());

        assert_eq!(retriever.retrieve_key(b"kf").unwrap(), KEY.to_vec());

        let err = retriever.retrieve_key(b"kc9").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingKey);

        let err = retriever.retrieve_key(&[0xff, 0xfe]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingKey);
    }

    #[test]
    fn test_nothing_decryptable_fails() {
        let err = FileDecryptionProperties::builder().build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_aad_prefix_sources_are_exclusive() {
        let err = FileDecryptionProperties::builder()
            .with_footer_key(KEY.to_vec())
            .with_aad_prefix(b"prefix".to_vec())
            .with_aad_prefix_retriever(Arc::new(FixedAadPrefix))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_key_lengths_validated() {
        for builder in [
            FileDecryptionProperties::builder().with_footer_key(vec![0; 10]),
            FileDecryptionProperties::builder()
                .with_footer_key(KEY.to_vec())
                .with_footer_signing_key(vec![0; 17]),
            FileDecryptionProperties::builder().with_column_key("a", vec![0; 33]),
        ] {
            assert_eq!(builder.build().unwrap_err().kind(), ErrorKind::Configuration);
        }
        assert_eq!(
            ColumnDecryptionProperties::new("a", vec![])
                .unwrap_err()
                .kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_duplicate_column_key_fails() {
        let err = FileDecryptionProperties::builder()
            .with_column_key("a.b", KEY.to_vec())
            .with_column(ColumnDecryptionProperties::new("a.b", KEY.to_vec()).unwrap())
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_footer_integrity_check_is_opt_in() {
        let properties = FileDecryptionProperties::builder()
            .with_footer_key(KEY.to_vec())
            .build()
            .unwrap();
        assert!(!properties.check_footer_integrity());

        let properties = FileDecryptionProperties::builder()
            .with_footer_key(KEY.to_vec())
            .with_check_footer_integrity(true)
            .build()
            .unwrap();
        assert!(properties.check_footer_integrity());
    }

    #[test]
    fn test_properties_accessors() {
        let retriever = Arc::new(StringKeyIdRetriever::new());
        retriever.put_key("kc1", b"1234567890123450".to_vec());

        let properties = FileDecryptionProperties::builder()
            .with_column_key("double_field", KEY.to_vec())
            .with_key_retriever(retriever)
            .with_check_footer_integrity(false)
            .with_aad_prefix(b"tester".to_vec())
            .build()
            .unwrap();

        assert!(properties.footer_key().is_none());
        assert!(!properties.check_footer_integrity());
        assert_eq!(properties.aad_prefix(), Some(&b"tester"[..]));
        assert_eq!(
            properties
                .column_key(&"double_field".into())
                .unwrap()
                .as_bytes(),
            KEY
        );
        assert!(properties.column_key(&"float_field".into()).is_none());

        let retrieved = properties.retrieve_key(Some(&b"kc1"[..])).unwrap().unwrap();
        assert_eq!(retrieved.as_bytes(), b"1234567890123450");
        assert!(properties.retrieve_key(None).unwrap().is_none());
        assert_eq!(
            properties.retrieve_key(Some(&b"kc2"[..])).unwrap_err().kind(),
            ErrorKind::MissingKey
        );
    }
}
