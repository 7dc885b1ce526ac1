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

//! Write side configuration and the per-file encryptor built from it.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use rand::rngs::OsRng;
use rand::RngCore;

use crate::aad::create_footer_aad;
use crate::algorithm::{AesParameters, EncryptionAlgorithm, ParquetCipher};
use crate::column_path::ColumnPath;
use crate::crypto::{
    AesEncryptor, AesMode, SecureKey, AAD_FILE_UNIQUE_LENGTH, FOOTER_SIGNATURE_LENGTH,
    NONCE_LENGTH,
};
use crate::utils::get_or_try_init;
use crate::{ensure_config, Error, ErrorKind, Result};

const ENCRYPT_THE_REST_DEFAULT: bool = true;

fn set_once<T>(slot: &mut Option<T>, value: T, what: &str, conflicts: &mut Vec<String>) {
    if slot.is_some() {
        conflicts.push(format!("{what} already set"));
    } else {
        *slot = Some(value);
    }
}

fn validated_key(key: Option<Vec<u8>>, what: &str) -> Result<Option<SecureKey>> {
    key.map(|k| {
        let len = k.len();
        SecureKey::new(k).map_err(|e| {
            Error::new(ErrorKind::Configuration, format!("Wrong {what} length {len}"))
                .with_source(e)
        })
    })
    .transpose()
}

/// Encryption settings of one column.
#[derive(Debug, Clone)]
pub struct ColumnEncryptionProperties {
    path: ColumnPath,
    encrypted: bool,
    key: Option<SecureKey>,
    key_metadata: Option<Vec<u8>>,
}

impl ColumnEncryptionProperties {
    /// Starts a builder for an encrypted column.
    pub fn builder(path: impl Into<ColumnPath>) -> ColumnEncryptionPropertiesBuilder {
        ColumnEncryptionPropertiesBuilder {
            path: path.into(),
            encrypted: true,
            key: None,
            key_metadata: None,
            conflicts: Vec::new(),
        }
    }

    fn synthesized(path: &ColumnPath, encrypted: bool) -> Self {
        Self {
            path: path.clone(),
            encrypted,
            key: None,
            key_metadata: None,
        }
    }

    /// Column path.
    pub fn path(&self) -> &ColumnPath {
        &self.path
    }

    /// Whether the column is encrypted at all.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Whether the column is encrypted with the footer key.
    pub fn is_encrypted_with_footer_key(&self) -> bool {
        self.encrypted && self.key.is_none()
    }

    /// Column specific key, if any.
    pub fn key(&self) -> Option<&SecureKey> {
        self.key.as_ref()
    }

    /// Metadata stored in the file so readers can retrieve the column key.
    pub fn key_metadata(&self) -> Option<&[u8]> {
        self.key_metadata.as_deref()
    }
}

/// Builder for [`ColumnEncryptionProperties`]. Checks run in [`build`](Self::build).
#[derive(Debug)]
pub struct ColumnEncryptionPropertiesBuilder {
    path: ColumnPath,
    encrypted: bool,
    key: Option<Vec<u8>>,
    key_metadata: Option<Vec<u8>>,
    conflicts: Vec<String>,
}

impl ColumnEncryptionPropertiesBuilder {
    /// Marks the column as encrypted (default) or plaintext.
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Encrypts the column with its own key instead of the footer key.
    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        set_once(&mut self.key, key, "Column key", &mut self.conflicts);
        self
    }

    /// Sets key retrieval metadata. Use either this or
    /// [`with_key_id`](Self::with_key_id), not both.
    pub fn with_key_metadata(mut self, key_metadata: Vec<u8>) -> Self {
        set_once(
            &mut self.key_metadata,
            key_metadata,
            "Column key metadata",
            &mut self.conflicts,
        );
        self
    }

    /// Sets key retrieval metadata from a UTF-8 key id.
    pub fn with_key_id(self, key_id: &str) -> Self {
        self.with_key_metadata(key_id.as_bytes().to_vec())
    }

    /// Validates the settings.
    pub fn build(self) -> Result<ColumnEncryptionProperties> {
        let column = self.path.to_string();
        if let Some(conflict) = self.conflicts.first() {
            return Err(Error::new(ErrorKind::Configuration, conflict.clone())
                .with_context("column", column));
        }
        ensure_config!(
            self.encrypted || self.key.is_none(),
            "Setting key for unencrypted column: {}",
            column
        );
        ensure_config!(
            self.encrypted || self.key_metadata.is_none(),
            "Setting key metadata for unencrypted column: {}",
            column
        );
        ensure_config!(
            self.key.is_some() || self.key_metadata.is_none(),
            "Setting key metadata for column encrypted with footer key: {}",
            column
        );

        let key = validated_key(self.key, "column key")
            .map_err(|e| e.with_context("column", column))?;
        Ok(ColumnEncryptionProperties {
            path: self.path,
            encrypted: self.encrypted,
            key,
            key_metadata: self.key_metadata,
        })
    }
}

/// Immutable write side configuration of one file.
#[derive(Debug)]
pub struct FileEncryptionProperties {
    algorithm: EncryptionAlgorithm,
    footer_key: Option<SecureKey>,
    footer_key_metadata: Option<Vec<u8>>,
    footer_signing_key: Option<SecureKey>,
    footer_signing_key_metadata: Option<Vec<u8>>,
    aad_prefix: Option<Vec<u8>>,
    file_aad: Vec<u8>,
    column_properties: HashMap<ColumnPath, ColumnEncryptionProperties>,
    encrypt_the_rest: bool,
}

impl FileEncryptionProperties {
    /// Starts a builder. Without a footer key the footer stays in plaintext and
    /// at least one column must be encrypted with its own key.
    pub fn builder() -> FileEncryptionPropertiesBuilder {
        FileEncryptionPropertiesBuilder {
            cipher: ParquetCipher::default(),
            footer_key: None,
            footer_key_metadata: None,
            footer_signing_key: None,
            footer_signing_key_metadata: None,
            aad_prefix: None,
            aad_metadata: None,
            column_properties: HashMap::new(),
            encrypt_the_rest: ENCRYPT_THE_REST_DEFAULT,
            conflicts: Vec::new(),
        }
    }

    /// Algorithm record to store in the file.
    pub fn algorithm(&self) -> &EncryptionAlgorithm {
        &self.algorithm
    }

    /// Whether the footer is encrypted.
    pub fn encrypted_footer(&self) -> bool {
        self.footer_key.is_some()
    }

    /// Footer encryption key.
    pub fn footer_key(&self) -> Option<&SecureKey> {
        self.footer_key.as_ref()
    }

    /// Footer key retrieval metadata.
    pub fn footer_key_metadata(&self) -> Option<&[u8]> {
        self.footer_key_metadata.as_deref()
    }

    /// Key signing a plaintext footer.
    pub fn footer_signing_key(&self) -> Option<&SecureKey> {
        self.footer_signing_key.as_ref()
    }

    /// Signing key retrieval metadata.
    pub fn footer_signing_key_metadata(&self) -> Option<&[u8]> {
        self.footer_signing_key_metadata.as_deref()
    }

    /// AAD prefix supplied by the writer.
    pub fn aad_prefix(&self) -> Option<&[u8]> {
        self.aad_prefix.as_deref()
    }

    /// File AAD: AAD prefix followed by the random file-unique suffix.
    pub fn file_aad(&self) -> &[u8] {
        &self.file_aad
    }

    /// Whether columns absent from the column map are encrypted with the footer key.
    pub fn encrypt_the_rest(&self) -> bool {
        self.encrypt_the_rest
    }

    /// Settings for `path`: the explicit entry, or one derived from the
    /// "encrypt the rest" flag.
    pub fn column_properties(&self, path: &ColumnPath) -> Cow<'_, ColumnEncryptionProperties> {
        match self.column_properties.get(path) {
            Some(properties) => Cow::Borrowed(properties),
            None => Cow::Owned(ColumnEncryptionProperties::synthesized(
                path,
                self.encrypt_the_rest,
            )),
        }
    }
}

/// Builder for [`FileEncryptionProperties`].
///
/// Setters only record values; every check runs once in [`build`](Self::build).
#[derive(Debug)]
pub struct FileEncryptionPropertiesBuilder {
    cipher: ParquetCipher,
    footer_key: Option<Vec<u8>>,
    footer_key_metadata: Option<Vec<u8>>,
    footer_signing_key: Option<Vec<u8>>,
    footer_signing_key_metadata: Option<Vec<u8>>,
    aad_prefix: Option<Vec<u8>>,
    aad_metadata: Option<Vec<u8>>,
    column_properties: HashMap<ColumnPath, ColumnEncryptionProperties>,
    encrypt_the_rest: bool,
    conflicts: Vec<String>,
}

impl FileEncryptionPropertiesBuilder {
    /// Cipher suite, `AES_GCM_V1` by default.
    pub fn with_algorithm(mut self, cipher: ParquetCipher) -> Self {
        self.cipher = cipher;
        self
    }

    /// Key encrypting the footer and every column encrypted with the footer key.
    pub fn with_footer_key(mut self, key: Vec<u8>) -> Self {
        set_once(&mut self.footer_key, key, "Footer key", &mut self.conflicts);
        self
    }

    /// Footer key retrieval metadata. Use either this or
    /// [`with_footer_key_id`](Self::with_footer_key_id), not both.
    pub fn with_footer_key_metadata(mut self, metadata: Vec<u8>) -> Self {
        set_once(
            &mut self.footer_key_metadata,
            metadata,
            "Footer key metadata",
            &mut self.conflicts,
        );
        self
    }

    /// Footer key retrieval metadata from a UTF-8 key id.
    pub fn with_footer_key_id(self, key_id: &str) -> Self {
        self.with_footer_key_metadata(key_id.as_bytes().to_vec())
    }

    /// Key signing a plaintext footer. Only valid without a footer key.
    pub fn with_footer_signing_key(mut self, key: Vec<u8>) -> Self {
        set_once(
            &mut self.footer_signing_key,
            key,
            "Footer signing key",
            &mut self.conflicts,
        );
        self
    }

    /// Signing key retrieval metadata. Only valid without a footer key.
    pub fn with_footer_signing_key_metadata(mut self, metadata: Vec<u8>) -> Self {
        set_once(
            &mut self.footer_signing_key_metadata,
            metadata,
            "Footer signing key metadata",
            &mut self.conflicts,
        );
        self
    }

    /// AAD prefix, e.g. the file name, binding the file to its identity.
    pub fn with_aad_prefix(mut self, aad_prefix: Vec<u8>) -> Self {
        set_once(
            &mut self.aad_prefix,
            aad_prefix,
            "AAD prefix",
            &mut self.conflicts,
        );
        self
    }

    /// Metadata stored in the file for readers' AAD prefix retrievers.
    pub fn with_aad_metadata(mut self, aad_metadata: Vec<u8>) -> Self {
        set_once(
            &mut self.aad_metadata,
            aad_metadata,
            "AAD metadata",
            &mut self.conflicts,
        );
        self
    }

    /// Adds explicit settings for one column.
    pub fn with_column(mut self, properties: ColumnEncryptionProperties) -> Self {
        let path = properties.path().clone();
        if self.column_properties.insert(path.clone(), properties).is_some() {
            self.conflicts
                .push(format!("Column properties already set for {path}"));
        }
        self
    }

    /// Adds explicit settings for several columns.
    pub fn with_columns(
        self,
        columns: impl IntoIterator<Item = ColumnEncryptionProperties>,
    ) -> Self {
        columns.into_iter().fold(self, Self::with_column)
    }

    /// Whether columns absent from the column map are encrypted with the footer
    /// key (`true`, default) or left in plaintext.
    pub fn with_encrypt_the_rest(mut self, encrypt_the_rest: bool) -> Self {
        self.encrypt_the_rest = encrypt_the_rest;
        self
    }

    /// Validates the settings and generates the file AAD.
    pub fn build(self) -> Result<FileEncryptionProperties> {
        if let Some(conflict) = self.conflicts.first() {
            return Err(Error::new(ErrorKind::Configuration, conflict.clone()));
        }

        let footer_key = validated_key(self.footer_key, "footer encryption key")?;
        if footer_key.is_none() {
            ensure_config!(
                !self.encrypt_the_rest,
                "Encrypt the rest with null footer key"
            );
            ensure_config!(
                self.footer_key_metadata.is_none(),
                "Setting key metadata for null footer key"
            );
            let mut any_encrypted = false;
            for column in self.column_properties.values() {
                if column.is_encrypted() {
                    ensure_config!(
                        column.key().is_some(),
                        "Encrypt column with null footer key. Column: {}",
                        column.path()
                    );
                    any_encrypted = true;
                }
            }
            ensure_config!(any_encrypted, "Footer and all columns are unencrypted");
        } else {
            ensure_config!(
                self.footer_signing_key.is_none(),
                "Can set signing key only for plaintext footer"
            );
            ensure_config!(
                self.footer_signing_key_metadata.is_none(),
                "Can set signing key metadata only for plaintext footer"
            );
        }
        let footer_signing_key = validated_key(self.footer_signing_key, "footer signing key")?;

        let mut aad_file_unique = vec![0u8; AAD_FILE_UNIQUE_LENGTH];
        OsRng.fill_bytes(&mut aad_file_unique);

        let mut file_aad = self.aad_prefix.clone().unwrap_or_default();
        file_aad.extend_from_slice(&aad_file_unique);

        let algorithm = EncryptionAlgorithm::new(self.cipher, AesParameters {
            aad_metadata: self.aad_metadata,
            aad_file_unique,
        });

        log::debug!(
            "Built file encryption properties: algorithm {}, encrypted footer {}, {} explicit columns, encrypt the rest {}",
            self.cipher,
            footer_key.is_some(),
            self.column_properties.len(),
            self.encrypt_the_rest
        );

        Ok(FileEncryptionProperties {
            algorithm,
            footer_key,
            footer_key_metadata: self.footer_key_metadata,
            footer_signing_key,
            footer_signing_key_metadata: self.footer_signing_key_metadata,
            aad_prefix: self.aad_prefix,
            file_aad,
            column_properties: self.column_properties,
            encrypt_the_rest: self.encrypt_the_rest,
        })
    }
}

/// Encryptors for one column of a file being written.
pub struct ColumnEncryptionSetup {
    path: ColumnPath,
    ordinal: usize,
    encrypted_with_footer_key: bool,
    key_metadata: Option<Vec<u8>>,
    encryptors: Option<(Arc<AesEncryptor>, Arc<AesEncryptor>)>,
}

impl ColumnEncryptionSetup {
    /// Column path.
    pub fn path(&self) -> &ColumnPath {
        &self.path
    }

    /// Ordinal of the column in the row group.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Whether the column is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.encryptors.is_some()
    }

    /// Whether the column is encrypted with the footer key.
    pub fn is_encrypted_with_footer_key(&self) -> bool {
        self.encrypted_with_footer_key
    }

    /// Column key metadata to store in the column chunk.
    pub fn key_metadata(&self) -> Option<&[u8]> {
        self.key_metadata.as_deref()
    }

    /// Encryptor for data and dictionary pages.
    pub fn data_encryptor(&self) -> Option<&Arc<AesEncryptor>> {
        self.encryptors.as_ref().map(|(data, _)| data)
    }

    /// Encryptor for column metadata, page headers and indexes.
    pub fn metadata_encryptor(&self) -> Option<&Arc<AesEncryptor>> {
        self.encryptors.as_ref().map(|(_, metadata)| metadata)
    }
}

/// Per-file write side counterpart of [`crate::FileDecryptor`].
///
/// Footer-keyed encryptors are built once and shared by every column
/// encrypted with the footer key.
pub struct FileEncryptor {
    properties: Arc<FileEncryptionProperties>,
    footer_metadata_encryptor: OnceLock<Arc<AesEncryptor>>,
    footer_data_encryptor: OnceLock<Arc<AesEncryptor>>,
    columns: HashMap<ColumnPath, Arc<ColumnEncryptionSetup>>,
}

impl FileEncryptor {
    /// Creates an encryptor for one file.
    pub fn new(properties: Arc<FileEncryptionProperties>) -> Self {
        Self {
            properties,
            footer_metadata_encryptor: OnceLock::new(),
            footer_data_encryptor: OnceLock::new(),
            columns: HashMap::new(),
        }
    }

    /// Properties this encryptor was built from.
    pub fn properties(&self) -> &FileEncryptionProperties {
        &self.properties
    }

    /// File AAD used for every module of the file.
    pub fn file_aad(&self) -> &[u8] {
        self.properties.file_aad()
    }

    fn footer_key(&self) -> Result<&SecureKey> {
        self.properties
            .footer_key()
            .ok_or_else(|| Error::new(ErrorKind::MissingKey, "No footer encryption key"))
    }

    fn footer_encryptor_for(&self, mode: AesMode) -> Result<Arc<AesEncryptor>> {
        let cell = match (mode, self.properties.algorithm().cipher()) {
            (AesMode::Ctr, ParquetCipher::AesGcmCtrV1) => &self.footer_data_encryptor,
            _ => &self.footer_metadata_encryptor,
        };
        get_or_try_init(cell, || {
            Ok(Arc::new(AesEncryptor::with_key(mode, self.footer_key()?)?))
        })
    }

    /// Footer encryptor, or `None` when the footer stays in plaintext.
    pub fn footer_encryptor(&self) -> Result<Option<Arc<AesEncryptor>>> {
        if !self.properties.encrypted_footer() {
            return Ok(None);
        }
        self.footer_encryptor_for(AesMode::Gcm).map(Some)
    }

    /// Returns the setup of `path`, creating it on first use.
    pub fn column_setup(
        &mut self,
        path: &ColumnPath,
        column_ordinal: usize,
    ) -> Result<Arc<ColumnEncryptionSetup>> {
        if let Some(setup) = self.columns.get(path) {
            return Ok(setup.clone());
        }

        let properties = self.properties.column_properties(path);
        let cipher = self.properties.algorithm().cipher();
        let encryptors = if !properties.is_encrypted() {
            None
        } else if let Some(key) = properties.key() {
            let metadata = Arc::new(AesEncryptor::with_key(cipher.metadata_mode(), key)?);
            let data = if cipher.data_mode() == cipher.metadata_mode() {
                metadata.clone()
            } else {
                Arc::new(AesEncryptor::with_key(cipher.data_mode(), key)?)
            };
            Some((data, metadata))
        } else {
            Some((
                self.footer_encryptor_for(cipher.data_mode())?,
                self.footer_encryptor_for(cipher.metadata_mode())?,
            ))
        };

        let setup = Arc::new(ColumnEncryptionSetup {
            path: path.clone(),
            ordinal: column_ordinal,
            encrypted_with_footer_key: properties.is_encrypted_with_footer_key(),
            key_metadata: properties.key_metadata().map(<[u8]>::to_vec),
            encryptors,
        });
        log::debug!(
            "Column {path} set up for writing: encrypted {}, footer key {}",
            setup.is_encrypted(),
            setup.is_encrypted_with_footer_key()
        );
        self.columns.insert(path.clone(), setup.clone());
        Ok(setup)
    }

    /// Signs a plaintext footer.
    ///
    /// # Returns
    /// The signature to append after the footer: `[12-byte nonce][16-byte tag]`.
    pub fn sign_footer(&self, footer: &[u8]) -> Result<Vec<u8>> {
        if self.properties.encrypted_footer() {
            return Err(Error::new(
                ErrorKind::PreconditionFailed,
                "Footer is encrypted, signatures apply to plaintext footers only",
            ));
        }
        let signing_key = self.properties.footer_signing_key().ok_or_else(|| {
            Error::new(ErrorKind::MissingKey, "No footer signing key configured")
        })?;

        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);
        let tag = AesEncryptor::with_key(AesMode::Gcm, signing_key)?.gcm_tag(
            footer,
            &nonce,
            &create_footer_aad(self.file_aad()),
        )?;

        let mut signature = Vec::with_capacity(FOOTER_SIGNATURE_LENGTH);
        signature.extend_from_slice(&nonce);
        signature.extend_from_slice(&tag);
        Ok(signature)
    }
}
