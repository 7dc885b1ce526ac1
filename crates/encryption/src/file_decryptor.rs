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

//! Per-file decryption context.
//!
//! A [`FileDecryptor`] is created for one file from shared
//! [`FileDecryptionProperties`]. The reader hands it the file crypto metadata
//! once, then the crypto metadata of every column chunk it meets, and gets back
//! cached [`ColumnDecryptionSetup`]s. Column identity is discovered while the
//! first row group is read, where each path appears once. After
//! [`FileDecryptor::all_column_crypto_metadata_processed`] later row groups may
//! only revisit known columns with identical settings.
//!
//! A column whose key cannot be resolved is *hidden*: it is registered as
//! encrypted without decryptors and the reader may skip it.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use subtle::ConstantTimeEq;

use crate::aad::create_footer_aad;
use crate::algorithm::EncryptionAlgorithm;
use crate::column_path::ColumnPath;
use crate::crypto::{
    AesDecryptor, AesEncryptor, AesMode, SecureKey, FOOTER_SIGNATURE_LENGTH, NONCE_LENGTH,
};
use crate::decrypt::FileDecryptionProperties;
use crate::utils::{display_metadata, get_or_try_init};
use crate::{Error, ErrorKind, Result};

/// Lifecycle of a [`FileDecryptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptionState {
    /// File crypto metadata not seen yet.
    Uninitialized,
    /// File crypto metadata processed, no column registered yet.
    MetadataProcessed,
    /// Columns are being discovered.
    ColumnsRegistering,
    /// Column set is closed; only known columns may be revisited.
    ColumnsFinalized,
}

/// Decryptors of a column whose key is available.
#[derive(Debug, Clone)]
pub struct ColumnDecryptors {
    data: Arc<AesDecryptor>,
    metadata: Arc<AesDecryptor>,
}

/// How a column's key was resolved.
#[derive(Debug, Clone)]
pub enum ColumnCryptoState {
    /// Column stored in plaintext.
    Plaintext,
    /// Encrypted with the footer key.
    FooterKey(ColumnDecryptors),
    /// Encrypted with its own key, which was resolved.
    ColumnKey(ColumnDecryptors),
    /// Encrypted with its own key, which is unavailable to this reader.
    Hidden,
}

/// Cached decryption settings of one column.
#[derive(Debug, Clone)]
pub struct ColumnDecryptionSetup {
    path: ColumnPath,
    ordinal: usize,
    state: ColumnCryptoState,
}

impl ColumnDecryptionSetup {
    /// Column path.
    pub fn path(&self) -> &ColumnPath {
        &self.path
    }

    /// Ordinal recorded when the column was first registered.
    pub fn column_ordinal(&self) -> usize {
        self.ordinal
    }

    /// Key resolution outcome.
    pub fn state(&self) -> &ColumnCryptoState {
        &self.state
    }

    /// Whether the column is encrypted, hidden columns included.
    pub fn is_encrypted(&self) -> bool {
        !matches!(self.state, ColumnCryptoState::Plaintext)
    }

    /// Whether the column can be read: plaintext, or its key was resolved.
    pub fn is_key_available(&self) -> bool {
        !matches!(self.state, ColumnCryptoState::Hidden)
    }

    /// Whether the column is encrypted with the footer key.
    pub fn is_encrypted_with_footer_key(&self) -> bool {
        matches!(self.state, ColumnCryptoState::FooterKey(_))
    }

    /// Whether the column is encrypted and its key is unavailable.
    pub fn is_hidden(&self) -> bool {
        matches!(self.state, ColumnCryptoState::Hidden)
    }

    fn decryptors(&self) -> Option<&ColumnDecryptors> {
        match &self.state {
            ColumnCryptoState::FooterKey(d) | ColumnCryptoState::ColumnKey(d) => Some(d),
            ColumnCryptoState::Plaintext | ColumnCryptoState::Hidden => None,
        }
    }

    /// Decryptor for data and dictionary pages.
    pub fn data_decryptor(&self) -> Option<&Arc<AesDecryptor>> {
        self.decryptors().map(|d| &d.data)
    }

    /// Decryptor for column metadata, page headers and indexes.
    pub fn metadata_decryptor(&self) -> Option<&Arc<AesDecryptor>> {
        self.decryptors().map(|d| &d.metadata)
    }
}

struct FileCryptoMetadata {
    algorithm: EncryptionAlgorithm,
    encrypted_footer: bool,
    footer_key: Option<SecureKey>,
    file_aad: Vec<u8>,
}

/// Stateful decryption context of one file. See the module documentation.
pub struct FileDecryptor {
    properties: Arc<FileDecryptionProperties>,
    file: Option<FileCryptoMetadata>,
    footer_decryptor: OnceLock<Arc<AesDecryptor>>,
    footer_column_decryptors: OnceLock<ColumnDecryptors>,
    footer_signing_key: Option<SecureKey>,
    columns: HashMap<ColumnPath, Arc<ColumnDecryptionSetup>>,
    columns_finalized: bool,
}

impl FileDecryptor {
    /// Creates a context for one file.
    pub fn new(properties: Arc<FileDecryptionProperties>) -> Self {
        let footer_signing_key = properties.footer_signing_key().cloned();
        Self {
            properties,
            file: None,
            footer_decryptor: OnceLock::new(),
            footer_column_decryptors: OnceLock::new(),
            footer_signing_key,
            columns: HashMap::new(),
            columns_finalized: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DecryptionState {
        if self.file.is_none() {
            DecryptionState::Uninitialized
        } else if self.columns_finalized {
            DecryptionState::ColumnsFinalized
        } else if self.columns.is_empty() {
            DecryptionState::MetadataProcessed
        } else {
            DecryptionState::ColumnsRegistering
        }
    }

    fn file(&self) -> Result<&FileCryptoMetadata> {
        self.file.as_ref().ok_or_else(|| {
            Error::new(
                ErrorKind::PreconditionFailed,
                "File crypto metadata has not been processed yet",
            )
        })
    }

    /// Records the file crypto metadata.
    ///
    /// The first call resolves the footer key and the file AAD. Later calls,
    /// made when the context is reused across row groups, only check that
    /// `algorithm` is unchanged.
    pub fn set_file_crypto_metadata(
        &mut self,
        algorithm: &EncryptionAlgorithm,
        encrypted_footer: bool,
        footer_key_metadata: Option<&[u8]>,
    ) -> Result<()> {
        if let Some(file) = &self.file {
            if &file.algorithm != algorithm {
                return Err(Error::new(
                    ErrorKind::ReuseMismatch,
                    "Decryptor reuse with a different encryption algorithm",
                )
                .with_context("expected", file.algorithm.cipher().to_string())
                .with_context("actual", algorithm.cipher().to_string()));
            }
            return Ok(());
        }

        let footer_key = match self.properties.footer_key() {
            Some(key) => Some(key.clone()),
            None if encrypted_footer => Some(self.retrieve_footer_key(footer_key_metadata)?),
            None => None,
        };

        let aad_prefix = match (
            self.properties.aad_prefix(),
            self.properties.aad_prefix_retriever(),
            algorithm.aad_metadata(),
        ) {
            (Some(prefix), _, _) => prefix.to_vec(),
            (None, Some(retriever), Some(aad_metadata)) => {
                retriever.retrieve_aad_prefix(aad_metadata)?
            }
            _ => Vec::new(),
        };
        let mut file_aad = aad_prefix;
        file_aad.extend_from_slice(algorithm.aad_file_unique());

        log::debug!(
            "Processed file crypto metadata: algorithm {}, encrypted footer {encrypted_footer}",
            algorithm.cipher()
        );
        self.file = Some(FileCryptoMetadata {
            algorithm: algorithm.clone(),
            encrypted_footer,
            footer_key,
            file_aad,
        });
        Ok(())
    }

    fn retrieve_footer_key(&self, footer_key_metadata: Option<&[u8]>) -> Result<SecureKey> {
        let metadata = footer_key_metadata.ok_or_else(|| {
            Error::new(
                ErrorKind::MissingKey,
                "Encrypted footer without footer key or footer key metadata",
            )
        })?;
        if self.properties.key_retriever().is_none() {
            return Err(Error::new(
                ErrorKind::MissingKey,
                "Encrypted footer without footer key or key retriever",
            ));
        }
        log::debug!(
            "Retrieving footer key for metadata {}",
            display_metadata(metadata)
        );
        match self.properties.retrieve_key(Some(metadata)) {
            Ok(Some(key)) => Ok(key),
            Ok(None) => Err(Error::new(
                ErrorKind::MissingKey,
                "Footer decryption key unavailable",
            )),
            Err(e) => Err(
                Error::new(ErrorKind::MissingKey, "Footer decryption key unavailable")
                    .with_context("key_metadata", display_metadata(metadata))
                    .with_source(e),
            ),
        }
    }

    fn footer_key(&self) -> Result<&SecureKey> {
        self.file()?
            .footer_key
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::MissingKey, "No footer key available"))
    }

    /// Returns the footer decryptor, or `None` for a plaintext footer.
    ///
    /// The decryptor is built on first use and shared afterwards.
    pub fn footer_decryptor(&self) -> Result<Option<Arc<AesDecryptor>>> {
        if !self.file()?.encrypted_footer {
            return Ok(None);
        }
        self.footer_gcm_decryptor().map(Some)
    }

    fn footer_gcm_decryptor(&self) -> Result<Arc<AesDecryptor>> {
        get_or_try_init(&self.footer_decryptor, || {
            Ok(Arc::new(AesDecryptor::with_key(
                AesMode::Gcm,
                self.footer_key()?,
            )?))
        })
    }

    fn footer_column_decryptors(&self) -> Result<ColumnDecryptors> {
        get_or_try_init(&self.footer_column_decryptors, || {
            let metadata = self.footer_gcm_decryptor()?;
            let data = match self.file()?.algorithm.cipher().data_mode() {
                AesMode::Gcm => metadata.clone(),
                mode => Arc::new(AesDecryptor::with_key(mode, self.footer_key()?)?),
            };
            Ok(ColumnDecryptors { data, metadata })
        })
    }

    fn column_key_decryptors(&self, key: &SecureKey) -> Result<ColumnDecryptors> {
        let cipher = self.file()?.algorithm.cipher();
        let metadata = Arc::new(AesDecryptor::with_key(cipher.metadata_mode(), key)?);
        let data = if cipher.data_mode() == cipher.metadata_mode() {
            metadata.clone()
        } else {
            Arc::new(AesDecryptor::with_key(cipher.data_mode(), key)?)
        };
        Ok(ColumnDecryptors { data, metadata })
    }

    /// Registers the crypto metadata of a column chunk and returns its setup.
    ///
    /// # Errors
    /// * [`ErrorKind::DataInvalid`] when `path` is registered twice before
    ///   [`all_column_crypto_metadata_processed`](Self::all_column_crypto_metadata_processed).
    /// * [`ErrorKind::ReuseMismatch`] when `path` was registered before with a
    ///   different encrypted or footer key flag.
    /// * [`ErrorKind::UnknownColumn`] when `path` is new after
    ///   [`all_column_crypto_metadata_processed`](Self::all_column_crypto_metadata_processed).
    /// * [`ErrorKind::MissingKey`] for a footer-keyed column without a footer key.
    ///
    /// An unresolvable column key is not an error: the column is registered
    /// as hidden.
    pub fn set_column_crypto_metadata(
        &mut self,
        path: &ColumnPath,
        encrypted: bool,
        encrypted_with_footer_key: bool,
        key_metadata: Option<&[u8]>,
        column_ordinal: usize,
    ) -> Result<Arc<ColumnDecryptionSetup>> {
        self.file()?;

        if let Some(setup) = self.columns.get(path) {
            if !self.columns_finalized {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    "File with identical columns in the first row group",
                )
                .with_context("column", path.to_string())
                .with_context("ordinal", column_ordinal.to_string()));
            }
            if setup.is_encrypted() != encrypted {
                return Err(Error::new(
                    ErrorKind::ReuseMismatch,
                    "Column registered again with a different encrypted flag",
                )
                .with_context("column", path.to_string()));
            }
            if encrypted && setup.is_encrypted_with_footer_key() != encrypted_with_footer_key {
                return Err(Error::new(
                    ErrorKind::ReuseMismatch,
                    "Column registered again with a different key (column vs footer)",
                )
                .with_context("column", path.to_string()));
            }
            return Ok(setup.clone());
        }
        if self.columns_finalized {
            return Err(Error::new(
                ErrorKind::UnknownColumn,
                "Column not seen before all column crypto metadata was processed",
            )
            .with_context("column", path.to_string()));
        }

        let state = if !encrypted {
            ColumnCryptoState::Plaintext
        } else if encrypted_with_footer_key {
            self.footer_key()
                .map_err(|e| e.with_context("column", path.to_string()))?;
            ColumnCryptoState::FooterKey(self.footer_column_decryptors()?)
        } else {
            match self.resolve_column_key(path, key_metadata)? {
                Some(key) => ColumnCryptoState::ColumnKey(self.column_key_decryptors(&key)?),
                None => {
                    log::warn!("Column {path} is hidden: decryption key unavailable");
                    ColumnCryptoState::Hidden
                }
            }
        };

        let setup = Arc::new(ColumnDecryptionSetup {
            path: path.clone(),
            ordinal: column_ordinal,
            state,
        });
        log::debug!(
            "Registered column {path}: encrypted {}, key available {}, footer key {}",
            setup.is_encrypted(),
            setup.is_key_available(),
            setup.is_encrypted_with_footer_key()
        );
        self.columns.insert(path.clone(), setup.clone());
        Ok(setup)
    }

    fn resolve_column_key(
        &self,
        path: &ColumnPath,
        key_metadata: Option<&[u8]>,
    ) -> Result<Option<SecureKey>> {
        if let Some(key) = self.properties.column_key(path) {
            return Ok(Some(key.clone()));
        }
        match self.properties.retrieve_key(key_metadata) {
            Ok(key) => Ok(key),
            Err(e) if matches!(e.kind(), ErrorKind::MissingKey | ErrorKind::NotFound) => {
                log::warn!("Key retrieval failed for column {path}: {e}");
                Ok(None)
            }
            Err(e) => Err(e.with_context("column", path.to_string())),
        }
    }

    /// Closes the column set: later row groups may only revisit known columns.
    pub fn all_column_crypto_metadata_processed(&mut self) {
        self.columns_finalized = true;
    }

    /// Setup of a registered column.
    pub fn column_setup(&self, path: &ColumnPath) -> Result<Arc<ColumnDecryptionSetup>> {
        self.file()?;
        self.columns.get(path).cloned().ok_or_else(|| {
            Error::new(ErrorKind::NotFound, "No decryption setup for column")
                .with_context("column", path.to_string())
        })
    }

    /// File AAD: AAD prefix followed by the file-unique suffix.
    pub fn file_aad(&self) -> Result<&[u8]> {
        Ok(&self.file()?.file_aad)
    }

    /// Whether plaintext footer signatures are verified.
    pub fn check_footer_integrity(&self) -> bool {
        self.properties.check_footer_integrity()
    }

    /// Returns the footer signing key: the explicit one, else the one resolved
    /// by the key retriever from `signing_key_metadata` on first success.
    pub fn footer_signing_key(
        &mut self,
        signing_key_metadata: Option<&[u8]>,
    ) -> Result<Option<SecureKey>> {
        if self.footer_signing_key.is_none() {
            self.footer_signing_key = match self.properties.retrieve_key(signing_key_metadata) {
                Ok(key) => key,
                Err(e) if matches!(e.kind(), ErrorKind::MissingKey | ErrorKind::NotFound) => None,
                Err(e) => return Err(e),
            };
        }
        Ok(self.footer_signing_key.clone())
    }

    /// Verifies the signature appended to a plaintext footer.
    ///
    /// Does nothing when footer integrity checking is off.
    pub fn verify_plaintext_footer_signature(
        &mut self,
        footer: &[u8],
        signature: Option<&[u8]>,
        signing_key_metadata: Option<&[u8]>,
    ) -> Result<()> {
        if self.file()?.encrypted_footer {
            return Err(Error::new(
                ErrorKind::PreconditionFailed,
                "Footer is encrypted, signatures apply to plaintext footers only",
            ));
        }
        if !self.check_footer_integrity() {
            return Ok(());
        }

        let signature = signature.ok_or_else(|| {
            Error::new(ErrorKind::IntegrityFailure, "Plaintext footer is not signed")
        })?;
        if signature.len() != FOOTER_SIGNATURE_LENGTH {
            return Err(Error::new(
                ErrorKind::IntegrityFailure,
                format!(
                    "Footer signature must be {FOOTER_SIGNATURE_LENGTH} bytes, got {}",
                    signature.len()
                ),
            ));
        }
        let signing_key = self.footer_signing_key(signing_key_metadata)?.ok_or_else(|| {
            Error::new(
                ErrorKind::MissingKey,
                "No key available to verify the footer signature",
            )
        })?;

        let (nonce, tag) = signature.split_at(NONCE_LENGTH);
        let nonce: [u8; NONCE_LENGTH] = nonce.try_into().map_err(|e| {
            Error::new(ErrorKind::Unexpected, "Invalid signature nonce").with_source(e)
        })?;
        let expected = AesEncryptor::with_key(AesMode::Gcm, &signing_key)?.gcm_tag(
            footer,
            &nonce,
            &create_footer_aad(&self.file()?.file_aad),
        )?;

        if bool::from(expected.as_slice().ct_eq(tag)) {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::IntegrityFailure,
                "Plaintext footer signature mismatch",
            ))
        }
    }
}
