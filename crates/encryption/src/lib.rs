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

//! Parquet modular encryption.
//!
//! This crate provides the cryptographic layer of encrypted Parquet files: the
//! AES cipher frames, module AAD construction, write and read side file crypto
//! properties, the per-file decryption context, and envelope key tools.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use iceberg_encryption::aad::{create_module_aad, ModuleType};
//! use iceberg_encryption::{
//!     FileDecryptionProperties, FileDecryptor, FileEncryptionProperties, FileEncryptor, Result,
//!     StringKeyIdRetriever,
//! };
//!
//! fn main() -> Result<()> {
//!     // Write side: encrypt every column with the footer key.
//!     let properties = FileEncryptionProperties::builder()
//!         .with_footer_key(b"0123456789012345".to_vec())
//!         .with_footer_key_id("kf")
//!         .build()?;
//!     let mut encryptor = FileEncryptor::new(Arc::new(properties));
//!     let column = encryptor.column_setup(&"id".into(), 0)?;
//!     let aad = create_module_aad(encryptor.file_aad(), ModuleType::DataPage, 0, 0, 0)?;
//!     let page = column.data_encryptor().unwrap().encrypt(b"page bytes", &aad)?;
//!
//!     // Read side: resolve the footer key through a retriever.
//!     let retriever = Arc::new(StringKeyIdRetriever::new());
//!     retriever.put_key("kf", b"0123456789012345".to_vec());
//!     let properties = FileDecryptionProperties::builder()
//!         .with_key_retriever(retriever)
//!         .build()?;
//!     let mut decryptor = FileDecryptor::new(Arc::new(properties));
//!     let written = encryptor.properties();
//!     decryptor.set_file_crypto_metadata(
//!         written.algorithm(),
//!         true,
//!         written.footer_key_metadata(),
//!     )?;
//!     let column = decryptor.set_column_crypto_metadata(&"id".into(), true, true, None, 0)?;
//!     let aad = create_module_aad(decryptor.file_aad()?, ModuleType::DataPage, 0, 0, 0)?;
//!
//!     assert_eq!(column.data_decryptor().unwrap().decrypt(&page, &aad)?, b"page bytes");
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]

mod error;
pub use error::{Error, ErrorKind, Result};

pub mod aad;
pub mod algorithm;
pub mod column_path;
pub mod config;
pub mod crypto;
pub mod decrypt;
pub mod encrypt;
pub mod file_decryptor;
pub mod key_tools;

mod utils;

pub use algorithm::{AesParameters, EncryptionAlgorithm, ParquetCipher};
pub use column_path::ColumnPath;
pub use config::EncryptionConfig;
pub use crypto::{AesDecryptor, AesEncryptor, AesMode, SecureKey};
pub use decrypt::{
    AadPrefixRetriever, ColumnDecryptionProperties, FileDecryptionProperties,
    FileDecryptionPropertiesBuilder, KeyRetriever, StringKeyIdRetriever,
};
pub use encrypt::{
    ColumnEncryptionProperties, ColumnEncryptionPropertiesBuilder, ColumnEncryptionSetup,
    FileEncryptionProperties, FileEncryptionPropertiesBuilder, FileEncryptor,
};
pub use file_decryptor::{
    ColumnCryptoState, ColumnDecryptionSetup, ColumnDecryptors, DecryptionState, FileDecryptor,
};
