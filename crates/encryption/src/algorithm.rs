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

//! Encryption algorithm descriptors stored in the file crypto metadata.

use std::fmt;
use std::str::FromStr;

use crate::crypto::AesMode;
use crate::{Error, ErrorKind, Result};

/// Cipher suite chosen by a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParquetCipher {
    /// AES-GCM for every module.
    #[default]
    AesGcmV1,
    /// AES-CTR for page data, AES-GCM for everything else.
    AesGcmCtrV1,
}

impl ParquetCipher {
    /// Returns the string identifier for this cipher.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AesGcmV1 => "AES_GCM_V1",
            Self::AesGcmCtrV1 => "AES_GCM_CTR_V1",
        }
    }

    /// Mode used for data and dictionary pages.
    pub fn data_mode(&self) -> AesMode {
        match self {
            Self::AesGcmV1 => AesMode::Gcm,
            Self::AesGcmCtrV1 => AesMode::Ctr,
        }
    }

    /// Mode used for footer, column metadata, page headers and indexes.
    pub fn metadata_mode(&self) -> AesMode {
        AesMode::Gcm
    }
}

impl FromStr for ParquetCipher {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AES_GCM_V1" => Ok(Self::AesGcmV1),
            "AES_GCM_CTR_V1" => Ok(Self::AesGcmCtrV1),
            _ => Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!("Unsupported encryption algorithm: {s}"),
            )),
        }
    }
}

impl fmt::Display for ParquetCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AAD related parameters carried by both algorithms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AesParameters {
    /// Metadata a reader can hand to an AAD prefix retriever.
    pub aad_metadata: Option<Vec<u8>>,
    /// Random per-file suffix of the file AAD.
    pub aad_file_unique: Vec<u8>,
}

/// Algorithm record of an encrypted file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EncryptionAlgorithm {
    /// `AES_GCM_V1`
    AesGcmV1(AesParameters),
    /// `AES_GCM_CTR_V1`
    AesGcmCtrV1(AesParameters),
}

impl EncryptionAlgorithm {
    /// Creates the algorithm record for `cipher`.
    pub fn new(cipher: ParquetCipher, parameters: AesParameters) -> Self {
        match cipher {
            ParquetCipher::AesGcmV1 => Self::AesGcmV1(parameters),
            ParquetCipher::AesGcmCtrV1 => Self::AesGcmCtrV1(parameters),
        }
    }

    /// Returns the cipher suite.
    pub fn cipher(&self) -> ParquetCipher {
        match self {
            Self::AesGcmV1(_) => ParquetCipher::AesGcmV1,
            Self::AesGcmCtrV1(_) => ParquetCipher::AesGcmCtrV1,
        }
    }

    /// Returns the AAD parameters.
    pub fn parameters(&self) -> &AesParameters {
        match self {
            Self::AesGcmV1(p) | Self::AesGcmCtrV1(p) => p,
        }
    }

    /// Returns the AAD prefix retrieval metadata, if any.
    pub fn aad_metadata(&self) -> Option<&[u8]> {
        self.parameters().aad_metadata.as_deref()
    }

    /// Returns the file-unique AAD suffix.
    pub fn aad_file_unique(&self) -> &[u8] {
        &self.parameters().aad_file_unique
    }
}
