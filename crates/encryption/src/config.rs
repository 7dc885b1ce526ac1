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

//! Encryption settings parsed from string properties.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::algorithm::ParquetCipher;
use crate::crypto::VALID_KEY_LENGTHS;
use crate::encrypt::{FileEncryptionProperties, FileEncryptionPropertiesBuilder};
use crate::error::{Error, ErrorKind, Result};

// Parses a property, falling back to `default` when it is absent.
fn parse_property<T: FromStr>(
    properties: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T>
where
    <T as FromStr>::Err: Display,
{
    properties.get(key).map_or(Ok(default), |value| {
        value.trim().parse::<T>().map_err(|e| {
            Error::new(
                ErrorKind::DataInvalid,
                format!("Invalid value for {key}: {e}"),
            )
        })
    })
}

/// Encryption settings read from string properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionConfig {
    /// Cipher suite for new files.
    pub algorithm: ParquetCipher,
    /// Whether data keys are wrapped locally rather than by the KMS.
    pub wrap_locally: bool,
    /// Length of generated data keys, in bits.
    pub data_key_length_bits: usize,
    /// How long unwrapped keys stay cached.
    pub key_cache_lifetime: Duration,
    /// Maximum number of cached unwrapped keys.
    pub key_cache_capacity: usize,
}

impl EncryptionConfig {
    /// Property key for the cipher suite.
    pub const PROPERTY_ALGORITHM: &str = "parquet.encryption.algorithm";
    /// Default cipher suite.
    pub const PROPERTY_ALGORITHM_DEFAULT: ParquetCipher = ParquetCipher::AesGcmV1;

    /// Property key for local key wrapping.
    pub const PROPERTY_WRAP_LOCALLY: &str = "parquet.encryption.wrap.locally";
    /// Default for local key wrapping.
    pub const PROPERTY_WRAP_LOCALLY_DEFAULT: bool = false;

    /// Property key for the data key length.
    pub const PROPERTY_DATA_KEY_LENGTH_BITS: &str = "parquet.encryption.data.key.length.bits";
    /// Default data key length.
    pub const PROPERTY_DATA_KEY_LENGTH_BITS_DEFAULT: usize = 128;

    /// Property key for the key cache lifetime.
    pub const PROPERTY_KEY_CACHE_LIFETIME_SECONDS: &str =
        "parquet.encryption.key.cache.lifetime.seconds";
    /// Default key cache lifetime.
    pub const PROPERTY_KEY_CACHE_LIFETIME_SECONDS_DEFAULT: u64 = 600; // 10 minutes

    /// Property key for the key cache capacity.
    pub const PROPERTY_KEY_CACHE_CAPACITY: &str = "parquet.encryption.key.cache.capacity";
    /// Default key cache capacity.
    pub const PROPERTY_KEY_CACHE_CAPACITY_DEFAULT: usize = 1000;

    /// Parses the settings, using defaults for absent keys.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let data_key_length_bits = parse_property(
            props,
            Self::PROPERTY_DATA_KEY_LENGTH_BITS,
            Self::PROPERTY_DATA_KEY_LENGTH_BITS_DEFAULT,
        )?;
        if data_key_length_bits % 8 != 0 || !VALID_KEY_LENGTHS.contains(&(data_key_length_bits / 8))
        {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Invalid value for {}: {data_key_length_bits}, expected 128, 192 or 256",
                    Self::PROPERTY_DATA_KEY_LENGTH_BITS
                ),
            ));
        }

        let key_cache_capacity = parse_property(
            props,
            Self::PROPERTY_KEY_CACHE_CAPACITY,
            Self::PROPERTY_KEY_CACHE_CAPACITY_DEFAULT,
        )?;
        if key_cache_capacity == 0 {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Invalid value for {}: must be positive",
                    Self::PROPERTY_KEY_CACHE_CAPACITY
                ),
            ));
        }

        Ok(Self {
            algorithm: parse_property(
                props,
                Self::PROPERTY_ALGORITHM,
                Self::PROPERTY_ALGORITHM_DEFAULT,
            )?,
            wrap_locally: parse_property(
                props,
                Self::PROPERTY_WRAP_LOCALLY,
                Self::PROPERTY_WRAP_LOCALLY_DEFAULT,
            )?,
            data_key_length_bits,
            key_cache_lifetime: Duration::from_secs(parse_property(
                props,
                Self::PROPERTY_KEY_CACHE_LIFETIME_SECONDS,
                Self::PROPERTY_KEY_CACHE_LIFETIME_SECONDS_DEFAULT,
            )?),
            key_cache_capacity,
        })
    }

    /// Length of generated data keys, in bytes.
    pub fn data_key_length(&self) -> usize {
        self.data_key_length_bits / 8
    }

    /// Starts file encryption properties with the configured cipher.
    pub fn file_encryption_builder(&self) -> FileEncryptionPropertiesBuilder {
        FileEncryptionProperties::builder().with_algorithm(self.algorithm)
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            algorithm: Self::PROPERTY_ALGORITHM_DEFAULT,
            wrap_locally: Self::PROPERTY_WRAP_LOCALLY_DEFAULT,
            data_key_length_bits: Self::PROPERTY_DATA_KEY_LENGTH_BITS_DEFAULT,
            key_cache_lifetime: Duration::from_secs(
                Self::PROPERTY_KEY_CACHE_LIFETIME_SECONDS_DEFAULT,
            ),
            key_cache_capacity: Self::PROPERTY_KEY_CACHE_CAPACITY_DEFAULT,
        }
    }
}

impl TryFrom<&HashMap<String, String>> for EncryptionConfig {
    type Error = Error;

    fn try_from(props: &HashMap<String, String>) -> Result<Self> {
        Self::from_properties(props)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn props(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_encryption_config_defaults() {
        let config = EncryptionConfig::from_properties(&HashMap::new()).unwrap();
        assert_eq!(config, EncryptionConfig::default());
        assert_eq!(config.algorithm, ParquetCipher::AesGcmV1);
        assert!(!config.wrap_locally);
        assert_eq!(config.data_key_length(), 16);
        assert_eq!(config.key_cache_lifetime, Duration::from_secs(600));
        assert_eq!(config.key_cache_capacity, 1000);
    }

    #[test]
    fn test_encryption_config_custom() {
        let config = EncryptionConfig::try_from(&props(&[
            (EncryptionConfig::PROPERTY_ALGORITHM, "aes_gcm_ctr_v1"),
            (EncryptionConfig::PROPERTY_WRAP_LOCALLY, "true"),
            (EncryptionConfig::PROPERTY_DATA_KEY_LENGTH_BITS, "256"),
            (EncryptionConfig::PROPERTY_KEY_CACHE_LIFETIME_SECONDS, "30"),
            (EncryptionConfig::PROPERTY_KEY_CACHE_CAPACITY, "8"),
        ]))
        .unwrap();

        assert_eq!(config.algorithm, ParquetCipher::AesGcmCtrV1);
        assert!(config.wrap_locally);
        assert_eq!(config.data_key_length(), 32);
        assert_eq!(config.key_cache_lifetime, Duration::from_secs(30));
        assert_eq!(config.key_cache_capacity, 8);
    }

    #[test]
    fn test_file_encryption_builder_uses_cipher() {
        let config = EncryptionConfig::from_properties(&props(&[(
            EncryptionConfig::PROPERTY_ALGORITHM,
            "AES_GCM_CTR_V1",
        )]))
        .unwrap();
        let properties = config
            .file_encryption_builder()
            .with_footer_key(vec![1u8; 16])
            .build()
            .unwrap();
        assert_eq!(properties.algorithm().cipher(), ParquetCipher::AesGcmCtrV1);
    }

    #[test]
    fn test_encryption_config_invalid() {
        let invalid = [
            (EncryptionConfig::PROPERTY_ALGORITHM, "AES_CBC"),
            (EncryptionConfig::PROPERTY_WRAP_LOCALLY, "yes"),
            (EncryptionConfig::PROPERTY_DATA_KEY_LENGTH_BITS, "100"),
            (EncryptionConfig::PROPERTY_DATA_KEY_LENGTH_BITS, "-128"),
            (EncryptionConfig::PROPERTY_KEY_CACHE_LIFETIME_SECONDS, "ten"),
            (EncryptionConfig::PROPERTY_KEY_CACHE_CAPACITY, "0"),
        ];
        for (key, value) in invalid {
            let err = EncryptionConfig::from_properties(&props(&[(key, value)])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DataInvalid, "{key}={value}");
            assert!(err.message().contains(key));
        }
    }
}
