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

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::{Error, ErrorKind, Result};

const SEPARATOR: char = ':';

/// Wrapped data key together with the id of the master key that wrapped it.
///
/// Serialized as `<base64 wrapped key>:<master key id>`. The base64 alphabet
/// has no `:`, so the master key id may contain one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    wrapped_key: Vec<u8>,
    master_key_id: String,
}

impl KeyMaterial {
    /// Creates key material.
    pub fn new(wrapped_key: Vec<u8>, master_key_id: impl Into<String>) -> Self {
        Self {
            wrapped_key,
            master_key_id: master_key_id.into(),
        }
    }

    /// Wrapped data key.
    pub fn wrapped_key(&self) -> &[u8] {
        &self.wrapped_key
    }

    /// Id of the wrapping master key.
    pub fn master_key_id(&self) -> &str {
        &self.master_key_id
    }

    /// Serializes to the string form.
    pub fn serialize(&self) -> String {
        format!(
            "{}{SEPARATOR}{}",
            STANDARD.encode(&self.wrapped_key),
            self.master_key_id
        )
    }

    /// Parses the string form.
    pub fn deserialize(material: &str) -> Result<Self> {
        let (encoded, master_key_id) = material.split_once(SEPARATOR).ok_or_else(|| {
            Error::new(
                ErrorKind::DataInvalid,
                "Key material has no master key id separator",
            )
        })?;
        if encoded.is_empty() || master_key_id.is_empty() {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "Key material has an empty wrapped key or master key id",
            ));
        }
        Ok(Self {
            wrapped_key: STANDARD.decode(encoded)?,
            master_key_id: master_key_id.to_string(),
        })
    }
}

impl fmt::Display for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromStr for KeyMaterial {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::deserialize(s)
    }
}
