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

//! AES cipher engine producing and consuming Parquet cipher frames.
//!
//! Every encrypted module is written as one frame:
//!
//! ```text
//! [4-byte LE length][12-byte nonce][ciphertext][16-byte tag (GCM only)]
//! ```
//!
//! The length field counts everything after itself. GCM authenticates the
//! module AAD together with the ciphertext; CTR ignores the AAD and offers no
//! integrity check.

use std::fmt;

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{Error, ErrorKind, Result};

/// Length of the nonce carried by every frame.
pub const NONCE_LENGTH: usize = 12;
/// Length of the GCM authentication tag.
pub const GCM_TAG_LENGTH: usize = 16;
/// Length of the frame length prefix.
pub const SIZE_LENGTH: usize = 4;
/// Length of the unique part of a file AAD.
pub const AAD_FILE_UNIQUE_LENGTH: usize = 8;
/// Length of a plaintext footer signature: nonce followed by GCM tag.
pub const FOOTER_SIGNATURE_LENGTH: usize = NONCE_LENGTH + GCM_TAG_LENGTH;
/// Key lengths accepted for AES keys, in bytes.
pub const VALID_KEY_LENGTHS: [usize; 3] = [16, 24, 32];

const CTR_IV_LENGTH: usize = 16;
const CHUNK_LENGTH: usize = 4 * 1024;

type Aes192Gcm = AesGcm<Aes192, U12>;
type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes192Ctr = ctr::Ctr128BE<Aes192>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// AES mode used to encrypt one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AesMode {
    /// AES-GCM: authenticated, binds the module AAD.
    Gcm,
    /// AES-CTR: unauthenticated, used for page data in `AES_GCM_CTR_V1`.
    Ctr,
}

impl AesMode {
    /// Returns the length of the trailing tag in a frame of this mode.
    pub fn tag_length(&self) -> usize {
        match self {
            Self::Gcm => GCM_TAG_LENGTH,
            Self::Ctr => 0,
        }
    }
}

/// An AES key that zeroes its memory on drop.
///
/// A `SecureKey` always holds 16, 24 or 32 bytes.
#[derive(Clone)]
pub struct SecureKey {
    key: Zeroizing<Vec<u8>>,
}

impl SecureKey {
    /// Creates a new secure key from raw bytes.
    ///
    /// # Errors
    /// Returns a [`ErrorKind::Configuration`] error if the key is empty or its
    /// length is not one of 16, 24 or 32 bytes.
    pub fn new(key: Vec<u8>) -> Result<Self> {
        let key = Zeroizing::new(key);
        if key.is_empty() {
            return Err(Error::new(ErrorKind::Configuration, "Null key bytes"));
        }
        if !VALID_KEY_LENGTHS.contains(&key.len()) {
            return Err(Error::new(
                ErrorKind::Configuration,
                format!(
                    "Wrong key length {}: expected one of {:?}",
                    key.len(),
                    VALID_KEY_LENGTHS
                ),
            ));
        }
        Ok(Self { key })
    }

    /// Generates a new random key of `length` bytes.
    pub fn generate(length: usize) -> Result<Self> {
        let mut key = Zeroizing::new(vec![0u8; length]);
        OsRng.fill_bytes(&mut key);
        Self::new(key.to_vec())
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Returns the key length in bytes.
    pub fn len(&self) -> usize {
        self.key.len()
    }

    /// Always false, a secure key is never empty.
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

impl fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureKey")
            .field("len", &self.key.len())
            .finish_non_exhaustive()
    }
}

enum GcmCipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl GcmCipher {
    fn new(key: &SecureKey) -> Result<Self> {
        let bytes = key.as_bytes();
        let cipher = match bytes.len() {
            16 => Aes128Gcm::new_from_slice(bytes).map(Self::Aes128),
            24 => Aes192Gcm::new_from_slice(bytes).map(Self::Aes192),
            _ => Aes256Gcm::new_from_slice(bytes).map(Self::Aes256),
        };
        cipher.map_err(|e| {
            Error::new(ErrorKind::Unexpected, "Failed to create GCM cipher")
                .with_source(anyhow::anyhow!(e))
        })
    }

    fn seal(&self, nonce: &[u8], aad: &[u8], buffer: &mut [u8]) -> Result<Vec<u8>> {
        match self {
            Self::Aes128(c) => seal_in_place(c, nonce, aad, buffer),
            Self::Aes192(c) => seal_in_place(c, nonce, aad, buffer),
            Self::Aes256(c) => seal_in_place(c, nonce, aad, buffer),
        }
    }

    fn open(&self, nonce: &[u8], aad: &[u8], buffer: &mut [u8], tag: &[u8]) -> Result<()> {
        match self {
            Self::Aes128(c) => open_in_place(c, nonce, aad, buffer, tag),
            Self::Aes192(c) => open_in_place(c, nonce, aad, buffer, tag),
            Self::Aes256(c) => open_in_place(c, nonce, aad, buffer, tag),
        }
    }
}

fn seal_in_place<C: AeadInPlace>(
    cipher: &C,
    nonce: &[u8],
    aad: &[u8],
    buffer: &mut [u8],
) -> Result<Vec<u8>> {
    cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, buffer)
        .map(|tag| tag.to_vec())
        .map_err(|e| {
            Error::new(ErrorKind::Unexpected, "AES-GCM encryption failed")
                .with_source(anyhow::anyhow!(e))
        })
}

fn open_in_place<C: AeadInPlace>(
    cipher: &C,
    nonce: &[u8],
    aad: &[u8],
    buffer: &mut [u8],
    tag: &[u8],
) -> Result<()> {
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            aad,
            buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|e| {
            Error::new(
                ErrorKind::IntegrityFailure,
                "GCM tag check failed: wrong key, wrong AAD or tampered module",
            )
            .with_source(anyhow::anyhow!(e))
        })
}

fn apply_ctr_keystream<C: KeyIvInit + StreamCipher>(
    key: &[u8],
    iv: &[u8],
    buffer: &mut [u8],
) -> Result<()> {
    let mut cipher = C::new_from_slices(key, iv).map_err(|e| {
        Error::new(ErrorKind::Unexpected, "Failed to create CTR cipher")
            .with_source(anyhow::anyhow!(e))
    })?;
    for chunk in buffer.chunks_mut(CHUNK_LENGTH) {
        cipher.apply_keystream(chunk);
    }
    Ok(())
}

enum AesCipher {
    Gcm(GcmCipher),
    Ctr(SecureKey),
}

impl AesCipher {
    fn new(mode: AesMode, key: &SecureKey) -> Result<Self> {
        match mode {
            AesMode::Gcm => GcmCipher::new(key).map(Self::Gcm),
            AesMode::Ctr => Ok(Self::Ctr(key.clone())),
        }
    }

    fn mode(&self) -> AesMode {
        match self {
            Self::Gcm(_) => AesMode::Gcm,
            Self::Ctr(_) => AesMode::Ctr,
        }
    }

    fn ctr(key: &SecureKey, nonce: &[u8], buffer: &mut [u8]) -> Result<()> {
        // The nonce is followed by a 4-byte big-endian block counter starting at 1.
        let mut iv = [0u8; CTR_IV_LENGTH];
        iv[..NONCE_LENGTH].copy_from_slice(nonce);
        iv[CTR_IV_LENGTH - 1] = 1;

        let bytes = key.as_bytes();
        match bytes.len() {
            16 => apply_ctr_keystream::<Aes128Ctr>(bytes, &iv, buffer),
            24 => apply_ctr_keystream::<Aes192Ctr>(bytes, &iv, buffer),
            _ => apply_ctr_keystream::<Aes256Ctr>(bytes, &iv, buffer),
        }
    }
}

/// Encrypts modules into cipher frames.
pub struct AesEncryptor {
    cipher: AesCipher,
}

impl AesEncryptor {
    /// Creates an encryptor for `mode` from raw key bytes.
    ///
    /// # Errors
    /// Returns a [`ErrorKind::Configuration`] error if the key is absent
    /// (empty) or has an invalid length.
    pub fn new(mode: AesMode, key: &[u8]) -> Result<Self> {
        Self::with_key(mode, &SecureKey::new(key.to_vec())?)
    }

    /// Creates an encryptor for `mode` from an already validated key.
    pub fn with_key(mode: AesMode, key: &SecureKey) -> Result<Self> {
        Ok(Self {
            cipher: AesCipher::new(mode, key)?,
        })
    }

    /// Returns the mode of this encryptor.
    pub fn mode(&self) -> AesMode {
        self.cipher.mode()
    }

    /// Encrypts `plaintext` with a fresh random nonce.
    ///
    /// # Returns
    /// A frame in the format:
    /// `[4-byte LE length][12-byte nonce][ciphertext][16-byte tag (GCM)]`
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);
        self.encrypt_with_nonce(plaintext, &nonce, aad)
    }

    /// Encrypts `plaintext` with a caller supplied nonce.
    ///
    /// Reusing a nonce under the same key breaks both modes; this exists for
    /// deterministic tests and for footer signing, where the nonce is stored.
    pub fn encrypt_with_nonce(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_LENGTH],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let ciphertext_length = NONCE_LENGTH + plaintext.len() + self.mode().tag_length();
        let length_field = u32::try_from(ciphertext_length)
            .ok()
            .filter(|len| *len <= i32::MAX as u32)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::DataInvalid,
                    format!("Module too large to encrypt: {} bytes", plaintext.len()),
                )
            })?;

        let mut frame = Vec::with_capacity(SIZE_LENGTH + ciphertext_length);
        frame.extend_from_slice(&length_field.to_le_bytes());
        frame.extend_from_slice(nonce);
        frame.extend_from_slice(plaintext);

        let body = &mut frame[SIZE_LENGTH + NONCE_LENGTH..];
        match &self.cipher {
            AesCipher::Gcm(cipher) => {
                let tag = cipher.seal(nonce, aad, body)?;
                frame.extend_from_slice(&tag);
            }
            AesCipher::Ctr(key) => AesCipher::ctr(key, nonce, body)?,
        }
        Ok(frame)
    }

    /// Computes the GCM tag of `plaintext` under `nonce`, discarding the
    /// ciphertext. Used to sign and verify plaintext footers.
    pub(crate) fn gcm_tag(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_LENGTH],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        if self.mode() != AesMode::Gcm {
            return Err(Error::new(
                ErrorKind::Unexpected,
                "Footer signatures require a GCM encryptor",
            ));
        }
        let frame = self.encrypt_with_nonce(plaintext, nonce, aad)?;
        Ok(frame[frame.len() - GCM_TAG_LENGTH..].to_vec())
    }
}

/// Decrypts cipher frames produced by [`AesEncryptor`] or any compatible writer.
pub struct AesDecryptor {
    cipher: AesCipher,
}

impl fmt::Debug for AesDecryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesDecryptor")
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

impl AesDecryptor {
    /// Creates a decryptor for `mode` from raw key bytes.
    ///
    /// # Errors
    /// Returns a [`ErrorKind::Configuration`] error if the key is absent
    /// (empty) or has an invalid length.
    pub fn new(mode: AesMode, key: &[u8]) -> Result<Self> {
        Self::with_key(mode, &SecureKey::new(key.to_vec())?)
    }

    /// Creates a decryptor for `mode` from an already validated key.
    pub fn with_key(mode: AesMode, key: &SecureKey) -> Result<Self> {
        Ok(Self {
            cipher: AesCipher::new(mode, key)?,
        })
    }

    /// Returns the mode of this decryptor.
    pub fn mode(&self) -> AesMode {
        self.cipher.mode()
    }

    /// Decrypts one frame.
    ///
    /// # Errors
    /// * [`ErrorKind::DataInvalid`] if the frame is truncated or its length
    ///   prefix disagrees with its size.
    /// * [`ErrorKind::IntegrityFailure`] if the GCM tag does not verify.
    pub fn decrypt(&self, frame: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let tag_length = self.mode().tag_length();
        let ciphertext_length = frame_length(frame)?;

        if ciphertext_length < NONCE_LENGTH + tag_length {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Cipher frame too short: expected at least {} bytes, got {}",
                    NONCE_LENGTH + tag_length,
                    ciphertext_length
                ),
            ));
        }
        if frame.len() - SIZE_LENGTH != ciphertext_length {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Cipher frame length mismatch: prefix says {}, got {}",
                    ciphertext_length,
                    frame.len() - SIZE_LENGTH
                ),
            ));
        }

        let nonce = &frame[SIZE_LENGTH..SIZE_LENGTH + NONCE_LENGTH];
        let body_end = frame.len() - tag_length;
        let mut plaintext = frame[SIZE_LENGTH + NONCE_LENGTH..body_end].to_vec();

        match &self.cipher {
            AesCipher::Gcm(cipher) => {
                cipher.open(nonce, aad, &mut plaintext, &frame[body_end..])?
            }
            AesCipher::Ctr(key) => AesCipher::ctr(key, nonce, &mut plaintext)?,
        }
        Ok(plaintext)
    }
}

/// Reads the length prefix of a frame: the number of bytes that follow it.
pub fn frame_length(frame: &[u8]) -> Result<usize> {
    let prefix: [u8; SIZE_LENGTH] = frame
        .get(..SIZE_LENGTH)
        .and_then(|p| p.try_into().ok())
        .ok_or_else(|| {
            Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Cipher frame too short for length prefix: {} bytes",
                    frame.len()
                ),
            )
        })?;
    Ok(u32::from_le_bytes(prefix) as usize)
}
