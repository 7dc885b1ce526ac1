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

//! Integration tests writing and reading simulated encrypted files.

use std::collections::HashMap;
use std::sync::Arc;

use iceberg_encryption::aad::{
    create_footer_aad, create_module_aad, quick_update_page_aad, ModuleType,
};
use iceberg_encryption::key_tools::{
    InMemoryKeyStore, InMemoryKms, WrappedKeyManager, WrappedKeyStore,
};
use iceberg_encryption::{
    AadPrefixRetriever, ColumnEncryptionProperties, ColumnPath, DecryptionState,
    EncryptionAlgorithm, ErrorKind, FileDecryptionProperties, FileDecryptor,
    FileEncryptionProperties, FileEncryptor, ParquetCipher, Result, StringKeyIdRetriever,
};
use pretty_assertions::assert_eq;

const FOOTER_KEY: &[u8] = b"0123456789012345";
const COLUMN_KEY_1: &[u8] = b"1234567890123450";
const COLUMN_KEY_2: &[u8] = b"1234567890123451";
const FOOTER: &[u8] = b"file footer: schema, row groups, column chunks";
const COLUMNS: [&str; 4] = ["boolean_field", "int32_field", "double_field", "float_field"];
const PAGES_PER_CHUNK: usize = 3;
const ROW_GROUPS: usize = 2;

struct ColumnChunk {
    path: ColumnPath,
    encrypted: bool,
    encrypted_with_footer_key: bool,
    key_metadata: Option<Vec<u8>>,
    metadata: Vec<u8>,
    pages: Vec<Vec<u8>>,
}

struct WrittenFile {
    algorithm: EncryptionAlgorithm,
    encrypted_footer: bool,
    footer_key_metadata: Option<Vec<u8>>,
    signing_key_metadata: Option<Vec<u8>>,
    footer: Vec<u8>,
    signature: Option<Vec<u8>>,
    row_groups: Vec<Vec<ColumnChunk>>,
}

fn page(row_group: usize, column: usize, page: usize) -> Vec<u8> {
    format!("row group {row_group}, column {column}, page {page}").into_bytes()
}

fn column_metadata(path: &str) -> Vec<u8> {
    format!("metadata of {path}").into_bytes()
}

fn write_file(properties: FileEncryptionProperties) -> Result<WrittenFile> {
    let mut encryptor = FileEncryptor::new(Arc::new(properties));
    let file_aad = encryptor.file_aad().to_vec();

    let mut row_groups = Vec::with_capacity(ROW_GROUPS);
    for rg in 0..ROW_GROUPS {
        let mut chunks = Vec::with_capacity(COLUMNS.len());
        for (ordinal, name) in COLUMNS.iter().enumerate() {
            let path = ColumnPath::from_dot_string(name);
            let setup = encryptor.column_setup(&path, ordinal)?;

            let (metadata, pages) = match (setup.data_encryptor(), setup.metadata_encryptor()) {
                (Some(data), Some(metadata)) => {
                    let metadata_aad =
                        create_module_aad(&file_aad, ModuleType::ColumnMetaData, rg, ordinal, 0)?;
                    let mut page_aad =
                        create_module_aad(&file_aad, ModuleType::DataPage, rg, ordinal, 0)?;
                    let mut pages = Vec::with_capacity(PAGES_PER_CHUNK);
                    for p in 0..PAGES_PER_CHUNK {
                        quick_update_page_aad(&mut page_aad, p)?;
                        pages.push(data.encrypt(&page(rg, ordinal, p), &page_aad)?);
                    }
                    (
                        metadata.encrypt(&column_metadata(name), &metadata_aad)?,
                        pages,
                    )
                }
                _ => (
                    column_metadata(name),
                    (0..PAGES_PER_CHUNK).map(|p| page(rg, ordinal, p)).collect(),
                ),
            };

            chunks.push(ColumnChunk {
                path,
                encrypted: setup.is_encrypted(),
                encrypted_with_footer_key: setup.is_encrypted_with_footer_key(),
                key_metadata: setup.key_metadata().map(<[u8]>::to_vec),
                metadata,
                pages,
            });
        }
        row_groups.push(chunks);
    }

    let properties = encryptor.properties();
    let (footer, signature) = match encryptor.footer_encryptor()? {
        Some(footer_encryptor) => (
            footer_encryptor.encrypt(FOOTER, &create_footer_aad(&file_aad))?,
            None,
        ),
        None if properties.footer_signing_key().is_some() => {
            (FOOTER.to_vec(), Some(encryptor.sign_footer(FOOTER)?))
        }
        None => (FOOTER.to_vec(), None),
    };

    Ok(WrittenFile {
        algorithm: properties.algorithm().clone(),
        encrypted_footer: properties.encrypted_footer(),
        footer_key_metadata: properties.footer_key_metadata().map(<[u8]>::to_vec),
        signing_key_metadata: properties.footer_signing_key_metadata().map(<[u8]>::to_vec),
        footer,
        signature,
        row_groups,
    })
}

/// Decrypted pages per (row group, column); `None` for hidden columns.
type ReadResult = HashMap<(usize, String), Option<Vec<Vec<u8>>>>;

fn read_file(file: &WrittenFile, properties: FileDecryptionProperties) -> Result<ReadResult> {
    let mut decryptor = FileDecryptor::new(Arc::new(properties));
    let mut result = HashMap::new();

    for (rg, chunks) in file.row_groups.iter().enumerate() {
        decryptor.set_file_crypto_metadata(
            &file.algorithm,
            file.encrypted_footer,
            file.footer_key_metadata.as_deref(),
        )?;
        let file_aad = decryptor.file_aad()?.to_vec();

        if rg == 0 {
            match decryptor.footer_decryptor()? {
                Some(footer) => {
                    let plaintext = footer.decrypt(&file.footer, &create_footer_aad(&file_aad))?;
                    assert_eq!(plaintext, FOOTER);
                }
                None => decryptor.verify_plaintext_footer_signature(
                    &file.footer,
                    file.signature.as_deref(),
                    file.signing_key_metadata.as_deref(),
                )?,
            }
        }

        for (ordinal, chunk) in chunks.iter().enumerate() {
            let setup = decryptor.set_column_crypto_metadata(
                &chunk.path,
                chunk.encrypted,
                chunk.encrypted_with_footer_key,
                chunk.key_metadata.as_deref(),
                ordinal,
            )?;

            let pages = if !setup.is_key_available() {
                None
            } else if let (Some(data), Some(metadata)) =
                (setup.data_decryptor(), setup.metadata_decryptor())
            {
                let metadata_aad =
                    create_module_aad(&file_aad, ModuleType::ColumnMetaData, rg, ordinal, 0)?;
                assert_eq!(
                    metadata.decrypt(&chunk.metadata, &metadata_aad)?,
                    column_metadata(&chunk.path.to_dot_string())
                );
                let mut pages = Vec::with_capacity(chunk.pages.len());
                for (p, frame) in chunk.pages.iter().enumerate() {
                    let aad = create_module_aad(&file_aad, ModuleType::DataPage, rg, ordinal, p)?;
                    pages.push(data.decrypt(frame, &aad)?);
                }
                Some(pages)
            } else {
                Some(chunk.pages.clone())
            };
            result.insert((rg, chunk.path.to_dot_string()), pages);
        }
        decryptor.all_column_crypto_metadata_processed();
    }
    assert_eq!(decryptor.state(), DecryptionState::ColumnsFinalized);
    Ok(result)
}

fn expected_pages(row_group: usize, column: usize) -> Vec<Vec<u8>> {
    (0..PAGES_PER_CHUNK)
        .map(|p| page(row_group, column, p))
        .collect()
}

fn assert_readable(result: &ReadResult, column: &str) {
    let ordinal = COLUMNS.iter().position(|c| *c == column).unwrap();
    for rg in 0..ROW_GROUPS {
        assert_eq!(
            result[&(rg, column.to_string())],
            Some(expected_pages(rg, ordinal)),
            "{column} in row group {rg}"
        );
    }
}

fn column(path: &str, key: &[u8], key_id: &str) -> ColumnEncryptionProperties {
    ColumnEncryptionProperties::builder(path)
        .with_key(key.to_vec())
        .with_key_id(key_id)
        .build()
        .unwrap()
}

fn all_keys_retriever() -> Arc<StringKeyIdRetriever> {
    let retriever = Arc::new(StringKeyIdRetriever::new());
    retriever.put_key("kf", FOOTER_KEY.to_vec());
    retriever.put_key("kc1", COLUMN_KEY_1.to_vec());
    retriever.put_key("kc2", COLUMN_KEY_2.to_vec());
    retriever
}

fn uniform_encryption_with_column_keys(cipher: ParquetCipher) -> FileEncryptionProperties {
    FileEncryptionProperties::builder()
        .with_footer_key(FOOTER_KEY.to_vec())
        .with_footer_key_id("kf")
        .with_algorithm(cipher)
        .with_column(column("double_field", COLUMN_KEY_1, "kc1"))
        .with_column(column("float_field", COLUMN_KEY_2, "kc2"))
        .build()
        .unwrap()
}

#[test]
fn test_encrypted_footer_with_column_keys_roundtrip() {
    for cipher in [ParquetCipher::AesGcmV1, ParquetCipher::AesGcmCtrV1] {
        let file = write_file(uniform_encryption_with_column_keys(cipher)).unwrap();
        assert!(file.row_groups[0].iter().all(|chunk| chunk.encrypted));
        assert_ne!(file.footer, FOOTER);

        let properties = FileDecryptionProperties::builder()
            .with_key_retriever(all_keys_retriever())
            .build()
            .unwrap();
        let result = read_file(&file, properties).unwrap();
        for name in COLUMNS {
            assert_readable(&result, name);
        }
    }
}

#[test]
fn test_explicit_keys_without_retriever() {
    let file = write_file(uniform_encryption_with_column_keys(ParquetCipher::AesGcmV1)).unwrap();
    let properties = FileDecryptionProperties::builder()
        .with_footer_key(FOOTER_KEY.to_vec())
        .with_column_key("double_field", COLUMN_KEY_1.to_vec())
        .with_column_key("float_field", COLUMN_KEY_2.to_vec())
        .build()
        .unwrap();
    let result = read_file(&file, properties).unwrap();
    for name in COLUMNS {
        assert_readable(&result, name);
    }
}

#[test]
fn test_hidden_column_is_skipped() {
    let file = write_file(uniform_encryption_with_column_keys(ParquetCipher::AesGcmV1)).unwrap();

    let retriever = Arc::new(StringKeyIdRetriever::new());
    retriever.put_key("kf", FOOTER_KEY.to_vec());
    retriever.put_key("kc1", COLUMN_KEY_1.to_vec());
    let properties = FileDecryptionProperties::builder()
        .with_key_retriever(retriever)
        .build()
        .unwrap();

    let result = read_file(&file, properties).unwrap();
    for rg in 0..ROW_GROUPS {
        assert_eq!(result[&(rg, "float_field".to_string())], None);
    }
    for name in ["boolean_field", "int32_field", "double_field"] {
        assert_readable(&result, name);
    }
}

#[test]
fn test_missing_footer_key_fails() {
    let file = write_file(uniform_encryption_with_column_keys(ParquetCipher::AesGcmV1)).unwrap();
    let retriever = Arc::new(StringKeyIdRetriever::new());
    retriever.put_key("kc1", COLUMN_KEY_1.to_vec());
    let properties = FileDecryptionProperties::builder()
        .with_key_retriever(retriever)
        .build()
        .unwrap();

    let err = read_file(&file, properties).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingKey);
}

#[test]
fn test_wrong_footer_key_fails_integrity() {
    let file = write_file(uniform_encryption_with_column_keys(ParquetCipher::AesGcmV1)).unwrap();
    let properties = FileDecryptionProperties::builder()
        .with_footer_key(COLUMN_KEY_2.to_vec())
        .with_key_retriever(all_keys_retriever())
        .build()
        .unwrap();

    let err = read_file(&file, properties).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegrityFailure);
}

#[test]
fn test_aad_prefix() {
    let properties = FileEncryptionProperties::builder()
        .with_footer_key(FOOTER_KEY.to_vec())
        .with_footer_key_id("kf")
        .with_aad_prefix(b"tester".to_vec())
        .with_algorithm(ParquetCipher::AesGcmCtrV1)
        .build()
        .unwrap();
    let file = write_file(properties).unwrap();
    assert_eq!(file.algorithm.aad_metadata(), None);

    let reader = |prefix: &[u8]| {
        FileDecryptionProperties::builder()
            .with_key_retriever(all_keys_retriever())
            .with_aad_prefix(prefix.to_vec())
            .build()
            .unwrap()
    };

    let result = read_file(&file, reader(b"tester")).unwrap();
    for name in COLUMNS {
        assert_readable(&result, name);
    }

    let err = read_file(&file, reader(b"other")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegrityFailure);
}

#[test]
fn test_aad_prefix_retriever() {
    struct FileNames;

    impl AadPrefixRetriever for FileNames {
        fn retrieve_aad_prefix(&self, aad_metadata: &[u8]) -> Result<Vec<u8>> {
            Ok([b"/warehouse/".as_slice(), aad_metadata].concat())
        }
    }

    let properties = FileEncryptionProperties::builder()
        .with_footer_key(FOOTER_KEY.to_vec())
        .with_footer_key_id("kf")
        .with_aad_prefix(b"/warehouse/part-0.parquet".to_vec())
        .with_aad_metadata(b"part-0.parquet".to_vec())
        .build()
        .unwrap();
    let file = write_file(properties).unwrap();

    let properties = FileDecryptionProperties::builder()
        .with_key_retriever(all_keys_retriever())
        .with_aad_prefix_retriever(Arc::new(FileNames))
        .build()
        .unwrap();
    let result = read_file(&file, properties).unwrap();
    assert_readable(&result, "int32_field");
}

fn plaintext_footer_properties() -> FileEncryptionProperties {
    FileEncryptionProperties::builder()
        .with_encrypt_the_rest(false)
        .with_column(column("double_field", COLUMN_KEY_1, "kc1"))
        .with_column(column("float_field", COLUMN_KEY_2, "kc2"))
        .with_footer_signing_key(FOOTER_KEY.to_vec())
        .with_footer_signing_key_metadata(b"kf".to_vec())
        .build()
        .unwrap()
}

#[test]
fn test_plaintext_footer_signature() {
    let file = write_file(plaintext_footer_properties()).unwrap();
    assert!(!file.encrypted_footer);
    assert_eq!(file.footer, FOOTER);
    assert!(!file.row_groups[0][0].encrypted);

    let properties = FileDecryptionProperties::builder()
        .with_key_retriever(all_keys_retriever())
        .with_check_footer_integrity(true)
        .build()
        .unwrap();
    let result = read_file(&file, properties).unwrap();
    for name in COLUMNS {
        assert_readable(&result, name);
    }
}

#[test]
fn test_tampered_plaintext_footer() {
    let mut file = write_file(plaintext_footer_properties()).unwrap();
    file.footer[0] ^= 1;

    let checked = FileDecryptionProperties::builder()
        .with_key_retriever(all_keys_retriever())
        .with_check_footer_integrity(true)
        .build()
        .unwrap();
    let err = read_file(&file, checked).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegrityFailure);

    let unchecked = FileDecryptionProperties::builder()
        .with_key_retriever(all_keys_retriever())
        .with_check_footer_integrity(false)
        .build()
        .unwrap();
    assert!(read_file(&file, unchecked).is_ok());

    let by_default = FileDecryptionProperties::builder()
        .with_key_retriever(all_keys_retriever())
        .build()
        .unwrap();
    assert!(read_file(&file, by_default).is_ok());
}

#[test]
fn test_unsigned_plaintext_footer_fails_when_checked() {
    let properties = FileEncryptionProperties::builder()
        .with_encrypt_the_rest(false)
        .with_column(column("double_field", COLUMN_KEY_1, "kc1"))
        .build()
        .unwrap();
    let file = write_file(properties).unwrap();
    assert!(file.signature.is_none());

    let properties = FileDecryptionProperties::builder()
        .with_key_retriever(all_keys_retriever())
        .with_check_footer_integrity(true)
        .build()
        .unwrap();
    let err = read_file(&file, properties).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegrityFailure);
}

#[test]
fn test_encryption_properties_validation() {
    let err = FileEncryptionProperties::builder()
        .with_column(column("double_field", COLUMN_KEY_1, "kc1"))
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = FileEncryptionProperties::builder()
        .with_encrypt_the_rest(false)
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = FileEncryptionProperties::builder()
        .with_footer_key(b"0123456789".to_vec())
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_wrapped_keys_through_key_store() {
    let kms = Arc::new(InMemoryKms::new());
    kms.add_master_key("footer-master", vec![1u8; 32]).unwrap();
    kms.add_master_key("column-master", vec![2u8; 16]).unwrap();
    let store = Arc::new(InMemoryKeyStore::new());

    let mut manager = WrappedKeyManager::new(
        kms.clone(),
        false,
        Some(store.clone() as Arc<dyn WrappedKeyStore>),
        Some("part-0.parquet".to_string()),
    )
    .unwrap();
    let (footer_key, footer_metadata) = manager.generate_key("footer-master").unwrap().into_parts();
    let (column_key, column_metadata) = manager.generate_key("column-master").unwrap().into_parts();
    assert_eq!(footer_metadata, b"k0");
    assert_eq!(column_metadata, b"k1");

    let properties = FileEncryptionProperties::builder()
        .with_footer_key(footer_key.as_bytes().to_vec())
        .with_footer_key_metadata(footer_metadata)
        .with_column(
            ColumnEncryptionProperties::builder("double_field")
                .with_key(column_key.as_bytes().to_vec())
                .with_key_metadata(column_metadata)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let file = write_file(properties).unwrap();

    let reader_manager = WrappedKeyManager::new(
        kms,
        false,
        Some(store as Arc<dyn WrappedKeyStore>),
        Some("part-0.parquet".to_string()),
    )
    .unwrap();
    let properties = FileDecryptionProperties::builder()
        .with_key_retriever(Arc::new(reader_manager.key_retriever()))
        .build()
        .unwrap();
    let result = read_file(&file, properties).unwrap();
    for name in COLUMNS {
        assert_readable(&result, name);
    }
}

#[test]
fn test_wrapped_keys_embedded_in_metadata() {
    let kms = Arc::new(InMemoryKms::new_with_master_key("master", vec![3u8; 24]).unwrap());
    let mut manager = WrappedKeyManager::new(kms.clone(), false, None, None).unwrap();
    let data_key = manager.generate_key("master").unwrap();
    assert!(std::str::from_utf8(data_key.metadata())
        .unwrap()
        .ends_with(":master"));

    let properties = FileEncryptionProperties::builder()
        .with_footer_key(data_key.key().as_bytes().to_vec())
        .with_footer_key_metadata(data_key.metadata().to_vec())
        .build()
        .unwrap();
    let file = write_file(properties).unwrap();

    let retriever = WrappedKeyManager::new(kms, false, None, None)
        .unwrap()
        .key_retriever();
    let properties = FileDecryptionProperties::builder()
        .with_key_retriever(Arc::new(retriever))
        .build()
        .unwrap();
    let result = read_file(&file, properties).unwrap();
    assert_readable(&result, "boolean_field");
}

#[test]
fn test_reader_reuse_checks_across_row_groups() {
    let mut file =
        write_file(uniform_encryption_with_column_keys(ParquetCipher::AesGcmV1)).unwrap();
    file.row_groups[1][2].encrypted_with_footer_key = true;
    file.row_groups[1][2].key_metadata = None;

    let properties = FileDecryptionProperties::builder()
        .with_key_retriever(all_keys_retriever())
        .build()
        .unwrap();
    let err = read_file(&file, properties).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReuseMismatch);

    let mut file =
        write_file(uniform_encryption_with_column_keys(ParquetCipher::AesGcmV1)).unwrap();
    file.row_groups[1][0].path = ColumnPath::from_dot_string("renamed_field");
    let properties = FileDecryptionProperties::builder()
        .with_key_retriever(all_keys_retriever())
        .build()
        .unwrap();
    let err = read_file(&file, properties).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownColumn);
}
