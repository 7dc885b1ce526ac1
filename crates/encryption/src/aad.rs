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

//! Module AAD construction.
//!
//! Each encrypted module is bound to its position in the file through its
//! additional authenticated data:
//!
//! ```text
//! file_aad ++ module_type [++ LE16(row_group) ++ LE16(column) [++ LE16(page)]]
//! ```
//!
//! The footer carries no ordinals, data pages and data page headers carry all
//! three, every other module carries the row group and column ordinals.

use crate::{Error, ErrorKind, Result};

/// Kind of module an AAD is built for. The discriminant is the tag byte
/// written into the AAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModuleType {
    /// File footer.
    Footer = 0,
    /// Column chunk metadata.
    ColumnMetaData = 1,
    /// Data page.
    DataPage = 2,
    /// Dictionary page.
    DictionaryPage = 3,
    /// Data page header.
    DataPageHeader = 4,
    /// Dictionary page header.
    DictionaryPageHeader = 5,
    /// Column index.
    ColumnIndex = 6,
    /// Offset index.
    OffsetIndex = 7,
}

impl ModuleType {
    /// Whether the AAD of this module ends with a page ordinal.
    pub fn has_page_ordinal(&self) -> bool {
        matches!(self, Self::DataPage | Self::DataPageHeader)
    }
}

fn ordinal_bytes(ordinal: usize, name: &'static str) -> Result<[u8; 2]> {
    i16::try_from(ordinal)
        .map(|o| o.to_le_bytes())
        .map_err(|_| {
            Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "Encrypted parquet files can't have more than {} {name}s: {ordinal}",
                    i16::MAX
                ),
            )
            .with_context("ordinal", name)
        })
}

/// Builds the AAD of the file footer.
pub fn create_footer_aad(file_aad: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(file_aad.len() + 1);
    aad.extend_from_slice(file_aad);
    aad.push(ModuleType::Footer as u8);
    aad
}

/// Builds the AAD of one module.
///
/// Ordinals that the module type does not carry are ignored.
///
/// # Errors
/// Returns [`ErrorKind::DataInvalid`] if an ordinal that is written does not
/// fit in a signed 16-bit integer.
pub fn create_module_aad(
    file_aad: &[u8],
    module_type: ModuleType,
    row_group_ordinal: usize,
    column_ordinal: usize,
    page_ordinal: usize,
) -> Result<Vec<u8>> {
    if module_type == ModuleType::Footer {
        return Ok(create_footer_aad(file_aad));
    }

    let row_group = ordinal_bytes(row_group_ordinal, "row group")?;
    let column = ordinal_bytes(column_ordinal, "column")?;

    let mut aad = Vec::with_capacity(file_aad.len() + 7);
    aad.extend_from_slice(file_aad);
    aad.push(module_type as u8);
    aad.extend_from_slice(&row_group);
    aad.extend_from_slice(&column);

    if module_type.has_page_ordinal() {
        aad.extend_from_slice(&ordinal_bytes(page_ordinal, "page")?);
    }
    Ok(aad)
}

/// Rewrites the trailing page ordinal of a data page (header) AAD in place.
///
/// Equivalent to rebuilding the AAD with [`create_module_aad`] and the new
/// page ordinal.
pub fn quick_update_page_aad(page_aad: &mut [u8], new_page_ordinal: usize) -> Result<()> {
    let page = ordinal_bytes(new_page_ordinal, "page")?;
    let len = page_aad.len();
    if len < 2 {
        return Err(Error::new(
            ErrorKind::DataInvalid,
            format!("Page AAD too short to carry a page ordinal: {len} bytes"),
        ));
    }
    page_aad[len - 2..].copy_from_slice(&page);
    Ok(())
}
