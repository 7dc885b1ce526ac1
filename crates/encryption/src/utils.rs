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

use std::sync::OnceLock;

use crate::Result;

/// Returns the value in `cell`, initializing it with `init` on first use.
///
/// `OnceLock::get_or_try_init` is not stable yet. A failed `init` leaves the
/// cell empty so the next call retries.
pub(crate) fn get_or_try_init<T: Clone>(
    cell: &OnceLock<T>,
    init: impl FnOnce() -> Result<T>,
) -> Result<T> {
    if let Some(value) = cell.get() {
        return Ok(value.clone());
    }
    let value = init()?;
    Ok(cell.get_or_init(|| value).clone())
}

/// Renders key metadata for logs and error context: UTF-8 when printable,
/// length otherwise.
pub(crate) fn display_metadata(metadata: &[u8]) -> String {
    match std::str::from_utf8(metadata) {
        Ok(s) if s.chars().all(|c| !c.is_control()) => s.to_string(),
        _ => format!("<{} bytes>", metadata.len()),
    }
}
