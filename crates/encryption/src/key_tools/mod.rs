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

//! Envelope encryption helpers: data keys are wrapped by a KMS master key and
//! the wrapped material travels as column or footer key metadata, or lives in
//! an external store referenced by a short key name.

mod cache;
mod key_management;
mod key_material;
mod key_store;
mod manager;

pub use cache::KeyCache;
pub use key_management::{InMemoryKms, KmsClient};
pub use key_material::KeyMaterial;
pub use key_store::{InMemoryKeyStore, WrappedKeyStore};
pub use manager::{DataKey, WrappedKeyManager, WrappedKeyRetriever};
