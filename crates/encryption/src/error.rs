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

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::fmt::{Debug, Display, Formatter};

/// Result that is a wrapper of `Result<T, iceberg_encryption::Error>`
pub type Result<T> = std::result::Result<T, Error>;

/// ErrorKind is all kinds of Error raised by the encryption layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The operation was rejected because the object is not in a state required
    /// for the operation's execution, e.g. a column lookup before the file crypto
    /// metadata was registered.
    PreconditionFailed,

    /// Something went wrong in an underlying primitive and there is nothing
    /// more specific to report.
    Unexpected,

    /// Encrypted input is malformed: a truncated cipher frame, unparsable key
    /// material or an ordinal that does not fit the AAD layout.
    DataInvalid,

    /// Illegal combination of settings or an invalid key length, reported when
    /// properties are built.
    Configuration,

    /// A key required to proceed could not be resolved.
    MissingKey,

    /// Crypto metadata seen while reusing a decryptor within one file disagrees
    /// with what was recorded on first use.
    ReuseMismatch,

    /// A column that was not part of the first row group shows up after column
    /// discovery was finalized.
    UnknownColumn,

    /// Lookup of something that was never registered.
    NotFound,

    /// Authentication tag mismatch, or a plaintext footer signature that could
    /// not be verified while integrity checking was requested.
    IntegrityFailure,

    /// The requested operation is not supported, e.g. a KMS client that cannot
    /// wrap keys on the server side.
    FeatureUnsupported,
}

impl ErrorKind {
    /// Convert self into static str.
    pub fn into_static(self) -> &'static str {
        self.into()
    }
}

impl From<ErrorKind> for &'static str {
    fn from(v: ErrorKind) -> &'static str {
        match v {
            ErrorKind::PreconditionFailed => "PreconditionFailed",
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::DataInvalid => "DataInvalid",
            ErrorKind::Configuration => "Configuration",
            ErrorKind::MissingKey => "MissingKey",
            ErrorKind::ReuseMismatch => "ReuseMismatch",
            ErrorKind::UnknownColumn => "UnknownColumn",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::IntegrityFailure => "IntegrityFailure",
            ErrorKind::FeatureUnsupported => "FeatureUnsupported",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.into_static())
    }
}

/// Error is the error struct returned by all functions of this crate.
///
/// ## Display
///
/// Error can be displayed in two ways:
///
/// - Via `Display`: like `err.to_string()` or `format!("{err}")`
///
/// Error will be printed in a single line:
///
/// ```shell
/// MissingKey, context: { column: a.b } => Footer decryption key unavailable, source: unknown key id
/// ```
///
/// - Via `Debug`: like `format!("{err:?}")`
///
/// Error will be printed in multi lines with more details and backtraces (if captured):
///
/// ```shell
/// MissingKey => Footer decryption key unavailable
///
/// Context:
///    column: a.b
///
/// Source: unknown key id
///
/// Backtrace:
///    0: iceberg_encryption::error::Error::new
///              at ./src/error.rs:160:24
///    ...
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,

    context: Vec<(&'static str, String)>,

    source: Option<anyhow::Error>,
    backtrace: Backtrace,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if !self.context.is_empty() {
            write!(f, ", context: {{ ")?;
            write!(
                f,
                "{}",
                self.context
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )?;
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        if let Some(source) = &self.source {
            write!(f, ", source: {source}")?;
        }

        Ok(())
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // If alternate has been specified, we will print like Debug.
        if f.alternate() {
            let mut de = f.debug_struct("Error");
            de.field("kind", &self.kind);
            de.field("message", &self.message);
            de.field("context", &self.context);
            de.field("source", &self.source);
            de.field("backtrace", &self.backtrace);
            return de.finish();
        }

        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        writeln!(f)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "Context:")?;
            for (k, v) in self.context.iter() {
                writeln!(f, "   {k}: {v}")?;
            }
        }
        if let Some(source) = &self.source {
            writeln!(f)?;
            writeln!(f, "Source: {source:#}")?;
        }

        if self.backtrace.status() == BacktraceStatus::Captured {
            writeln!(f)?;
            writeln!(f, "Backtrace:")?;
            writeln!(f, "{}", self.backtrace)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|v| v.as_ref())
    }
}

impl Error {
    /// Create a new Error with error kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::default(),

            source: None,
            // `Backtrace::capture()` will check if backtrace has been enabled
            // internally. It's zero cost if backtrace is disabled.
            backtrace: Backtrace::capture(),
        }
    }

    /// Add more context in error.
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context.push((key, value.into()));
        self
    }

    /// Set source for error.
    ///
    /// # Notes
    ///
    /// If the source has been set, we will raise a panic here.
    pub fn with_source(mut self, src: impl Into<anyhow::Error>) -> Self {
        debug_assert!(self.source.is_none(), "the source error has been set");

        self.source = Some(src.into());
        self
    }

    /// Set the backtrace for error.
    ///
    /// This function is served as testing purpose and not intended to be called
    /// by users.
    #[cfg(test)]
    fn with_backtrace(mut self, backtrace: Backtrace) -> Self {
        self.backtrace = backtrace;
        self
    }

    /// Return error's backtrace.
    ///
    /// If you just want to print error with backtrace, use `Debug`, like `format!("{err:?}")`.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Return error's kind.
    ///
    /// Callers use this to tell an inaccessible column from a corrupt file.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Return error's message.
    #[inline]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }
}

macro_rules! define_from_err {
    ($source: path, $error_kind: path, $msg: expr) => {
        impl std::convert::From<$source> for crate::error::Error {
            fn from(v: $source) -> Self {
                Self::new($error_kind, $msg).with_source(v)
            }
        }
    };
}

define_from_err!(
    base64::DecodeError,
    ErrorKind::DataInvalid,
    "Failed to decode base64 key material"
);

define_from_err!(
    std::string::FromUtf8Error,
    ErrorKind::DataInvalid,
    "handling invalid utf-8 characters"
);

/// Helper macro to check configuration arguments.
///
/// Following example checks `a > 0`, otherwise returns a configuration error.
/// ```ignore
/// ensure_config!(a > 0, "{} is not positive.", a);
/// ```
#[macro_export]
macro_rules! ensure_config {
    ($cond: expr, $fmt: literal $(, $arg:expr)* $(,)?) => {
        if !$cond {
            return Err($crate::Error::new(
                $crate::ErrorKind::Configuration,
                format!($fmt $(, $arg)*),
            ));
        }
    };
}
