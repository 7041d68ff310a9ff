//! DOMException-style errors
//!
//! Every fallible WebCodecs operation reports one of the DOMException names
//! the WebCodecs API uses, so callers can match on `Error::name()` the same
//! way script code checks `error.name`.
//! See: https://developer.mozilla.org/en-US/docs/Web/API/DOMException

use std::sync::PoisonError;

use crate::codec::CodecError;

/// DOMException error names used by WebCodecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DOMExceptionName {
  /// Encoding or decoding operation failed
  EncodingError,
  /// Unsupported codec or configuration
  NotSupportedError,
  /// Wrong state (e.g., operating on closed object)
  InvalidStateError,
  /// Invalid data format
  DataError,
  /// Operation was aborted
  AbortError,
  /// Missing or malformed argument
  TypeError,
  /// Constraint not satisfied
  ConstraintError,
}

impl DOMExceptionName {
  pub fn as_str(&self) -> &'static str {
    match self {
      DOMExceptionName::EncodingError => "EncodingError",
      DOMExceptionName::NotSupportedError => "NotSupportedError",
      DOMExceptionName::InvalidStateError => "InvalidStateError",
      DOMExceptionName::DataError => "DataError",
      DOMExceptionName::AbortError => "AbortError",
      DOMExceptionName::TypeError => "TypeError",
      DOMExceptionName::ConstraintError => "ConstraintError",
    }
  }
}

impl std::fmt::Display for DOMExceptionName {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Error delivered by WebCodecs operations and error callbacks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct Error {
  name: DOMExceptionName,
  message: String,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  pub fn new(name: DOMExceptionName, message: impl Into<String>) -> Self {
    Self {
      name,
      message: message.into(),
    }
  }

  pub fn name(&self) -> DOMExceptionName {
    self.name
  }

  pub fn message(&self) -> &str {
    &self.message
  }

  /// Map a codec failure on the decode path
  pub(crate) fn from_decode(err: CodecError) -> Self {
    match err {
      CodecError::InvalidData(msg) | CodecError::Bitstream(msg) => data_error(&msg),
      other => other.into(),
    }
  }
}

impl From<CodecError> for Error {
  fn from(err: CodecError) -> Self {
    match err {
      CodecError::CodecNotFound(codec) => {
        not_supported_error(&format!("Unsupported codec: {}", codec))
      }
      other => encoding_error(&other.to_string()),
    }
  }
}

impl<T> From<PoisonError<T>> for Error {
  fn from(_: PoisonError<T>) -> Self {
    tracing::warn!(target: "webcodecs", "lock poisoned");
    encoding_error("Lock poisoned")
  }
}

/// Create an error with DOMException-style naming
///
/// # Example
/// ```ignore
/// return Err(dom_exception(DOMExceptionName::NotSupportedError, "Codec not supported"));
/// ```
pub fn dom_exception(name: DOMExceptionName, message: &str) -> Error {
  Error::new(name, message)
}

// ============================================================================
// Helpers
// ============================================================================

/// Codec, configuration or feature is not supported
pub fn not_supported_error(message: &str) -> Error {
  dom_exception(DOMExceptionName::NotSupportedError, message)
}

/// Operating on a closed object or in the wrong state
pub fn invalid_state_error(message: &str) -> Error {
  dom_exception(DOMExceptionName::InvalidStateError, message)
}

/// Encoding or decoding operation failed
pub fn encoding_error(message: &str) -> Error {
  dom_exception(DOMExceptionName::EncodingError, message)
}

/// Input data is malformed
pub fn data_error(message: &str) -> Error {
  dom_exception(DOMExceptionName::DataError, message)
}

pub fn abort_error(message: &str) -> Error {
  dom_exception(DOMExceptionName::AbortError, message)
}

/// Missing or invalid argument, including out-of-range values
pub fn type_error(message: &str) -> Error {
  dom_exception(DOMExceptionName::TypeError, message)
}

pub fn constraint_error(message: &str) -> Error {
  dom_exception(DOMExceptionName::ConstraintError, message)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_display_matches_dom_exception_format() {
    let err = invalid_state_error("AudioData is closed");
    assert_eq!(err.to_string(), "InvalidStateError: AudioData is closed");
    assert_eq!(err.name(), DOMExceptionName::InvalidStateError);
    assert_eq!(err.message(), "AudioData is closed");
  }

  #[test]
  fn test_codec_error_mapping() {
    let err: Error = CodecError::CodecNotFound("avc1.42001E".into()).into();
    assert_eq!(err.name(), DOMExceptionName::NotSupportedError);

    let err: Error = CodecError::Bitstream("bad sync".into()).into();
    assert_eq!(err.name(), DOMExceptionName::EncodingError);

    let err = Error::from_decode(CodecError::Bitstream("bad sync".into()));
    assert_eq!(err.name(), DOMExceptionName::DataError);
  }

  #[test]
  fn test_poisoned_lock_is_encoding_error() {
    let lock = std::sync::Arc::new(std::sync::Mutex::new(()));
    let cloned = lock.clone();
    let _ = std::thread::spawn(move || {
      let _guard = cloned.lock().unwrap();
      panic!("poison");
    })
    .join();
    let err: Error = lock.lock().unwrap_err().into();
    assert_eq!(err.name(), DOMExceptionName::EncodingError);
  }
}
