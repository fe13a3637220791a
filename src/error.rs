#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("Circular structure detected (max depth {max_depth} reached)")]
    CircularStructure { max_depth: usize },

    #[error("Not supported: {message}")]
    NotSupported { message: String },

    #[error("Engine failure at {method} {file}:{line}: {message}")]
    EngineFailure {
        message: String,
        file: String,
        line: usize,
        method: String,
    },

    #[error("Converter failure: {message}")]
    ConverterFailure { message: String },

    #[error("Invalid handle {handle}")]
    InvalidHandle { handle: u64 },

    #[error("Callback '{name}' failed: {message}")]
    Callback { name: String, message: String },

    #[error("serde_json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of a [`BridgeError`], for callers that only care about the category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CircularStructure,
    NotSupported,
    Engine,
    Converter,
    Handle,
    Callback,
    Json,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::CircularStructure { .. } => ErrorKind::CircularStructure,
            BridgeError::NotSupported { .. } => ErrorKind::NotSupported,
            BridgeError::EngineFailure { .. } => ErrorKind::Engine,
            BridgeError::ConverterFailure { .. } => ErrorKind::Converter,
            BridgeError::InvalidHandle { .. } => ErrorKind::Handle,
            BridgeError::Callback { .. } => ErrorKind::Callback,
            BridgeError::Json(_) => ErrorKind::Json,
        }
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        BridgeError::NotSupported { message: message.into() }
    }

    pub fn converter(message: impl Into<String>) -> Self {
        BridgeError::ConverterFailure { message: message.into() }
    }
}

// Macro that constructs an EngineFailure using the compile-time caller
// location and the provided message. Using a macro (rather than a
// function) ensures `file!()` and `line!()` expand to the site where the
// macro is invoked.
#[macro_export]
macro_rules! engine_error_here {
    ($msg:expr) => {
        $crate::BridgeError::EngineFailure {
            message: $msg.to_string(),
            file: file!().to_string(),
            line: line!() as usize,
            method: $crate::function_name!().to_string(),
        }
    };
}

#[macro_export]
macro_rules! raise_engine_error {
    ($msg:expr) => {
        return Err($crate::engine_error_here!($msg))
    };
}

#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        // remove the trailing "::f"
        &name[..name.len() - 3]
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_records_call_site() {
        let err = engine_error_here!("boom");
        match &err {
            BridgeError::EngineFailure { message, file, method, .. } => {
                assert_eq!(message, "boom");
                assert!(file.ends_with("error.rs"));
                assert!(method.contains("test_engine_error_records_call_site"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::Engine);
    }

    #[test]
    fn test_circular_structure_message() {
        let err = BridgeError::CircularStructure { max_depth: 20 };
        assert_eq!(err.to_string(), "Circular structure detected (max depth 20 reached)");
        assert_eq!(err.kind(), ErrorKind::CircularStructure);
    }
}
