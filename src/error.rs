//! # Error
//!
//! Errors produced while binding to the client, creating hooks and running synchronized operations

use thiserror::Error;

use crate::memory::MemoryError;

/// Result alias used throughout the crate
pub type Result<T, E = BindingError> = std::result::Result<T, E>;

/// Errors that can occur while binding to the hosted client
#[derive(Debug, Error)]
pub enum BindingError {
    /// A byte pattern was not found inside the module image
    #[error("Could not find the binding {name} using the pattern \"{pattern}\"")]
    BindingNotFound {
        /// Pattern that was searched for
        pattern: String,
        /// Name of the binding the pattern belongs to
        name: String,
    },
    /// An operation depends on a module or hook that was not loaded
    #[error("{message}. Some needed modules ({}) are not loaded", .modules.join(", "))]
    NeededModulesNotInitialized {
        /// Description of what could not be done
        message: String,
        /// Names of the missing modules
        modules: Vec<String>,
    },
    /// A browser module failed during initialization
    #[error("Could not initialize module {module}: {source}")]
    CouldNotInitializeModule {
        /// Name of the module
        module: String,
        /// Reason of the failure
        #[source]
        source: Box<BindingError>,
    },
    /// Several independent operations failed
    #[error("{} errors occurred: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<BindingError>),
    /// A byte pattern could not be parsed
    #[error("Invalid pattern \"{0}\"")]
    InvalidPattern(String),
    /// A function descriptor cannot be expressed in generated code
    #[error("Invalid function descriptor: {0}")]
    InvalidDescriptor(String),
    /// Error while reading or writing memory
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// Error when setting memory protections
    #[error("Error setting memory protections: {0}")]
    Protection(#[from] region::Error),
    /// Error while assembling or relocating machine code
    #[error("Error assembling code: {0}")]
    Assembly(#[from] iced_x86::IcedError),
    /// The hooked function could not be relocated
    #[error("Could not relocate the function at {address:#x}: {reason}")]
    Relocation {
        /// Address of the function
        address: usize,
        /// Reason the prologue could not be moved
        reason: String,
    },
    /// No executable memory is left
    #[error("Could not allocate {0} bytes of executable memory")]
    OutOfMemory(usize),
    /// Generated code can only be executed on 32-bit x86
    #[error("Generated code can only run inside a 32-bit x86 process")]
    UnsupportedArchitecture,
    /// A native function was called with the wrong amount of arguments
    #[error("Expected {expected} arguments, got {given}")]
    ArgumentCount {
        /// Parameter count of the function
        expected: usize,
        /// Argument count that was supplied
        given: usize,
    },
    /// The original function of the hook may not be called directly
    #[error("Calling the original function of {0} is not allowed")]
    NotCallable(&'static str),
    /// A closure panicked
    #[error("Operation panicked: {0}")]
    Panicked(String),
    /// The caller cancelled the operation
    #[error("The operation was cancelled")]
    Cancelled,
    /// The synchronizer dropped the operation before it ran
    #[error("The operation was dropped before it could run")]
    OperationDropped,
}

impl BindingError {
    /// Combines a list of errors, keeping a single error as is
    ///
    /// Returns `Ok` when there are no errors
    pub fn aggregate(mut errors: Vec<BindingError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Aggregate(errors)),
        }
    }

    /// Creates an error telling that the given modules are missing
    pub fn needed_modules<M: Into<String>>(
        message: impl Into<String>,
        modules: impl IntoIterator<Item = M>,
    ) -> Self {
        Self::NeededModulesNotInitialized {
            message: message.into(),
            modules: modules.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates an error from a payload caught by [`std::panic::catch_unwind`]
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::Panicked(panic_message(payload.as_ref()))
    }
}

impl From<std::convert::Infallible> for BindingError {
    fn from(e: std::convert::Infallible) -> Self {
        match e {}
    }
}

/// Extracts the message of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Joins a list of errors for display
fn join_errors(errors: &[BindingError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Converts a missing value into an error naming the module that should have supplied it
pub trait Required<T> {
    /// Returns the value or a [`BindingError::NeededModulesNotInitialized`] naming `module`
    fn required(self, message: &str, module: &str) -> Result<T>;

    /// Returns the value, panicking when it is missing
    fn force(self, module: &str) -> T;
}

impl<T> Required<T> for Option<T> {
    fn required(self, message: &str, module: &str) -> Result<T> {
        self.ok_or_else(|| BindingError::needed_modules(message, [module]))
    }

    fn force(self, module: &str) -> T {
        match self {
            Some(value) => value,
            None => panic!("{module} is not present, cannot force the value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BindingError, Required};

    #[test]
    /// Aggregation keeps single errors and wraps multiple ones
    fn test_aggregate() {
        assert!(BindingError::aggregate(vec![]).is_ok());

        let single = BindingError::aggregate(vec![BindingError::Cancelled]).unwrap_err();
        assert!(matches!(single, BindingError::Cancelled));

        let many = BindingError::aggregate(vec![
            BindingError::Cancelled,
            BindingError::InvalidPattern("zz".into()),
        ])
        .unwrap_err();
        match many {
            BindingError::Aggregate(errors) => assert_eq!(errors.len(), 2),
            e => panic!("unexpected error {e}"),
        }
    }

    #[test]
    /// The missing module message lists every module
    fn test_needed_modules_message() {
        let error = BindingError::needed_modules("Could not start", ["Periodic", "NetworkManager"]);
        assert_eq!(
            error.to_string(),
            "Could not start. Some needed modules (Periodic, NetworkManager) are not loaded"
        );
    }

    #[test]
    /// Missing options turn into module errors
    fn test_required() {
        let present: Option<u32> = Some(5);
        assert_eq!(present.required("x", "Periodic").unwrap(), 5);

        let missing: Option<u32> = None;
        match missing.required("Could not walk", "CharacterManager.Walk") {
            Err(BindingError::NeededModulesNotInitialized { modules, .. }) => {
                assert_eq!(modules, vec!["CharacterManager.Walk".to_string()])
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
