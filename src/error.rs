use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Every error the relocation core can return.
///
/// Unresolved references and ambiguous reflective calls are not errors: they are
/// reported as [`crate::diagnostic::Diagnostic`]s and the run keeps going. The
/// variants below are fatal and end the current run.
///
/// # Error Categories
///
/// ## Input Errors
/// - [`Error::Malformed`] - Class file bytes that cannot be decoded
/// - [`Error::InvalidDescriptor`] - Descriptor or signature text outside the grammar
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// ## Structural IR Errors
/// - [`Error::InvalidInsn`] - Opcode and operand combination that cannot exist
/// - [`Error::InvalidFrame`] - Stack map frame outside its allowed shape
/// - [`Error::AlreadyOwned`] / [`Error::NotOwned`] - Ownership claim violations
/// - [`Error::LabelAlreadyBound`] - A label attached to a second instruction
///
/// ## Configuration Errors
/// - [`Error::DuplicateMapping`] - Two relocation entries for the same prefix
/// - [`Error::EmptyMapping`] - A relocation entry whose prefix is empty
/// - [`Error::DuplicatePlugin`] / [`Error::UnknownPlugin`] / [`Error::PluginCycle`] - Plugin registry misuse
/// - [`Error::NotRelocationPrimitive`] - Excluding a value that cannot be relocated
/// - [`Error::InvalidReflectionMapping`] - Reflection mapping parameter of the wrong type
///
/// ## Run Outcome
/// - [`Error::Diagnostic`] - An error diagnostic raised by a throwing handler
/// - [`Error::ErrorsFound`] - The run finished with unsuppressed error diagnostics
#[derive(Error, Debug)]
pub enum Error {
    /// The class file is damaged and could not be decoded.
    ///
    /// Carries the source location in this crate where the problem was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A descriptor or generic signature does not follow the class file grammar.
    #[error("invalid descriptor '{text}': {reason}")]
    InvalidDescriptor {
        /// The rejected text
        text: String,
        /// What the parser expected
        reason: String,
    },

    /// An instruction was built with operands its opcode family cannot take.
    #[error("invalid instruction: {0}")]
    InvalidInsn(String),

    /// A stack map frame was built outside its allowed shape.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The node is already attached to another container.
    #[error("{what} is already owned by another container")]
    AlreadyOwned {
        /// Kind of node being attached
        what: &'static str,
    },

    /// The node is not attached to the container that tried to release it.
    #[error("{what} is not owned by this container")]
    NotOwned {
        /// Kind of node being detached
        what: &'static str,
    },

    /// The label already marks another instruction.
    #[error("label is already bound to an instruction")]
    LabelAlreadyBound,

    /// Two relocation entries share the same source prefix.
    #[error("duplicate relocation mapping for '{0}'")]
    DuplicateMapping(String),

    /// The `from` side of a relocation entry normalized to nothing.
    #[error("relocation mapping '{0}' has an empty prefix")]
    EmptyMapping(String),

    /// A plugin name was registered twice.
    #[error("plugin '{0}' is registered twice")]
    DuplicatePlugin(String),

    /// A plugin was requested by name but never registered.
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    /// Plugin dependencies form a cycle through the named plugin.
    #[error("plugin '{0}' depends on itself")]
    PluginCycle(String),

    /// Only relocation primitives may be put in the exclude set.
    #[error("{0} cannot be excluded from relocation")]
    NotRelocationPrimitive(String),

    /// A reflection mapping names a parameter whose type cannot carry the value it claims.
    #[error("invalid reflection mapping: {0}")]
    InvalidReflectionMapping(String),

    /// An error-kind diagnostic raised by a handler that fails fast.
    #[error("{0}")]
    Diagnostic(String),

    /// The run finished but reported unsuppressed error diagnostics.
    #[error("{errors} unsuppressed error diagnostic(s) reported")]
    ErrorsFound {
        /// Number of error diagnostics that reached the handler
        errors: usize,
    },

    /// A class is still referenced by another holder and cannot be handed to the pipeline.
    #[error("class '{0}' is still shared and cannot be moved into the output")]
    SharedClass(String),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
