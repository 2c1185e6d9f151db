use thiserror::Error;

pub mod context;

pub type Result<T> = std::result::Result<T, Error>;

pub use context::ErrorContext;

/// Main error type for docmigrate
#[derive(Error, Debug)]
pub enum Error {
    /// Credentials could not be resolved or the database could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// A control-plane call failed for a reason other than "not found"
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// A change unit's apply procedure failed
    #[error("Migration {id} failed: {message}")]
    UnitExecution { id: String, message: String },

    /// The resource already exists (create-only operations)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Runner not initialized: {0}")]
    NotInitialized(String),

    #[error("Invalid registry: {0}")]
    InvalidRegistry(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    // Error with context chain
    #[error("{message}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning(msg.into())
    }

    pub fn unit_execution(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnitExecution {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::NotInitialized(msg.into())
    }

    pub fn invalid_registry(msg: impl Into<String>) -> Self {
        Self::InvalidRegistry(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    pub fn invalid_patch(msg: impl Into<String>) -> Self {
        Self::InvalidPatch(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    // Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// The error underneath any context wrappers
    pub fn root(&self) -> &Error {
        let mut current = self;
        while let Error::WithContext { source, .. } = current {
            current = source;
        }
        current
    }

    /// Messages from the outermost context down to the root error
    pub fn chain(&self) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self;
        loop {
            chain.push(current.to_string());
            match current {
                Error::WithContext { source, .. } => current = source,
                _ => return chain,
            }
        }
    }

    /// The whole chain on one line
    pub fn describe(&self) -> String {
        self.chain().join(": ")
    }

    /// Store responded that the resource already exists
    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), Error::Conflict(_))
    }

    /// Store responded that the resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound(_))
    }

    /// Get a stable error code for operator-facing output
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Connection(_) => "E_CONNECTION",
            Error::Provisioning(_) => "E_PROVISIONING",
            Error::UnitExecution { .. } => "E_UNIT_EXECUTION",
            Error::Conflict(_) => "E_CONFLICT",
            Error::NotFound(_) => "E_NOT_FOUND",
            Error::NotInitialized(_) => "E_NOT_INITIALIZED",
            Error::InvalidRegistry(_) => "E_INVALID_REGISTRY",
            Error::Configuration(_) => "E_CONFIGURATION",
            Error::InvalidQuery(_) => "E_INVALID_QUERY",
            Error::InvalidPatch(_) => "E_INVALID_PATCH",
            Error::Validation(_) => "E_VALIDATION",
            Error::Unsupported(_) => "E_UNSUPPORTED",
            Error::Json(_) => "E_JSON",
            Error::Io(_) => "E_IO",
            Error::Toml(_) => "E_TOML",
            Error::WithContext { source, .. } => source.error_code(),
        }
    }
}
