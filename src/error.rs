use crate::types::TransportKind;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "request.prompt", "endpoints.socket")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., the raw frame that failed to parse)
    pub details: Option<String>,
    /// Component that raised the error (e.g., "socket", "event_stream", "config")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Flat classification of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The transport could not be established or was dropped mid-stream.
    Connection,
    /// A payload did not match the expected shape.
    Protocol,
    /// The backend returned a structured error.
    Server,
    /// The request was rejected before any transport was attempted.
    Validation,
    /// The session already has a generation in flight.
    Busy,
    /// Endpoint configuration is missing or malformed.
    Configuration,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Server => "server",
            ErrorKind::Validation => "validation",
            ErrorKind::Busy => "busy",
            ErrorKind::Configuration => "configuration",
        }
    }
}

/// Unified error type for every transport session and the coordinator.
///
/// `Clone` so that one failure can be handed to `on_error` and also kept as the
/// settled result of the transport.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Connection error: {message}{}", format_context(.context))]
    Connection {
        message: String,
        context: ErrorContext,
    },

    #[error("Protocol error: {message}{}", format_context(.context))]
    Protocol {
        message: String,
        context: ErrorContext,
    },

    #[error("Server error{}: {message}", format_status(.status, .code))]
    Server {
        message: String,
        code: Option<String>,
        status: Option<u16>,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("{transport} session busy: a generation is already in flight")]
    Busy { transport: TransportKind },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

fn format_status(status: &Option<u16>, code: &Option<String>) -> String {
    match (status, code) {
        (Some(s), Some(c)) => format!(" (HTTP {}, {})", s, c),
        (Some(s), None) => format!(" (HTTP {})", s),
        (None, Some(c)) => format!(" ({})", c),
        (None, None) => String::new(),
    }
}

impl Error {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::connection_with_context(msg, ErrorContext::new())
    }

    pub fn connection_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Connection {
            message: msg.into(),
            context,
        }
    }

    pub fn protocol_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Protocol {
            message: msg.into(),
            context,
        }
    }

    pub fn server(msg: impl Into<String>, code: Option<String>, status: Option<u16>) -> Self {
        Error::Server {
            message: msg.into(),
            code,
            status,
        }
    }

    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection { .. } => ErrorKind::Connection,
            Error::Protocol { .. } => ErrorKind::Protocol,
            Error::Server { .. } => ErrorKind::Server,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Busy { .. } => ErrorKind::Busy,
            Error::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    /// Whether this error ends the transport it occurred on.
    ///
    /// Only a protocol error on a single frame is recovered locally: the frame is
    /// skipped and the stream keeps going.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Error::Protocol { .. })
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Connection { context, .. }
            | Error::Protocol { context, .. }
            | Error::Validation { context, .. }
            | Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The message a user should see, without the category prefix.
    pub fn message(&self) -> String {
        match self {
            Error::Connection { message, .. }
            | Error::Protocol { message, .. }
            | Error::Server { message, .. }
            | Error::Validation { message, .. }
            | Error::Configuration { message, .. } => message.clone(),
            Error::Busy { .. } => self.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let context = ErrorContext::new().with_source("http");
        if e.is_decode() {
            Error::protocol_with_context(e.to_string(), context)
        } else {
            let context = match e.url() {
                Some(url) => context.with_details(url.to_string()),
                None => context,
            };
            Error::connection_with_context(e.to_string(), context)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::protocol_with_context(e.to_string(), ErrorContext::new().with_source("json"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::connection_with_context(e.to_string(), ErrorContext::new().with_source("socket"))
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::configuration_with_context(e.to_string(), ErrorContext::new().with_source("url"))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::configuration_with_context(e.to_string(), ErrorContext::new().with_source("yaml"))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::configuration_with_context(e.to_string(), ErrorContext::new().with_source("io"))
    }
}
