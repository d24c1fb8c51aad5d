use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidPort(String),
    InvalidSnaplen(String),
    InvalidLimit(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidPort(e) => write!(f, "Invalid admission port: {}", e),
            ConfigError::InvalidSnaplen(e) => write!(f, "Invalid snapshot length: {}", e),
            ConfigError::InvalidLimit(e) => write!(f, "Invalid limit: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failure to lay out a record in its scratch buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A primitive write would have run past the end of the buffer.
    Capacity {
        offset: usize,
        width: usize,
        capacity: usize,
    },
    /// The record body does not fit the u32 length prefix.
    RecordTooLarge(usize),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::Capacity {
                offset,
                width,
                capacity,
            } => write!(
                f,
                "Buffer capacity exceeded: {} byte write at offset {} (capacity {})",
                width, offset, capacity
            ),
            EncodeError::RecordTooLarge(len) => {
                write!(f, "Record body of {} bytes exceeds the length prefix", len)
            }
        }
    }
}

impl std::error::Error for EncodeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    Unavailable(String),
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::Unavailable(e) => write!(f, "Clock source unavailable: {}", e),
        }
    }
}

impl std::error::Error for ClockError {}

#[derive(Debug)]
pub enum RecordError {
    Io(std::io::Error),
    Encode(EncodeError),
    Clock(ClockError),
    HeaderAlreadyWritten,
    HeaderMissing,
    /// The sink took part of a record before failing; the log now ends in a
    /// fragment a forward-only reader cannot step over.
    PartialRecord {
        written: usize,
        expected: usize,
        cause: std::io::Error,
    },
    /// An earlier partial record left the log unusable for appends.
    LogTorn,
}

impl RecordError {
    /// True when later records could no longer be framed correctly.
    pub fn leaves_log_torn(&self) -> bool {
        matches!(self, RecordError::PartialRecord { .. } | RecordError::LogTorn)
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::Io(e) => write!(f, "Record write error: {}", e),
            RecordError::Encode(e) => write!(f, "Record encode error: {}", e),
            RecordError::Clock(e) => write!(f, "Record timestamp error: {}", e),
            RecordError::HeaderAlreadyWritten => write!(f, "Session header already written"),
            RecordError::HeaderMissing => write!(f, "Session header has not been written"),
            RecordError::PartialRecord {
                written,
                expected,
                cause,
            } => write!(
                f,
                "Partial record: {} of {} bytes written: {}",
                written, expected, cause
            ),
            RecordError::LogTorn => write!(f, "Log ends in a partial record"),
        }
    }
}

impl std::error::Error for RecordError {}

impl From<std::io::Error> for RecordError {
    fn from(err: std::io::Error) -> Self {
        RecordError::Io(err)
    }
}

impl From<EncodeError> for RecordError {
    fn from(err: EncodeError) -> Self {
        RecordError::Encode(err)
    }
}

impl From<ClockError> for RecordError {
    fn from(err: ClockError) -> Self {
        RecordError::Clock(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    AlreadyAdmitted,
    NotFound,
    Exhausted,
    Allocation,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyAdmitted => write!(f, "Connection handle is already admitted"),
            RegistryError::NotFound => write!(f, "Connection handle is not admitted"),
            RegistryError::Exhausted => write!(f, "Stream identifiers exhausted"),
            RegistryError::Allocation => write!(f, "Unable to allocate stream state"),
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Debug)]
pub enum SessionError {
    Clock(ClockError),
    Record(RecordError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Clock(e) => write!(f, "Session clock error: {}", e),
            SessionError::Record(e) => write!(f, "Session header error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ClockError> for SessionError {
    fn from(err: ClockError) -> Self {
        SessionError::Clock(err)
    }
}

impl From<RecordError> for SessionError {
    fn from(err: RecordError) -> Self {
        SessionError::Record(err)
    }
}

#[derive(Debug)]
pub enum EngineError {
    SpawnFailed(std::io::Error),
    IoError(std::io::Error),
    PcapError(String),
    UnsupportedLinktype(i32),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::SpawnFailed(e) => write!(f, "Unable to start capture tool: {}", e),
            EngineError::IoError(e) => write!(f, "Capture IO error: {}", e),
            EngineError::PcapError(e) => write!(f, "PCAP parse error: {}", e),
            EngineError::UnsupportedLinktype(l) => write!(f, "Unsupported link type: {}", l),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::IoError(err)
    }
}

#[derive(Debug)]
pub enum ControllerError {
    OutputUnavailable(std::io::Error),
    EngineError(EngineError),
    SessionError(SessionError),
    RecordError(RecordError),
    Aborted(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::OutputUnavailable(e) => write!(f, "Unable to create output file: {}", e),
            ControllerError::EngineError(e) => write!(f, "Capture engine error: {}", e),
            ControllerError::SessionError(e) => write!(f, "Session error: {}", e),
            ControllerError::RecordError(e) => write!(f, "Record error: {}", e),
            ControllerError::Aborted(e) => write!(f, "Capture aborted: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<EngineError> for ControllerError {
    fn from(err: EngineError) -> Self {
        ControllerError::EngineError(err)
    }
}

impl From<SessionError> for ControllerError {
    fn from(err: SessionError) -> Self {
        ControllerError::SessionError(err)
    }
}

impl From<RecordError> for ControllerError {
    fn from(err: RecordError) -> Self {
        ControllerError::RecordError(err)
    }
}
