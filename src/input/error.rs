use std::convert::From;
use std::error;
use std::fmt;
use std::fmt::Display;

#[derive(Debug)]
pub enum Error {
    /// The description is well-formed but describes something invalid.
    Format(String),
    IO(std::io::Error),
    Json(serde_json::Error),
    /// The description was written for another version of this program.
    Version { provided: i64, required: i64 },
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        use Error::*;
        match self {
            IO(ref e) => Some(e),
            Json(ref e) => Some(e),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;
        match self {
            Format(ref msg) => write!(f, "testbench description error: {}", msg),
            IO(ref _e) => write!(f, "failed to read testbench description"),
            Json(ref _e) => write!(f, "testbench description is not valid JSON"),
            Version { provided, required } => write!(
                f,
                "testbench description not compatible (provided: {}, required: {})",
                provided,
                required),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IO(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}
