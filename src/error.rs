//! A custom casr-tombstone error.
use std::fmt;
use std::io;
use std::result;

use thiserror::Error;

#[derive(Error, Debug)]
/// A custom casr-tombstone error
pub enum Error {
    /// An IO based error
    IO(io::Error),
    /// Invalid regular expression supplied for a filter
    Regex(regex::Error),
    /// Json (de)serialization error
    Json(serde_json::Error),
    /// Invalid filter configuration
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::IO(ref err) => write!(f, "{err}"),
            Error::Regex(ref err) => write!(f, "Regex: {err}"),
            Error::Json(ref err) => write!(f, "Json: {err}"),
            Error::Config(ref msg) => write!(f, "Config: {msg}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IO(err)
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Error {
        Error::Regex(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Json(err)
    }
}

pub type Result<T> = result::Result<T, Error>;
