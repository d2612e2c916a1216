//! Error handling and error classes
//!
//! Transports report failures as an [`ErrorKind`], a small integer error class. Everything above
//! the transport raises [`Error`], which records the routine that failed alongside the class, or
//! describes a failure that happened while decoding a message.

use std::fmt;

use thiserror::Error;

macro_rules! build_error_kind {
    {
        $(#[$doc:meta])*
        pub enum $name:ident {
            $(
                 #[$err_doc:meta]
                 #[err($code:literal)]
                 $rust_err:ident,
            )*
        }
    } => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
            #[$err_doc]
            $rust_err,
            )*
        }

        impl $name {
            /// Convert a raw transport error code into an error class.
            ///
            /// Returns `None` for the success code and for codes no class is known for.
            pub fn from_code(code: i32) -> Option<$name> {
                match code {
                    $(
                    $code => Some($name::$rust_err),
                    )*
                    _ => None,
                }
            }

            /// The raw transport error code of this class
            pub fn code(self) -> i32 {
                match self {
                    $(
                    $name::$rust_err => $code,
                    )*
                }
            }
        }
    }
}

build_error_kind! {
    /// Set of error classes a transport can report.
    ///
    /// The numbering follows the error classes of common message passing libraries so that codes
    /// stay recognizable in logs.
    pub enum ErrorKind {
        /// Invalid buffer argument
        #[err(1)]
        Buffer,
        /// Invalid count argument, or a count that does not fit the wire representation
        #[err(2)]
        Count,
        /// Invalid datatype argument
        #[err(3)]
        Type,
        /// Invalid tag argument
        #[err(4)]
        Tag,
        /// Invalid communicator argument
        #[err(5)]
        Comm,
        /// Invalid rank argument
        #[err(6)]
        Rank,
        /// Invalid root argument
        #[err(7)]
        Root,
        /// Invalid argument of some other kind
        #[err(12)]
        Arg,
        /// Unknown error
        #[err(13)]
        Unknown,
        /// Message truncated on receive
        #[err(14)]
        Truncate,
        /// Known error not in this list
        #[err(15)]
        Other,
        /// Internal transport error
        #[err(16)]
        Intern,
        /// Error code is in status
        #[err(17)]
        InStatus,
        /// Pending request
        #[err(18)]
        Pending,
        /// Invalid request argument
        #[err(19)]
        Request,
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (code {})", self, self.code())
    }
}

/// Errors raised by communication operations
#[derive(Debug, Error)]
pub enum Error {
    /// A transport operation failed.
    #[error("{routine} failed: {kind}")]
    Transport {
        /// Name of the failing operation
        routine: &'static str,
        /// Error class reported by the transport
        kind: ErrorKind,
    },
    /// A serialized array held more elements than the destination can take.
    #[error("{routine}: message receive overflow ({received} elements for a capacity of {capacity})")]
    Overflow {
        /// Name of the receiving operation
        routine: &'static str,
        /// Number of elements announced by the message
        received: usize,
        /// Number of elements the destination holds
        capacity: usize,
    },
    /// A message is not a whole number of fixed-size elements.
    #[error("message of {len} bytes is not a whole number of {size}-byte elements")]
    Layout {
        /// Length of the message in bytes
        len: usize,
        /// Size of one element in bytes
        size: usize,
    },
    /// A byte that is neither 0 nor 1 was received for a `bool`.
    #[error("invalid bool representation {0:#04x}")]
    InvalidBool(u8),
    /// A value outside the Unicode scalar range was received for a `char`.
    #[error("invalid char representation {0:#x}")]
    InvalidChar(u32),
    /// An environment variable holds a value that cannot be parsed.
    #[error("invalid value {value:?} for {key}")]
    Config {
        /// Name of the variable
        key: &'static str,
        /// The rejected value
        value: String,
    },
    /// A value could not be serialized.
    #[error("failed to serialize message")]
    Encode(#[from] rmp_serde::encode::Error),
    /// A message could not be deserialized.
    #[error("failed to deserialize message")]
    Decode(#[from] rmp_serde::decode::Error),
}

impl Error {
    pub(crate) fn transport(routine: &'static str, kind: ErrorKind) -> Error {
        Error::Transport { routine, kind }
    }

    /// The error class, if the error was reported by the transport
    pub fn kind(&self) -> Option<ErrorKind> {
        match *self {
            Error::Transport { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

/// Result type of all fallible operations in this crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attaches the name of the failing routine to a raw transport result.
pub(crate) trait Routine<T> {
    fn routine(self, routine: &'static str) -> Result<T>;
}

impl<T> Routine<T> for std::result::Result<T, ErrorKind> {
    fn routine(self, routine: &'static str) -> Result<T> {
        self.map_err(|kind| Error::transport(routine, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_error_classes() {
        for kind in [
            ErrorKind::Truncate,
            ErrorKind::Pending,
            ErrorKind::InStatus,
            ErrorKind::Request,
        ] {
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code(0), None);
        assert_eq!(ErrorKind::from_code(-5), None);
    }

    #[test]
    fn transport_errors_name_the_routine() {
        let err = Err::<(), _>(ErrorKind::Truncate).routine("wait").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Truncate));
        assert_eq!(err.to_string(), "wait failed: Truncate (code 14)");
    }

    #[test]
    fn overflow_message_mentions_receive_overflow() {
        let err = Error::Overflow {
            routine: "receive_serialized_array",
            received: 4,
            capacity: 3,
        };
        assert!(err.to_string().contains("message receive overflow"));
        assert_eq!(err.kind(), None);
    }
}
