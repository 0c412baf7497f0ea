use std::fmt;

/// Errors returned by the storage engine's public operations.
///
/// `load` on a key that is simply absent is not an error (it returns `Ok(None)`);
/// everything else that can go wrong is represented here instead of being
/// swallowed or panicking.
#[derive(Debug)]
pub enum Error {
	/// `open` could not find the file on disk.
	FileNotFound,
	/// `open` was refused by the host's permission system.
	PermissionDenied,
	/// The file header or table chain is not well-formed.
	InvalidFormat(String),
	/// A read or write against the open file failed.
	Io(std::io::Error),
	/// A mutating or reading operation was attempted on a closed instance.
	NotOpen,
	/// `open` was called on an instance that is already open.
	AlreadyOpen,
	/// A caller-supplied key does not fit in the configured key width.
	KeyTooLarge { got: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::FileNotFound => write!(f, "database file not found"),
			Error::PermissionDenied => write!(f, "permission denied opening database file"),
			Error::InvalidFormat(reason) => write!(f, "invalid database format: {}", reason),
			Error::Io(e) => write!(f, "database i/o error: {}", e),
			Error::NotOpen => write!(f, "database is not open"),
			Error::AlreadyOpen => write!(f, "database is already open"),
			Error::KeyTooLarge { got, max } => {
				write!(f, "key of {} bytes does not fit in {} byte key width", got, max)
			}
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Error {
		match e.kind() {
			std::io::ErrorKind::NotFound => Error::FileNotFound,
			std::io::ErrorKind::PermissionDenied => Error::PermissionDenied,
			_ => Error::Io(e),
		}
	}
}
