//! User token loading for control-plane and tunnel authentication.
//!
//! Tokens are short-lived, so callers load a fresh one for every operation
//! instead of caching it.

use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Deserialize;
use thiserror::Error;

/// Opaque bearer credential.
#[derive(Clone, Eq, PartialEq)]
pub struct Token(String);

impl Token {
    /// Wraps a raw bearer token.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw bearer token for use in request headers.
    #[must_use]
    pub fn bearer(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

/// Errors raised while loading a user token.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AuthError {
    /// Raised when no token file exists at the expected location.
    #[error("no token found at {path}; log in first")]
    NotFound {
        /// Location that was checked.
        path: Utf8PathBuf,
    },
    /// Raised when the token file cannot be read.
    #[error("failed to read token at {path}: {message}")]
    Io {
        /// Location that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the token file is not valid JSON.
    #[error("failed to parse token at {path}: {message}")]
    Parse {
        /// Location that could not be parsed.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when the token is present but blank.
    #[error("token at {path} is empty")]
    Empty {
        /// Location holding the blank token.
        path: Utf8PathBuf,
    },
    /// Raised by token sources that do not read from disk.
    #[error("token unavailable: {0}")]
    Unavailable(String),
}

/// Source of short-lived user tokens.
pub trait TokenSource: Send + Sync {
    /// Loads the current user token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when no usable token is available.
    fn load_user_token(&self) -> Result<Token, AuthError>;
}

#[derive(Deserialize)]
struct TokenFile {
    bearer_token: String,
}

/// Reads a JSON token file (`{"bearer_token": "..."}`) on every call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileTokenSource {
    path: Utf8PathBuf,
}

impl FileTokenSource {
    /// Creates a source reading from `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the token file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn read_contents(&self) -> Result<String, AuthError> {
        let parent = self.path.parent().unwrap_or_else(|| Utf8Path::new("."));
        let file_name = self.path.file_name().ok_or_else(|| AuthError::Io {
            path: self.path.clone(),
            message: String::from("token path is missing a filename"),
        })?;

        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| self.io_error(&err))?;
        dir.read_to_string(file_name)
            .map_err(|err| self.io_error(&err))
    }

    fn io_error(&self, err: &io::Error) -> AuthError {
        if err.kind() == io::ErrorKind::NotFound {
            AuthError::NotFound {
                path: self.path.clone(),
            }
        } else {
            AuthError::Io {
                path: self.path.clone(),
                message: err.to_string(),
            }
        }
    }
}

impl TokenSource for FileTokenSource {
    fn load_user_token(&self) -> Result<Token, AuthError> {
        let contents = self.read_contents()?;
        let parsed: TokenFile =
            serde_json::from_str(&contents).map_err(|err| AuthError::Parse {
                path: self.path.clone(),
                message: err.to_string(),
            })?;

        let bearer = parsed.bearer_token.trim();
        if bearer.is_empty() {
            return Err(AuthError::Empty {
                path: self.path.clone(),
            });
        }
        Ok(Token::new(bearer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct TokenFixture {
        _tmp: TempDir,
        path: Utf8PathBuf,
    }

    #[fixture]
    fn token_fixture() -> TokenFixture {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("token.json"))
            .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
        TokenFixture { _tmp: tmp, path }
    }

    fn write(path: &Utf8Path, contents: &str) {
        std::fs::write(path, contents).unwrap_or_else(|err| panic!("write token: {err}"));
    }

    #[rstest]
    fn loads_bearer_token(token_fixture: TokenFixture) {
        write(&token_fixture.path, r#"{"bearer_token": " nsct_abc "}"#);
        let token = FileTokenSource::new(token_fixture.path.clone())
            .load_user_token()
            .unwrap_or_else(|err| panic!("load token: {err}"));
        assert_eq!(token.bearer(), "nsct_abc");
    }

    #[rstest]
    fn rereads_file_on_every_call(token_fixture: TokenFixture) {
        let source = FileTokenSource::new(token_fixture.path.clone());
        write(&token_fixture.path, r#"{"bearer_token": "first"}"#);
        let first = source.load_user_token().map(|token| token.bearer().to_owned());
        write(&token_fixture.path, r#"{"bearer_token": "second"}"#);
        let second = source.load_user_token().map(|token| token.bearer().to_owned());
        assert_eq!(first, Ok(String::from("first")));
        assert_eq!(second, Ok(String::from("second")));
    }

    #[rstest]
    fn missing_file_is_not_found(token_fixture: TokenFixture) {
        let err = FileTokenSource::new(token_fixture.path.clone())
            .load_user_token()
            .expect_err("missing file should fail");
        assert_eq!(
            err,
            AuthError::NotFound {
                path: token_fixture.path
            }
        );
    }

    #[rstest]
    fn malformed_file_is_parse_error(token_fixture: TokenFixture) {
        write(&token_fixture.path, "not json");
        let err = FileTokenSource::new(token_fixture.path.clone())
            .load_user_token()
            .expect_err("bad json should fail");
        assert!(matches!(err, AuthError::Parse { .. }), "{err}");
    }

    #[rstest]
    fn blank_token_is_rejected(token_fixture: TokenFixture) {
        write(&token_fixture.path, r#"{"bearer_token": "   "}"#);
        let err = FileTokenSource::new(token_fixture.path.clone())
            .load_user_token()
            .expect_err("blank token should fail");
        assert!(matches!(err, AuthError::Empty { .. }), "{err}");
    }

    #[test]
    fn debug_output_redacts_token() {
        let rendered = format!("{:?}", Token::new("secret"));
        assert!(!rendered.contains("secret"), "{rendered}");
    }
}
