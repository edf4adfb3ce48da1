use std::fmt;
use std::path::{Path, PathBuf};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;

/// Characters escaped when turning a normalized path back into a URI.
const URI_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("URI must have a scheme: {0}")]
    MissingScheme(String),
    #[error("not a local file path: {0}")]
    NotLocal(String),
}

/// Canonical identity of a resource (document) known to the server.
///
/// Two spellings of the same file (different slashes, percent-escapes, drive letter case,
/// trailing separators) always produce equal `LspPath`s, so per-file state keyed by
/// `LspPath` has exactly one slot per file.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LspPath {
    normalized: String,
}

impl LspPath {
    /// Parse a URI sent by the client (e.g. `file:///C:/src/Main.java`).
    pub fn from_lsp_uri(uri: &str) -> Result<Self, PathError> {
        Ok(Self {
            normalized: normalize_uri(uri)?,
        })
    }

    /// Build an identity for an absolute local path.
    pub fn from_local_path(path: &Path) -> Result<Self, PathError> {
        let url = url::Url::from_file_path(path)
            .map_err(|()| PathError::NotLocal(path.display().to_string()))?;
        Self::from_lsp_uri(url.as_str())
    }

    /// The normalized form, with percent-escapes decoded.
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn scheme(&self) -> &str {
        self.normalized
            .split_once(':')
            .map(|(scheme, _)| scheme)
            .unwrap_or_default()
    }

    pub fn is_local(&self) -> bool {
        self.scheme().eq_ignore_ascii_case("file")
    }

    /// URI string suitable for protocol messages; escapes are re-applied to the path part.
    pub fn to_uri_string(&self) -> String {
        match self.normalized.split_once(":///") {
            Some((scheme, rest)) => {
                format!("{scheme}:///{}", utf8_percent_encode(rest, URI_PATH))
            }
            None => self.normalized.clone(),
        }
    }

    /// The local filesystem path for `file:` identities.
    pub fn to_path(&self) -> Result<PathBuf, PathError> {
        if !self.is_local() {
            return Err(PathError::NotLocal(self.normalized.clone()));
        }
        url::Url::parse(&self.to_uri_string())
            .ok()
            .and_then(|url| url.to_file_path().ok())
            .ok_or_else(|| PathError::NotLocal(self.normalized.clone()))
    }

    /// File name component, used in log and progress messages.
    pub fn file_name(&self) -> &str {
        self.normalized
            .rsplit('/')
            .next()
            .unwrap_or(&self.normalized)
    }
}

impl fmt::Debug for LspPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LspPath").field(&self.normalized).finish()
    }
}

impl fmt::Display for LspPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

impl std::str::FromStr for LspPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_lsp_uri(s)
    }
}

#[cfg(feature = "lsp")]
impl TryFrom<&lsp_types::Uri> for LspPath {
    type Error = PathError;

    fn try_from(uri: &lsp_types::Uri) -> Result<Self, Self::Error> {
        Self::from_lsp_uri(uri.as_str())
    }
}

#[cfg(feature = "lsp")]
impl LspPath {
    pub fn to_lsp_uri(&self) -> Option<lsp_types::Uri> {
        self.to_uri_string().parse().ok()
    }
}

/// Length of the `scheme:/+` prefix, if `uri` starts with one.
fn scheme_prefix_len(uri: &str) -> Option<usize> {
    let bytes = uri.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    if !bytes.first().copied().is_some_and(is_word) {
        return None;
    }

    let mut i = 1;
    while i < bytes.len() && (is_word(bytes[i]) || matches!(bytes[i], b'+' | b'-' | b'.')) {
        i += 1;
    }
    // At least two scheme characters, so `c:/foo` is not taken for a scheme.
    if i < 2 || bytes.get(i) != Some(&b':') {
        return None;
    }
    i += 1;

    let slashes_start = i;
    while bytes.get(i) == Some(&b'/') {
        i += 1;
    }
    (i > slashes_start).then_some(i)
}

fn normalize_uri(uri: &str) -> Result<String, PathError> {
    let uri = uri.replace('\\', "/");
    let uri = uri.trim_end_matches('/');

    let prefix_len = scheme_prefix_len(uri).ok_or_else(|| PathError::MissingScheme(uri.into()))?;
    let (prefix, rest) = uri.split_at(prefix_len);
    let scheme = prefix.trim_end_matches('/');

    let rest = percent_decode_str(rest).decode_utf8_lossy();
    let mut rest = rest.into_owned();

    // Clients disagree on drive letter case (`C:` vs `c:`); always lower-case it.
    if rest.as_bytes().get(1) == Some(&b':') {
        if let Some(first) = rest.get(..1) {
            rest = format!("{}{}", first.to_ascii_lowercase(), &rest[1..]);
        }
    }

    Ok(format!("{scheme}///{rest}"))
}
