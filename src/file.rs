// src/file.rs

//! In-memory representation of one transformed file.
//!
//! A [`File`] holds a root-relative path, optional metadata from the
//! originating physical file, and content stored as bytes or text (or both,
//! once a lazy conversion has been cached). A fresh `File` is constructed for
//! every (re)transformation; the engine publishes it behind an `Arc`, so
//! holders of a previous snapshot are never mutated underneath.

use std::borrow::Cow;
use std::fs::Metadata;

use anyhow::{bail, Result};

/// Content encodings a [`File`] can carry.
///
/// Text/byte conversion goes through the file's current encoding. Decoding is
/// lossy: invalid sequences become U+FFFD rather than failing the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
    Utf16Le,
    Utf16Be,
}

impl Encoding {
    /// Parse an encoding label such as `"utf8"` or `"latin-1"`.
    ///
    /// Returns `None` for unsupported labels; callers surface that as a
    /// configuration error.
    pub fn from_label(label: &str) -> Option<Encoding> {
        match label.trim().to_lowercase().as_str() {
            "utf8" | "utf-8" => Some(Encoding::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" => Some(Encoding::Latin1),
            "utf16le" | "utf-16le" | "ucs2" | "ucs-2" => Some(Encoding::Utf16Le),
            "utf16be" | "utf-16be" => Some(Encoding::Utf16Be),
            _ => None,
        }
    }

    /// Canonical label for this encoding.
    pub fn label(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Latin1 => "latin-1",
            Encoding::Utf16Le => "utf-16le",
            Encoding::Utf16Be => "utf-16be",
        }
    }

    /// Decode bytes into text (lossy).
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Encoding::Utf16Le => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            Encoding::Utf16Be => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }

    /// Encode text into bytes. Characters outside latin-1 become `?` when
    /// encoding as latin-1 (lossy, matching the decode direction).
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Utf8 => text.as_bytes().to_vec(),
            Encoding::Latin1 => text
                .chars()
                .map(|c| if (c as u32) <= 0xFF { c as u8 } else { b'?' })
                .collect(),
            Encoding::Utf16Le => text
                .encode_utf16()
                .flat_map(|u| u.to_le_bytes())
                .collect(),
            Encoding::Utf16Be => text
                .encode_utf16()
                .flat_map(|u| u.to_be_bytes())
                .collect(),
        }
    }
}

/// Event passed to the transform alongside the file being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    /// Physical file read from disk (initial crawl or watch event).
    Read,
    /// Virtual file injected via `add`.
    Added,
    /// Re-run because one of this file's dependencies changed.
    Retransform,
    /// The physical file was deleted; the transform sees the stale snapshot
    /// one last time so it can clean up derived state.
    Deleted,
}

/// Pre-transform snapshot of a file: what the engine needs to re-run the
/// transform later without touching the disk again.
///
/// Kept for every physical file (and every `add`ed virtual file) until the
/// watcher reports the path deleted.
#[derive(Debug, Clone, Default)]
pub struct FileData {
    pub path: String,
    pub metadata: Option<Metadata>,
    pub bytes: Option<Vec<u8>>,
    pub text: Option<String>,
    pub enc: Encoding,
}

impl FileData {
    /// Convenience for virtual files carrying text content.
    pub fn text(path: impl Into<String>, text: impl Into<String>) -> FileData {
        FileData {
            path: path.into(),
            text: Some(text.into()),
            ..FileData::default()
        }
    }

    /// Convenience for virtual files carrying raw bytes.
    pub fn bytes(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> FileData {
        FileData {
            path: path.into(),
            bytes: Some(bytes.into()),
            ..FileData::default()
        }
    }
}

/// One logical output unit of the engine.
///
/// Content is stored as bytes or text at any instant; reading the other form
/// through the `&mut` accessors converts lazily through the current encoding
/// and caches the result, while setting one form drops the cached other form.
/// Changing the encoding does not retroactively re-decode an already-cached
/// text value.
#[derive(Debug, Clone, Default)]
pub struct File {
    path: String,
    metadata: Option<Metadata>,
    enc: Encoding,
    bytes: Option<Vec<u8>>,
    text: Option<String>,
}

impl File {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Set the canonical path. Rejects empty paths.
    pub fn set_path(&mut self, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        if path.is_empty() {
            bail!("file path must be a non-empty string");
        }
        self.path = path;
        Ok(())
    }

    /// Directory component of the path (empty for top-level files).
    pub fn dir(&self) -> &str {
        match self.path.rfind('/') {
            Some(p) => &self.path[..p],
            None => "",
        }
    }

    /// Rewrite the path with a new directory component.
    pub fn set_dir(&mut self, dir: &str) -> Result<()> {
        let filename = self.filename().to_string();
        if dir.is_empty() {
            self.set_path(filename)
        } else {
            self.set_path(format!("{dir}/{filename}"))
        }
    }

    /// Final component of the path.
    pub fn filename(&self) -> &str {
        match self.path.rfind('/') {
            Some(p) => &self.path[p + 1..],
            None => &self.path,
        }
    }

    /// Rewrite the path with a new filename, keeping the directory.
    pub fn set_filename(&mut self, filename: &str) -> Result<()> {
        let old = self.filename().len();
        let mut path = self.path.clone();
        path.truncate(path.len() - old);
        path.push_str(filename);
        self.set_path(path)
    }

    /// Extension including the leading dot, or empty if there is none.
    pub fn ext(&self) -> &str {
        let dot = self.path.rfind('.');
        let slash = self.path.rfind('/');
        match (dot, slash) {
            (Some(d), Some(s)) if d > s => &self.path[d..],
            (Some(d), None) => &self.path[d..],
            _ => "",
        }
    }

    /// Rewrite the path with a new extension (pass `".md"`, not `"md"`).
    pub fn set_ext(&mut self, ext: &str) -> Result<()> {
        let old = self.ext().len();
        let mut path = self.path.clone();
        path.truncate(path.len() - old);
        path.push_str(ext);
        self.set_path(path)
    }

    /// Metadata of the originating physical file; `None` for virtual files.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn enc(&self) -> Encoding {
        self.enc
    }

    pub fn set_enc(&mut self, enc: Encoding) {
        self.enc = enc;
    }

    /// Set the encoding from a label, rejecting unsupported ones.
    pub fn set_enc_label(&mut self, label: &str) -> Result<()> {
        match Encoding::from_label(label) {
            Some(enc) => {
                self.enc = enc;
                Ok(())
            }
            None => bail!("unsupported encoding label: {label:?}"),
        }
    }

    /// Byte content, encoding cached text on first access if needed.
    pub fn bytes(&mut self) -> Option<&[u8]> {
        if self.bytes.is_none() {
            if let Some(text) = &self.text {
                self.bytes = Some(self.enc.encode(text));
            }
        }
        self.bytes.as_deref()
    }

    /// Replace the byte content, dropping any cached text.
    pub fn set_bytes(&mut self, bytes: impl Into<Vec<u8>>) {
        self.bytes = Some(bytes.into());
        self.text = None;
    }

    /// Text content, decoding cached bytes on first access if needed.
    pub fn text(&mut self) -> Option<&str> {
        if self.text.is_none() {
            if let Some(bytes) = &self.bytes {
                self.text = Some(self.enc.decode(bytes));
            }
        }
        self.text.as_deref()
    }

    /// Replace the text content, dropping any cached bytes.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
        self.bytes = None;
    }

    /// Byte content without caching, for readers holding a shared snapshot.
    ///
    /// Borrows when bytes are stored, converts on the fly when only text is.
    pub fn bytes_ref(&self) -> Option<Cow<'_, [u8]>> {
        match (&self.bytes, &self.text) {
            (Some(bytes), _) => Some(Cow::Borrowed(bytes.as_slice())),
            (None, Some(text)) => Some(Cow::Owned(self.enc.encode(text))),
            (None, None) => None,
        }
    }

    /// Text content without caching, for readers holding a shared snapshot.
    pub fn text_ref(&self) -> Option<Cow<'_, str>> {
        match (&self.text, &self.bytes) {
            (Some(text), _) => Some(Cow::Borrowed(text.as_str())),
            (None, Some(bytes)) => Some(Cow::Owned(self.enc.decode(bytes))),
            (None, None) => None,
        }
    }
}

impl From<FileData> for File {
    fn from(data: FileData) -> File {
        File {
            path: data.path,
            metadata: data.metadata,
            enc: data.enc,
            bytes: data.bytes,
            text: data.text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> File {
        let mut f = File::default();
        f.set_path(path).unwrap();
        f
    }

    #[test]
    fn path_components() {
        let f = file("src/notes/todo.md");
        assert_eq!(f.dir(), "src/notes");
        assert_eq!(f.filename(), "todo.md");
        assert_eq!(f.ext(), ".md");

        let f = file("README");
        assert_eq!(f.dir(), "");
        assert_eq!(f.filename(), "README");
        assert_eq!(f.ext(), "");
    }

    #[test]
    fn component_setters_rewrite_path() {
        let mut f = file("src/todo.md");
        f.set_ext(".html").unwrap();
        assert_eq!(f.path(), "src/todo.html");
        f.set_filename("index.html").unwrap();
        assert_eq!(f.path(), "src/index.html");
        f.set_dir("out").unwrap();
        assert_eq!(f.path(), "out/index.html");
        f.set_dir("").unwrap();
        assert_eq!(f.path(), "index.html");
    }

    #[test]
    fn empty_path_rejected() {
        let mut f = File::default();
        assert!(f.set_path("").is_err());
    }

    #[test]
    fn utf8_round_trip() {
        let mut f = file("a.txt");
        f.set_text("hällo wörld");
        assert_eq!(f.bytes().unwrap(), "hällo wörld".as_bytes());

        let mut f = file("b.txt");
        f.set_bytes("plain".as_bytes().to_vec());
        assert_eq!(f.text().unwrap(), "plain");
    }

    #[test]
    fn setting_one_form_drops_the_other() {
        let mut f = file("a.txt");
        f.set_text("one");
        let _ = f.bytes();
        f.set_text("two");
        assert_eq!(f.bytes().unwrap(), b"two");
    }

    #[test]
    fn enc_change_does_not_redecode_cached_text() {
        let mut f = file("a.txt");
        f.set_bytes(vec![0xE9]); // é in latin-1, invalid alone in utf-8
        f.set_enc(Encoding::Latin1);
        assert_eq!(f.text().unwrap(), "é");
        // text is cached now; switching the encoding leaves it alone
        f.set_enc(Encoding::Utf8);
        assert_eq!(f.text().unwrap(), "é");
    }

    #[test]
    fn snapshot_accessors_do_not_cache() {
        let mut f = file("a.txt");
        f.set_text("snap");
        assert_eq!(f.bytes_ref().unwrap().as_ref(), b"snap");
        // still only text stored
        assert_eq!(f.text_ref().unwrap().as_ref(), "snap");
    }

    #[test]
    fn encoding_labels() {
        assert_eq!(Encoding::from_label("UTF-8"), Some(Encoding::Utf8));
        assert_eq!(Encoding::from_label("latin1"), Some(Encoding::Latin1));
        assert_eq!(Encoding::from_label("utf-16le"), Some(Encoding::Utf16Le));
        assert_eq!(Encoding::from_label("koi8-r"), None);
    }

    #[test]
    fn latin1_lossy_encode() {
        assert_eq!(Encoding::Latin1.encode("héllo\u{263A}"), b"h\xE9llo?");
    }

    #[test]
    fn utf16le_round_trip() {
        let enc = Encoding::Utf16Le;
        let bytes = enc.encode("ok");
        assert_eq!(bytes, vec![b'o', 0, b'k', 0]);
        assert_eq!(enc.decode(&bytes), "ok");
    }
}
