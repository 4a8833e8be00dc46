//! Executable image format.
//!
//! ```text
//! [8]  magic "VPROCEXE"
//! [8]  format version
//! [8]  text length
//! [8]  rodata length
//! [8]  data length
//! [8]  bss length (not stored)
//! [..] text ++ rodata ++ data
//! ```
//!
//! Header words are little-endian. The file length must be exactly the header
//! plus the three stored segments.

use crate::types::encoding::{Decode, Encode};
use crate::virtual_machine::errors::ExecutableError;
use std::fs;
use std::path::Path;
use vproc_derive::BinaryCodec;

pub const EXE_MAGIC: [u8; 8] = *b"VPROCEXE";
pub const EXE_VERSION: u64 = 1;
pub const EXE_HEADER_LEN: usize = 48;

#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
struct Header {
    magic: [u8; 8],
    version: u64,
    text_len: u64,
    rodata_len: u64,
    data_len: u64,
    bss_len: u64,
}

/// A loaded program: segment lengths plus the stored segment bytes.
///
/// An `Executable` is either empty or well-formed; every constructor and
/// loader upholds `content.len() == text_len + rodata_len + data_len`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Executable {
    text_len: u64,
    rodata_len: u64,
    data_len: u64,
    bss_len: u64,
    content: Vec<u8>,
}

impl Executable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_segments(text: &[u8], rodata: &[u8], data: &[u8], bss_len: u64) -> Self {
        let mut content = Vec::with_capacity(text.len() + rodata.len() + data.len());
        content.extend_from_slice(text);
        content.extend_from_slice(rodata);
        content.extend_from_slice(data);
        Self {
            text_len: text.len() as u64,
            rodata_len: rodata.len() as u64,
            data_len: data.len() as u64,
            bss_len,
            content,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.bss_len == 0
    }

    pub fn text_len(&self) -> u64 {
        self.text_len
    }

    pub fn rodata_len(&self) -> u64 {
        self.rodata_len
    }

    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    pub fn bss_len(&self) -> u64 {
        self.bss_len
    }

    /// text ++ rodata ++ data.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn text(&self) -> &[u8] {
        &self.content[..self.text_len as usize]
    }

    pub fn rodata(&self) -> &[u8] {
        let start = self.text_len as usize;
        &self.content[start..start + self.rodata_len as usize]
    }

    pub fn data(&self) -> &[u8] {
        &self.content[(self.text_len + self.rodata_len) as usize..]
    }

    /// Resets to the empty image.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn header(&self) -> Header {
        Header {
            magic: EXE_MAGIC,
            version: EXE_VERSION,
            text_len: self.text_len,
            rodata_len: self.rodata_len,
            data_len: self.data_len,
            bss_len: self.bss_len,
        }
    }

    /// Serializes header and content.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = self.header();
        let mut out = Vec::with_capacity(header.encoded_len() + self.content.len());
        header.encode(&mut out);
        out.extend_from_slice(&self.content);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ExecutableError> {
        match bytes.get(..EXE_MAGIC.len()) {
            None => return Err(ExecutableError::FormatCorrupt("truncated header".into())),
            Some(magic) if magic != EXE_MAGIC => return Err(ExecutableError::WrongMagic),
            Some(_) => {}
        }

        let mut input = bytes;
        let header = Header::decode(&mut input)
            .map_err(|_| ExecutableError::FormatCorrupt("truncated header".into()))?;

        if header.version != EXE_VERSION {
            return Err(ExecutableError::WrongVersion {
                expected: EXE_VERSION,
                found: header.version,
            });
        }

        let content_len = header
            .text_len
            .checked_add(header.rodata_len)
            .and_then(|n| n.checked_add(header.data_len))
            .ok_or_else(|| ExecutableError::FormatCorrupt("segment lengths overflow".into()))?;
        if content_len != input.len() as u64 {
            return Err(ExecutableError::FormatCorrupt(format!(
                "header declares {} content bytes but {} are present",
                content_len,
                input.len()
            )));
        }

        Ok(Self {
            text_len: header.text_len,
            rodata_len: header.rodata_len,
            data_len: header.data_len,
            bss_len: header.bss_len,
            content: input.to_vec(),
        })
    }

    /// Writes the image to `path`. An empty image is refused before the
    /// filesystem is touched.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ExecutableError> {
        if self.is_empty() {
            return Err(ExecutableError::Empty);
        }
        fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ExecutableError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Replaces `self` with the image at `path`; on failure `self` is left empty.
    pub fn load_into(&mut self, path: impl AsRef<Path>) -> Result<(), ExecutableError> {
        match Self::load(path) {
            Ok(exe) => {
                *self = exe;
                Ok(())
            }
            Err(err) => {
                self.clear();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Executable {
        Executable::from_segments(&[0x00, 0x01], b"ro", b"data!", 32)
    }

    #[test]
    fn header_is_48_bytes() {
        assert_eq!(sample().header().encoded_len(), EXE_HEADER_LEN);
        assert_eq!(sample().to_bytes().len(), EXE_HEADER_LEN + 9);
    }

    #[test]
    fn segment_views() {
        let exe = sample();
        assert_eq!(exe.text(), &[0x00, 0x01]);
        assert_eq!(exe.rodata(), b"ro");
        assert_eq!(exe.data(), b"data!");
        assert_eq!(exe.bss_len(), 32);
    }

    #[test]
    fn bytes_round_trip() {
        let exe = sample();
        assert_eq!(Executable::from_bytes(&exe.to_bytes()).unwrap(), exe);
    }

    #[test]
    fn header_layout_is_little_endian() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[..8], b"VPROCEXE");
        assert_eq!(&bytes[8..16], &1u64.to_le_bytes());
        assert_eq!(&bytes[16..24], &2u64.to_le_bytes());
        assert_eq!(&bytes[40..48], &32u64.to_le_bytes());
    }

    #[test]
    fn wrong_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert_eq!(Executable::from_bytes(&bytes), Err(ExecutableError::WrongMagic));
    }

    #[test]
    fn wrong_version_is_not_corruption() {
        let mut bytes = sample().to_bytes();
        bytes[8..16].copy_from_slice(&9u64.to_le_bytes());
        assert_eq!(
            Executable::from_bytes(&bytes),
            Err(ExecutableError::WrongVersion {
                expected: EXE_VERSION,
                found: 9
            })
        );
    }

    #[test]
    fn size_mismatch_is_corruption() {
        let mut bytes = sample().to_bytes();
        bytes.push(0);
        assert!(matches!(
            Executable::from_bytes(&bytes),
            Err(ExecutableError::FormatCorrupt(_))
        ));
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            Executable::from_bytes(&bytes),
            Err(ExecutableError::FormatCorrupt(_))
        ));
    }

    #[test]
    fn truncated_header_is_corruption() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            Executable::from_bytes(&bytes[..20]),
            Err(ExecutableError::FormatCorrupt(_))
        ));
        assert!(matches!(
            Executable::from_bytes(&bytes[..3]),
            Err(ExecutableError::FormatCorrupt(_))
        ));
    }

    #[test]
    fn overflowing_lengths_are_corruption() {
        let mut bytes = sample().to_bytes();
        bytes[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            Executable::from_bytes(&bytes),
            Err(ExecutableError::FormatCorrupt(_))
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prog.vexe");
        let exe = sample();
        exe.save(&path).unwrap();
        assert_eq!(Executable::load(&path).unwrap(), exe);
    }

    #[test]
    fn saving_empty_image_touches_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.vexe");
        assert_eq!(Executable::new().save(&path), Err(ExecutableError::Empty));
        assert!(!path.exists());
    }

    #[test]
    fn failed_load_into_leaves_image_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.vexe");
        std::fs::write(&path, b"not an image at all").unwrap();

        let mut exe = sample();
        assert_eq!(exe.load_into(&path), Err(ExecutableError::WrongMagic));
        assert!(exe.is_empty());
        assert_eq!(exe, Executable::new());

        let missing = dir.path().join("missing.vexe");
        assert!(matches!(exe.load_into(&missing), Err(ExecutableError::Io(_))));
    }

    #[test]
    fn load_into_replaces_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prog.vexe");
        sample().save(&path).unwrap();
        let mut exe = Executable::from_segments(&[0x01], &[], &[], 0);
        exe.load_into(&path).unwrap();
        assert_eq!(exe, sample());
    }
}
