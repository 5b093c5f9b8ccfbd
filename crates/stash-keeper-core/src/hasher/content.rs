use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::str::FromStr;

const CHUNK_LENGTH: usize = 64 * 1024; // 64KB
const DIGEST_LENGTH: usize = 16; // 128 bits

/// 128-bit content digest: the first 16 bytes of the BLAKE3 XOF output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; DIGEST_LENGTH]);

impl ContentHash {
    /// Number of characters in the hex form.
    pub const HEX_LENGTH: usize = DIGEST_LENGTH * 2;

    fn from_hasher(hasher: &blake3::Hasher) -> Self {
        let mut digest = [0u8; DIGEST_LENGTH];
        hasher.finalize_xof().fill(&mut digest);
        ContentHash(digest)
    }

    pub fn of_bytes(data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(data);
        Self::from_hasher(&hasher)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First `len` hex characters, used to disambiguate destination names.
    pub fn short(&self, len: usize) -> String {
        let mut hex = self.to_hex();
        hex.truncate(len);
        hex
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseHashError(String);

impl fmt::Display for ParseHashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid content hash '{}'", self.0)
    }
}

impl std::error::Error for ParseHashError {}

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::HEX_LENGTH {
            return Err(ParseHashError(s.to_string()));
        }
        let mut digest = [0u8; DIGEST_LENGTH];
        hex::decode_to_slice(s, &mut digest).map_err(|_| ParseHashError(s.to_string()))?;
        Ok(ContentHash(digest))
    }
}

/// Stream `reader` to completion in fixed-size chunks and hash it.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<ContentHash> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHUNK_LENGTH];
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }
    Ok(ContentHash::from_hasher(&hasher))
}

pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    hash_reader(File::open(path)?)
}

/// Copy `reader` into `writer` chunk by chunk, hashing the bytes on the way.
/// Returns the digest and the number of bytes copied.
pub fn copy_and_hash<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
) -> io::Result<(ContentHash, u64)> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHUNK_LENGTH];
    let mut copied = 0u64;
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
        writer.write_all(&buffer[..n])?;
        copied += n as u64;
    }
    writer.flush()?;
    Ok((ContentHash::from_hasher(&hasher), copied))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_hex_form_is_fixed_length() {
        let hash = ContentHash::of_bytes(b"slackbuild");
        assert_eq!(hash.to_hex().len(), ContentHash::HEX_LENGTH);
        assert!(hash.to_hex().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash.short(8).len(), 8);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        let hash = ContentHash::of_bytes(b"abc");
        assert_eq!(hash.to_hex().parse::<ContentHash>().unwrap(), hash);
        assert!("abc".parse::<ContentHash>().is_err());
        assert!("zz".repeat(16).parse::<ContentHash>().is_err());
    }

    #[test]
    fn test_streaming_matches_single_shot() {
        // Spans several chunks plus a remainder
        let data: Vec<u8> = (0..(CHUNK_LENGTH * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let streamed = hash_reader(Cursor::new(&data)).unwrap();
        assert_eq!(streamed, ContentHash::of_bytes(&data));

        let mut sink = Vec::new();
        let (copied_hash, copied) = copy_and_hash(Cursor::new(&data), &mut sink).unwrap();
        assert_eq!(copied_hash, streamed);
        assert_eq!(copied, data.len() as u64);
        assert_eq!(sink, data);
    }

    #[test]
    fn test_empty_input_hashes() {
        let empty = hash_reader(Cursor::new(Vec::<u8>::new())).unwrap();
        assert_eq!(empty, ContentHash::of_bytes(&[]));
        assert_ne!(empty, ContentHash::of_bytes(b"\0"));
    }
}
