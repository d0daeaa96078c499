//! # Scan
//!
//! Byte pattern search inside the code section of the client.
//!
//! Patterns are written as space separated hex bytes, `??` (or `?`) matches any byte:
//!
//! ```
//! use nosbind::scan::Pattern;
//!
//! let pattern: Pattern = "55 8B EC ?? C4".parse().unwrap();
//! assert_eq!(pattern.find_in(&[0x90, 0x55, 0x8b, 0xec, 0x83, 0xc4]), Some(1));
//! ```

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{BindingError, Result};
use crate::memory::{Memory, MemoryExt, ModuleInfo};

/// Parsed byte pattern; `None` entries are wildcards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    /// Bytes of the pattern
    bytes: Vec<Option<u8>>,
}

impl Pattern {
    /// Parses a pattern string
    pub fn parse(pattern: &str) -> Result<Self> {
        let invalid = || BindingError::InvalidPattern(pattern.to_string());
        let bytes = pattern
            .split_whitespace()
            .map(|token| match token {
                "?" | "??" => Ok(None),
                token if token.len() == 2 => {
                    u8::from_str_radix(token, 16).map(Some).map_err(|_| invalid())
                }
                _ => Err(invalid()),
            })
            .collect::<Result<Vec<_>>>()?;

        // a pattern has to contain at least one concrete byte to anchor the search
        if bytes.iter().all(Option::is_none) {
            return Err(invalid());
        }
        Ok(Self { bytes })
    }

    /// Amount of bytes the pattern covers
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Patterns are never empty, see [`Pattern::parse`]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Checks whether `data` starts with the pattern
    fn matches(&self, data: &[u8]) -> bool {
        data.len() >= self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(data)
                .all(|(expected, actual)| expected.map_or(true, |b| b == *actual))
    }

    /// Offset of the first occurrence of the pattern inside `data`
    pub fn find_in(&self, data: &[u8]) -> Option<usize> {
        if data.len() < self.bytes.len() {
            return None;
        }
        // anchor on the first concrete byte to skip most positions quickly
        let (anchor, byte) = self
            .bytes
            .iter()
            .enumerate()
            .find_map(|(i, b)| b.map(|b| (i, b)))?;
        let last = data.len() - self.bytes.len();

        data[anchor..=last + anchor]
            .iter()
            .enumerate()
            .filter(|(_, &b)| b == byte)
            .map(|(start, _)| start)
            .find(|&start| self.matches(&data[start..]))
    }
}

impl FromStr for Pattern {
    type Err = BindingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, byte) in self.bytes.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match byte {
                Some(byte) => write!(f, "{byte:02X}")?,
                None => write!(f, "??")?,
            }
        }
        Ok(())
    }
}

/// Snapshot of the module image used to answer pattern queries
pub struct Scanner {
    /// Copy of the module image
    image: Vec<u8>,
}

impl Scanner {
    /// Copies the whole module image out of `memory`
    pub fn new(memory: &dyn Memory, module: &ModuleInfo) -> Result<Self> {
        let image = memory.read_vec(module.base, module.size)?;
        log::debug!(
            "Scanner created for module at {:#x} with {:#x} bytes",
            module.base,
            module.size
        );
        Ok(Self { image })
    }

    /// Uses an already captured image
    pub fn from_bytes(image: Vec<u8>) -> Self {
        Self { image }
    }

    /// Module relative offset of the first match, `None` when the pattern is absent
    pub fn find(&self, pattern: &Pattern) -> Option<usize> {
        pattern.find_in(&self.image)
    }

    /// Parses `pattern` and searches for it
    pub fn find_str(&self, pattern: &str) -> Result<Option<usize>> {
        Ok(self.find(&Pattern::parse(pattern)?))
    }

    /// Size of the captured image
    pub fn len(&self) -> usize {
        self.image.len()
    }

    /// Whether the captured image is empty
    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::memory::{BufferMemory, ModuleInfo};
    use crate::scan::{Pattern, Scanner};

    #[test]
    /// Wildcards and case insensitive hex are accepted
    fn test_parse() {
        let pattern = Pattern::parse("55 8b EC ?? ? C4").unwrap();
        assert_eq!(pattern.len(), 6);
        assert_eq!(pattern.to_string(), "55 8B EC ?? ?? C4");

        assert!(Pattern::parse("").is_err());
        assert!(Pattern::parse("?? ??").is_err());
        assert!(Pattern::parse("5 8B").is_err());
        assert!(Pattern::parse("GG").is_err());
    }

    #[test]
    /// The scanner returns the offset of each pattern inside the image
    fn test_find_offsets() {
        let mut image = vec![0xccu8; 0x100];
        image[0x10..0x14].copy_from_slice(&[0x53, 0x56, 0x8b, 0xf2]);
        image[0x42..0x47].copy_from_slice(&[0x55, 0x8b, 0xec, 0x83, 0xc4]);
        let scanner = Scanner::from_bytes(image);

        assert_eq!(scanner.find_str("53 56 8B F2").unwrap(), Some(0x10));
        assert_eq!(scanner.find_str("55 8B EC ?? C4").unwrap(), Some(0x42));
        // leading wildcards still report the start of the pattern
        assert_eq!(scanner.find_str("?? 55 8B EC").unwrap(), Some(0x41));
    }

    #[test]
    /// Absent patterns are reported as not found instead of an error
    fn test_not_found() {
        let scanner = Scanner::from_bytes(vec![0x90; 0x40]);

        assert_eq!(scanner.find_str("55 8B EC").unwrap(), None);
        // longer than the image
        assert_eq!(Pattern::parse("90 90").unwrap().find_in(&[0x90]), None);
        // a match at the very end of the image is found
        assert_eq!(scanner.find_str("90 90").unwrap(), Some(0));
        let mut end = vec![0u8; 8];
        end[6..].copy_from_slice(&[0xab, 0xcd]);
        assert_eq!(Pattern::parse("AB CD").unwrap().find_in(&end), Some(6));
    }

    #[test]
    /// The image is captured from memory
    fn test_scanner_from_memory() {
        let mut image = vec![0u8; 0x80];
        image[0x20..0x23].copy_from_slice(&[0x80, 0x78, 0x14]);
        let memory = BufferMemory::new(0x400000, image);

        let scanner = Scanner::new(&memory, &ModuleInfo::new(0x400000, 0x80)).unwrap();
        assert_eq!(scanner.len(), 0x80);
        assert_eq!(scanner.find_str("80 78 14").unwrap(), Some(0x20));

        // the module is larger than the readable image
        assert!(Scanner::new(&memory, &ModuleInfo::new(0x400000, 0x100)).is_err());
    }
}
