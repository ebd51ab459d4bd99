//! Diagnostic hex dump of packet memory.

use std::fmt;

/// Formats a byte slice as 16-byte lines of 2-byte words
///
/// ```
/// use nmbridge_ring::HexDump;
///
/// let dump = HexDump(&[0xde, 0xad, 0xbe, 0xef]).to_string();
/// assert!(dump.ends_with("  0000:   dead beef\n"));
/// ```
#[derive(Clone, Copy)]
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Dump of address: {:p}, {} bytes",
            self.0.as_ptr(),
            self.0.len()
        )?;
        for (line, bytes) in self.0.chunks(16).enumerate() {
            write!(f, "\n  {:04x}:  ", line * 16)?;
            for word in bytes.chunks(2) {
                write!(f, " {}", hex::encode(word))?;
            }
        }
        writeln!(f)
    }
}

impl fmt::Debug for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(dump: &str) -> Vec<&str> {
        dump.lines().skip(1).collect()
    }

    #[test]
    fn test_header() {
        let data = [0u8; 20];
        let dump = HexDump(&data).to_string();
        let header = dump.lines().next().unwrap();
        assert_eq!(header, format!("Dump of address: {:p}, 20 bytes", data.as_ptr()));
    }

    #[test]
    fn test_lines_of_sixteen() {
        let data: Vec<u8> = (0u8..34).collect();
        let dump = HexDump(&data).to_string();
        assert_eq!(
            body(&dump),
            vec![
                "  0000:   0001 0203 0405 0607 0809 0a0b 0c0d 0e0f",
                "  0010:   1011 1213 1415 1617 1819 1a1b 1c1d 1e1f",
                "  0020:   2021",
            ]
        );
        assert!(dump.ends_with('\n'));
    }

    #[test]
    fn test_odd_length() {
        let dump = HexDump(&[0xab, 0xcd, 0xef]).to_string();
        assert_eq!(body(&dump), vec!["  0000:   abcd ef"]);
    }

    #[test]
    fn test_empty() {
        let dump = HexDump(&[]).to_string();
        assert!(dump.starts_with("Dump of address: "));
        assert!(dump.ends_with(", 0 bytes\n"));
    }
}
