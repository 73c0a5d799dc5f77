//! XML encoding detection for ModuleConfig.xml.
//!
//! FOMOD configs in the wild arrive as UTF-16 LE/BE (with BOM), UTF-8 with
//! BOM, or plain UTF-8. quick-xml wants UTF-8, so UTF-16 input is decoded
//! through encoding_rs first.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Byte-order marks we honour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlEncoding {
    Utf16Le,
    Utf16Be,
    Utf8Bom,
    Utf8,
}

/// Classify the encoding by leading BOM bytes.
pub fn detect_encoding(bytes: &[u8]) -> XmlEncoding {
    match bytes {
        [0xFF, 0xFE, ..] => XmlEncoding::Utf16Le,
        [0xFE, 0xFF, ..] => XmlEncoding::Utf16Be,
        [0xEF, 0xBB, 0xBF, ..] => XmlEncoding::Utf8Bom,
        _ => XmlEncoding::Utf8,
    }
}

/// Decode raw XML bytes into a UTF-8 string, honouring the BOM.
pub fn decode_xml_bytes(bytes: &[u8]) -> Result<String> {
    match detect_encoding(bytes) {
        XmlEncoding::Utf16Le => {
            let (text, _, had_errors) = encoding_rs::UTF_16LE.decode(&bytes[2..]);
            if had_errors {
                bail!("UTF-16 LE decoding error");
            }
            Ok(text.into_owned())
        }
        XmlEncoding::Utf16Be => {
            let (text, _, had_errors) = encoding_rs::UTF_16BE.decode(&bytes[2..]);
            if had_errors {
                bail!("UTF-16 BE decoding error");
            }
            Ok(text.into_owned())
        }
        XmlEncoding::Utf8Bom => {
            String::from_utf8(bytes[3..].to_vec()).context("Invalid UTF-8 after BOM")
        }
        XmlEncoding::Utf8 => String::from_utf8(bytes.to_vec()).context("Invalid UTF-8 XML"),
    }
}

/// Read an XML file and return its UTF-8 text.
pub fn read_xml_file(path: &Path) -> Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read XML file: {}", path.display()))?;
    decode_xml_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert_eq!(detect_encoding(&[0xFF, 0xFE, 0x3C, 0x00]), XmlEncoding::Utf16Le);
        assert_eq!(detect_encoding(&[0xFE, 0xFF, 0x00, 0x3C]), XmlEncoding::Utf16Be);
        assert_eq!(detect_encoding(&[0xEF, 0xBB, 0xBF, b'<']), XmlEncoding::Utf8Bom);
        assert_eq!(detect_encoding(b"<?xml"), XmlEncoding::Utf8);
        assert_eq!(detect_encoding(&[]), XmlEncoding::Utf8);
    }

    #[test]
    fn test_decode_utf16_le() {
        let mut bytes = vec![0xFF, 0xFE];
        for c in "<config/>".encode_utf16() {
            bytes.extend_from_slice(&c.to_le_bytes());
        }
        assert_eq!(decode_xml_bytes(&bytes).unwrap(), "<config/>");
    }

    #[test]
    fn test_decode_utf16_be() {
        let mut bytes = vec![0xFE, 0xFF];
        for c in "<config/>".encode_utf16() {
            bytes.extend_from_slice(&c.to_be_bytes());
        }
        assert_eq!(decode_xml_bytes(&bytes).unwrap(), "<config/>");
    }

    #[test]
    fn test_decode_utf8_bom_stripped() {
        let bytes = [&[0xEF, 0xBB, 0xBF][..], b"<config/>"].concat();
        assert_eq!(decode_xml_bytes(&bytes).unwrap(), "<config/>");
    }

    #[test]
    fn test_decode_plain_utf8() {
        assert_eq!(decode_xml_bytes(b"<config/>").unwrap(), "<config/>");
    }
}
