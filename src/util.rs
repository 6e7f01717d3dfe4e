//! Shared helpers: text decoding, archive path resolution, hashing and clocks.

use std::borrow::Cow;

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn time_now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Hex SHA-1 digest of `data`.
pub fn sha1_hex(data: &[u8]) -> String {
    sha1_smol::Sha1::from(data).digest().to_string()
}

/// Decode bytes to a string, handling various encodings.
///
/// 1. UTF-8, or whatever a BOM names (encoding_rs sniffs UTF-8/16 BOMs)
/// 2. UTF-16 without a BOM, recognised by a leading `<`
/// 3. The hint encoding from `<?xml encoding="..."?>`
/// 4. Windows-1252, common in old ebooks
pub fn decode_text<'a>(bytes: &'a [u8], hint_encoding: Option<&str>) -> Cow<'a, str> {
    if let Some(utf16) = match bytes {
        [b'<', 0, ..] => Some(encoding_rs::UTF_16LE),
        [0, b'<', ..] => Some(encoding_rs::UTF_16BE),
        _ => None,
    } {
        return utf16.decode(bytes).0;
    }

    let (result, _encoding, malformed) = encoding_rs::UTF_8.decode(bytes);

    if !malformed {
        return result;
    }

    if let Some(name) = hint_encoding
        && let Some(encoding) = encoding_rs::Encoding::for_label(name.as_bytes())
    {
        let (result, _, _) = encoding.decode(bytes);
        return result;
    }

    let (result, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    result
}

/// Extract the encoding name from an XML declaration, if any.
pub fn extract_xml_encoding(bytes: &[u8]) -> Option<&str> {
    // Only the first 100 bytes can hold the declaration
    let check_len = bytes.len().min(100);
    let prefix = &bytes[..check_len];

    let xml_start = memchr::memmem::find(prefix, b"<?xml")?;
    let after_xml = &prefix[xml_start..];

    let enc_pos = after_xml
        .windows(9)
        .position(|w| w.eq_ignore_ascii_case(b"encoding="))?;
    let after_enc = &after_xml[enc_pos + 9..];

    let quote = *after_enc.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }

    let value_end = after_enc[1..].iter().position(|&b| b == quote)? + 1;
    std::str::from_utf8(&after_enc[1..value_end]).ok()
}

/// Strip UTF-8 BOM (byte order mark) if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

/// Extract local name from potentially namespaced XML name.
pub fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Resolve a predefined or numeric XML entity reference.
pub fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        "nbsp" => return Some("\u{a0}".to_string()),
        _ => {}
    }

    let code = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok()
    } else {
        None
    };

    code.and_then(char::from_u32).map(|c| c.to_string())
}

/// Directory part of an archive path (`"OEBPS/text/ch1.xhtml"` → `"OEBPS/text"`).
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i]).unwrap_or("")
}

/// Resolve an href against a base directory inside the archive.
///
/// The href is percent-decoded, any `#fragment` is dropped, and `.`/`..`
/// segments are normalised. A leading `/` makes the href archive-absolute.
pub fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or("");
    let decoded = percent_encoding::percent_decode_str(href).decode_utf8_lossy();

    let mut parts: Vec<&str> = Vec::new();
    let relative = match decoded.strip_prefix('/') {
        Some(absolute) => absolute,
        None => {
            parts.extend(base_dir.split('/').filter(|s| !s.is_empty()));
            &*decoded
        }
    };

    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_name() {
        assert_eq!(local_name(b"dc:title"), b"title");
        assert_eq!(local_name(b"title"), b"title");
        assert_eq!(local_name(b"opf:meta"), b"meta");
    }

    #[test]
    fn test_resolve_entity() {
        assert_eq!(resolve_entity("apos").as_deref(), Some("'"));
        assert_eq!(resolve_entity("#x41").as_deref(), Some("A"));
        assert_eq!(resolve_entity("#233").as_deref(), Some("é"));
        assert_eq!(resolve_entity("bogus"), None);
    }

    #[test]
    fn test_resolve_href_parent_directory() {
        assert_eq!(
            resolve_href("OEBPS/text", "../images/photo.jpg"),
            "OEBPS/images/photo.jpg"
        );
        assert_eq!(resolve_href("", "ch1.xhtml#start"), "ch1.xhtml");
        assert_eq!(resolve_href("OEBPS", "/cover.xhtml"), "cover.xhtml");
        assert_eq!(resolve_href("OEBPS", "my%20chapter.xhtml"), "OEBPS/my chapter.xhtml");
    }

    #[test]
    fn test_extract_xml_encoding() {
        let bytes = br#"<?xml version="1.0" encoding="windows-1252"?><html/>"#;
        assert_eq!(extract_xml_encoding(bytes), Some("windows-1252"));
        assert_eq!(extract_xml_encoding(b"<html/>"), None);
    }

    #[test]
    fn test_decode_text_falls_back_to_windows_1252() {
        // 0x93/0x94 are curly quotes in CP1252 and invalid as UTF-8
        let bytes = b"\x93quoted\x94";
        assert_eq!(decode_text(bytes, None), "\u{201c}quoted\u{201d}");
    }

    #[test]
    fn test_decode_text_utf16() {
        let le: Vec<u8> = [0xFF, 0xFE].into_iter().chain("<p>é</p>".encode_utf16().flat_map(u16::to_le_bytes)).collect();
        assert_eq!(decode_text(&le, None), "<p>é</p>");

        let be: Vec<u8> = "<p>x</p>".encode_utf16().flat_map(u16::to_be_bytes).collect();
        assert_eq!(decode_text(&be, None), "<p>x</p>");
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom(b"\xEF\xBB\xBFabc"), b"abc");
        assert_eq!(strip_bom(b"abc"), b"abc");
    }
}
