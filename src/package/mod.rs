//! Package document parsing: `META-INF/container.xml`, the OPF manifest and
//! spine, and the NCX table of contents.

mod ncx;

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::archive::ArchiveReader;
use crate::error::{Error, Result};
use crate::util::{decode_text, extract_xml_encoding, local_name, parent_dir, resolve_entity, resolve_href};

pub use ncx::{TocEntry, parse_ncx};

pub const CONTAINER_PATH: &str = "META-INF/container.xml";
pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

/// Content document types the flattener understands.
pub const SUPPORTED_MEDIA_TYPES: &[&str] = &[
    "application/xhtml+xml",
    "text/html",
    "application/x-dtbook+xml",
];

pub const DEFAULT_TITLE: &str = "Untitled Book";
pub const DEFAULT_AUTHOR: &str = "Unknown Author";

/// Dublin Core metadata from the package document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: String,
    pub authors: Vec<String>,
    pub language: String,
    pub identifier: String,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub subjects: Vec<String>,
    pub date: Option<String>,
}

impl Metadata {
    pub fn title_or_default(&self) -> &str {
        if self.title.trim().is_empty() {
            DEFAULT_TITLE
        } else {
            self.title.trim()
        }
    }

    /// All creators joined with ", ", or the placeholder when there are none.
    pub fn author_or_default(&self) -> String {
        let authors: Vec<&str> = self
            .authors
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect();
        if authors.is_empty() {
            DEFAULT_AUTHOR.to_string()
        } else {
            authors.join(", ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// The href as written in the package document.
    pub href: String,
    /// Archive path after resolving `href` against the package directory.
    pub path: String,
    pub media_type: String,
    pub properties: Vec<String>,
}

/// One readable document in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    pub idref: String,
    pub path: String,
    pub media_type: String,
    pub linear: bool,
}

/// The parsed package: where it lives, what it contains and in which order
/// it is read.
#[derive(Debug, Clone)]
pub struct Package {
    pub opf_path: String,
    pub metadata: Metadata,
    pub manifest: HashMap<String, ManifestItem>,
    pub spine: Vec<SpineItem>,
    /// Spine itemrefs dropped because of their media type.
    pub skipped: Vec<String>,
    pub toc: Vec<TocEntry>,
}

impl Package {
    /// Directory of the package document; manifest hrefs are relative to it.
    pub fn base_dir(&self) -> &str {
        parent_dir(&self.opf_path)
    }

    /// The first table-of-contents label pointing into `path`, in reading order.
    pub fn toc_label(&self, path: &str) -> Option<&str> {
        let mut stack: Vec<&TocEntry> = self.toc.iter().rev().collect();
        while let Some(entry) = stack.pop() {
            if entry.path == path && !entry.label.trim().is_empty() {
                return Some(entry.label.trim());
            }
            stack.extend(entry.children.iter().rev());
        }
        None
    }
}

/// Locate and parse the package document of an EPUB archive.
pub fn parse_package(archive: &ArchiveReader) -> Result<Package> {
    let container = archive.read_text(CONTAINER_PATH).map_err(|e| match e {
        Error::EntryNotFound(_) => Error::MissingManifest(format!("{CONTAINER_PATH} not found")),
        other => other,
    })?;
    let opf_path = parse_container_xml(&container)?;
    debug!("package document at {opf_path}");

    let opf_bytes = archive.read_text(&opf_path).map_err(|e| match e {
        Error::EntryNotFound(_) => {
            Error::MissingManifest(format!("package document {opf_path} not found"))
        }
        other => other,
    })?;
    let opf_str = decode_text(&opf_bytes, extract_xml_encoding(&opf_bytes));
    let opf = parse_opf(&opf_str, parent_dir(&opf_path))?;

    let (spine, skipped) = build_spine(&opf)?;

    let ncx_item = opf
        .toc_id
        .as_ref()
        .and_then(|id| opf.manifest.get(id))
        .or_else(|| opf.manifest.values().find(|item| item.media_type == NCX_MEDIA_TYPE));

    let toc = match ncx_item {
        Some(item) => match archive.read_text(&item.path) {
            Ok(bytes) => {
                let text = decode_text(&bytes, extract_xml_encoding(&bytes));
                parse_ncx(&text, parent_dir(&item.path)).unwrap_or_else(|e| {
                    warn!("ignoring unreadable table of contents {}: {e}", item.path);
                    Vec::new()
                })
            }
            Err(e) => {
                warn!("table of contents {} unavailable: {e}", item.path);
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    Ok(Package {
        opf_path,
        metadata: opf.metadata,
        manifest: opf.manifest,
        spine,
        skipped,
        toc,
    })
}

/// Parse `META-INF/container.xml` and return the first rootfile's full path.
pub fn parse_container_xml(bytes: &[u8]) -> Result<String> {
    let content = decode_text(bytes, extract_xml_encoding(bytes));
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e))
                if local_name(e.name().as_ref()) == b"rootfile" =>
            {
                if let Some(path) = attr_string(&e, b"full-path")
                    && !path.trim().is_empty()
                {
                    return Ok(path.trim().trim_start_matches('/').to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::MissingManifest(format!(
                    "unreadable {CONTAINER_PATH}: {e}"
                )));
            }
            _ => {}
        }
    }

    Err(Error::MissingManifest(format!(
        "no rootfile in {CONTAINER_PATH}"
    )))
}

/// The raw contents of an OPF document, before the spine is validated.
#[derive(Debug, Default)]
pub struct OpfData {
    pub metadata: Metadata,
    pub manifest: HashMap<String, ManifestItem>,
    /// (idref, linear) in document order.
    pub spine_refs: Vec<(String, bool)>,
    pub toc_id: Option<String>,
    pub has_manifest: bool,
    pub has_spine: bool,
}

/// Parse an OPF package document. Hrefs are resolved against `base_dir`.
pub fn parse_opf(content: &str, base_dir: &str) -> Result<OpfData> {
    // Untrimmed: text around an entity reference arrives as separate events.
    let mut reader = Reader::from_str(content);

    let mut opf = OpfData::default();
    let mut in_metadata = false;
    let mut current_field: Option<&'static str> = None;
    let mut buf_text = String::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::MissingManifest(format!("unreadable package document: {e}"))
        })?;

        let empty = matches!(event, Event::Empty(_));
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"metadata" => in_metadata = !empty,
                    b"manifest" => opf.has_manifest = true,
                    b"spine" => {
                        opf.has_spine = true;
                        opf.toc_id = attr_string(&e, b"toc");
                    }
                    b"item" => {
                        if let Some(item) = manifest_item(&e, base_dir) {
                            opf.manifest.insert(item.id.clone(), item);
                        }
                    }
                    b"itemref" => {
                        if let Some(idref) = attr_string(&e, b"idref") {
                            let linear = attr_string(&e, b"linear").is_none_or(|v| v != "no");
                            opf.spine_refs.push((idref, linear));
                        }
                    }
                    field if in_metadata && !empty => {
                        current_field = metadata_field(field);
                        buf_text.clear();
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                if current_field.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) => {
                if current_field.is_some() {
                    let entity = String::from_utf8_lossy(e.as_ref());
                    if let Some(resolved) = resolve_entity(&entity) {
                        buf_text.push_str(&resolved);
                    }
                }
            }
            Event::CData(e) => {
                if current_field.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::End(e) => {
                let name = e.name();
                if local_name(name.as_ref()) == b"metadata" {
                    in_metadata = false;
                }
                if let Some(field) = current_field.take() {
                    apply_metadata(&mut opf.metadata, field, buf_text.trim());
                    buf_text.clear();
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(opf)
}

/// Validate the spine against the manifest and drop unsupported documents.
fn build_spine(opf: &OpfData) -> Result<(Vec<SpineItem>, Vec<String>)> {
    if !opf.has_manifest {
        return Err(Error::MissingManifest(
            "package document has no <manifest>".into(),
        ));
    }
    if !opf.has_spine {
        return Err(Error::InvalidSpine("package document has no <spine>".into()));
    }
    if opf.spine_refs.is_empty() {
        return Err(Error::InvalidSpine("spine is empty".into()));
    }

    let mut seen = HashSet::new();
    let mut spine = Vec::with_capacity(opf.spine_refs.len());
    let mut skipped = Vec::new();

    for (idref, linear) in &opf.spine_refs {
        let item = opf.manifest.get(idref).ok_or_else(|| {
            Error::InvalidSpine(format!("itemref {idref} is not in the manifest"))
        })?;
        if !seen.insert(item.path.as_str()) {
            return Err(Error::InvalidSpine(format!(
                "{} appears twice in reading order",
                item.path
            )));
        }
        if !SUPPORTED_MEDIA_TYPES.contains(&item.media_type.as_str()) {
            warn!(
                "skipping spine item {idref}: unsupported media type {:?}",
                item.media_type
            );
            skipped.push(idref.clone());
            continue;
        }
        spine.push(SpineItem {
            idref: idref.clone(),
            path: item.path.clone(),
            media_type: item.media_type.clone(),
            linear: *linear,
        });
    }

    if spine.is_empty() {
        return Err(Error::EmptyBook);
    }
    Ok((spine, skipped))
}

fn manifest_item(e: &BytesStart<'_>, base_dir: &str) -> Option<ManifestItem> {
    let id = attr_string(e, b"id")?;
    let href = attr_string(e, b"href")?;
    if id.is_empty() || href.is_empty() {
        return None;
    }
    let media_type = attr_string(e, b"media-type")
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let properties = attr_string(e, b"properties")
        .map(|p| p.split_ascii_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    Some(ManifestItem {
        path: resolve_href(base_dir, &href),
        id,
        href,
        media_type,
        properties,
    })
}

fn metadata_field(local: &[u8]) -> Option<&'static str> {
    Some(match local {
        b"title" => "title",
        b"creator" => "creator",
        b"language" => "language",
        b"identifier" => "identifier",
        b"publisher" => "publisher",
        b"description" => "description",
        b"subject" => "subject",
        b"date" => "date",
        _ => return None,
    })
}

fn apply_metadata(metadata: &mut Metadata, field: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    let value = value.to_string();
    match field {
        "title" if metadata.title.is_empty() => metadata.title = value,
        "creator" => metadata.authors.push(value),
        "language" if metadata.language.is_empty() => metadata.language = value,
        "identifier" if metadata.identifier.is_empty() => metadata.identifier = value,
        "publisher" => metadata.publisher = Some(value),
        "description" => metadata.description = Some(value),
        "subject" => metadata.subjects.push(value),
        "date" if metadata.date.is_none() => metadata.date = Some(value),
        _ => {}
    }
}

/// Unescaped value of attribute `key`, if present.
pub(crate) fn attr_string(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| local_name(attr.key.as_ref()) == key)
        .map(|attr| match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Pride &amp; Prejudice</dc:title>
    <dc:creator>Jane Austen</dc:creator>
    <dc:language>en</dc:language>
    <dc:subject>Fiction</dc:subject>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="c1" href="text/ch%201.xhtml" media-type="application/xhtml+xml"/>
    <item id="c2" href="../shared/ch2.html" media-type="text/html"></item>
    <item id="img" href="images/cover.jpg" media-type="image/jpeg"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="c1"/>
    <itemref idref="img"/>
    <itemref idref="c2" linear="no"/>
  </spine>
</package>"#;

    #[test]
    fn test_parse_container_xml() {
        let xml = br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#;
        assert_eq!(parse_container_xml(xml).unwrap(), "OEBPS/content.opf");
    }

    #[test]
    fn test_container_without_rootfile() {
        let xml = br#"<container><rootfiles/></container>"#;
        assert!(matches!(parse_container_xml(xml), Err(Error::MissingManifest(_))));
    }

    #[test]
    fn test_parse_opf_metadata_and_manifest() {
        let opf = parse_opf(OPF, "OEBPS").unwrap();
        assert_eq!(opf.metadata.title, "Pride & Prejudice");
        assert_eq!(opf.metadata.authors, ["Jane Austen"]);
        assert_eq!(opf.metadata.subjects, ["Fiction"]);
        assert_eq!(opf.toc_id.as_deref(), Some("ncx"));
        assert_eq!(opf.manifest["c1"].path, "OEBPS/text/ch 1.xhtml");
        assert_eq!(opf.manifest["c2"].path, "shared/ch2.html");
        assert_eq!(
            opf.spine_refs,
            [("c1".to_string(), true), ("img".to_string(), true), ("c2".to_string(), false)]
        );
    }

    #[test]
    fn test_metadata_keeps_spaces_around_references() {
        let opf = r#"<package><metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
            <dc:title>
                Tom &amp; Jerry &#x2014; &lt;Collected&gt;
            </dc:title>
            <dc:creator/>
            <dc:creator>Anon &amp; Co</dc:creator>
            <dc:description>One &quot;two&quot; three</dc:description>
        </metadata><manifest/><spine/></package>"#;
        let opf = parse_opf(opf, "").unwrap();
        assert_eq!(opf.metadata.title, "Tom & Jerry \u{2014} <Collected>");
        assert_eq!(opf.metadata.authors, ["Anon & Co"]);
        assert_eq!(opf.metadata.description.as_deref(), Some("One \"two\" three"));
    }

    #[test]
    fn test_build_spine_skips_unsupported_media() {
        let opf = parse_opf(OPF, "OEBPS").unwrap();
        let (spine, skipped) = build_spine(&opf).unwrap();
        let ids: Vec<_> = spine.iter().map(|s| s.idref.as_str()).collect();
        assert_eq!(ids, ["c1", "c2"]);
        assert_eq!(skipped, ["img"]);
        assert!(!spine[1].linear);
    }

    #[test]
    fn test_spine_errors() {
        let unknown = OPF.replace(r#"<itemref idref="img"/>"#, r#"<itemref idref="nope"/>"#);
        let opf = parse_opf(&unknown, "").unwrap();
        assert!(matches!(build_spine(&opf), Err(Error::InvalidSpine(_))));

        let twice = OPF.replace(r#"<itemref idref="img"/>"#, r#"<itemref idref="c1"/>"#);
        let opf = parse_opf(&twice, "").unwrap();
        assert!(matches!(build_spine(&opf), Err(Error::InvalidSpine(msg)) if msg.contains("twice")));

        let only_images = r#"<package><manifest><item id="i" href="a.png" media-type="image/png"/></manifest>
            <spine><itemref idref="i"/></spine></package>"#;
        let opf = parse_opf(only_images, "").unwrap();
        assert!(matches!(build_spine(&opf), Err(Error::EmptyBook)));

        let no_manifest = r#"<package><spine><itemref idref="i"/></spine></package>"#;
        let opf = parse_opf(no_manifest, "").unwrap();
        assert!(matches!(build_spine(&opf), Err(Error::MissingManifest(_))));

        let empty_spine = r#"<package><manifest/><spine/></package>"#;
        let opf = parse_opf(empty_spine, "").unwrap();
        assert!(matches!(build_spine(&opf), Err(Error::InvalidSpine(_))));
    }

    #[test]
    fn test_metadata_defaults() {
        let metadata = Metadata::default();
        assert_eq!(metadata.title_or_default(), DEFAULT_TITLE);
        assert_eq!(metadata.author_or_default(), DEFAULT_AUTHOR);

        let metadata = Metadata {
            authors: vec!["A".into(), " ".into(), "B".into()],
            ..Default::default()
        };
        assert_eq!(metadata.author_or_default(), "A, B");
    }
}
