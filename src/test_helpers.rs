//! Builders shared by unit tests.

use std::io::{Cursor, Write};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::flatten::FlatElement;
use crate::model::{Chapter, DocumentModel, Element, ElementKind};
use crate::package::Metadata;

/// Zip `files` with deflate.
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    zip_with(files, zip::CompressionMethod::Deflated)
}

/// Zip `files` without compression.
pub fn zip_bytes_stored(files: &[(&str, &[u8])]) -> Vec<u8> {
    zip_with(files, zip::CompressionMethod::Stored)
}

fn zip_with(files: &[(&str, &[u8])], method: zip::CompressionMethod) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(method);
    for (name, data) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// A minimal EPUB: one content document per chapter body.
pub fn epub_bytes(title: &str, chapters: &[&str]) -> Vec<u8> {
    let mut manifest = String::new();
    let mut spine = String::new();
    let mut docs = Vec::new();
    for (i, body) in chapters.iter().enumerate() {
        manifest.push_str(&format!(
            r#"<item id="c{i}" href="text/c{i}.xhtml" media-type="application/xhtml+xml"/>"#
        ));
        spine.push_str(&format!(r#"<itemref idref="c{i}"/>"#));
        docs.push((
            format!("OEBPS/text/c{i}.xhtml"),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8"?><html xmlns="http://www.w3.org/1999/xhtml"><head><title>Doc {i}</title></head><body>{body}</body></html>"#
            ),
        ));
    }
    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
<metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>{title}</dc:title><dc:creator>Test Author</dc:creator></metadata>
<manifest>{manifest}</manifest><spine>{spine}</spine></package>"#
    );

    let mut files: Vec<(&str, &[u8])> = vec![
        ("mimetype", b"application/epub+zip".as_slice()),
        ("META-INF/container.xml", CONTAINER_XML.as_bytes()),
        ("OEBPS/content.opf", opf.as_bytes()),
    ];
    for (name, doc) in &docs {
        files.push((name.as_str(), doc.as_bytes()));
    }
    zip_bytes(&files)
}

pub const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#;

/// Build a model directly: each string is a paragraph, `"[img]"` an image.
pub fn model_from(chapters: &[&[&str]]) -> DocumentModel {
    let chapters = chapters
        .iter()
        .enumerate()
        .map(|(c, texts)| Chapter {
            index: c,
            title: format!("Chapter {}", c + 1),
            source_path: format!("c{c}.xhtml"),
            elements: texts
                .iter()
                .enumerate()
                .map(|(e, text)| {
                    let flat = if *text == "[img]" {
                        FlatElement {
                            kind: ElementKind::Image,
                            text: String::new(),
                            source: Some(format!("img{e}.png")),
                            alt: None,
                        }
                    } else {
                        FlatElement {
                            kind: ElementKind::Paragraph,
                            text: text.to_string(),
                            source: None,
                            alt: None,
                        }
                    };
                    Element::new(e, flat)
                })
                .collect(),
        })
        .collect();
    DocumentModel::new("Test", "Author", Metadata::default(), Vec::new(), chapters)
}

/// `n` one-word paragraphs in a single chapter.
pub fn model_with_words(n: usize) -> DocumentModel {
    let texts: Vec<String> = (0..n).map(|i| format!("w{i}")).collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    model_from(&[&refs])
}
