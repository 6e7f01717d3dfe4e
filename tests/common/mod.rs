//! In-memory EPUB fixtures shared by the integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#;

struct Chapter {
    file: String,
    body: String,
    toc_label: Option<String>,
    in_archive: bool,
}

/// Builds an EPUB 2 archive with an OPF under `OEBPS/` and an optional NCX.
pub struct EpubBuilder {
    title: String,
    authors: Vec<String>,
    language: String,
    chapters: Vec<Chapter>,
    extra: Vec<(String, Vec<u8>)>,
}

impl EpubBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            authors: Vec::new(),
            language: "en".to_string(),
            chapters: Vec::new(),
            extra: Vec::new(),
        }
    }

    pub fn author(mut self, name: &str) -> Self {
        self.authors.push(name.to_string());
        self
    }

    /// A chapter whose `<body>` is `body`.
    pub fn chapter(mut self, body: &str) -> Self {
        let n = self.chapters.len() + 1;
        self.chapters.push(Chapter {
            file: format!("text/chapter{n}.xhtml"),
            body: body.to_string(),
            toc_label: None,
            in_archive: true,
        });
        self
    }

    /// A chapter listed in the NCX under `label`.
    pub fn toc_chapter(mut self, label: &str, body: &str) -> Self {
        self = self.chapter(body);
        if let Some(last) = self.chapters.last_mut() {
            last.toc_label = Some(label.to_string());
        }
        self
    }

    /// A chapter referenced by the manifest and spine but absent from the zip.
    pub fn missing_chapter(mut self) -> Self {
        self = self.chapter("");
        if let Some(last) = self.chapters.last_mut() {
            last.in_archive = false;
        }
        self
    }

    /// Extra archive entry, e.g. an image, under `OEBPS/`.
    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        self.extra.push((path.to_string(), data.to_vec()));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let has_toc = self.chapters.iter().any(|c| c.toc_label.is_some());

        let mut manifest = String::new();
        let mut spine = String::new();
        for (i, chapter) in self.chapters.iter().enumerate() {
            manifest.push_str(&format!(
                r#"<item id="ch{i}" href="{}" media-type="application/xhtml+xml"/>"#,
                chapter.file
            ));
            spine.push_str(&format!(r#"<itemref idref="ch{i}"/>"#));
        }
        if has_toc {
            manifest.push_str(r#"<item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#);
        }
        let creators: String = self
            .authors
            .iter()
            .map(|a| format!("<dc:creator>{a}</dc:creator>"))
            .collect();
        let spine_attr = if has_toc { r#" toc="ncx""# } else { "" };

        let opf = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>{}</dc:title>{creators}<dc:language>{}</dc:language>
    <dc:identifier id="uid">urn:test:{}</dc:identifier>
  </metadata>
  <manifest>{manifest}</manifest>
  <spine{spine_attr}>{spine}</spine>
</package>"#,
            self.title, self.language, self.title
        );

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        zip.start_file("META-INF/container.xml", deflated).unwrap();
        zip.write_all(CONTAINER_XML.as_bytes()).unwrap();
        zip.start_file("OEBPS/content.opf", deflated).unwrap();
        zip.write_all(opf.as_bytes()).unwrap();

        if has_toc {
            zip.start_file("OEBPS/toc.ncx", deflated).unwrap();
            zip.write_all(self.ncx().as_bytes()).unwrap();
        }

        for chapter in self.chapters.iter().filter(|c| c.in_archive) {
            let doc = format!(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>{}</title></head>
<body>{}</body></html>"#,
                self.title, chapter.body
            );
            zip.start_file(format!("OEBPS/{}", chapter.file), deflated).unwrap();
            zip.write_all(doc.as_bytes()).unwrap();
        }

        for (path, data) in &self.extra {
            zip.start_file(format!("OEBPS/{path}"), stored).unwrap();
            zip.write_all(data).unwrap();
        }

        zip.finish().unwrap().into_inner()
    }

    fn ncx(&self) -> String {
        let points: String = self
            .chapters
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                let label = c.toc_label.as_ref()?;
                Some(format!(
                    r#"<navPoint id="np{i}" playOrder="{}"><navLabel><text>{label}</text></navLabel><content src="{}"/></navPoint>"#,
                    i + 1,
                    c.file
                ))
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head/><docTitle><text>{}</text></docTitle>
  <navMap>{points}</navMap>
</ncx>"#,
            self.title
        )
    }
}

/// Two chapters: "Hello world." / "Second line", then a headed chapter.
pub fn sample_book() -> Vec<u8> {
    EpubBuilder::new("Sample Book")
        .author("Ada Writer")
        .toc_chapter("Opening", "<p>Hello world.</p><p>Second line</p>")
        .chapter("<h1>The Middle</h1><p>Some more words, with commas; and clauses.</p>")
        .build()
}

/// `paragraphs` paragraphs of `words_each` words across `chapters` chapters.
pub fn long_book(chapters: usize, paragraphs: usize, words_each: usize) -> Vec<u8> {
    let mut builder = EpubBuilder::new("Long Book").author("Anon");
    for c in 0..chapters {
        let mut body = format!("<h2>Part {}</h2>", c + 1);
        for p in 0..paragraphs {
            body.push_str("<p>");
            for w in 0..words_each {
                body.push_str(&format!("w{c}x{p}x{w} "));
            }
            body.push_str("</p>");
        }
        builder = builder.chapter(&body);
    }
    builder.build()
}
