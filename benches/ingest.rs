//! Benchmarks for ingestion, addressing and pacing.
//!
//! Run with: cargo bench

use std::io::{Cursor, Write};
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use lura::{
    AddressResolver, ArchiveReader, CancelToken, DocumentModel, PacingConfig, PacingEngine,
    PacingMode, Tick, ingest,
};

const CONTAINER_XML: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#;

const SENTENCE: &str = "It was the best of times, it was the worst of times; it was the age of wisdom. ";

/// A novel-sized EPUB: 40 chapters of 60 paragraphs.
fn sample_epub() -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    let mut manifest = String::new();
    let mut spine = String::new();

    zip.start_file("mimetype", options).unwrap();
    zip.write_all(b"application/epub+zip").unwrap();
    zip.start_file("META-INF/container.xml", options).unwrap();
    zip.write_all(CONTAINER_XML.as_bytes()).unwrap();

    for c in 0..40 {
        manifest.push_str(&format!(
            r#"<item id="c{c}" href="c{c}.xhtml" media-type="application/xhtml+xml"/>"#
        ));
        spine.push_str(&format!(r#"<itemref idref="c{c}"/>"#));

        let mut body = format!("<h2>Chapter {}</h2>", c + 1);
        for p in 0..60 {
            body.push_str("<p>");
            body.push_str(&SENTENCE.repeat(1 + p % 4));
            body.push_str("</p>");
        }
        zip.start_file(format!("OEBPS/c{c}.xhtml"), options).unwrap();
        write!(
            zip,
            r#"<html xmlns="http://www.w3.org/1999/xhtml"><head><title>c{c}</title></head><body>{body}</body></html>"#
        )
        .unwrap();
    }

    zip.start_file("OEBPS/content.opf", options).unwrap();
    write!(
        zip,
        r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0"><metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>Bench</dc:title></metadata><manifest>{manifest}</manifest><spine>{spine}</spine></package>"#
    )
    .unwrap();
    zip.finish().unwrap().into_inner()
}

fn parse(bytes: &[u8]) -> DocumentModel {
    let archive = ArchiveReader::from_bytes(bytes.to_vec()).unwrap();
    ingest(&archive, &CancelToken::new()).unwrap()
}

// ============================================================================
// Ingestion
// ============================================================================

fn bench_ingest(c: &mut Criterion) {
    let bytes = sample_epub();
    c.bench_function("ingest", |b| b.iter(|| parse(&bytes)));
}

// ============================================================================
// Addressing
// ============================================================================

fn bench_locate_resolve(c: &mut Criterion) {
    let model = Arc::new(parse(&sample_epub()));
    let resolver = AddressResolver::new(model.clone());
    let total = model.total_word_count();

    c.bench_function("locate_resolve_all_words", |b| {
        b.iter(|| {
            for index in (0..total).step_by(7) {
                let address = resolver.locate(index).unwrap();
                assert_eq!(resolver.resolve_address(address).unwrap(), index);
            }
        });
    });
}

// ============================================================================
// Pacing
// ============================================================================

fn bench_pacing(c: &mut Criterion) {
    let model = Arc::new(parse(&sample_epub()));

    c.bench_function("pace_whole_book", |b| {
        b.iter(|| {
            let mut engine = PacingEngine::new(model.clone(), PacingConfig::default());
            engine.start(0, PacingMode::Pulse, 0).unwrap();
            let mut now = 0;
            loop {
                match engine.tick(now) {
                    Tick::Wait { until_ms } => now = until_ms,
                    Tick::Word(_) => {}
                    _ => break,
                }
            }
            now
        });
    });
}

criterion_group!(benches, bench_ingest, bench_locate_resolve, bench_pacing);
criterion_main!(benches);
