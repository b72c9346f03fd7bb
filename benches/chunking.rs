use askdocs::chunker::{ChunkerConfig, chunk_text};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

/// Build a synthetic document with paragraph structure so the separator
/// ladder gets exercised, not just the word-level fallback.
fn synthetic_document(paragraphs: usize) -> String {
    let mut text = String::new();
    for i in 0..paragraphs {
        text.push_str(&format!(
            "Paragraph {} covers configuration, retrieval and ranking. \
             It contains several sentences of plausible documentation prose. \
             Each sentence adds enough tokens to force multiple chunks.\n\n",
            i
        ));
    }
    text
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let document = synthetic_document(500);
    let config = ChunkerConfig::default();

    c.bench_function("chunking", |b| {
        b.iter(|| chunk_text(black_box(&document), black_box(&config)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
