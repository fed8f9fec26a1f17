use clarifia::parse_ai_output;
use clarifia::upstream::{extract_raw_text, ContentBlock, UpstreamOutput};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

fn sample_reply() -> String {
    json!({
        "summary": "Avis de taxe foncière 2025",
        "what_it_means": "Vous devez payer la taxe foncière avant la date limite.",
        "deadlines": [{"label": "Paiement", "date": "2025-10-15", "notes": "Date indiquée sur l'avis"}],
        "steps": [{"title": "Payer en ligne", "details": "Depuis votre espace particulier."}],
        "missing_info": [],
        "risks": ["Majoration de 10 % en cas de retard"],
        "official_sites": [{"name": "Service-Public", "url": "https://www.service-public.fr"}]
    })
    .to_string()
}

fn bench_extraction(c: &mut Criterion) {
    let reply = sample_reply();
    let direct = UpstreamOutput::DirectText(reply.clone());

    // Same reply split into many textual blocks interleaved with non-text ones.
    let envelope = json!({
        "output": reply
            .as_bytes()
            .chunks(32)
            .map(|chunk| json!({
                "type": "message",
                "content": [
                    {"type": "reasoning_text", "text": "skip"},
                    {"type": "output_text", "text": String::from_utf8_lossy(chunk)}
                ]
            }))
            .collect::<Vec<_>>()
    })
    .to_string();
    let many_small = UpstreamOutput::BlockList((0..512).map(|i| ContentBlock::text(i.to_string())).collect());

    c.bench_function("extract_direct_text", |b| {
        b.iter(|| extract_raw_text(black_box(&direct)))
    });
    c.bench_function("decode_and_extract_blocks", |b| {
        b.iter(|| {
            let output = UpstreamOutput::from_json(black_box(&envelope)).unwrap();
            extract_raw_text(&output)
        })
    });
    c.bench_function("extract_512_blocks", |b| {
        b.iter(|| extract_raw_text(black_box(&many_small)))
    });
    c.bench_function("extract_and_parse_direct", |b| {
        b.iter(|| parse_ai_output(&extract_raw_text(black_box(&direct))).unwrap())
    });
}

criterion_group!(benches, bench_extraction);
criterion_main!(benches);
