use std::sync::LazyLock;

use parley_core::{MediaKind, MediaMetadata};
use parley_crypto::{symmetric, ChunkedBinaryCipher, DecryptedMedia, HybridEnvelope, KeyPair};

static KEYS: LazyLock<KeyPair> = LazyLock::new(|| KeyPair::generate(2048).unwrap());

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

fn meta(size: usize) -> MediaMetadata {
    MediaMetadata::new(MediaKind::Image, "bench.jpg", "image/jpeg", size as u64)
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_symmetric_encrypt(bencher: divan::Bencher, size: usize) {
    let key = symmetric::generate_key();
    let nonce = symmetric::generate_nonce();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            symmetric::encrypt(
                divan::black_box(&key),
                divan::black_box(&nonce),
                divan::black_box(&data),
            )
            .unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_hybrid_open(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    let envelope = HybridEnvelope::seal(KEYS.public_key(), &data).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| divan::black_box(&envelope).open(KEYS.private_key()).unwrap());
}

#[divan::bench(args = [65536, 1048576, 10485760])]
fn bench_chunked_encrypt(bencher: divan::Bencher, size: usize) {
    let cipher = ChunkedBinaryCipher::default();
    let data = make_data(size);
    let metadata = meta(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            cipher
                .encrypt(KEYS.public_key(), divan::black_box(&data), &metadata)
                .unwrap()
        });
}

#[divan::bench(args = [65536, 1048576, 10485760])]
fn bench_chunked_decrypt(bencher: divan::Bencher, size: usize) {
    let cipher = ChunkedBinaryCipher::default();
    let data = make_data(size);
    let envelope = cipher.encrypt(KEYS.public_key(), &data, &meta(size)).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .with_inputs(|| envelope.clone())
        .bench_values(|envelope| {
            let media: DecryptedMedia<MediaMetadata> = cipher
                .decrypt(KEYS.private_key(), envelope)
                .unwrap()
                .finish()
                .unwrap();
            media
        });
}

fn main() {
    divan::main();
}
