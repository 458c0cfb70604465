use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mozibgone::config::{self, CONFIG_TOTAL_SIZE};
use mozibgone::{crypto, find_all, UPX_MAGIC};

fn bench_scan(c: &mut Criterion) {
    let mut data = vec![0u8; 1024 * 1024];
    for at in [64, 512 * 1024, 1024 * 1024 - 64] {
        data[at..at + 4].copy_from_slice(UPX_MAGIC);
    }

    c.bench_function("find_all_upx_magic_1mb", |b| b.iter(|| find_all(black_box(&data), UPX_MAGIC)));
}

fn bench_decode(c: &mut Criterion) {
    let mut window = b"[ss]bot[/ss][hp]88888888[/hp][count]http://x/[idp][/count]".to_vec();
    window.resize(CONFIG_TOTAL_SIZE, 0);
    crypto::xor_in_place(&mut window);

    let mut sample = vec![0x90u8; 256 * 1024];
    sample.extend_from_slice(&window);

    c.bench_function("xor_decrypt_window", |b| b.iter(|| crypto::decrypt(black_box(&window))));
    c.bench_function("decode_config_256k", |b| b.iter(|| config::decode_bytes(black_box(&sample))));
}

criterion_group!(benches, bench_scan, bench_decode);
criterion_main!(benches);
