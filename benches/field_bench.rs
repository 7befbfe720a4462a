use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fieldgrid::{FieldCodec, FieldData, FieldQuantity, FileType};

fn sample_field() -> FieldData {
    let dims = [50, 50, 20];
    let len = dims.iter().product::<usize>() * 3;
    let data: Vec<f64> = (0..len).map(|i| (i as f64 * 0.37).cos() * 1e-4).collect();
    FieldData::new("bench field", dims, [0.055, 0.055, 0.3], data)
}

fn bench_write(c: &mut Criterion) {
    let field = sample_field();
    let codec = FieldCodec::new(FieldQuantity::Vector, "V/cm");

    c.bench_function("init_write_50k_vector", |b| b.iter(|| {
        let mut buf = Vec::new();
        codec.write_to(black_box(&field), &mut buf, FileType::Init).unwrap();
        buf
    }));
    c.bench_function("apf_write_50k_vector", |b| b.iter(|| {
        let mut buf = Vec::new();
        codec.write_to(black_box(&field), &mut buf, FileType::Apf).unwrap();
        buf
    }));
}

fn bench_read(c: &mut Criterion) {
    let field = sample_field();
    let init_codec = FieldCodec::new(FieldQuantity::Vector, "V/cm");
    let apf_codec = FieldCodec::new(FieldQuantity::Vector, "");

    let mut init = Vec::new();
    init_codec.write_to(&field, &mut init, FileType::Init).unwrap();
    let mut apf = Vec::new();
    apf_codec.write_to(&field, &mut apf, FileType::Apf).unwrap();

    c.bench_function("init_read_50k_vector", |b| {
        b.iter(|| init_codec.read_from(black_box(init.as_slice()), FileType::Init).unwrap())
    });
    c.bench_function("apf_read_50k_vector", |b| {
        b.iter(|| apf_codec.read_from(black_box(apf.as_slice()), FileType::Apf).unwrap())
    });
}

criterion_group!(benches, bench_write, bench_read);
criterion_main!(benches);
