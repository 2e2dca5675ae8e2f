//! Performance benchmarks for PDF assembly
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use image_pdf_mcp_server::pdf::{assemble, AssemblyOptions, ImageInput, PageLayout};
use std::io::Cursor;

fn encoded(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

fn input(name: &str, media_type: &str, data: &[u8]) -> ImageInput {
    ImageInput {
        name: name.to_string(),
        media_type: media_type.to_string(),
        data: data.to_vec().into(),
    }
}

/// JPEG passes through, PNG is decoded and re-deflated
fn bench_single_image(c: &mut Criterion) {
    let jpeg = encoded(1600, 1200, image::ImageFormat::Jpeg);
    let png = encoded(1600, 1200, image::ImageFormat::Png);
    let options = AssemblyOptions::default();

    let mut group = c.benchmark_group("single_image");

    group.throughput(Throughput::Bytes(jpeg.len() as u64));
    let inputs = vec![input("photo.jpg", "image/jpeg", &jpeg)];
    group.bench_function("jpeg_1600x1200", |b| {
        b.iter(|| assemble(black_box(&inputs), &options).unwrap());
    });

    group.throughput(Throughput::Bytes(png.len() as u64));
    let inputs = vec![input("scan.png", "image/png", &png)];
    group.bench_function("png_1600x1200", |b| {
        b.iter(|| assemble(black_box(&inputs), &options).unwrap());
    });

    group.finish();
}

/// Documents of increasing length built from the same small images
fn bench_batch(c: &mut Criterion) {
    let jpeg = encoded(640, 480, image::ImageFormat::Jpeg);
    let png = encoded(640, 480, image::ImageFormat::Png);
    let options = AssemblyOptions {
        layout: PageLayout::default(),
        title: Some("Benchmark".to_string()),
    };

    let mut group = c.benchmark_group("batch_assembly");

    for count in [4, 20, 50] {
        let inputs: Vec<ImageInput> = (0..count)
            .map(|i| {
                if i % 2 == 0 {
                    input(&format!("{}.jpg", i), "image/jpeg", &jpeg)
                } else {
                    input(&format!("{}.png", i), "image/png", &png)
                }
            })
            .collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(
            BenchmarkId::new("mixed", format!("{}_images", count)),
            &inputs,
            |b, inputs| {
                b.iter(|| assemble(black_box(inputs), &options).unwrap());
            },
        );
    }

    group.finish();
}

/// Text-only pages for types that cannot be embedded
fn bench_fallback_pages(c: &mut Criterion) {
    let inputs: Vec<ImageInput> = (0..20)
        .map(|i| input(&format!("{}.gif", i), "image/gif", b"GIF89a"))
        .collect();
    let options = AssemblyOptions::default();

    c.bench_function("fallback_pages_20", |b| {
        b.iter(|| assemble(black_box(&inputs), &options).unwrap());
    });
}

criterion_group!(benches, bench_single_image, bench_batch, bench_fallback_pages);

criterion_main!(benches);
