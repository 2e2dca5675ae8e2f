//! Integration tests for the image to PDF pipeline

use image_pdf_mcp_server::convert::{ConversionOptions, ConversionRequest, Converter};
use image_pdf_mcp_server::intake::{intake_files, resolve_path, IncomingFile, IntakePolicy};
use image_pdf_mcp_server::pdf::{PageOutcome, PageSize};
use image_pdf_mcp_server::session::{ListAction, Placement, Session};
use image_pdf_mcp_server::{ConversionFailure, Error, ImageRecord};
use pretty_assertions::assert_eq;
use std::io::Cursor;

fn encode(img: image::DynamicImage, format: image::ImageFormat) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format)
        .expect("encode test image");
    buf
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 120, 200, 255]));
    encode(image::DynamicImage::ImageRgba8(img), image::ImageFormat::Png)
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 80, 40]));
    encode(image::DynamicImage::ImageRgb8(img), image::ImageFormat::Jpeg)
}

fn gif(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, 255]));
    encode(image::DynamicImage::ImageRgba8(img), image::ImageFormat::Gif)
}

fn file(name: &str, declared_type: &str, data: Vec<u8>) -> IncomingFile {
    IncomingFile {
        name: name.to_string(),
        declared_type: declared_type.to_string(),
        data,
    }
}

fn session_with(files: Vec<IncomingFile>) -> Session {
    let report = intake_files(files, &IntakePolicy::default());
    assert!(report.rejected.is_empty(), "unexpected rejections: {:?}", report.rejected);
    let mut session = Session::new();
    session.dispatch(&ListAction::Append(report.accepted));
    session
}

fn names(records: &[ImageRecord]) -> Vec<&str> {
    records.iter().map(|r| r.name.as_str()).collect()
}

/// For each page in order: (has Font resources, has XObject resources)
fn page_resources(pdf: &[u8]) -> Vec<(bool, bool)> {
    let doc = lopdf::Document::load_mem(pdf).expect("output parses as PDF");
    doc.get_pages()
        .into_values()
        .map(|page_id| {
            let page = doc.get_dictionary(page_id).expect("page dictionary");
            let resources = page
                .get(b"Resources")
                .and_then(|r| match r {
                    lopdf::Object::Reference(id) => doc.get_dictionary(*id),
                    other => other.as_dict(),
                })
                .expect("page resources");
            (resources.has(b"Font"), resources.has(b"XObject"))
        })
        .collect()
}

fn pdf_page_count(pdf: &[u8]) -> usize {
    lopdf::Document::load_mem(pdf)
        .expect("output parses as PDF")
        .get_pages()
        .len()
}

#[tokio::test]
async fn test_small_and_large_image_on_a4() {
    let session = session_with(vec![
        file("A.png", "image/png", png(200, 100)),
        file("B.jpg", "image/jpeg", jpeg(4000, 3000)),
    ]);

    let snapshot = session.snapshot();
    let request = ConversionRequest::from_records(
        &snapshot.records,
        ConversionOptions {
            page_size: PageSize::A4,
            ..ConversionOptions::default()
        },
    );
    let artifact = Converter::new().convert(request).await.unwrap();

    assert_eq!(artifact.page_count, 2);
    assert_eq!(pdf_page_count(&artifact.pdf), 2);
    assert!(artifact.file_name.starts_with("converted-images-"));

    let (page_w, page_h) = PageSize::A4.dimensions();

    match &artifact.pages[0].outcome {
        PageOutcome::Image {
            width,
            height,
            placement,
        } => {
            assert_eq!((*width, *height), (200, 100));
            assert_eq!(placement.scale, 1.0);
            assert!((placement.x - (page_w - 200.0) / 2.0).abs() < 0.01);
            assert!((placement.y - (page_h - 100.0) / 2.0).abs() < 0.01);
        }
        other => panic!("page 1 should hold an image, got {:?}", other),
    }

    match &artifact.pages[1].outcome {
        PageOutcome::Image { placement, .. } => {
            assert!(placement.scale < 1.0);
            assert!(placement.draw_width <= page_w - 72.0 + 0.01);
            assert!(placement.draw_height <= page_h - 72.0 + 0.01);
            let ratio = placement.draw_width / placement.draw_height;
            assert!((ratio - 4000.0 / 3000.0).abs() < 0.01);
        }
        other => panic!("page 2 should hold an image, got {:?}", other),
    }

    assert_eq!(page_resources(&artifact.pdf), vec![(false, true), (false, true)]);
}

#[tokio::test]
async fn test_bad_images_still_get_a_page() {
    let session = session_with(vec![
        file("first.png", "image/png", png(50, 50)),
        file("broken.png", "image/png", b"\x89PNG\r\n\x1a\nnot really".to_vec()),
        file("anim.gif", "image/gif", gif(30, 30)),
        file("last.jpg", "image/jpeg", jpeg(40, 40)),
    ]);

    let request =
        ConversionRequest::from_records(session.images().records(), ConversionOptions::default());
    let artifact = Converter::new().convert(request).await.unwrap();

    assert_eq!(artifact.page_count, 4);
    assert_eq!(pdf_page_count(&artifact.pdf), 4);

    let kinds: Vec<&str> = artifact
        .pages
        .iter()
        .map(|p| match p.outcome {
            PageOutcome::Image { .. } => "image",
            PageOutcome::Skipped { .. } => "skipped",
            PageOutcome::Failed { .. } => "failed",
        })
        .collect();
    assert_eq!(kinds, vec!["image", "failed", "skipped", "image"]);

    let page_names: Vec<&str> = artifact.pages.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(page_names, vec!["first.png", "broken.png", "anim.gif", "last.jpg"]);

    // text-only pages carry fonts and no image
    assert_eq!(
        page_resources(&artifact.pdf),
        vec![(false, true), (true, false), (true, false), (false, true)]
    );
}

#[tokio::test]
async fn test_empty_list_rejected_before_assembly() {
    let session = Session::new();
    let request =
        ConversionRequest::from_records(session.images().records(), ConversionOptions::default());

    let result = Converter::new().convert(request).await;
    match result {
        Err(failure @ ConversionFailure::EmptySubmission) => {
            assert_eq!(
                failure.client_message(),
                "Please add images before converting to PDF"
            );
        }
        other => panic!("expected EmptySubmission, got {:?}", other.map(|a| a.file_name)),
    }
    assert!(session.artifact().is_none());
}

#[test]
fn test_intake_mixed_batch() {
    let policy = IntakePolicy { max_bytes: 64 * 1024 };
    let report = intake_files(
        vec![
            file("a.png", "image/png", png(10, 10)),
            file("notes.txt", "text/plain", b"hello".to_vec()),
            file("huge.png", "image/png", vec![0u8; 64 * 1024 + 1]),
            file("b.JPG", "IMAGE/JPEG", jpeg(10, 10)),
            file("empty.gif", "image/gif", Vec::new()),
        ],
        &policy,
    );

    assert_eq!(names(&report.accepted), vec!["a.png", "b.JPG"]);
    let rejected: Vec<&str> = report.rejected.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(rejected, vec!["notes.txt", "huge.png", "empty.gif"]);
    assert_eq!(
        report.rejected[1].reason,
        "File \"huge.png\" exceeds the 65536 bytes size limit"
    );
}

#[test]
fn test_path_intake_and_reorder() {
    let dir = tempfile::tempdir().unwrap();
    let mut files = Vec::new();
    for (name, data) in [
        ("one.png", png(5, 5)),
        ("two.jpg", jpeg(5, 5)),
        ("three.gif", gif(5, 5)),
    ] {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        files.push(resolve_path(&path, &IntakePolicy::default()).unwrap());
    }

    let mut session = session_with(files);
    assert_eq!(
        names(session.images().records()),
        vec!["one.png", "two.jpg", "three.gif"]
    );

    let ids = session.images().ids();
    let outcome = session.dispatch(&ListAction::Move {
        id: ids[2],
        target: ids[0],
        placement: Placement::Before,
    });
    assert!(outcome.changed);
    assert_eq!(
        names(session.images().records()),
        vec!["three.gif", "one.png", "two.jpg"]
    );

    session.dispatch(&ListAction::DropOnto {
        source: ids[2],
        target: Some(ids[1]),
    });
    assert_eq!(
        names(session.images().records()),
        vec!["one.png", "two.jpg", "three.gif"]
    );

    let removed = session.dispatch(&ListAction::Remove(ids[1]));
    assert!(removed.changed);
    assert_eq!(names(session.images().records()), vec!["one.png", "three.gif"]);
}

#[test]
fn test_missing_path_is_not_found() {
    let result = resolve_path("/definitely/not/here.png", &IntakePolicy::default());
    assert!(matches!(result, Err(Error::ImageNotFound { .. })));
}
