//! Files written by `ImageWriter` decode back to the same pixels.

use image::ImageReader;
use scope_core::RgbFrame;
use scope_storage::ImageWriter;

fn gradient(width: u32, height: u32) -> RgbFrame {
    let data = (0..width * height)
        .flat_map(|i| {
            let v = (i % 256) as u8;
            [v, 255 - v, v / 2]
        })
        .collect();
    RgbFrame::new(width, height, data).unwrap()
}

#[test]
fn tiff_and_png_are_lossless_and_create_directories() {
    let dir = tempfile::tempdir().unwrap();
    let frame = gradient(16, 8);

    for name in ["nested/run/frame.tif", "nested/frame.png"] {
        let path = ImageWriter::write_frame(&frame, dir.path().join(name)).unwrap();
        let decoded = ImageReader::open(&path)
            .unwrap()
            .with_guessed_format()
            .unwrap()
            .decode()
            .unwrap()
            .to_rgb8();
        assert_eq!(decoded.dimensions(), (16, 8));
        assert_eq!(decoded.into_raw(), frame.data, "{name}");
    }
}

#[tokio::test]
async fn async_write_produces_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snap.jpg");

    let written = ImageWriter::write_frame_async(gradient(8, 8), path.clone())
        .await
        .unwrap();

    assert_eq!(written, path);
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
}
