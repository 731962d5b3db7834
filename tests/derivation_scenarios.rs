// tests/derivation_scenarios.rs
//
// End-to-end scenarios for the derivation engine, mirroring the concrete
// seeds a complete implementation of this cache is expected to satisfy.
// Anything that needs a real PNM toolchain (pnmtopng, cjpeg, pnmcut,
// jpegtran, pngtopnm, file, pnmfile) on PATH is skipped gracefully when
// that toolchain isn't installed, rather than failing the suite.

use pixel_ledger::geometry::{ImageCrop, ImageSize, ImageType, Rotation, SizeDim, Units};
use pixel_ledger::key::ImageKey;
use pixel_ledger::rational::approx;
use pixel_ledger::store::with_cache;
use pixel_ledger::Cache;
use std::process::Command as StdCommand;

fn have(cmd: &str) -> bool {
    StdCommand::new("sh")
        .arg("-c")
        .arg(format!("command -v {cmd} >/dev/null 2>&1"))
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn toolchain_present() -> bool {
    [
        "file", "pnmfile", "jpegtopnm", "pngtopnm", "giftopnm", "pnmscale", "pnmcut", "jpegtran",
        "cjpeg", "ppmtogif", "pnmtopng",
    ]
    .iter()
    .all(|c| have(c))
}

/// Build a tiny, valid PNG (1x1, solid color) entirely in memory, with no
/// image-decoding crate: a minimal PNG is a fixed set of chunks, and a
/// 1x1 image's IDAT payload is a two-byte zlib stream wrapping a single
/// filter byte plus one RGB pixel.
fn tiny_png_1x1() -> Vec<u8> {
    fn chunk(ty: &[u8; 4], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend((data.len() as u32).to_be_bytes());
        out.extend(ty);
        out.extend(data);
        let mut crc_input = Vec::new();
        crc_input.extend(ty);
        crc_input.extend(data);
        out.extend(crc32(&crc_input).to_be_bytes());
        out
    }

    fn crc32(data: &[u8]) -> u32 {
        let mut crc: u32 = 0xFFFF_FFFF;
        for &byte in data {
            crc ^= byte as u32;
            for _ in 0..8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
            }
        }
        !crc
    }

    let mut png = Vec::new();
    png.extend(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);

    let mut ihdr = Vec::new();
    ihdr.extend(1u32.to_be_bytes()); // width
    ihdr.extend(1u32.to_be_bytes()); // height
    ihdr.push(8); // bit depth
    ihdr.push(2); // color type: truecolor
    ihdr.push(0);
    ihdr.push(0);
    ihdr.push(0);
    png.extend(chunk(b"IHDR", &ihdr));

    // Raw scanline: filter byte 0, then one RGB pixel.
    let raw = [0u8, 200, 40, 40];
    let compressed = zlib_store(&raw);
    png.extend(chunk(b"IDAT", &compressed));
    png.extend(chunk(b"IEND", &[]));
    png
}

/// Deflate "stored" (uncompressed) block wrapped in a minimal zlib stream.
fn zlib_store(raw: &[u8]) -> Vec<u8> {
    let mut out = vec![0x78, 0x01];
    out.push(0x01); // BFINAL=1, BTYPE=00 (stored)
    let len = raw.len() as u16;
    out.extend(len.to_le_bytes());
    out.extend((!len).to_le_bytes());
    out.extend(raw);
    let adler = adler32(raw);
    out.extend(adler.to_be_bytes());
    out
}

fn adler32(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for &byte in data {
        a = (a + byte as u32) % 65521;
        b = (b + a) % 65521;
    }
    (b << 16) | a
}

#[test]
fn scenario_d_identity_crop_returns_input_unchanged() {
    if !toolchain_present() {
        eprintln!("skipping: pnm toolchain not on PATH");
        return;
    }
    let files_dir = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    let cache = Cache::open(files_dir.path()).unwrap();
    let png_bytes = tiny_png_1x1();

    with_cache(index_dir.path(), |map| {
        let engine = cache.engine(map);
        let (file, _) = cache
            .file_cache()
            .from_bytes(&png_bytes, pixel_ledger::probe::sniff_type, pixel_ledger::probe::ext_of_sniff)
            .unwrap();
        let path = cache.file_cache().path_of(&file);
        let image_type = pixel_ledger::probe::probe_type(cache.runner(), &path).unwrap();
        let meta = pixel_ledger::probe::probe_pnm(cache.runner(), &png_bytes, image_type).unwrap();
        let original = ImageKey::Original(pixel_ledger::key::ImageFile {
            file,
            image_type,
            width: meta.width,
            height: meta.height,
            max_val: meta.max_val,
        });

        let cropped_key = ImageKey::cropped(ImageCrop::identity(), original.clone());
        let original_result = engine.get(&original).unwrap();
        let cropped_result = engine.get(&cropped_key).unwrap();
        assert_eq!(original_result, cropped_result);
    })
    .unwrap();
}

#[test]
fn scenario_c_approximate_one_scale_returns_input_unchanged() {
    if !toolchain_present() {
        eprintln!("skipping: pnm toolchain not on PATH");
        return;
    }
    let files_dir = tempfile::tempdir().unwrap();
    let index_dir = tempfile::tempdir().unwrap();
    let cache = Cache::open(files_dir.path()).unwrap();
    let png_bytes = tiny_png_1x1();

    with_cache(index_dir.path(), |map| {
        let engine = cache.engine(map);
        let (file, _) = cache
            .file_cache()
            .from_bytes(&png_bytes, pixel_ledger::probe::sniff_type, pixel_ledger::probe::ext_of_sniff)
            .unwrap();
        let path = cache.file_cache().path_of(&file);
        let image_type = pixel_ledger::probe::probe_type(cache.runner(), &path).unwrap();
        let meta = pixel_ledger::probe::probe_pnm(cache.runner(), &png_bytes, image_type).unwrap();
        let width = meta.width;
        let height = meta.height;
        let original = ImageKey::Original(pixel_ledger::key::ImageFile {
            file,
            image_type,
            width,
            height,
            max_val: meta.max_val,
        });

        // Choose size/dpi so scale_from_dpi rounds to exactly 1.
        let size = ImageSize::new(SizeDim::Width, width as f64, Units::Inches);
        let scaled_key = ImageKey::scaled(size, approx(1.0), original.clone());

        let original_result = engine.get(&original).unwrap();
        let scaled_result = engine.get(&scaled_key).unwrap();
        assert_eq!(original_result, scaled_result);
    })
    .unwrap();
}

#[test]
fn scenario_a_empty_map_miss_then_hit_shape() {
    // Mirrors spec scenario A's shape (miss, then insert, then hit,
    // then look_all) using the persistent map directly, independent of
    // any external toolchain.
    let dir = tempfile::tempdir().unwrap();
    let key = ImageKey::Original(pixel_ledger::key::ImageFile {
        file: pixel_ledger::file_cache::File {
            source: Some(pixel_ledger::file_cache::FileSource::TheBytes),
            checksum: "deadbeefdeadbeefdeadbeefdeadbeef".to_string(),
            messages: vec![],
            ext: ".png".to_string(),
        },
        image_type: ImageType::Png,
        width: 10,
        height: 10,
        max_val: 255,
    });

    let outcome = with_cache(dir.path(), |map| {
        let before = map.look(&key).unwrap().is_some();
        map.put(&key, Ok(key.root().clone())).unwrap();
        let after = map.look(&key).unwrap().is_some();
        let all = map.look_all().unwrap();
        (before, after, all.len())
    })
    .unwrap();

    assert_eq!(outcome, (false, true, 1));
}

#[test]
fn scenario_b_from_path_reports_checksum_and_bytes() {
    let files_dir = tempfile::tempdir().unwrap();
    let cache = Cache::open(files_dir.path()).unwrap();
    let src_dir = tempfile::tempdir().unwrap();
    let src_path = src_dir.path().join("sample.txt");
    std::fs::write(&src_path, b"Hello, world!").unwrap();

    let (file, ()) = cache
        .file_cache()
        .from_path(&src_path, |_| (), |_| String::new())
        .unwrap();

    assert_eq!(
        file.checksum,
        format!("{:x}", md5::compute(b"Hello, world!"))
    );
    assert_eq!(cache.file_cache().load(&file).unwrap(), b"Hello, world!");
    match file.source {
        Some(pixel_ledger::file_cache::FileSource::ThePath(p)) => {
            assert_eq!(p, src_path.to_string_lossy())
        }
        other => panic!("expected ThePath source, got {other:?}"),
    }
}

#[test]
fn scenario_f_rotation_round_trip_preserves_identity() {
    for deg in [0, 90, 180, 270] {
        let r = Rotation::from_degrees(deg).unwrap();
        assert_eq!(r.inverse().inverse(), r);
    }
}
