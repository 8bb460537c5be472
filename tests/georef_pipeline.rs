//! End-to-end properties of the georeferencing pipeline.

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use png::ColorType;
use tokio_util::sync::CancellationToken;

use georefrs::cleanup::CleanupQueue;
use georefrs::geometry::projection::tile_for_lon_lat;
use georefrs::png_codec::{decode_png_rgb8, encode_png};
use georefrs::project::ProjectInput;
use georefrs::{
    bounds, solve, AffineTransform, ControlPoint, ControlPointInput, ControlPointSet, Crs,
    FileStorage, GeoRaster, GeorefError, GeorefService, LocalFileStorage, RasterTagger, RawImage,
    ServiceOptions, TileRequest, TileSlicer,
};

fn set(points: &[(u32, u32, f64, f64)]) -> ControlPointSet {
    points
        .iter()
        .enumerate()
        .map(|(i, &(col, row, lng, lat))| ControlPoint::new(i as u32 + 1, col, row, lng, lat))
        .collect::<Vec<_>>()
        .into()
}

fn decode_rgba(bytes: &[u8]) -> (u32, u32, Vec<u8>) {
    let decoder = png::Decoder::new(Cursor::new(bytes));
    let mut reader = decoder.read_info().unwrap();
    let (width, height) = (reader.info().width, reader.info().height);
    assert_eq!(reader.info().color_type, ColorType::Rgba);
    let mut buf = vec![0; (width * height * 4) as usize];
    reader.next_frame(&mut buf).unwrap();
    (width, height, buf)
}

fn ssr(transform: &AffineTransform, points: &ControlPointSet) -> f64 {
    points
        .iter()
        .map(|p| {
            let (x, y) = transform.apply(f64::from(p.col), f64::from(p.row));
            (x - p.lng).powi(2) + (y - p.lat).powi(2)
        })
        .sum()
}

/// 100x100 raster covering lng 10..11, lat 10..11
fn unit_square_raster() -> GeoRaster {
    let points = set(&[(0, 0, 10.0, 11.0), (100, 0, 11.0, 11.0), (100, 100, 11.0, 10.0)]);
    let transform = solve(&points).unwrap().transform;
    let image = RawImage::rgb8(100, 100, vec![180; 100 * 100 * 3]).unwrap();
    RasterTagger::new(transform, Crs::WGS84).tag(&image).unwrap()
}

// ============================================================================
// Solver
// ============================================================================

#[test]
fn three_points_fit_exactly() {
    let fixtures = [
        set(&[(0, 0, 10.0, 11.0), (100, 0, 11.0, 11.0), (0, 100, 10.0, 10.0)]),
        set(&[(12, 7, -71.06, 42.36), (830, 40, -70.9, 42.35), (400, 900, -71.0, 42.1)]),
        set(&[(5, 5, 139.7, 35.7), (6000, 300, 139.9, 35.68), (2500, 4100, 139.78, 35.5)]),
    ];
    for points in fixtures {
        let transform = solve(&points).unwrap().transform;
        for p in points.iter() {
            let (x, y) = transform.apply(f64::from(p.col), f64::from(p.row));
            assert!((x - p.lng).abs() < 1e-9, "lng {x} vs {}", p.lng);
            assert!((y - p.lat).abs() < 1e-9, "lat {y} vs {}", p.lat);
        }
    }
}

#[test]
fn overdetermined_solve_is_least_squares_optimal() {
    // Noise of +/-d on the corners of a square is orthogonal to every affine
    // basis column, so the best fit is the noise-free transform.
    let d = 0.003;
    let points = set(&[
        (0, 0, 10.0 + d, 11.0),
        (100, 0, 11.0 - d, 11.0),
        (100, 100, 11.0 + d, 10.0),
        (0, 100, 10.0 - d, 10.0),
    ]);
    let solution = solve(&points).unwrap();
    let expected = AffineTransform::north_up(10.0, 11.0, 0.01, 0.01);

    for (got, want) in solution.transform.to_array().iter().zip(expected.to_array()) {
        assert!((got - want).abs() < 1e-9);
    }
    assert!((solution.sum_squared_residuals() - 4.0 * d * d).abs() < 1e-12);

    let best = ssr(&solution.transform, &points);
    let t = solution.transform.to_array();
    for (i, delta) in [(0, 1e-4), (1, -1e-4), (2, 1e-3), (3, 1e-4), (4, -1e-4), (5, -1e-3)] {
        let mut coeffs = t;
        coeffs[i] += delta;
        let other = AffineTransform::new(coeffs[0], coeffs[1], coeffs[2], coeffs[3], coeffs[4], coeffs[5]);
        assert!(best <= ssr(&other, &points));
    }
}

#[test]
fn solver_rejects_too_few_and_collinear_points() {
    let two = set(&[(0, 0, 0.0, 0.0), (10, 0, 1.0, 0.0)]);
    assert!(matches!(
        solve(&two),
        Err(GeorefError::InsufficientControlPoints { required: 3, got: 2 })
    ));

    let collinear = set(&[(0, 0, 0.0, 0.0), (10, 0, 1.0, 0.0), (20, 0, 2.0, 0.0)]);
    assert!(matches!(
        solve(&collinear),
        Err(GeorefError::DegenerateControlPoints { .. })
    ));
}

// ============================================================================
// Tiles & bounds
// ============================================================================

#[test]
fn zoom_four_tiles_are_blank() {
    let raster = unit_square_raster();
    let slicer = TileSlicer::new(&raster);
    for (x, y) in [(0, 0), (8, 7), (15, 15), (3, 12)] {
        let (w, h, rgba) = decode_rgba(&slicer.tile_png(TileRequest::new(4, x, y)).unwrap());
        assert_eq!((w, h), (256, 256));
        assert!(rgba.chunks_exact(4).all(|px| px[3] == 0));
    }
}

#[test]
fn tile_outside_raster_is_blank() {
    let raster = unit_square_raster();
    let (x, y) = tile_for_lon_lat(-40.0, -20.0, 10).unwrap();
    let (w, h, rgba) = decode_rgba(&TileSlicer::new(&raster).tile_png(TileRequest::new(10, x, y)).unwrap());
    assert_eq!((w, h), (256, 256));
    assert!(rgba.iter().all(|&b| b == 0));
}

#[test]
fn covered_tile_is_opaque() {
    let raster = unit_square_raster();
    let (x, y) = tile_for_lon_lat(10.5, 10.5, 12).unwrap();
    let (w, h, rgba) = decode_rgba(&TileSlicer::new(&raster).tile_png(TileRequest::new(12, x, y)).unwrap());
    assert_eq!((w, h), (256, 256));
    assert!(rgba.chunks_exact(4).all(|px| px == [180, 180, 180, 255]));
}

#[test]
fn axis_aligned_bounds() {
    let [west, north, east, south] = bounds(&unit_square_raster()).unwrap().to_wnes();
    assert!((west - 10.0).abs() < 1e-9);
    assert!((north - 11.0).abs() < 1e-9);
    assert!((east - 11.0).abs() < 1e-9);
    assert!((south - 10.0).abs() < 1e-9);
}

// ============================================================================
// Re-tagging under concurrent reads
// ============================================================================

const SIZE: u32 = 64;

/// Column/row gradient so that shifted transforms give different tiles
fn gradient_png() -> Bytes {
    let mut data = Vec::with_capacity((SIZE * SIZE * 3) as usize);
    for row in 0..SIZE {
        for col in 0..SIZE {
            data.extend_from_slice(&[(col * 4) as u8, (row * 4) as u8, 90]);
        }
    }
    Bytes::from(encode_png(SIZE, SIZE, ColorType::Rgb, &data).unwrap())
}

fn gcps(west: f64) -> [(i64, i64, f64, f64); 3] {
    let size = i64::from(SIZE);
    [
        (0, 0, west, 11.0),
        (size, 0, west + 1.0, 11.0),
        (size, size, west + 1.0, 10.0),
    ]
}

fn expected_tile(png: &[u8], west: f64, request: TileRequest) -> Vec<u8> {
    let points = set(&gcps(west).map(|(c, r, lng, lat)| (c as u32, r as u32, lng, lat)));
    let transform = solve(&points).unwrap().transform;
    let raster = RasterTagger::new(transform, Crs::WGS84)
        .tag(&decode_png_rgb8(png).unwrap())
        .unwrap();
    TileSlicer::new(&raster).tile_png(request).unwrap()
}

async fn set_points(service: &GeorefService, id: u64, west: f64) {
    service.remove_points(id).unwrap();
    for (col, row, lng, lat) in gcps(west) {
        let input = ControlPointInput {
            col: Some(col),
            row: Some(row),
            lng: Some(lng),
            lat: Some(lat),
            ..Default::default()
        };
        service.add_point(id, input).unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retag_never_mixes_versions() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStorage::Local(LocalFileStorage::open(dir.path()).unwrap()));
    let (cleanup, _worker) = CleanupQueue::start(Arc::clone(&storage), CancellationToken::new());
    let options = ServiceOptions {
        retired_blob_grace: Duration::from_secs(5),
        ..ServiceOptions::default()
    };
    let service = Arc::new(GeorefService::new(storage, cleanup, options));

    let png = gradient_png();
    let id = service.create_project(ProjectInput::default()).unwrap().id;
    service.upload_image(id, png.clone()).await.unwrap();
    set_points(&service, id, 10.0).await;
    service.georeference(id, None, CancellationToken::new()).await.unwrap();

    // A tile covered by both footprints, with different content in each
    let (x, y) = tile_for_lon_lat(10.75, 10.5, 8).unwrap();
    let request = TileRequest::new(8, x, y);
    let old = expected_tile(&png, 10.0, request);
    let new = expected_tile(&png, 10.5, request);
    assert_ne!(old, new);

    let stop = CancellationToken::new();
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let service = Arc::clone(&service);
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while !stop.is_cancelled() {
                    seen.push(service.tile(id, 8, x, y).await.unwrap());
                    tokio::task::yield_now().await;
                }
                seen
            })
        })
        .collect();

    for round in 0..6 {
        let west = if round % 2 == 0 { 10.5 } else { 10.0 };
        set_points(&service, id, west).await;
        service.georeference(id, None, CancellationToken::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    stop.cancel();

    let mut versions = HashSet::new();
    for reader in readers {
        for tile in reader.await.unwrap() {
            assert!(tile == old || tile == new, "tile mixes raster versions");
            versions.insert(tile == new);
        }
    }
    assert!(!versions.is_empty());

    // Last round tagged the original footprint again
    assert_eq!(service.tile(id, 8, x, y).await.unwrap(), old);
}
