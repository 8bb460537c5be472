//! Project orchestration: uploads, georeferencing and tile serving.
//!
//! [`GeorefService`] is built once at startup from a storage backend and a
//! cleanup queue and shared by every request handler. All engine work that
//! touches pixels runs on the blocking pool.
//!
//! Readers resolve a project's current raster through its [`RasterSlot`]
//! and never take the tag lock, so a tile request observes either the
//! previous container or the new one, whichever the slot pointed at when the
//! request started.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::affine;
use crate::bounds::{self, RasterBounds};
use crate::cleanup::CleanupQueue;
use crate::config::Config;
use crate::control_points::{ControlPoint, ControlPointInput, ControlPointSet};
use crate::error::{GeorefError, Result};
use crate::geometry::projection::Crs;
use crate::geotiff_reader::read_geotiff;
use crate::geotiff_writer::GeoTiffCompression;
use crate::png_codec::decode_png_rgb8;
use crate::project::{Project, ProjectInput, ProjectStore};
use crate::raster::{GeoRaster, RawImage};
use crate::raster_cache::RasterCache;
use crate::registry::{RasterRegistry, RasterSlot};
use crate::storage::FileStorage;
use crate::tagger::RasterTagger;
use crate::xyz_tile::{blank_tile_png, TileRequest, TileSlicer, MIN_TILE_ZOOM};

/// Tunables of a [`GeorefService`]
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub raster_cache_bytes: usize,
    /// Delay before a superseded container is deleted
    pub retired_blob_grace: Duration,
    pub nodata: Option<u8>,
    pub compression: GeoTiffCompression,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            raster_cache_bytes: 512 * 1024 * 1024,
            retired_blob_grace: Duration::from_secs(30),
            nodata: None,
            compression: GeoTiffCompression::Deflate,
        }
    }
}

impl From<&Config> for ServiceOptions {
    fn from(config: &Config) -> Self {
        Self {
            raster_cache_bytes: config.raster_cache_bytes(),
            retired_blob_grace: config.retired_blob_grace(),
            nodata: config.nodata,
            ..Self::default()
        }
    }
}

/// Snapshot for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub status: &'static str,
    pub storage: &'static str,
    pub projects: usize,
    pub cached_rasters: usize,
    pub cache_bytes: usize,
    pub pending_cleanup: usize,
}

pub struct GeorefService {
    storage: Arc<FileStorage>,
    cleanup: CleanupQueue,
    projects: ProjectStore,
    registry: RasterRegistry,
    cache: RasterCache,
    options: ServiceOptions,
}

impl GeorefService {
    #[must_use]
    pub fn new(storage: Arc<FileStorage>, cleanup: CleanupQueue, options: ServiceOptions) -> Self {
        Self {
            storage,
            cleanup,
            projects: ProjectStore::new(),
            registry: RasterRegistry::new(),
            cache: RasterCache::new(options.raster_cache_bytes),
            options,
        }
    }

    #[must_use]
    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            status: "running",
            storage: self.storage.kind(),
            projects: self.projects.len(),
            cached_rasters: self.cache.len(),
            cache_bytes: self.cache.size_bytes(),
            pending_cleanup: self.cleanup.pending(),
        }
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    /// # Errors
    /// Returns [`GeorefError::InvalidCrs`] if a CRS is given and cannot be parsed.
    pub fn create_project(&self, input: ProjectInput) -> Result<Project> {
        if input.crs.is_some() {
            Crs::parse(input.crs.as_deref())?;
        }
        let project = self.projects.create(input);
        info!(project = project.id, "Created project");
        Ok(project)
    }

    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] for an unknown id.
    pub fn project(&self, id: u64) -> Result<Project> {
        self.projects.get(id)
    }

    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] or [`GeorefError::InvalidCrs`].
    pub fn update_project(&self, id: u64, input: ProjectInput) -> Result<Project> {
        if input.crs.is_some() {
            Crs::parse(input.crs.as_deref())?;
        }
        self.projects.update(id, input)
    }

    /// Remove a project and queue deletion of its blobs
    ///
    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] for an unknown id.
    pub fn delete_project(&self, id: u64) -> Result<()> {
        let project = self.projects.delete(id)?;
        if let Some(slot) = self.registry.remove(id) {
            slot.detach();
        }

        if let Some(key) = project.image_key {
            self.cleanup.schedule_now(key);
        }
        if let Some(key) = project.georeferenced_key {
            self.retire(&key);
        }
        info!(project = id, "Deleted project");
        Ok(())
    }

    fn ensure_project(&self, id: u64) -> Result<()> {
        if self.projects.contains(id) {
            Ok(())
        } else {
            Err(GeorefError::ProjectNotFound(id))
        }
    }

    /// Drop a container from the cache and delete it after the grace period
    fn retire(&self, key: &str) {
        self.cache.remove(key);
        self.cleanup.schedule(key, self.options.retired_blob_grace);
    }

    // ------------------------------------------------------------------
    // Control points
    // ------------------------------------------------------------------

    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] or [`GeorefError::MalformedPoint`].
    pub fn add_point(&self, id: u64, input: ControlPointInput) -> Result<ControlPoint> {
        self.projects.add_point(id, input)
    }

    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] for an unknown id.
    pub fn points(&self, id: u64) -> Result<ControlPointSet> {
        self.projects.points(id)
    }

    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] or [`GeorefError::PointNotFound`].
    pub fn point(&self, id: u64, seq: u32) -> Result<ControlPoint> {
        self.projects.get_point(id, seq)
    }

    /// # Errors
    /// Returns [`GeorefError::PointNotFound`] or [`GeorefError::MalformedPoint`].
    pub fn update_point(&self, id: u64, seq: u32, input: ControlPointInput) -> Result<ControlPoint> {
        self.projects.update_point(id, seq, input)
    }

    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] or [`GeorefError::PointNotFound`].
    pub fn remove_point(&self, id: u64, seq: u32) -> Result<ControlPoint> {
        self.projects.remove_point(id, seq)
    }

    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] for an unknown id.
    pub fn remove_points(&self, id: u64) -> Result<usize> {
        self.projects.remove_points(id)
    }

    // ------------------------------------------------------------------
    // Images
    // ------------------------------------------------------------------

    /// Store a new flat image for a project.
    ///
    /// Waits for any tag operation on the project to finish. The previous
    /// image and georeference are retired.
    ///
    /// # Errors
    /// - [`GeorefError::ProjectNotFound`] for an unknown id
    /// - [`GeorefError::UnsupportedPixelFormat`] unless the body is an 8-bit RGB PNG
    /// - [`GeorefError::Storage`] if the upload cannot be saved
    #[instrument(skip(self, png), fields(bytes = png.len()))]
    pub async fn upload_image(&self, id: u64, png: Bytes) -> Result<()> {
        self.ensure_project(id)?;

        let decoded = {
            let png = png.clone();
            tokio::task::spawn_blocking(move || decode_png_rgb8(&png))
                .await
                .map_err(|e| GeorefError::UnsupportedPixelFormat(format!("decode task failed: {e}")))??
        };
        let (width, height) = (decoded.width, decoded.height);

        let slot = self.registry.slot(id);
        let guard = slot.lock_for_tag().await;

        let key = self.storage.save(png, "png").await?;
        let stale = match self.projects.set_image_key(id, key.clone()) {
            Ok(stale) => stale,
            Err(e) => {
                self.cleanup.schedule_now(key);
                return Err(e);
            }
        };
        slot.set_upload(&guard, Arc::new(decoded));
        drop(guard);

        for old in stale {
            self.retire(&old);
        }
        info!(project = id, key = %key, width, height, "Stored upload");
        Ok(())
    }

    /// The uploaded PNG
    ///
    /// # Errors
    /// Returns [`GeorefError::ImageMissing`] if nothing was uploaded yet.
    pub async fn image(&self, id: u64) -> Result<Bytes> {
        let key = self.projects.get(id)?.image_key.ok_or(GeorefError::ImageMissing(id))?;
        Ok(self.storage.read(&key).await?)
    }

    /// Decoded upload, loaded from storage if the slot has not seen it
    async fn upload_for(&self, project: &Project, slot: &RasterSlot) -> Result<Arc<RawImage>> {
        if let Some(image) = slot.upload() {
            return Ok(image);
        }
        let key = project
            .image_key
            .as_deref()
            .ok_or(GeorefError::ImageMissing(project.id))?;
        let png = self.storage.read(key).await?;
        let image = tokio::task::spawn_blocking(move || decode_png_rgb8(&png))
            .await
            .map_err(|e| GeorefError::UnsupportedPixelFormat(format!("decode task failed: {e}")))??;
        let image = Arc::new(image);
        slot.remember_upload(Arc::clone(&image));
        Ok(image)
    }

    // ------------------------------------------------------------------
    // Georeferencing
    // ------------------------------------------------------------------

    /// Solve the project's control points, tag its upload and persist the
    /// result under a new key. Returns the encoded container.
    ///
    /// At most one georeference runs per project. If `cancel` fires, or the
    /// returned future is dropped, tagging stops at the next pyramid level
    /// and the previous container stays current.
    ///
    /// # Errors
    /// - [`GeorefError::InvalidCrs`] for an unparsable CRS
    /// - [`GeorefError::InsufficientControlPoints`], [`GeorefError::DegenerateControlPoints`]
    /// - [`GeorefError::ImageMissing`] if nothing was uploaded
    /// - [`GeorefError::Cancelled`], [`GeorefError::EncodingFailure`], [`GeorefError::Storage`]
    #[instrument(skip(self, cancel))]
    pub async fn georeference(&self, id: u64, crs: Option<&str>, cancel: CancellationToken) -> Result<Bytes> {
        let crs = Crs::parse(crs)?;
        self.ensure_project(id)?;

        // Points are read under the tag lock: the last committed container
        // reflects the latest points
        let slot = self.registry.slot(id);
        let guard = slot.lock_for_tag().await;

        let mut points = self.projects.points(id)?;
        let solution = affine::solve(&points)?;
        solution.write_residuals(&mut points);
        self.projects.record_residuals(id, &points)?;
        debug!(rmse = solution.rmse(), points = points.len(), "Solved transform");

        let project = self.projects.get(id)?;
        let image = self.upload_for(&project, &slot).await?;

        let tagger = RasterTagger::new(solution.transform, crs).nodata(self.options.nodata);
        let compression = self.options.compression;
        let token = cancel.child_token();
        let _stop_on_drop = token.clone().drop_guard();
        let (raster, encoded) = tokio::task::spawn_blocking(move || -> Result<(GeoRaster, Vec<u8>)> {
            let raster = tagger.tag_with_cancel(&image, &token)?;
            let encoded = raster.geotiff_writer().compression(compression).to_bytes()?;
            Ok((raster, encoded))
        })
        .await
        .map_err(|e| GeorefError::EncodingFailure(format!("tag task failed: {e}")))??;

        if cancel.is_cancelled() {
            return Err(GeorefError::Cancelled);
        }

        let encoded = Bytes::from(encoded);
        let key = self.storage.save(encoded.clone(), "tif").await?;
        self.cache.insert(&key, Arc::new(raster));

        let (current, previous) = slot.swap(&guard, &key);
        let superseded = match self.projects.set_georeferenced(id, key.clone(), crs.to_string()) {
            Ok(superseded) => superseded,
            Err(e) => {
                warn!(project = id, key = %key, "Project removed while georeferencing");
                self.cache.remove(&key);
                self.cleanup.schedule_now(key);
                return Err(e);
            }
        };
        drop(guard);

        let mut retired: Vec<String> = previous.map(|r| r.key.to_string()).into_iter().collect();
        if let Some(old) = superseded {
            if !retired.contains(&old) {
                retired.push(old);
            }
        }
        for old in retired.iter().filter(|old| **old != key) {
            self.retire(old);
        }

        info!(
            project = id,
            key = %key,
            version = current.version,
            crs = %crs,
            bytes = encoded.len(),
            "Georeferenced raster"
        );
        Ok(encoded)
    }

    /// The stored container of the current georeference
    ///
    /// # Errors
    /// Returns [`GeorefError::RasterNotTagged`] if the project was never georeferenced.
    pub async fn georeferenced_container(&self, id: u64) -> Result<Bytes> {
        self.ensure_project(id)?;
        let current = self
            .registry
            .get(id)
            .and_then(|slot| slot.current())
            .ok_or(GeorefError::RasterNotTagged)?;
        Ok(self.storage.read(&current.key).await?)
    }

    /// Current tagged raster, from the cache or decoded from storage
    async fn tagged_raster(&self, id: u64) -> Result<Option<Arc<GeoRaster>>> {
        let Some(slot) = self.registry.get(id) else {
            return Ok(None);
        };
        let Some(current) = slot.current() else {
            return Ok(None);
        };
        if let Some(raster) = self.cache.get(&current.key) {
            return Ok(Some(raster));
        }

        let bytes = self.storage.read(&current.key).await?;
        let raster = tokio::task::spawn_blocking(move || read_geotiff(&bytes))
            .await
            .map_err(|e| GeorefError::CorruptContainer(format!("decode task failed: {e}")))??;
        let raster = Arc::new(raster);
        // A container retired while it was being read stays out of the cache
        if slot
            .if_current(&current, || self.cache.insert(&current.key, Arc::clone(&raster)))
            .is_some()
        {
            debug!(project = id, key = %current.key, "Loaded raster into cache");
        }
        Ok(Some(raster))
    }

    // ------------------------------------------------------------------
    // Readers
    // ------------------------------------------------------------------

    /// Render a z/x/y tile as PNG. Tiles without data are blank.
    ///
    /// # Errors
    /// - [`GeorefError::ProjectNotFound`] for an unknown id
    /// - [`GeorefError::TileRenderFailure`] if the raster cannot be loaded,
    ///   sampled or encoded
    pub async fn tile(&self, id: u64, z: u32, x: u32, y: u32) -> Result<Vec<u8>> {
        self.ensure_project(id)?;
        let request = TileRequest::new(z, x, y);
        if request.z < MIN_TILE_ZOOM || !request.is_addressable() {
            return blank_tile_png();
        }

        let raster = match self.tagged_raster(id).await {
            Ok(Some(raster)) => raster,
            Ok(None) => return blank_tile_png(),
            Err(e) => return Err(GeorefError::TileRenderFailure(e.to_string())),
        };

        tokio::task::spawn_blocking(move || TileSlicer::new(&raster).tile_png(request))
            .await
            .map_err(|e| GeorefError::TileRenderFailure(format!("render task failed: {e}")))?
    }

    /// Corner coordinates of the current georeference
    ///
    /// # Errors
    /// Returns [`GeorefError::RasterNotTagged`] if the project was never georeferenced.
    pub async fn bounds(&self, id: u64) -> Result<RasterBounds> {
        self.ensure_project(id)?;
        let raster = self.tagged_raster(id).await?.ok_or(GeorefError::RasterNotTagged)?;
        bounds::bounds(&raster)
    }
}

#[cfg(test)]
mod tests {
    use png::ColorType;

    use super::*;
    use crate::png_codec::encode_png;
    use crate::storage::LocalFileStorage;

    struct Harness {
        _dir: tempfile::TempDir,
        service: GeorefService,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileStorage::Local(LocalFileStorage::open(dir.path()).unwrap()));
        let (cleanup, _worker) = CleanupQueue::start(Arc::clone(&storage), CancellationToken::new());
        let options = ServiceOptions {
            retired_blob_grace: Duration::from_millis(10),
            ..ServiceOptions::default()
        };
        Harness {
            _dir: dir,
            service: GeorefService::new(storage, cleanup, options),
        }
    }

    fn rgb_png(width: u32, height: u32, rgb: [u8; 3]) -> Bytes {
        let data: Vec<u8> = rgb.iter().copied().cycle().take((width * height * 3) as usize).collect();
        Bytes::from(encode_png(width, height, ColorType::Rgb, &data).unwrap())
    }

    fn point(col: i64, row: i64, lng: f64, lat: f64) -> ControlPointInput {
        ControlPointInput {
            col: Some(col),
            row: Some(row),
            lng: Some(lng),
            lat: Some(lat),
            ..Default::default()
        }
    }

    /// 100x100 image covering lng 10..11, lat 10..11
    async fn georeferenced_project(service: &GeorefService) -> u64 {
        let id = service.create_project(ProjectInput::default()).unwrap().id;
        service.upload_image(id, rgb_png(100, 100, [200, 100, 50])).await.unwrap();
        service.add_point(id, point(0, 0, 10.0, 11.0)).unwrap();
        service.add_point(id, point(100, 0, 11.0, 11.0)).unwrap();
        service.add_point(id, point(100, 100, 11.0, 10.0)).unwrap();
        service.georeference(id, None, CancellationToken::new()).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_georeference_then_bounds() {
        let h = harness();
        let id = georeferenced_project(&h.service).await;

        let [west, north, east, south] = h.service.bounds(id).await.unwrap().to_wnes();
        assert!((west - 10.0).abs() < 1e-9);
        assert!((north - 11.0).abs() < 1e-9);
        assert!((east - 11.0).abs() < 1e-9);
        assert!((south - 10.0).abs() < 1e-9);

        let project = h.service.project(id).unwrap();
        assert_eq!(project.crs.as_deref(), Some("EPSG:4326"));
        assert!(project.points.iter().all(|p| p.error.is_some()));
    }

    #[tokio::test]
    async fn test_container_roundtrips_through_storage() {
        let h = harness();
        let id = georeferenced_project(&h.service).await;

        let bytes = h.service.georeferenced_container(id).await.unwrap();
        let raster = read_geotiff(&bytes).unwrap();
        assert_eq!((raster.width(), raster.height()), (100, 100));
        assert_eq!(raster.crs(), Some(Crs::WGS84));
    }

    #[tokio::test]
    async fn test_tiles() {
        let h = harness();
        let id = georeferenced_project(&h.service).await;

        // Below the zoom gate and outside the footprint
        let low = decode_rgba(&h.service.tile(id, 4, 8, 7).await.unwrap());
        assert!(low.chunks_exact(4).all(|px| px[3] == 0));
        let outside = decode_rgba(&h.service.tile(id, 10, 0, 0).await.unwrap());
        assert!(outside.chunks_exact(4).all(|px| px[3] == 0));

        // z=12 tile inside the raster
        let (x, y) = crate::geometry::projection::tile_for_lon_lat(10.5, 10.5, 12).unwrap();
        let inside = decode_rgba(&h.service.tile(id, 12, x, y).await.unwrap());
        assert!(inside.chunks_exact(4).all(|px| px == [200, 100, 50, 255]));
    }

    fn decode_rgba(png: &[u8]) -> Vec<u8> {
        let decoder = png::Decoder::new(std::io::Cursor::new(png));
        let mut reader = decoder.read_info().unwrap();
        assert_eq!((reader.info().width, reader.info().height), (256, 256));
        let mut buf = vec![0; 256 * 256 * 4];
        reader.next_frame(&mut buf).unwrap();
        buf
    }

    #[tokio::test]
    async fn test_tile_before_georeference_is_blank() {
        let h = harness();
        let id = h.service.create_project(ProjectInput::default()).unwrap().id;
        let tile = decode_rgba(&h.service.tile(id, 12, 2000, 2000).await.unwrap());
        assert!(tile.iter().all(|&b| b == 0));

        assert!(matches!(
            h.service.tile(id + 1, 12, 0, 0).await,
            Err(GeorefError::ProjectNotFound(_))
        ));
        assert!(matches!(h.service.bounds(id).await, Err(GeorefError::RasterNotTagged)));
    }

    #[tokio::test]
    async fn test_precondition_failures() {
        let h = harness();
        let id = h.service.create_project(ProjectInput::default()).unwrap().id;
        h.service.add_point(id, point(0, 0, 10.0, 11.0)).unwrap();
        h.service.add_point(id, point(100, 0, 11.0, 11.0)).unwrap();

        let err = h.service.georeference(id, None, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, GeorefError::InsufficientControlPoints { required: 3, got: 2 }));

        let err = h
            .service
            .georeference(id, Some("not-a-crs"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GeorefError::InvalidCrs(_)));

        h.service.add_point(id, point(100, 100, 11.0, 10.0)).unwrap();
        let err = h.service.georeference(id, None, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, GeorefError::ImageMissing(_)));
    }

    #[tokio::test]
    async fn test_rejects_rgba_upload() {
        let h = harness();
        let id = h.service.create_project(ProjectInput::default()).unwrap().id;
        let rgba = Bytes::from(encode_png(2, 2, ColorType::Rgba, &[255; 16]).unwrap());
        assert!(matches!(
            h.service.upload_image(id, rgba).await,
            Err(GeorefError::UnsupportedPixelFormat(_))
        ));
        assert!(h.service.project(id).unwrap().image_key.is_none());
    }

    #[tokio::test]
    async fn test_retag_replaces_container() {
        let h = harness();
        let id = georeferenced_project(&h.service).await;
        let first = h.service.project(id).unwrap().georeferenced_key.unwrap();

        h.service.update_point(id, 3, point(100, 100, 11.5, 10.0)).unwrap();
        h.service.georeference(id, Some("EPSG:4326"), CancellationToken::new()).await.unwrap();
        let second = h.service.project(id).unwrap().georeferenced_key.unwrap();
        assert_ne!(first, second);

        let [_, _, east, _] = h.service.bounds(id).await.unwrap().to_wnes();
        assert!(east > 11.0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!h.service.storage().exists(&first).await.unwrap());
        assert!(h.service.storage().exists(&second).await.unwrap());
    }

    #[tokio::test]
    async fn test_queued_georeference_solves_latest_points() {
        let h = harness();
        let id = georeferenced_project(&h.service).await;

        // Hold the tag lock so the next call queues behind it
        let slot = h.service.registry.slot(id);
        let guard = slot.lock_for_tag().await;
        let queued = h.service.georeference(id, None, CancellationToken::new());
        tokio::pin!(queued);
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut queued).await.is_err());

        h.service.update_point(id, 3, point(100, 100, 11.5, 10.0)).unwrap();
        drop(guard);
        queued.await.unwrap();

        let [_, _, east, _] = h.service.bounds(id).await.unwrap().to_wnes();
        assert!((east - 11.5).abs() < 1e-9);
        let project = h.service.project(id).unwrap();
        assert!(project.points.iter().all(|p| p.error.is_some_and(|e| e < 1e-9)));
    }

    #[tokio::test]
    async fn test_superseded_container_is_not_recached() {
        let h = harness();
        let id = georeferenced_project(&h.service).await;
        let slot = h.service.registry.slot(id);
        let stale = slot.current().unwrap();

        h.service.update_point(id, 3, point(100, 100, 11.5, 10.0)).unwrap();
        h.service.georeference(id, None, CancellationToken::new()).await.unwrap();
        assert!(h.service.cache.get(&stale.key).is_none());

        // A reader that resolved the old reference before the swap
        let raster = h.service.tagged_raster(id).await.unwrap().unwrap();
        assert!(slot.if_current(&stale, || h.service.cache.insert(&stale.key, raster)).is_none());
        assert!(h.service.cache.get(&stale.key).is_none());
        assert_eq!(h.service.status().cached_rasters, 1);

        h.service.delete_project(id).unwrap();
        assert!(slot.current().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_georeference_keeps_previous() {
        let h = harness();
        let id = georeferenced_project(&h.service).await;
        let before = h.service.project(id).unwrap().georeferenced_key;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = h.service.georeference(id, None, cancel).await.unwrap_err();
        assert!(matches!(err, GeorefError::Cancelled));
        assert_eq!(h.service.project(id).unwrap().georeferenced_key, before);
        assert!(h.service.bounds(id).await.is_ok());
    }

    #[tokio::test]
    async fn test_new_upload_invalidates_georeference() {
        let h = harness();
        let id = georeferenced_project(&h.service).await;

        h.service.upload_image(id, rgb_png(50, 50, [1, 2, 3])).await.unwrap();
        assert!(h.service.project(id).unwrap().georeferenced_key.is_none());
        assert!(matches!(h.service.bounds(id).await, Err(GeorefError::RasterNotTagged)));
        assert_eq!(h.service.image(id).await.unwrap(), rgb_png(50, 50, [1, 2, 3]));
    }

    #[tokio::test]
    async fn test_delete_project_removes_blobs() {
        let h = harness();
        let id = georeferenced_project(&h.service).await;
        let project = h.service.project(id).unwrap();

        h.service.delete_project(id).unwrap();
        assert!(matches!(h.service.project(id), Err(GeorefError::ProjectNotFound(_))));

        tokio::time::sleep(Duration::from_millis(200)).await;
        for key in [project.image_key.unwrap(), project.georeferenced_key.unwrap()] {
            assert!(!h.service.storage().exists(&key).await.unwrap());
        }
        assert_eq!(h.service.status().projects, 0);
    }
}
