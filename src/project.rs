//! In-memory project and control point records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::control_points::{ControlPoint, ControlPointInput, ControlPointSet};
use crate::error::{GeorefError, Result};

/// A georeferencing project: one uploaded image plus its control points
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// CRS used for the last successful georeference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    pub points: ControlPointSet,
    /// Storage key of the uploaded image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_key: Option<String>,
    /// Storage key of the current raster container
    #[serde(skip_serializing_if = "Option::is_none")]
    pub georeferenced_key: Option<String>,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// Fields a caller may set on create or update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub crs: Option<String>,
}

/// Thread-safe project registry
pub struct ProjectStore {
    next_id: AtomicU64,
    projects: RwLock<HashMap<u64, Project>>,
}

impl Default for ProjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            projects: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, input: ProjectInput) -> Project {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let project = Project {
            id,
            name: input.name.unwrap_or_default(),
            description: input.description,
            crs: input.crs,
            points: ControlPointSet::default(),
            image_key: None,
            georeferenced_key: None,
            created: now,
            last_modified: now,
        };
        self.projects.write().insert(id, project.clone());
        project
    }

    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] for an unknown id.
    pub fn get(&self, id: u64) -> Result<Project> {
        self.projects
            .read()
            .get(&id)
            .cloned()
            .ok_or(GeorefError::ProjectNotFound(id))
    }

    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.projects.read().contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.projects.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_project<T>(&self, id: u64, f: impl FnOnce(&mut Project) -> Result<T>) -> Result<T> {
        let mut projects = self.projects.write();
        let project = projects.get_mut(&id).ok_or(GeorefError::ProjectNotFound(id))?;
        let out = f(project)?;
        project.last_modified = Utc::now();
        Ok(out)
    }

    /// Overwrite the fields present in `input`
    ///
    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] for an unknown id.
    pub fn update(&self, id: u64, input: ProjectInput) -> Result<Project> {
        self.with_project(id, |p| {
            if let Some(name) = input.name {
                p.name = name;
            }
            if input.description.is_some() {
                p.description = input.description;
            }
            if input.crs.is_some() {
                p.crs = input.crs;
            }
            Ok(p.clone())
        })
    }

    /// Remove a project, returning it so its blobs can be cleaned up
    ///
    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] for an unknown id.
    pub fn delete(&self, id: u64) -> Result<Project> {
        self.projects
            .write()
            .remove(&id)
            .ok_or(GeorefError::ProjectNotFound(id))
    }

    /// Record a new upload, returning the key it replaces. An upload
    /// invalidates any previous georeference, whose key is returned as well.
    ///
    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] for an unknown id.
    pub fn set_image_key(&self, id: u64, key: String) -> Result<Vec<String>> {
        self.with_project(id, |p| {
            let replaced = p.image_key.replace(key);
            let stale = p.georeferenced_key.take();
            Ok(replaced.into_iter().chain(stale).collect())
        })
    }

    /// Record a completed georeference, returning the superseded key
    ///
    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] for an unknown id.
    pub fn set_georeferenced(&self, id: u64, key: String, crs: String) -> Result<Option<String>> {
        self.with_project(id, |p| {
            p.crs = Some(crs);
            Ok(p.georeferenced_key.replace(key))
        })
    }

    /// Add a point, assigning it the smallest sequence number not in use
    ///
    /// # Errors
    /// - [`GeorefError::ProjectNotFound`] for an unknown id
    /// - [`GeorefError::MalformedPoint`] if the input is incomplete
    pub fn add_point(&self, id: u64, input: ControlPointInput) -> Result<ControlPoint> {
        self.with_project(id, |p| {
            let seq = next_free_seq(&p.points);
            let point = input.into_point(seq)?;
            p.points.points.push(point.clone());
            Ok(point)
        })
    }

    /// # Errors
    /// Returns [`GeorefError::PointNotFound`] if no point has this sequence number.
    pub fn get_point(&self, id: u64, seq: u32) -> Result<ControlPoint> {
        let projects = self.projects.read();
        let project = projects.get(&id).ok_or(GeorefError::ProjectNotFound(id))?;
        let point = project
            .points
            .iter()
            .find(|pt| pt.seq == seq)
            .cloned()
            .ok_or(GeorefError::PointNotFound { project: id, point: seq });
        point
    }

    /// Snapshot of the project's control points
    ///
    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] for an unknown id.
    pub fn points(&self, id: u64) -> Result<ControlPointSet> {
        let projects = self.projects.read();
        let project = projects.get(&id).ok_or(GeorefError::ProjectNotFound(id))?;
        Ok(project.points.clone())
    }

    /// Replace a point's coordinates and labels, keeping its sequence number
    ///
    /// # Errors
    /// Returns [`GeorefError::PointNotFound`] or [`GeorefError::MalformedPoint`].
    pub fn update_point(&self, id: u64, seq: u32, input: ControlPointInput) -> Result<ControlPoint> {
        self.with_project(id, |p| {
            let slot = p
                .points
                .points
                .iter_mut()
                .find(|pt| pt.seq == seq)
                .ok_or(GeorefError::PointNotFound { project: id, point: seq })?;
            *slot = input.into_point(seq)?;
            Ok(slot.clone())
        })
    }

    /// # Errors
    /// Returns [`GeorefError::PointNotFound`] if no point has this sequence number.
    pub fn remove_point(&self, id: u64, seq: u32) -> Result<ControlPoint> {
        self.with_project(id, |p| {
            let idx = p
                .points
                .iter()
                .position(|pt| pt.seq == seq)
                .ok_or(GeorefError::PointNotFound { project: id, point: seq })?;
            Ok(p.points.points.remove(idx))
        })
    }

    /// Remove every point, returning how many were removed
    ///
    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] for an unknown id.
    pub fn remove_points(&self, id: u64) -> Result<usize> {
        self.with_project(id, |p| Ok(std::mem::take(&mut p.points.points).len()))
    }

    /// Store per-point residuals from a solve, matched by sequence number.
    /// Points edited since the solve are left untouched.
    ///
    /// # Errors
    /// Returns [`GeorefError::ProjectNotFound`] for an unknown id.
    pub fn record_residuals(&self, id: u64, solved: &ControlPointSet) -> Result<()> {
        self.with_project(id, |p| {
            for point in &mut p.points.points {
                if let Some(s) = solved.iter().find(|s| s.seq == point.seq) {
                    if s.col == point.col && s.row == point.row && s.lng == point.lng && s.lat == point.lat {
                        point.error = s.error;
                    }
                }
            }
            Ok(())
        })
    }
}

/// Smallest positive sequence number not used in `points`
fn next_free_seq(points: &ControlPointSet) -> u32 {
    let mut used: Vec<u32> = points.iter().map(|p| p.seq).collect();
    used.sort_unstable();
    let mut candidate = 1;
    for seq in used {
        if seq == candidate {
            candidate += 1;
        } else if seq > candidate {
            break;
        }
    }
    candidate
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn input(col: i64, row: i64, lng: f64, lat: f64) -> ControlPointInput {
        ControlPointInput {
            col: Some(col),
            row: Some(row),
            lng: Some(lng),
            lat: Some(lat),
            ..Default::default()
        }
    }

    fn named(name: &str) -> ProjectInput {
        ProjectInput {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_get_update_delete() {
        let store = ProjectStore::new();
        let p = store.create(named("map"));
        assert_eq!(store.get(p.id).unwrap().name, "map");

        let updated = store
            .update(p.id, ProjectInput { description: Some("old town".into()), ..Default::default() })
            .unwrap();
        assert_eq!(updated.name, "map");
        assert_eq!(updated.description.as_deref(), Some("old town"));
        assert!(updated.last_modified >= updated.created);

        store.delete(p.id).unwrap();
        assert!(matches!(store.get(p.id), Err(GeorefError::ProjectNotFound(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let store = ProjectStore::new();
        let a = store.create(named("a"));
        let b = store.create(named("b"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_point_sequence_fills_gaps() {
        let store = ProjectStore::new();
        let id = store.create(named("p")).id;
        for i in 0..3 {
            store.add_point(id, input(i, i, 0.0, 0.0)).unwrap();
        }
        store.remove_point(id, 2).unwrap();
        assert_eq!(store.add_point(id, input(9, 9, 0.0, 0.0)).unwrap().seq, 2);
        assert_eq!(store.add_point(id, input(9, 9, 0.0, 0.0)).unwrap().seq, 4);
    }

    #[test]
    fn test_concurrent_point_inserts_get_distinct_seqs() {
        let store = Arc::new(ProjectStore::new());
        let id = store.create(named("p")).id;

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|i| store.add_point(id, input(t * 100 + i, 0, 0.0, 0.0)).unwrap().seq)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seqs: Vec<u32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=200).collect::<Vec<u32>>());
    }

    #[test]
    fn test_point_crud() {
        let store = ProjectStore::new();
        let id = store.create(named("p")).id;
        let pt = store.add_point(id, input(1, 2, 10.0, 11.0)).unwrap();

        let moved = store.update_point(id, pt.seq, input(5, 6, 10.5, 11.5)).unwrap();
        assert_eq!((moved.seq, moved.col, moved.row), (pt.seq, 5, 6));
        assert_eq!(store.get_point(id, pt.seq).unwrap().lng, 10.5);

        assert!(matches!(
            store.get_point(id, 99),
            Err(GeorefError::PointNotFound { point: 99, .. })
        ));
        assert_eq!(store.remove_points(id).unwrap(), 1);
        assert!(store.points(id).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_point_rejected() {
        let store = ProjectStore::new();
        let id = store.create(named("p")).id;
        let err = store
            .add_point(id, ControlPointInput { col: Some(1), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, GeorefError::MalformedPoint(_)));
        assert!(store.points(id).unwrap().is_empty());
    }

    #[test]
    fn test_upload_clears_georeference() {
        let store = ProjectStore::new();
        let id = store.create(named("p")).id;
        assert!(store.set_image_key(id, "a.png".into()).unwrap().is_empty());
        assert_eq!(store.set_georeferenced(id, "g.tif".into(), "EPSG:4326".into()).unwrap(), None);

        let stale = store.set_image_key(id, "b.png".into()).unwrap();
        assert_eq!(stale, vec!["a.png".to_string(), "g.tif".to_string()]);
        assert!(store.get(id).unwrap().georeferenced_key.is_none());
    }

    #[test]
    fn test_record_residuals_skips_edited_points() {
        let store = ProjectStore::new();
        let id = store.create(named("p")).id;
        store.add_point(id, input(0, 0, 1.0, 1.0)).unwrap();
        store.add_point(id, input(5, 5, 2.0, 2.0)).unwrap();

        let mut solved = store.points(id).unwrap();
        solved.points[0].error = Some(0.1);
        solved.points[1].error = Some(0.2);
        store.update_point(id, 2, input(6, 6, 2.0, 2.0)).unwrap();
        store.record_residuals(id, &solved).unwrap();

        let points = store.points(id).unwrap();
        assert_eq!(points.points[0].error, Some(0.1));
        assert_eq!(points.points[1].error, None);
    }

    #[test]
    fn test_points_serialize_as_list() {
        let store = ProjectStore::new();
        let id = store.create(named("p")).id;
        store.add_point(id, input(0, 0, 1.0, 1.0)).unwrap();
        let json = serde_json::to_value(store.get(id).unwrap()).unwrap();
        assert!(json["points"].is_array());
        assert_eq!(json["points"][0]["seq"], 1);
    }
}
