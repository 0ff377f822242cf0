//! The persistent map: keyframes, landmarks, and their observation links.
//!
//! Everything is owned by value in id-indexed containers; relationships are
//! integer ids, never pointers. The graph is read-only for the whole of a
//! calibration batch, so it can be shared across worker threads freely.

use std::collections::HashMap;
use std::path::Path;

use log::info;
use nalgebra as na;

use crate::errors::{CalibrationError, CorruptMapError, Result};
use crate::io::{self, MapFile};
use crate::types::{KeyframeId, LandmarkId, Pose};

/// One 2D feature in a keyframe, linked to the landmark it observes.
#[derive(Clone, Debug)]
pub struct Observation {
    pub landmark_id: LandmarkId,
    pub pixel: glam::Vec2,
    pub descriptor: Option<Vec<f32>>,
}

/// A mapped camera pose together with its feature observations.
#[derive(Clone, Debug)]
pub struct Keyframe {
    pub id: KeyframeId,
    pub pose: Pose,
    pub observations: Vec<Observation>,
}

/// A triangulated 3D point in the map frame.
#[derive(Clone, Debug)]
pub struct Landmark {
    pub id: LandmarkId,
    pub position: na::Point3<f64>,
    pub descriptor: Option<Vec<f32>>,
    observers: Vec<KeyframeId>,
}

impl Landmark {
    /// Keyframes observing this landmark, ascending by id.
    pub fn observers(&self) -> &[KeyframeId] {
        &self.observers
    }

    /// A landmark under two observers is under-constrained and must not be
    /// moved by joint refinement.
    pub fn is_refinement_eligible(&self) -> bool {
        self.observers.len() >= 2
    }
}

/// The loaded map.
#[derive(Debug)]
pub struct SparseGraph {
    keyframes: HashMap<KeyframeId, Keyframe>,
    landmarks: HashMap<LandmarkId, Landmark>,
    descriptor_len: Option<usize>,
}

impl SparseGraph {
    /// Reads and validates a persisted map.
    ///
    /// Unreadable sources surface as [`CalibrationError::Io`]; schema or
    /// referential-integrity violations as [`CalibrationError::CorruptMap`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<SparseGraph> {
        let records: MapFile = io::object_from_json(path.as_ref())?;
        let graph = Self::from_records(records)?;
        info!(
            "loaded map: {} keyframes, {} landmarks, {} observations",
            graph.keyframe_count(),
            graph.landmark_count(),
            graph.observation_count()
        );
        Ok(graph)
    }

    /// Builds a graph from schema records, enforcing every structural
    /// invariant the loader guarantees to the rest of the crate.
    pub fn from_records(records: MapFile) -> std::result::Result<SparseGraph, CorruptMapError> {
        let mut descriptor_len: Option<usize> = None;
        let mut check_descriptor = |landmark: u64, desc: &Option<Vec<f32>>| {
            if let Some(d) = desc {
                match descriptor_len {
                    None => descriptor_len = Some(d.len()),
                    Some(expected) if expected != d.len() => {
                        return Err(CorruptMapError::DescriptorLengthMismatch {
                            landmark,
                            expected,
                            found: d.len(),
                        });
                    }
                    Some(_) => {}
                }
            }
            Ok(())
        };

        let mut landmarks = HashMap::with_capacity(records.landmarks.len());
        for rec in records.landmarks {
            if rec.position.iter().any(|v| !v.is_finite()) {
                return Err(CorruptMapError::NonFinitePosition(rec.id));
            }
            check_descriptor(rec.id, &rec.descriptor)?;
            let landmark = Landmark {
                id: LandmarkId(rec.id),
                position: na::Point3::new(rec.position[0], rec.position[1], rec.position[2]),
                descriptor: rec.descriptor,
                observers: Vec::new(),
            };
            if landmarks.insert(landmark.id, landmark).is_some() {
                return Err(CorruptMapError::DuplicateLandmarkId(rec.id));
            }
        }

        let mut keyframes = HashMap::with_capacity(records.keyframes.len());
        for rec in records.keyframes {
            let rotation = na::Quaternion::new(
                rec.rotation[0],
                rec.rotation[1],
                rec.rotation[2],
                rec.rotation[3],
            );
            if rec
                .rotation
                .iter()
                .chain(rec.translation.iter())
                .any(|v| !v.is_finite())
            {
                return Err(CorruptMapError::NonFinitePose(rec.id));
            }
            if rec.observations.is_empty() {
                return Err(CorruptMapError::DisconnectedKeyframe(rec.id));
            }
            let id = KeyframeId(rec.id);
            let mut observations = Vec::with_capacity(rec.observations.len());
            for obs in rec.observations {
                let landmark_id = LandmarkId(obs.landmark_id);
                let Some(landmark) = landmarks.get_mut(&landmark_id) else {
                    return Err(CorruptMapError::DanglingLandmarkRef {
                        keyframe: rec.id,
                        landmark: obs.landmark_id,
                    });
                };
                check_descriptor(obs.landmark_id, &obs.descriptor)?;
                landmark.observers.push(id);
                observations.push(Observation {
                    landmark_id,
                    pixel: glam::Vec2::new(obs.pixel[0], obs.pixel[1]),
                    descriptor: obs.descriptor,
                });
            }
            let keyframe = Keyframe {
                id,
                pose: Pose::new(
                    na::UnitQuaternion::from_quaternion(rotation),
                    na::Vector3::new(rec.translation[0], rec.translation[1], rec.translation[2]),
                ),
                observations,
            };
            if keyframes.insert(id, keyframe).is_some() {
                return Err(CorruptMapError::DuplicateKeyframeId(rec.id));
            }
        }

        for landmark in landmarks.values_mut() {
            landmark.observers.sort();
            landmark.observers.dedup();
        }

        Ok(SparseGraph {
            keyframes,
            landmarks,
            descriptor_len,
        })
    }

    pub fn keyframe(&self, id: KeyframeId) -> Result<&Keyframe> {
        self.keyframes.get(&id).ok_or(CalibrationError::NotFound {
            kind: "keyframe",
            id: id.0,
        })
    }

    pub fn landmark(&self, id: LandmarkId) -> Result<&Landmark> {
        self.landmarks.get(&id).ok_or(CalibrationError::NotFound {
            kind: "landmark",
            id: id.0,
        })
    }

    /// All keyframes, ascending by id.
    pub fn keyframes(&self) -> impl Iterator<Item = &Keyframe> {
        let mut ids: Vec<KeyframeId> = self.keyframes.keys().copied().collect();
        ids.sort();
        ids.into_iter().map(move |id| &self.keyframes[&id])
    }

    pub fn keyframe_count(&self) -> usize {
        self.keyframes.len()
    }

    pub fn landmark_count(&self) -> usize {
        self.landmarks.len()
    }

    pub fn observation_count(&self) -> usize {
        self.keyframes.values().map(|kf| kf.observations.len()).sum()
    }

    /// Descriptor dimensionality shared by every descriptor in the map.
    pub fn descriptor_len(&self) -> Option<usize> {
        self.descriptor_len
    }

    /// Keyframes within `radius` meters of `pose`, nearest first (ties by
    /// id). The returned sequence is finite and can be restarted by cloning
    /// or by calling this again.
    pub fn keyframes_near(&self, pose: &Pose, radius: f64) -> NearbyKeyframes<'_> {
        let center = *pose.translation();
        let mut hits: Vec<(f64, KeyframeId)> = self
            .keyframes
            .values()
            .filter_map(|kf| {
                let d = (kf.pose.translation() - center).norm();
                (d <= radius).then_some((d, kf.id))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        NearbyKeyframes {
            graph: self,
            hits,
            next: 0,
        }
    }
}

/// Ordered spatial query result, see [`SparseGraph::keyframes_near`].
#[derive(Clone)]
pub struct NearbyKeyframes<'a> {
    graph: &'a SparseGraph,
    hits: Vec<(f64, KeyframeId)>,
    next: usize,
}

impl<'a> Iterator for NearbyKeyframes<'a> {
    type Item = &'a Keyframe;

    fn next(&mut self) -> Option<Self::Item> {
        let (_, id) = *self.hits.get(self.next)?;
        self.next += 1;
        self.graph.keyframes.get(&id)
    }
}

impl ExactSizeIterator for NearbyKeyframes<'_> {
    fn len(&self) -> usize {
        self.hits.len() - self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{KeyframeRecord, LandmarkRecord, MapFile, ObservationRecord};

    fn landmark_rec(id: u64, x: f64) -> LandmarkRecord {
        LandmarkRecord {
            id,
            position: [x, 0.0, 5.0],
            descriptor: None,
        }
    }

    fn keyframe_rec(id: u64, x: f64, landmark_ids: &[u64]) -> KeyframeRecord {
        KeyframeRecord {
            id,
            rotation: [1.0, 0.0, 0.0, 0.0],
            translation: [x, 0.0, 0.0],
            observations: landmark_ids
                .iter()
                .map(|&lm| ObservationRecord {
                    landmark_id: lm,
                    pixel: [320.0, 240.0],
                    descriptor: None,
                })
                .collect(),
        }
    }

    fn small_map() -> MapFile {
        MapFile {
            keyframes: vec![
                keyframe_rec(0, 0.0, &[10, 11]),
                keyframe_rec(1, 2.0, &[10, 11]),
                keyframe_rec(2, 9.0, &[11]),
            ],
            landmarks: vec![landmark_rec(10, -1.0), landmark_rec(11, 1.0)],
        }
    }

    #[test]
    fn observers_are_derived() {
        let graph = SparseGraph::from_records(small_map()).unwrap();
        let lm = graph.landmark(LandmarkId(10)).unwrap();
        assert_eq!(lm.observers(), &[KeyframeId(0), KeyframeId(1)]);
        assert!(lm.is_refinement_eligible());
        assert!(!graph.landmark(LandmarkId(11)).unwrap().observers().is_empty());
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let mut map = small_map();
        map.keyframes[0].observations[0].landmark_id = 99;
        let err = SparseGraph::from_records(map).unwrap_err();
        assert!(matches!(
            err,
            CorruptMapError::DanglingLandmarkRef {
                keyframe: 0,
                landmark: 99
            }
        ));
    }

    #[test]
    fn nearby_query_is_ordered_and_restartable() {
        let graph = SparseGraph::from_records(small_map()).unwrap();
        let query = Pose::identity();
        let near = graph.keyframes_near(&query, 5.0);
        assert_eq!(near.len(), 2);
        let ids: Vec<_> = near.clone().map(|kf| kf.id).collect();
        assert_eq!(ids, vec![KeyframeId(0), KeyframeId(1)]);
        // The clone restarts from the beginning.
        let ids2: Vec<_> = near.map(|kf| kf.id).collect();
        assert_eq!(ids, ids2);
    }
}
