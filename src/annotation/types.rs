use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The 17 COCO keypoint labels, in canonical order.
pub const COCO_KEYPOINTS: [&str; 17] = [
    "nose",
    "left_eye",
    "right_eye",
    "left_ear",
    "right_ear",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
];

/// Default padding applied on every side of a derived bounding box.
pub const DEFAULT_BBOX_PADDING: f32 = 10.0;

/// A shape violation found while reading annotations from untyped JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeError {
    path: String,
    message: String,
}

impl ShapeError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            path: String::new(),
            message: message.into(),
        }
    }

    fn at(key: &str, message: impl Into<String>) -> Self {
        Self {
            path: key.to_string(),
            message: message.into(),
        }
    }

    /// Prefix the path with an enclosing key.
    pub fn nested(mut self, key: &str) -> Self {
        self.path = if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", key, self.path)
        };
        self
    }
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

impl std::error::Error for ShapeError {}

/// A single anatomical landmark. The label is the key it is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Same keypoint at a new position; confidence is kept.
    pub fn moved_to(&self, x: f32, y: f32) -> Self {
        Self { x, y, ..*self }
    }

    fn from_value(value: &Value) -> Result<Self, ShapeError> {
        let fields = value
            .as_object()
            .ok_or_else(|| ShapeError::new("expected an object with x and y"))?;
        let coordinate = |axis: &str| match fields.get(axis) {
            None | Some(Value::Null) => Err(ShapeError::at(axis, "missing")),
            Some(v) => {
                let n = v
                    .as_f64()
                    .ok_or_else(|| ShapeError::at(axis, "expected a number"))?
                    as f32;
                if n.is_finite() {
                    Ok(n)
                } else {
                    Err(ShapeError::at(axis, "out of range"))
                }
            }
        };
        let x = coordinate("x")?;
        let y = coordinate("y")?;
        let confidence = match fields.get("confidence") {
            None | Some(Value::Null) => None,
            Some(v) => {
                let c = v
                    .as_f64()
                    .ok_or_else(|| ShapeError::at("confidence", "expected a number"))?;
                if !(0.0..=1.0).contains(&c) {
                    return Err(ShapeError::at("confidence", "must lie in [0, 1]"));
                }
                Some(c as f32)
            }
        };
        Ok(Self { x, y, confidence })
    }
}

/// Keypoints of one person, keyed by label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonAnnotation(IndexMap<String, Keypoint>);

impl PersonAnnotation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keypoint(mut self, label: impl Into<String>, keypoint: Keypoint) -> Self {
        self.insert(label, keypoint);
        self
    }

    pub fn insert(&mut self, label: impl Into<String>, keypoint: Keypoint) -> Option<Keypoint> {
        self.0.insert(label.into(), keypoint)
    }

    pub fn get(&self, label: &str) -> Option<&Keypoint> {
        self.0.get(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Keypoint)> {
        self.0.iter().map(|(label, kp)| (label.as_str(), kp))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Padded axis-aligned box `[x, y, w, h]` around all keypoints.
    pub fn bounding_box(&self, padding: f32) -> [f32; 4] {
        if self.0.is_empty() {
            return [0.0; 4];
        }
        let (mut min_x, mut min_y) = (f32::INFINITY, f32::INFINITY);
        let (mut max_x, mut max_y) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
        for kp in self.0.values() {
            min_x = min_x.min(kp.x);
            min_y = min_y.min(kp.y);
            max_x = max_x.max(kp.x);
            max_y = max_y.max(kp.y);
        }
        [
            min_x - padding,
            min_y - padding,
            max_x - min_x + 2.0 * padding,
            max_y - min_y + 2.0 * padding,
        ]
    }

    /// Mean of the confidences that are present, 0.0 when none are.
    pub fn mean_confidence(&self) -> f32 {
        let (sum, count) = self
            .0
            .values()
            .filter_map(|kp| kp.confidence)
            .fold((0.0f32, 0usize), |(s, n), c| (s + c, n + 1));
        if count == 0 { 0.0 } else { sum / count as f32 }
    }

    fn from_value(value: &Value) -> Result<Self, ShapeError> {
        let keypoints = value
            .as_object()
            .ok_or_else(|| ShapeError::new("expected an object keyed by keypoint label"))?;
        let mut person = Self::new();
        for (label, keypoint) in keypoints {
            let keypoint = Keypoint::from_value(keypoint).map_err(|e| e.nested(label))?;
            person.insert(label.clone(), keypoint);
        }
        Ok(person)
    }
}

impl FromIterator<(String, Keypoint)> for PersonAnnotation {
    fn from_iter<T: IntoIterator<Item = (String, Keypoint)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// All annotated persons of one frame, keyed by a tracking id that is stable
/// across frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameAnnotations(IndexMap<String, PersonAnnotation>);

impl FrameAnnotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_person(mut self, person_id: impl Into<String>, person: PersonAnnotation) -> Self {
        self.insert(person_id, person);
        self
    }

    pub fn insert(
        &mut self,
        person_id: impl Into<String>,
        person: PersonAnnotation,
    ) -> Option<PersonAnnotation> {
        self.0.insert(person_id.into(), person)
    }

    pub fn get(&self, person_id: &str) -> Option<&PersonAnnotation> {
        self.0.get(person_id)
    }

    pub fn person_ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PersonAnnotation)> {
        self.0.iter().map(|(id, person)| (id.as_str(), person))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reads annotations out of untyped JSON, reporting the offending field path.
    pub fn from_value(value: &Value) -> Result<Self, ShapeError> {
        let persons = value
            .as_object()
            .ok_or_else(|| ShapeError::new("expected an object keyed by person id"))?;
        let mut frame = Self::new();
        for (person_id, person) in persons {
            let person = PersonAnnotation::from_value(person).map_err(|e| e.nested(person_id))?;
            frame.insert(person_id.clone(), person);
        }
        Ok(frame)
    }
}

impl FromIterator<(String, PersonAnnotation)> for FrameAnnotations {
    fn from_iter<T: IntoIterator<Item = (String, PersonAnnotation)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub person_id: String,
    pub keypoints: PersonAnnotation,
    pub bbox: [f32; 4],
    pub confidence: f32,
}

impl Prediction {
    pub fn from_person(
        person_id: impl Into<String>,
        keypoints: PersonAnnotation,
        padding: f32,
    ) -> Self {
        Self {
            person_id: person_id.into(),
            bbox: keypoints.bounding_box(padding),
            confidence: keypoints.mean_confidence(),
            keypoints,
        }
    }
}

/// Predictions for one frame. This is also the persisted annotation artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub frame: u64,
    pub predictions: Vec<Prediction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

impl InferenceResult {
    pub fn new(frame: u64, predictions: Vec<Prediction>) -> Self {
        Self {
            frame,
            predictions,
            processing_time_ms: None,
        }
    }

    pub fn from_annotations(frame: u64, annotations: &FrameAnnotations, padding: f32) -> Self {
        let predictions = annotations
            .iter()
            .map(|(id, person)| Prediction::from_person(id, person.clone(), padding))
            .collect();
        Self::new(frame, predictions)
    }

    /// Back to the per-person form so the result can seed the next frame.
    pub fn to_annotations(&self) -> FrameAnnotations {
        self.predictions
            .iter()
            .map(|p| (p.person_id.clone(), p.keypoints.clone()))
            .collect()
    }
}

/// Body of a `gt4frame_<N>.json` request artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub frame: u64,
    pub video_reference: String,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub annotations: FrameAnnotations,
}
