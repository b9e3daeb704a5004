use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Result of running presence detection on a frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceResult {
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// One detection. Box coordinates are normalised to 0..1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub w: f32,
    #[serde(default)]
    pub h: f32,
    pub confidence: f32,
    pub class: ObjectClass,
    #[serde(default)]
    pub identity: Option<Identity>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Person,
    Face,
    #[serde(other)]
    Other,
}

/// A recognised person and the rooms they may use.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(default)]
    pub access: BTreeMap<String, bool>,
}

impl Detection {
    pub fn person(confidence: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            w: 1.0,
            h: 1.0,
            confidence,
            class: ObjectClass::Person,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    fn is_person(&self) -> bool {
        matches!(self.class, ObjectClass::Person | ObjectClass::Face)
    }
}

impl PresenceResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when a person (or face) was detected above `min_confidence`.
    pub fn is_person_present(&self, min_confidence: f32) -> bool {
        self.detections
            .iter()
            .any(|d| d.is_person() && d.confidence > min_confidence)
    }

    /// Identity of the most confident recognised person, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.detections
            .iter()
            .filter(|d| d.is_person())
            .filter_map(|d| d.identity.as_ref().map(|i| (d.confidence, i)))
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, identity)| identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_requires_person_above_threshold() {
        let mut result = PresenceResult::empty();
        assert!(!result.is_person_present(0.5));
        result.detections.push(Detection {
            class: ObjectClass::Other,
            ..Detection::person(0.99)
        });
        assert!(!result.is_person_present(0.5));
        result.detections.push(Detection::person(0.5));
        assert!(!result.is_person_present(0.5));
        result.detections.push(Detection {
            class: ObjectClass::Face,
            ..Detection::person(0.7)
        });
        assert!(result.is_person_present(0.5));
    }

    #[test]
    fn picks_most_confident_identity() {
        let alice = Identity {
            name: "alice".to_string(),
            access: BTreeMap::from([("kitchen".to_string(), true)]),
        };
        let bob = Identity {
            name: "bob".to_string(),
            access: BTreeMap::new(),
        };
        let result = PresenceResult {
            detections: vec![
                Detection::person(0.6).with_identity(bob),
                Detection::person(0.9).with_identity(alice.clone()),
                Detection::person(0.95),
            ],
        };
        assert_eq!(result.identity(), Some(&alice));
    }

    #[test]
    fn unknown_classes_deserialize_as_other() {
        let result: PresenceResult = serde_json::from_str(
            r#"{"detections":[{"confidence":0.8,"class":"cat"},{"confidence":0.8,"class":"person","identity":{"name":"eve"}}]}"#,
        )
        .unwrap();
        assert_eq!(result.detections[0].class, ObjectClass::Other);
        assert_eq!(result.identity().map(|i| i.name.as_str()), Some("eve"));
    }
}
