use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::classifier::LightingClassifier;
use crate::config::LightingConfig;

/// Thread-safe owner of one lighting classifier per camera.
///
/// Classifiers are wrapped in `Mutex` because `LightingClassifier::analyze`
/// takes `&mut self`. Instances are created lazily on first use with the
/// registry's default configuration unless a camera-specific one was set.
pub struct ClassifierRegistry {
    default_config: LightingConfig,
    overrides: Mutex<HashMap<String, LightingConfig>>,
    classifiers: Mutex<HashMap<String, Arc<Mutex<LightingClassifier>>>>,
}

impl ClassifierRegistry {
    pub fn new(default_config: LightingConfig) -> Result<Self> {
        default_config.validate()?;
        Ok(Self {
            default_config,
            overrides: Mutex::new(HashMap::new()),
            classifiers: Mutex::new(HashMap::new()),
        })
    }

    pub fn default_config(&self) -> &LightingConfig {
        &self.default_config
    }

    /// Use `config` for `camera_id`. Replaces an existing classifier, which
    /// drops its history.
    pub fn configure(&self, camera_id: &str, config: LightingConfig) -> Result<()> {
        let classifier = LightingClassifier::new(config.clone())?;
        self.overrides
            .lock()
            .map_err(|_| anyhow!("classifier override lock poisoned"))?
            .insert(camera_id.to_string(), config);
        self.classifiers
            .lock()
            .map_err(|_| anyhow!("classifier registry lock poisoned"))?
            .insert(camera_id.to_string(), Arc::new(Mutex::new(classifier)));
        Ok(())
    }

    /// Get a classifier by camera id.
    pub fn get(&self, camera_id: &str) -> Result<Option<Arc<Mutex<LightingClassifier>>>> {
        let classifiers = self
            .classifiers
            .lock()
            .map_err(|_| anyhow!("classifier registry lock poisoned"))?;
        Ok(classifiers.get(camera_id).cloned())
    }

    /// Get the classifier for `camera_id`, creating it on first use.
    pub fn get_or_create(&self, camera_id: &str) -> Result<Arc<Mutex<LightingClassifier>>> {
        let mut classifiers = self
            .classifiers
            .lock()
            .map_err(|_| anyhow!("classifier registry lock poisoned"))?;
        if let Some(existing) = classifiers.get(camera_id) {
            return Ok(existing.clone());
        }
        let config = self
            .overrides
            .lock()
            .map_err(|_| anyhow!("classifier override lock poisoned"))?
            .get(camera_id)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone());
        let classifier = Arc::new(Mutex::new(LightingClassifier::new(config)?));
        log::info!("lighting classifier created for camera '{}'", camera_id);
        classifiers.insert(camera_id.to_string(), classifier.clone());
        Ok(classifier)
    }

    /// List cameras with a live classifier.
    pub fn list(&self) -> Result<Vec<String>> {
        let classifiers = self
            .classifiers
            .lock()
            .map_err(|_| anyhow!("classifier registry lock poisoned"))?;
        let mut ids: Vec<String> = classifiers.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Reset one camera's classifier. Returns false when none exists.
    pub fn reset(&self, camera_id: &str) -> Result<bool> {
        let Some(classifier) = self.get(camera_id)? else {
            return Ok(false);
        };
        classifier
            .lock()
            .map_err(|_| anyhow!("classifier lock poisoned"))?
            .reset();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LightingState;
    use crate::frame::Frame;
    use std::time::SystemTime;

    #[test]
    fn classifiers_are_independent_per_camera() {
        let registry = ClassifierRegistry::new(LightingConfig::default()).unwrap();
        let bright = Frame::uniform(16, 16, 220).unwrap();
        let kitchen = registry.get_or_create("kitchen").unwrap();
        for _ in 0..3 {
            kitchen.lock().unwrap().analyze(&bright, SystemTime::now());
        }
        let hall = registry.get_or_create("hall").unwrap();
        assert_eq!(kitchen.lock().unwrap().current_state(), LightingState::On);
        assert_eq!(hall.lock().unwrap().current_state(), LightingState::Unknown);
        assert_eq!(registry.list().unwrap(), vec!["hall", "kitchen"]);

        let again = registry.get_or_create("kitchen").unwrap();
        assert!(Arc::ptr_eq(&kitchen, &again));
        assert!(registry.reset("kitchen").unwrap());
        assert_eq!(kitchen.lock().unwrap().current_state(), LightingState::Unknown);
        assert!(!registry.reset("garage").unwrap());
    }

    #[test]
    fn per_camera_config_is_validated_and_used() {
        let registry = ClassifierRegistry::new(LightingConfig::default()).unwrap();
        let bad = LightingConfig {
            stability_frames: 0,
            ..LightingConfig::default()
        };
        assert!(registry.configure("porch", bad).is_err());

        let quick = LightingConfig {
            stability_frames: 1,
            ..LightingConfig::default()
        };
        registry.configure("porch", quick).unwrap();
        let porch = registry.get_or_create("porch").unwrap();
        let analysis = porch
            .lock()
            .unwrap()
            .analyze(&Frame::uniform(16, 16, 10).unwrap(), SystemTime::now());
        assert!(analysis.state_changed);
    }
}
