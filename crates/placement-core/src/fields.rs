//! Field configuration store
//!
//! Owns every field's font settings and committed PDF-space position(s). A
//! field starts out with a single position; duplicating it turns it into a
//! group of named instances (`<key>-copy<N>`), all stamped with the same text.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coords::Position;
use crate::error::PlacementError;

/// Where a field is stamped, in PDF user space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Placement {
    Single { position: Position },
    Multiple { positions: BTreeMap<String, Position> },
}

/// Font settings applied to newly registered fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefaults {
    pub font_size: f64,
    pub font_family: String,
    #[serde(default)]
    pub position: Position,
}

impl Default for FieldDefaults {
    fn default() -> Self {
        Self {
            font_size: 11.0,
            font_family: "Helvetica".to_string(),
            position: Position::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    pub key: String,
    pub font_size: f64,
    pub font_family: String,
    /// Text to stamp; the key is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(flatten)]
    pub placement: Placement,
}

impl FieldConfig {
    fn new(key: &str, defaults: &FieldDefaults) -> Self {
        Self {
            key: key.to_string(),
            font_size: defaults.font_size,
            font_family: defaults.font_family.clone(),
            value: None,
            placement: Placement::Single {
                position: defaults.position,
            },
        }
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self.placement, Placement::Multiple { .. })
    }

    /// Text drawn for every mark of this field
    pub fn text(&self) -> &str {
        self.value.as_deref().unwrap_or(&self.key)
    }

    /// Every committed mark as `(instance key, position)`.
    ///
    /// Single fields yield one mark without an instance key.
    pub fn marks(&self) -> Vec<(Option<&str>, Position)> {
        match &self.placement {
            Placement::Single { position } => vec![(None, *position)],
            Placement::Multiple { positions } => positions
                .iter()
                .map(|(instance, pos)| (Some(instance.as_str()), *pos))
                .collect(),
        }
    }

    /// Position of a given instance (or of the single position)
    pub fn position_of(&self, instance: Option<&str>) -> Option<Position> {
        match (&self.placement, instance) {
            (Placement::Single { position }, None) => Some(*position),
            (Placement::Single { position }, Some(inst)) if inst == self.key => Some(*position),
            (Placement::Single { .. }, Some(_)) => None,
            (Placement::Multiple { positions }, Some(inst)) => positions.get(inst).copied(),
            (Placement::Multiple { positions }, None) => positions.get(&self.key).copied(),
        }
    }

    /// Position new copies start from: the anchor's, falling back to the first instance
    fn anchor_position(&self) -> Position {
        match &self.placement {
            Placement::Single { position } => *position,
            Placement::Multiple { positions } => positions
                .get(&self.key)
                .or_else(|| positions.values().next())
                .copied()
                .unwrap_or_default(),
        }
    }
}

/// Registry of every field, in declaration order
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: Vec<FieldConfig>,
    defaults: FieldDefaults,
    /// Every field and instance key ever handed out
    issued: HashSet<String>,
    /// Next copy number per original field key
    copy_counters: HashMap<String, u32>,
    /// Instance key -> owning field key
    owners: HashMap<String, String>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: FieldDefaults) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    pub fn defaults(&self) -> &FieldDefaults {
        &self.defaults
    }

    /// Register a new single-position field with the registry defaults
    pub fn register(&mut self, key: &str) -> Result<(), PlacementError> {
        let defaults = self.defaults.clone();
        self.register_with(key, &defaults)
    }

    /// Register a new single-position field. Keys that were ever issued
    /// (including removed fields and copy instances) are rejected.
    pub fn register_with(
        &mut self,
        key: &str,
        defaults: &FieldDefaults,
    ) -> Result<(), PlacementError> {
        if key.is_empty() {
            return Err(PlacementError::InvalidState(
                "field key must not be empty".to_string(),
            ));
        }
        if self.issued.contains(key) {
            return Err(PlacementError::DuplicateField(key.to_string()));
        }
        if !(defaults.font_size.is_finite() && defaults.font_size > 0.0) {
            return Err(PlacementError::InvalidFontSize {
                key: key.to_string(),
                size: defaults.font_size,
            });
        }
        self.issued.insert(key.to_string());
        self.fields.push(FieldConfig::new(key, defaults));
        debug!(key, "Registered field");
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&FieldConfig> {
        self.fields.iter().find(|f| f.key == key)
    }

    fn get_mut(&mut self, key: &str) -> Result<&mut FieldConfig, PlacementError> {
        self.fields
            .iter_mut()
            .find(|f| f.key == key)
            .ok_or_else(|| PlacementError::UnknownField(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Whether a commit to `(key, instance)` would land on a live entry
    pub fn has_target(&self, key: &str, instance: Option<&str>) -> bool {
        self.get(key)
            .is_some_and(|field| field.position_of(instance).is_some())
    }

    /// Field key owning an instance key, if it is a copy instance
    pub fn owner_of(&self, instance: &str) -> Option<&str> {
        self.owners.get(instance).map(String::as_str)
    }

    pub fn fields(&self) -> &[FieldConfig] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Commit a PDF-space position for a field or one of its instances
    pub fn commit_position(
        &mut self,
        key: &str,
        instance: Option<&str>,
        position: Position,
    ) -> Result<(), PlacementError> {
        if !position.is_finite() {
            return Err(PlacementError::Geometry(format!(
                "non-finite position for field {}",
                key
            )));
        }
        let field = self.get_mut(key)?;
        match &mut field.placement {
            Placement::Single { position: current } => match instance {
                Some(inst) if inst != key => {
                    return Err(PlacementError::UnknownInstance {
                        key: key.to_string(),
                        instance: inst.to_string(),
                    });
                }
                _ => *current = position,
            },
            Placement::Multiple { positions } => {
                let inst = instance.ok_or_else(|| PlacementError::MissingInstance(key.to_string()))?;
                match positions.get_mut(inst) {
                    Some(slot) => *slot = position,
                    None => {
                        return Err(PlacementError::UnknownInstance {
                            key: key.to_string(),
                            instance: inst.to_string(),
                        });
                    }
                }
            }
        }
        debug!(key, ?instance, x = position.x, y = position.y, "Committed position");
        Ok(())
    }

    /// Add a copy of a field and return the new instance key.
    ///
    /// `target` may be a field key or a copy instance key; copies of an
    /// instance are numbered from its owning field. A single-position field
    /// is promoted to a group, keeping its position under its own key.
    pub fn duplicate(&mut self, target: &str) -> Result<String, PlacementError> {
        let (key, source_instance) = match self.owners.get(target) {
            Some(owner) => (owner.clone(), Some(target.to_string())),
            None => (target.to_string(), None),
        };

        let source = {
            let field = self
                .get(&key)
                .ok_or_else(|| PlacementError::UnknownField(target.to_string()))?;
            match source_instance.as_deref() {
                Some(inst) => field.position_of(Some(inst)).ok_or_else(|| {
                    PlacementError::UnknownInstance {
                        key: key.clone(),
                        instance: inst.to_string(),
                    }
                })?,
                None => field.anchor_position(),
            }
        };

        let instance_key = self.next_instance_key(&key);

        let field = self.get_mut(&key)?;
        if let Placement::Single { position } = field.placement {
            let mut positions = BTreeMap::new();
            positions.insert(key.clone(), position);
            field.placement = Placement::Multiple { positions };
        }
        if let Placement::Multiple { positions } = &mut field.placement {
            positions.insert(instance_key.clone(), source);
        }

        self.issued.insert(instance_key.clone());
        self.owners.insert(instance_key.clone(), key.clone());
        debug!(key = %key, instance = %instance_key, "Duplicated field");
        Ok(instance_key)
    }

    fn next_instance_key(&mut self, key: &str) -> String {
        let counter = self.copy_counters.entry(key.to_string()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{}-copy{}", key, counter);
            if !self.issued.contains(&candidate) {
                return candidate;
            }
        }
    }

    pub fn set_font_size(&mut self, key: &str, size: f64) -> Result<(), PlacementError> {
        if !(size.is_finite() && size > 0.0) {
            return Err(PlacementError::InvalidFontSize {
                key: key.to_string(),
                size,
            });
        }
        self.get_mut(key)?.font_size = size;
        Ok(())
    }

    pub fn set_font_family(&mut self, key: &str, family: &str) -> Result<(), PlacementError> {
        self.get_mut(key)?.font_family = family.to_string();
        Ok(())
    }

    pub fn set_value(&mut self, key: &str, value: Option<String>) -> Result<(), PlacementError> {
        self.get_mut(key)?.value = value;
        Ok(())
    }

    /// Remove a field and all of its instances. Its keys stay retired.
    pub fn remove(&mut self, key: &str) -> Result<FieldConfig, PlacementError> {
        let index = self
            .fields
            .iter()
            .position(|f| f.key == key)
            .ok_or_else(|| PlacementError::UnknownField(key.to_string()))?;
        let removed = self.fields.remove(index);
        self.owners.retain(|_, owner| owner != key);
        debug!(key, "Removed field");
        Ok(removed)
    }

    /// Remove one copy instance. The last remaining position cannot be removed.
    pub fn remove_instance(&mut self, key: &str, instance: &str) -> Result<(), PlacementError> {
        let field = self.get_mut(key)?;
        match &mut field.placement {
            Placement::Single { .. } => Err(PlacementError::LastInstance(key.to_string())),
            Placement::Multiple { positions } => {
                if !positions.contains_key(instance) {
                    return Err(PlacementError::UnknownInstance {
                        key: key.to_string(),
                        instance: instance.to_string(),
                    });
                }
                if positions.len() == 1 {
                    return Err(PlacementError::LastInstance(key.to_string()));
                }
                positions.remove(instance);
                self.owners.remove(instance);
                Ok(())
            }
        }
    }

    /// Snapshot of every field, detached from the registry
    pub fn export_all(&self) -> Vec<FieldConfig> {
        self.fields.clone()
    }

    /// Snapshot serialized as a JSON array
    pub fn export_json(&self) -> Result<String, PlacementError> {
        serde_json::to_string(&self.fields)
            .map_err(|e| PlacementError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry_with(keys: &[&str]) -> FieldRegistry {
        let mut registry = FieldRegistry::new();
        for key in keys {
            registry.register(key).unwrap();
        }
        registry
    }

    #[test]
    fn test_register_field_defaults() {
        let registry = registry_with(&["name"]);
        let field = registry.get("name").unwrap();
        assert_eq!(field.font_size, 11.0);
        assert_eq!(field.font_family, "Helvetica");
        assert_eq!(
            field.placement,
            Placement::Single {
                position: Position::new(0.0, 0.0)
            }
        );
    }

    #[test]
    fn test_register_preserves_order() {
        let registry = registry_with(&["name", "date", "address"]);
        let keys: Vec<&str> = registry.fields().iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["name", "date", "address"]);
    }

    #[test]
    fn test_register_rejects_existing_key() {
        let mut registry = registry_with(&["name"]);
        assert!(matches!(
            registry.register("name"),
            Err(PlacementError::DuplicateField(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_removed_key_is_not_reused() {
        let mut registry = registry_with(&["name"]);
        registry.remove("name").unwrap();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.register("name"),
            Err(PlacementError::DuplicateField(_))
        ));
    }

    #[test]
    fn test_commit_single_position() {
        let mut registry = registry_with(&["name"]);
        registry
            .commit_position("name", None, Position::new(100.0, 200.0))
            .unwrap();
        assert_eq!(
            registry.get("name").unwrap().position_of(None),
            Some(Position::new(100.0, 200.0))
        );
    }

    #[test]
    fn test_commit_unknown_field() {
        let mut registry = FieldRegistry::new();
        let result = registry.commit_position("ghost", None, Position::new(1.0, 1.0));
        assert!(matches!(result, Err(PlacementError::UnknownField(_))));
    }

    #[test]
    fn test_commit_multiple_requires_instance() {
        let mut registry = registry_with(&["name"]);
        registry.duplicate("name").unwrap();
        let result = registry.commit_position("name", None, Position::new(1.0, 1.0));
        assert!(matches!(result, Err(PlacementError::MissingInstance(_))));

        let result = registry.commit_position("name", Some("name-copy9"), Position::new(1.0, 1.0));
        assert!(matches!(result, Err(PlacementError::UnknownInstance { .. })));
    }

    #[test]
    fn test_duplicate_twice() {
        let mut registry = registry_with(&["name"]);
        let first = registry.duplicate("name").unwrap();
        let second = registry.duplicate("name").unwrap();
        assert_eq!(first, "name-copy1");
        assert_eq!(second, "name-copy2");

        let field = registry.get("name").unwrap();
        assert!(field.is_multiple());
        match &field.placement {
            Placement::Multiple { positions } => {
                assert!(positions.contains_key("name-copy1"));
                assert!(positions.contains_key("name-copy2"));
            }
            Placement::Single { .. } => panic!("expected multiple placement"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_keeps_original_position() {
        let mut registry = registry_with(&["name"]);
        registry
            .commit_position("name", None, Position::new(100.0, 200.0))
            .unwrap();
        let copy = registry.duplicate("name").unwrap();

        let field = registry.get("name").unwrap();
        assert_eq!(
            field.position_of(Some("name")),
            Some(Position::new(100.0, 200.0))
        );
        // New copies start where the original sits
        assert_eq!(
            field.position_of(Some(copy.as_str())),
            Some(Position::new(100.0, 200.0))
        );
    }

    #[test]
    fn test_duplicate_instance_numbers_from_owner() {
        let mut registry = registry_with(&["name"]);
        let first = registry.duplicate("name").unwrap();
        registry
            .commit_position("name", Some(first.as_str()), Position::new(5.0, 6.0))
            .unwrap();

        let second = registry.duplicate(&first).unwrap();
        assert_eq!(second, "name-copy2");
        assert_eq!(registry.owner_of(&second), Some("name"));
        assert_eq!(
            registry.get("name").unwrap().position_of(Some(second.as_str())),
            Some(Position::new(5.0, 6.0))
        );
    }

    #[test]
    fn test_duplicate_unknown_field() {
        let mut registry = FieldRegistry::new();
        assert!(matches!(
            registry.duplicate("ghost"),
            Err(PlacementError::UnknownField(_))
        ));
    }

    #[test]
    fn test_duplicate_skips_keys_taken_by_fields() {
        let mut registry = registry_with(&["name", "name-copy1"]);
        let copy = registry.duplicate("name").unwrap();
        assert_eq!(copy, "name-copy2");
    }

    #[test]
    fn test_register_rejects_issued_instance_key() {
        let mut registry = registry_with(&["name"]);
        let copy = registry.duplicate("name").unwrap();
        assert!(matches!(
            registry.register(&copy),
            Err(PlacementError::DuplicateField(_))
        ));
    }

    #[test]
    fn test_removed_instance_key_not_reissued() {
        let mut registry = registry_with(&["name"]);
        let first = registry.duplicate("name").unwrap();
        registry.remove_instance("name", &first).unwrap();
        let second = registry.duplicate("name").unwrap();
        assert_ne!(first, second);
        assert_eq!(second, "name-copy2");
    }

    #[test]
    fn test_remove_last_instance_rejected() {
        let mut registry = registry_with(&["name"]);
        assert!(matches!(
            registry.remove_instance("name", "name"),
            Err(PlacementError::LastInstance(_))
        ));

        let copy = registry.duplicate("name").unwrap();
        registry.remove_instance("name", "name").unwrap();
        assert!(matches!(
            registry.remove_instance("name", &copy),
            Err(PlacementError::LastInstance(_))
        ));
    }

    #[test]
    fn test_set_font_size_validation() {
        let mut registry = registry_with(&["name"]);
        registry.set_font_size("name", 14.0).unwrap();
        assert_eq!(registry.get("name").unwrap().font_size, 14.0);

        for bad in [0.0, -3.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                registry.set_font_size("name", bad),
                Err(PlacementError::InvalidFontSize { .. })
            ));
        }
        assert_eq!(registry.get("name").unwrap().font_size, 14.0);
        assert!(matches!(
            registry.set_font_size("ghost", 12.0),
            Err(PlacementError::UnknownField(_))
        ));
    }

    #[test]
    fn test_text_defaults_to_key() {
        let mut registry = registry_with(&["name"]);
        assert_eq!(registry.get("name").unwrap().text(), "name");
        registry
            .set_value("name", Some("Jane Doe".to_string()))
            .unwrap();
        assert_eq!(registry.get("name").unwrap().text(), "Jane Doe");
    }

    #[test]
    fn test_export_is_detached_snapshot() {
        let mut registry = registry_with(&["name"]);
        let mut snapshot = registry.export_all();
        snapshot[0].font_size = 99.0;
        registry.set_font_family("name", "Courier").unwrap();

        assert_eq!(registry.get("name").unwrap().font_size, 11.0);
        assert_eq!(snapshot[0].font_family, "Helvetica");
    }

    #[test]
    fn test_export_shape() {
        let mut registry = registry_with(&["name", "date"]);
        registry
            .commit_position("date", None, Position::new(10.0, 20.0))
            .unwrap();
        registry.duplicate("name").unwrap();

        let json: serde_json::Value = serde_json::from_str(&registry.export_json().unwrap()).unwrap();
        let name = &json[0];
        assert_eq!(name["kind"].as_str(), Some("multiple"));
        assert!(name.get("position").is_none());
        assert!(name["positions"]["name-copy1"].is_object());

        let date = &json[1];
        assert_eq!(date["kind"].as_str(), Some("single"));
        assert_eq!(date["position"]["x"].as_f64(), Some(10.0));
        assert!(date.get("positions").is_none());
        assert_eq!(date["fontSize"].as_f64(), Some(11.0));
    }

    #[test]
    fn test_export_round_trips_through_serde() {
        let mut registry = registry_with(&["name"]);
        registry.duplicate("name").unwrap();
        let exported = registry.export_all();
        let json = serde_json::to_string(&exported).unwrap();
        let back: Vec<FieldConfig> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, exported);
    }
}
