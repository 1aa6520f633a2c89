//! In-Memory Engine
//!
//! A complete `GeoEngine` over named in-memory datasets. Used by the CLI
//! against JSON workspace files and by the test-suite.

use anyhow::{Context, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use super::geometry::Geometry;
use super::stats;
use super::{
    DissolveOptions, EliminateOptions, EngineResult, GeoEngine, SchemaConformance, SelectionHandle, SpatialPredicate,
};
use crate::error::EngineError;
use crate::plan::AggregationPlan;
use crate::rectify::FieldMapping;
use crate::schema::{system, FieldCatalog, FieldDescriptor, FieldType, FieldValue};

const DEFAULT_TEXT_LENGTH: u32 = 255;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "OBJECTID")]
    pub oid: i64,
    #[serde(default)]
    pub geometry: Geometry,
    #[serde(default)]
    pub attributes: BTreeMap<String, FieldValue>,
}

impl Feature {
    pub fn attribute(&self, field: &str) -> &FieldValue {
        static NULL: FieldValue = FieldValue::Null;
        self.attributes.get(field).unwrap_or(&NULL)
    }
}

/// A feature class: attribute fields, features and an optional selection.
///
/// `fields` holds the attribute columns only. `OBJECTID`, `Shape`,
/// `Shape_Length` and `Shape_Area` are always present and derived.
/// Object ids are never reused, even after the highest rows are deleted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<BTreeSet<i64>>,
    #[serde(default)]
    pub next_oid: i64,
}

impl Dataset {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self {
            fields,
            features: Vec::new(),
            selection: None,
            next_oid: 1,
        }
    }

    /// Fixture builder. A value that does not fit its field is left empty,
    /// as a lenient append does.
    pub fn with_feature<I, K>(mut self, geometry: Geometry, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: Into<String>,
    {
        let mut typed = BTreeMap::new();
        for (name, value) in attributes {
            let name = name.into();
            let value = typed_value(&self.fields, &name, value).unwrap_or_else(|e| {
                warn!("Feature left {} empty: {}", name, e);
                FieldValue::Null
            });
            typed.insert(name, value);
        }
        self.push(geometry, typed);
        self
    }

    /// Add a feature, converting each attribute to its field's type.
    pub fn insert(&mut self, geometry: Geometry, attributes: BTreeMap<String, FieldValue>) -> Result<i64, String> {
        let mut typed = BTreeMap::new();
        for (name, value) in attributes {
            let value = typed_value(&self.fields, &name, value)?;
            typed.insert(name, value);
        }
        Ok(self.push(geometry, typed))
    }

    fn push(&mut self, geometry: Geometry, attributes: BTreeMap<String, FieldValue>) -> i64 {
        let oid = self.allocate_oid();
        self.features.push(Feature {
            oid,
            geometry,
            attributes,
        });
        oid
    }

    fn allocate_oid(&mut self) -> i64 {
        // Files written without a counter fall back to the highest id in use.
        let oid = self.features.iter().map(|f| f.oid + 1).fold(self.next_oid.max(1), i64::max);
        self.next_oid = oid + 1;
        oid
    }

    /// Convert every stored attribute to its field's type.
    pub fn conform_values(&mut self) -> Result<(), String> {
        for feature in self.features.iter_mut() {
            let oid = feature.oid;
            for (name, value) in feature.attributes.iter_mut() {
                *value = typed_value(&self.fields, name, std::mem::take(value))
                    .map_err(|e| format!("feature {}: {}", oid, e))?;
            }
        }
        Ok(())
    }

    pub fn catalog(&self) -> FieldCatalog {
        let mut fields = Vec::with_capacity(self.fields.len() + 4);
        fields.push(FieldDescriptor::new(system::OBJECT_ID, FieldType::ObjectId));
        fields.push(FieldDescriptor::new(system::SHAPE, FieldType::Geometry));
        fields.extend(self.fields.iter().cloned());
        fields.push(FieldDescriptor::new(system::SHAPE_LENGTH, FieldType::Double));
        fields.push(FieldDescriptor::new(system::SHAPE_AREA, FieldType::Double));
        FieldCatalog::new(fields)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn select(&mut self, oids: impl IntoIterator<Item = i64>) {
        self.selection = Some(oids.into_iter().collect());
    }

    /// Select the features whose `field` equals `value`.
    pub fn select_where(&mut self, field: &str, value: &FieldValue) -> usize {
        let oids: BTreeSet<i64> = self
            .features
            .iter()
            .filter(|f| f.attribute(field) == value)
            .map(|f| f.oid)
            .collect();
        let count = oids.len();
        self.selection = Some(oids);
        count
    }

    fn is_visible(&self, feature: &Feature) -> bool {
        self.selection.as_ref().map_or(true, |s| s.contains(&feature.oid))
    }

    pub fn visible(&self) -> impl Iterator<Item = &Feature> + '_ {
        self.features.iter().filter(move |f| self.is_visible(f))
    }

    fn value(&self, feature: &Feature, field: &str) -> Option<FieldValue> {
        match field {
            system::OBJECT_ID => Some(FieldValue::Integer(feature.oid)),
            system::SHAPE_LENGTH => Some(FieldValue::Double(feature.geometry.length())),
            system::SHAPE_AREA => Some(FieldValue::Double(feature.geometry.area())),
            _ => self.field(field).map(|_| feature.attribute(field).clone()),
        }
    }

    fn catalog_type(&self, field: &str) -> Option<FieldType> {
        self.catalog().get(field).map(|f| f.field_type)
    }
}

/// Named datasets; serialized as a JSON workspace `{ "<name>": Dataset }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryEngine {
    datasets: BTreeMap<String, Dataset>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, name: impl Into<String>, dataset: Dataset) -> Self {
        self.datasets.insert(name.into(), dataset);
        self
    }

    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name)
    }

    pub fn dataset_mut(&mut self, name: &str) -> Option<&mut Dataset> {
        self.datasets.get_mut(name)
    }

    pub fn dataset_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.datasets.keys().map(String::as_str)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read workspace file {}", path.display()))?;
        let mut engine: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse workspace file {}", path.display()))?;
        for (name, dataset) in engine.datasets.iter_mut() {
            dataset
                .conform_values()
                .map_err(Error::msg)
                .with_context(|| format!("Failed to load dataset '{}' from {}", name, path.display()))?;
        }
        Ok(engine)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("Failed to serialize workspace")?;
        fs::write(path, json).with_context(|| format!("Failed to write workspace file {}", path.display()))?;
        Ok(())
    }

    fn get(&self, operation: &'static str, name: &str) -> EngineResult<&Dataset> {
        self.datasets
            .get(name)
            .ok_or_else(|| EngineError::new(operation, name, "dataset does not exist"))
    }

    fn get_mut(&mut self, operation: &'static str, name: &str) -> EngineResult<&mut Dataset> {
        self.datasets
            .get_mut(name)
            .ok_or_else(|| EngineError::new(operation, name, "dataset does not exist"))
    }

    fn create(&mut self, operation: &'static str, name: &str, dataset: Dataset) -> EngineResult<()> {
        if self.datasets.contains_key(name) {
            return Err(EngineError::new(operation, name, "output dataset already exists"));
        }
        debug!("{} created '{}' with {} features", operation, name, dataset.features.len());
        self.datasets.insert(name.to_string(), dataset);
        Ok(())
    }

    /// Copy the visible features of `source`, renumbering object ids from 1.
    fn visible_copy(
        operation: &'static str,
        name: &str,
        source: &Dataset,
        geometry: impl Fn(&Geometry) -> Geometry,
    ) -> EngineResult<Dataset> {
        let mut copy = Dataset::new(source.fields.clone());
        for feature in source.visible() {
            copy.insert(geometry(&feature.geometry), feature.attributes.clone())
                .map_err(|e| EngineError::new(operation, name, e))?;
        }
        Ok(copy)
    }
}

impl GeoEngine for MemoryEngine {
    fn list_fields(&self, layer: &str) -> EngineResult<FieldCatalog> {
        Ok(self.get("list_fields", layer)?.catalog())
    }

    fn count(&self, layer: &str) -> EngineResult<usize> {
        Ok(self.get("count", layer)?.visible().count())
    }

    fn read_values(&self, layer: &str, field: &str) -> EngineResult<Vec<FieldValue>> {
        let dataset = self.get("read_values", layer)?;
        if dataset.catalog_type(field).is_none() {
            return Err(EngineError::new("read_values", layer, format!("field '{}' does not exist", field)));
        }
        Ok(dataset
            .visible()
            .map(|f| dataset.value(f, field).unwrap_or_default())
            .collect())
    }

    fn selection(&self, layer: &str) -> EngineResult<SelectionHandle> {
        let dataset = self.get("selection", layer)?;
        Ok(SelectionHandle::new(layer, dataset.visible().map(|f| f.oid).collect()))
    }

    fn select_by_location(
        &mut self,
        candidate: &str,
        predicate: SpatialPredicate,
        reference: &str,
    ) -> EngineResult<SelectionHandle> {
        let reference_geometry = {
            let reference = self.get("select_by_location", reference)?;
            Geometry::union(reference.visible().map(|f| &f.geometry))
        };
        let dataset = self.get_mut("select_by_location", candidate)?;
        let selected: BTreeSet<i64> = dataset
            .features
            .iter()
            .filter(|f| match predicate {
                SpatialPredicate::Within => f.geometry.within(&reference_geometry),
                SpatialPredicate::Intersects => f.geometry.intersects(&reference_geometry),
            })
            .map(|f| f.oid)
            .collect();
        let handle = SelectionHandle::new(candidate, selected.iter().copied().collect());
        dataset.selection = Some(selected);
        Ok(handle)
    }

    fn clear_selection(&mut self, layer: &str) -> EngineResult<()> {
        self.get_mut("clear_selection", layer)?.selection = None;
        Ok(())
    }

    fn copy_features(&mut self, source: &str, destination: &str) -> EngineResult<usize> {
        let copy = Self::visible_copy("copy_features", source, self.get("copy_features", source)?, Geometry::clone)?;
        let count = copy.features.len();
        self.create("copy_features", destination, copy)?;
        Ok(count)
    }

    fn eliminate_polygon_part(&mut self, input: &str, output: &str, options: &EliminateOptions) -> EngineResult<()> {
        if !options.contained_only {
            return Err(EngineError::new(
                "eliminate_polygon_part",
                input,
                "only contained parts can be eliminated",
            ));
        }
        let percent = options.part_area_percent;
        let cleaned = Self::visible_copy(
            "eliminate_polygon_part",
            input,
            self.get("eliminate_polygon_part", input)?,
            |g| g.eliminate_contained_parts(percent),
        )?;
        self.create("eliminate_polygon_part", output, cleaned)
    }

    fn dissolve(
        &mut self,
        input: &str,
        output: &str,
        group_fields: &[String],
        plan: &AggregationPlan,
        options: &DissolveOptions,
    ) -> EngineResult<()> {
        let source = self.get("dissolve", input)?;

        let mut fields = Vec::with_capacity(group_fields.len() + plan.len());
        let mut source_types = Vec::with_capacity(plan.len());
        for name in group_fields {
            let field = source
                .field(name)
                .ok_or_else(|| EngineError::new("dissolve", input, format!("group field '{}' does not exist", name)))?;
            fields.push(field.clone());
        }
        for rule in plan.iter() {
            let source_type = source.catalog_type(&rule.field).ok_or_else(|| {
                EngineError::new("dissolve", input, format!("statistics field '{}' does not exist", rule.field))
            })?;
            if !rule.operator.supports(source_type) {
                return Err(EngineError::new(
                    "dissolve",
                    input,
                    format!("cannot compute {} over {} field '{}'", rule.operator, source_type, rule.field),
                ));
            }
            source_types.push(source_type);
            fields.push(FieldDescriptor::new(
                rule.operator.decorate(&rule.field),
                stats::output_type(rule.operator, source_type),
            ));
        }

        // Groups keep the order in which their first member appears.
        let mut groups: Vec<(Vec<FieldValue>, Vec<&Feature>)> = Vec::new();
        for feature in source.visible() {
            let key: Vec<FieldValue> = group_fields.iter().map(|g| feature.attribute(g).clone()).collect();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(feature),
                None => groups.push((key, vec![feature])),
            }
        }

        let mut dissolved = Dataset::new(fields);
        for (key, members) in &groups {
            let mut attributes: BTreeMap<String, FieldValue> =
                group_fields.iter().cloned().zip(key.iter().cloned()).collect();
            for (rule, source_type) in plan.iter().zip(&source_types) {
                let values: Vec<FieldValue> = members
                    .iter()
                    .map(|f| source.value(f, &rule.field).unwrap_or_default())
                    .collect();
                attributes.insert(
                    rule.operator.decorate(&rule.field),
                    stats::reduce(rule.operator, *source_type, &values, &options.concatenation_separator),
                );
            }
            let geometry = Geometry::union(members.iter().map(|f| &f.geometry));
            let pieces = if options.multipart {
                vec![geometry]
            } else {
                geometry.parts.into_iter().map(|part| Geometry { parts: vec![part] }).collect()
            };
            for piece in pieces {
                dissolved
                    .insert(piece, attributes.clone())
                    .map_err(|e| EngineError::new("dissolve", input, e))?;
            }
        }

        self.create("dissolve", output, dissolved)
    }

    fn export_with_field_mapping(&mut self, input: &str, output: &str, mapping: &FieldMapping) -> EngineResult<usize> {
        let source = self.get("export_with_field_mapping", input)?;
        for entry in mapping.iter() {
            if source.field(&entry.source).is_none() {
                return Err(EngineError::new(
                    "export_with_field_mapping",
                    input,
                    format!("mapped field '{}' does not exist", entry.source),
                ));
            }
        }

        let mut exported = Dataset::new(mapping.iter().map(|e| e.output.clone()).collect());
        for feature in source.visible() {
            let mut attributes = BTreeMap::new();
            for entry in mapping.iter() {
                let value = feature.attribute(&entry.source).cast(entry.output.field_type).map_err(|e| {
                    EngineError::new(
                        "export_with_field_mapping",
                        input,
                        format!("{} -> {}: {}", entry.source, entry.output.name, e),
                    )
                })?;
                attributes.insert(entry.output.name.clone(), value);
            }
            exported
                .insert(feature.geometry.clone(), attributes)
                .map_err(|e| EngineError::new("export_with_field_mapping", input, e))?;
        }

        let count = exported.features.len();
        self.create("export_with_field_mapping", output, exported)?;
        Ok(count)
    }

    fn calculate_field(&mut self, table: &str, field: &str, value: &FieldValue) -> EngineResult<()> {
        let dataset = self.get_mut("calculate_field", table)?;
        let descriptor = dataset.field(field).ok_or_else(|| {
            EngineError::new("calculate_field", table, format!("field '{}' does not exist or is read-only", field))
        })?;
        let value = value
            .cast(descriptor.field_type)
            .map_err(|e| EngineError::new("calculate_field", table, format!("{}: {}", field, e)))?;

        let selection = dataset.selection.clone();
        for feature in dataset.features.iter_mut() {
            if selection.as_ref().map_or(true, |s| s.contains(&feature.oid)) {
                feature.attributes.insert(field.to_string(), value.clone());
            }
        }
        Ok(())
    }

    fn append_rows(&mut self, source: &str, destination: &str, conformance: SchemaConformance) -> EngineResult<usize> {
        let target_fields = self.get("append_rows", destination)?.fields.clone();
        let incoming = self.get("append_rows", source)?;

        if conformance == SchemaConformance::Strict {
            let mismatches = schema_mismatches(&incoming.fields, &target_fields);
            if !mismatches.is_empty() {
                return Err(EngineError::new(
                    "append_rows",
                    destination,
                    format!("schema of '{}' does not match: {}", source, mismatches.join("; ")),
                ));
            }
        }

        let mut rows = Vec::new();
        for feature in incoming.visible() {
            let mut attributes = BTreeMap::new();
            for field in &target_fields {
                let value = match feature.attribute(&field.name).cast(field.field_type) {
                    Ok(value) => value,
                    Err(e) if conformance == SchemaConformance::Lenient => {
                        warn!("Append into '{}' left {} empty: {}", destination, field.name, e);
                        FieldValue::Null
                    }
                    Err(e) => return Err(EngineError::new("append_rows", destination, format!("{}: {}", field.name, e))),
                };
                attributes.insert(field.name.clone(), value);
            }
            rows.push((feature.geometry.clone(), attributes));
        }

        let count = rows.len();
        let target = self.get_mut("append_rows", destination)?;
        for (geometry, attributes) in rows {
            target
                .insert(geometry, attributes)
                .map_err(|e| EngineError::new("append_rows", destination, e))?;
        }
        Ok(count)
    }

    fn delete_rows(&mut self, selection: &SelectionHandle) -> EngineResult<usize> {
        let dataset = self.get_mut("delete_rows", &selection.layer)?;
        let before = dataset.features.len();
        dataset.features.retain(|f| !selection.oids.contains(&f.oid));
        dataset.selection = None;
        Ok(before - dataset.features.len())
    }

    fn add_field(&mut self, table: &str, name: &str, field_type: FieldType) -> EngineResult<()> {
        let dataset = self.get_mut("add_field", table)?;
        if dataset.catalog().contains(name) {
            return Err(EngineError::new("add_field", table, format!("field '{}' already exists", name)));
        }
        let mut field = FieldDescriptor::new(name, field_type);
        if field_type == FieldType::Text {
            field.length = Some(DEFAULT_TEXT_LENGTH);
        }
        dataset.fields.push(field);
        Ok(())
    }

    fn delete_fields(&mut self, table: &str, names: &[String]) -> EngineResult<()> {
        let dataset = self.get_mut("delete_fields", table)?;
        for name in names {
            if dataset.field(name).is_none() {
                return Err(EngineError::new(
                    "delete_fields",
                    table,
                    format!("field '{}' does not exist or is required", name),
                ));
            }
        }
        dataset.fields.retain(|f| !names.contains(&f.name));
        for feature in dataset.features.iter_mut() {
            feature.attributes.retain(|k, _| !names.contains(k));
        }
        Ok(())
    }

    fn delete_dataset(&mut self, name: &str) -> EngineResult<bool> {
        Ok(self.datasets.remove(name).is_some())
    }
}

/// `value` converted to the type of its field. Undeclared attributes, and
/// types the attribute table cannot hold, are kept as given.
fn typed_value(fields: &[FieldDescriptor], name: &str, value: FieldValue) -> Result<FieldValue, String> {
    match fields.iter().find(|f| f.name == name) {
        Some(field) if !matches!(field.field_type, FieldType::Geometry | FieldType::Blob) => {
            value.cast(field.field_type).map_err(|e| format!("{}: {}", name, e))
        }
        _ => Ok(value),
    }
}

fn schema_mismatches(source: &[FieldDescriptor], target: &[FieldDescriptor]) -> Vec<String> {
    let mut mismatches = Vec::new();
    for field in target {
        match source.iter().find(|f| f.name == field.name) {
            None => mismatches.push(format!("missing field {}", field.name)),
            Some(f) if f.field_type != field.field_type => mismatches.push(format!(
                "field {} is {} but target expects {}",
                field.name, f.field_type, field.field_type
            )),
            Some(_) => {}
        }
    }
    for field in source {
        if !target.iter().any(|f| f.name == field.name) {
            mismatches.push(format!("unexpected field {}", field.name));
        }
    }
    mismatches
}
