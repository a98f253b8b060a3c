//! Feature extraction
//!
//! Each adapter owns one bucket of `SpanFeatures`, reads only the
//! `NormalizedAttributes` and has no side effects, so adapters can be added
//! or reordered freely.

use serde_json::Value as JsonValue;

use super::normalize::{NormalizedAttributes, namespaces};
use super::types::FlatMap;

/// Named feature buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    Data,
    Flags,
    Tags,
    Meta,
    Refs,
    Type,
    Metrics,
    Links,
}

impl Bucket {
    pub const ALL: [Bucket; 8] = [
        Bucket::Data,
        Bucket::Flags,
        Bucket::Tags,
        Bucket::Meta,
        Bucket::Refs,
        Bucket::Type,
        Bucket::Metrics,
        Bucket::Links,
    ];

    /// Namespace of `NormalizedAttributes` feeding this bucket
    pub fn namespace(&self) -> &'static str {
        match self {
            Bucket::Data => namespaces::DATA,
            Bucket::Flags => namespaces::FLAGS,
            Bucket::Tags => namespaces::TAGS,
            Bucket::Meta => namespaces::META,
            Bucket::Refs => namespaces::REFERENCES,
            Bucket::Type => namespaces::TYPE,
            Bucket::Metrics => namespaces::METRICS,
            Bucket::Links => namespaces::LINKS,
        }
    }
}

/// Typed projection of one span's normalized attributes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanFeatures {
    pub data: FlatMap,
    pub flags: FlatMap,
    pub tags: FlatMap,
    pub meta: FlatMap,
    pub refs: FlatMap,
    pub types: FlatMap,
    pub metrics: FlatMap,
    pub links: FlatMap,
}

impl SpanFeatures {
    pub fn bucket(&self, bucket: Bucket) -> &FlatMap {
        match bucket {
            Bucket::Data => &self.data,
            Bucket::Flags => &self.flags,
            Bucket::Tags => &self.tags,
            Bucket::Meta => &self.meta,
            Bucket::Refs => &self.refs,
            Bucket::Type => &self.types,
            Bucket::Metrics => &self.metrics,
            Bucket::Links => &self.links,
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut FlatMap {
        match bucket {
            Bucket::Data => &mut self.data,
            Bucket::Flags => &mut self.flags,
            Bucket::Tags => &mut self.tags,
            Bucket::Meta => &mut self.meta,
            Bucket::Refs => &mut self.refs,
            Bucket::Type => &mut self.types,
            Bucket::Metrics => &mut self.metrics,
            Bucket::Links => &mut self.links,
        }
    }
}

/// Extractor for one bucket
pub trait FeatureAdapter: Send + Sync {
    fn bucket(&self) -> Bucket;

    fn extract(&self, attrs: &NormalizedAttributes) -> FlatMap;
}

/// Copies a namespace into its bucket, coercing each value
pub struct NamespaceAdapter {
    bucket: Bucket,
    coerce: fn(&JsonValue) -> JsonValue,
}

impl NamespaceAdapter {
    pub fn new(bucket: Bucket) -> Self {
        let coerce: fn(&JsonValue) -> JsonValue = match bucket {
            Bucket::Flags => coerce_flag,
            Bucket::Metrics => coerce_metric,
            _ => JsonValue::clone,
        };
        Self { bucket, coerce }
    }
}

impl FeatureAdapter for NamespaceAdapter {
    fn bucket(&self) -> Bucket {
        self.bucket
    }

    fn extract(&self, attrs: &NormalizedAttributes) -> FlatMap {
        attrs
            .namespace(self.bucket.namespace())
            .map(|(key, value)| (key.to_string(), (self.coerce)(value)))
            .collect()
    }
}

/// `"true"`/`"false"` and 0/1 become booleans
fn coerce_flag(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => JsonValue::Bool(true),
            "false" => JsonValue::Bool(false),
            _ => value.clone(),
        },
        JsonValue::Number(n) if n.as_i64() == Some(0) => JsonValue::Bool(false),
        JsonValue::Number(n) if n.as_i64() == Some(1) => JsonValue::Bool(true),
        _ => value.clone(),
    }
}

/// Numeric strings become numbers
fn coerce_metric(value: &JsonValue) -> JsonValue {
    let JsonValue::String(s) = value else {
        return value.clone();
    };
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return JsonValue::from(i);
    }
    match s.parse::<f64>() {
        Ok(f) if f.is_finite() => JsonValue::from(f),
        _ => value.clone(),
    }
}

/// Ordered set of adapters, one per bucket
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn FeatureAdapter>>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self {
            adapters: Bucket::ALL
                .into_iter()
                .map(|bucket| Box::new(NamespaceAdapter::new(bucket)) as Box<dyn FeatureAdapter>)
                .collect(),
        }
    }
}

impl AdapterRegistry {
    /// Replace the adapter registered for its bucket, or append it
    pub fn register(&mut self, adapter: Box<dyn FeatureAdapter>) {
        match self
            .adapters
            .iter()
            .position(|a| a.bucket() == adapter.bucket())
        {
            Some(index) => self.adapters[index] = adapter,
            None => self.adapters.push(adapter),
        }
    }

    pub fn extract(&self, attrs: &NormalizedAttributes) -> SpanFeatures {
        let mut features = SpanFeatures::default();
        for adapter in &self.adapters {
            *features.bucket_mut(adapter.bucket()) = adapter.extract(attrs);
        }
        features
    }
}
