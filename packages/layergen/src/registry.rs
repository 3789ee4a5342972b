//! The layer registry.
//!
//! Layers reference each other by stable key rather than by direct handle or
//! global lookup: the registry is populated once at startup, validated, and
//! then passed by reference through every operation that needs to resolve a
//! key. Validation rejects unknown dependency targets, out-of-range levels,
//! and dependency cycles between layers, so resolution can assume the
//! dependency graph is a DAG.

use crate::{
    chunk::ChunkPayload,
    error::ConfigError,
    layer::{DynLayer, Layer},
};
use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
};


/// Stable key identifying one layer in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(pub &'static str);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Builder for a [`LayerRegistry`]. Register every layer, then `build` to
/// validate the dependency graph.
#[derive(Default)]
pub struct RegistryBuilder {
    layers: Vec<Arc<dyn DynLayer>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, layer: Arc<dyn DynLayer>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn build(self) -> Result<LayerRegistry, ConfigError> {
        let mut layers: HashMap<LayerId, Arc<dyn DynLayer>> = HashMap::new();
        for layer in self.layers {
            let id = layer.id();
            if layers.insert(id, layer).is_some() {
                return Err(ConfigError::DuplicateLayer(id));
            }
        }

        validate_dependencies(&layers)?;
        reject_cycles(&layers)?;

        Ok(LayerRegistry { layers })
    }
}

/// Validated, immutable map from layer key to layer.
pub struct LayerRegistry {
    layers: HashMap<LayerId, Arc<dyn DynLayer>>,
}

impl std::fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerRegistry")
            .field("layers", &self.layers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LayerRegistry {
    pub fn get(&self, id: LayerId) -> Option<&Arc<dyn DynLayer>> {
        self.layers.get(&id)
    }

    /// Look a layer up with its concrete payload type, for client code that
    /// reads generated data out of another layer's chunks.
    pub fn typed<P: ChunkPayload>(&self, id: LayerId) -> Option<Arc<Layer<P>>> {
        let layer = self.layers.get(&id)?.clone();
        layer.as_any_arc().downcast::<Layer<P>>().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DynLayer>> {
        self.layers.values()
    }
}

fn validate_dependencies(
    layers: &HashMap<LayerId, Arc<dyn DynLayer>>,
) -> Result<(), ConfigError> {
    for layer in layers.values() {
        for level in 0..layer.level_count() {
            for dep in layer.level_dependencies(level) {
                let target = layers.get(&dep.layer).ok_or(ConfigError::UnknownDependency {
                    layer: layer.id(),
                    level,
                    target: dep.layer,
                })?;
                if dep.level < 0 || dep.level >= target.level_count() {
                    return Err(ConfigError::InvalidDependencyLevel {
                        layer: layer.id(),
                        level,
                        target: dep.layer,
                        target_level: dep.level,
                        target_levels: target.level_count(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Node {
    layer: LayerId,
    level: i32,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.layer, self.level)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Open,
    Done,
}

fn reject_cycles(layers: &HashMap<LayerId, Arc<dyn DynLayer>>) -> Result<(), ConfigError> {
    let mut marks: HashMap<Node, Mark> = HashMap::new();
    let mut path: Vec<Node> = Vec::new();
    for layer in layers.values() {
        for level in 0..layer.level_count() {
            let node = Node { layer: layer.id(), level };
            visit(node, layers, &mut marks, &mut path)?;
        }
    }
    Ok(())
}

fn visit(
    node: Node,
    layers: &HashMap<LayerId, Arc<dyn DynLayer>>,
    marks: &mut HashMap<Node, Mark>,
    path: &mut Vec<Node>,
) -> Result<(), ConfigError> {
    match marks.get(&node) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Open) => {
            let start = path.iter().position(|n| *n == node).unwrap_or(0);
            let mut steps: Vec<String> = path[start..].iter().map(Node::to_string).collect();
            steps.push(node.to_string());
            return Err(ConfigError::DependencyCycle { path: steps.join(" -> ") });
        }
        None => {}
    }

    marks.insert(node, Mark::Open);
    path.push(node);

    // the layer is present; build() validated targets before calling here
    if let Some(layer) = layers.get(&node.layer) {
        if node.level > 0 {
            let lower = Node { layer: node.layer, level: node.level - 1 };
            visit(lower, layers, marks, path)?;
        }
        for dep in layer.level_dependencies(node.level) {
            let target = Node { layer: dep.layer, level: dep.level };
            visit(target, layers, marks, path)?;
        }
    }

    path.pop();
    marks.insert(node, Mark::Done);
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunk::{ChunkPayload, PayloadCtx},
        layer::{LayerConfig, LayerDependency},
    };

    struct NullPayload;

    impl ChunkPayload for NullPayload {
        fn create(&self, _ctx: &PayloadCtx<'_>, _level: i32, _destroy: bool) {}
        fn reset(&mut self) {}
    }

    fn null_layer(config: LayerConfig) -> Arc<Layer<NullPayload>> {
        Layer::new(config, || NullPayload).expect("layer config")
    }

    const A: LayerId = LayerId("a");
    const B: LayerId = LayerId("b");

    #[test]
    fn valid_chain_builds() {
        let a = null_layer(LayerConfig::new(A, 8, 8));
        let b = null_layer(
            LayerConfig::new(B, 8, 8)
                .with_dependency(0, LayerDependency::new(A, 0, 4, 4)),
        );
        let registry = RegistryBuilder::new().register(a).register(b).build().unwrap();
        assert!(registry.get(A).is_some());
        assert!(registry.typed::<NullPayload>(B).is_some());
    }

    #[test]
    fn duplicate_id_rejected() {
        let first = null_layer(LayerConfig::new(A, 8, 8));
        let second = null_layer(LayerConfig::new(A, 16, 16));
        let err = RegistryBuilder::new().register(first).register(second).build().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateLayer(id) if id == A));
    }

    #[test]
    fn unknown_dependency_rejected() {
        let b = null_layer(
            LayerConfig::new(B, 8, 8)
                .with_dependency(0, LayerDependency::new(A, 0, 4, 4)),
        );
        let err = RegistryBuilder::new().register(b).build().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDependency { target, .. } if target == A));
    }

    #[test]
    fn out_of_range_dependency_level_rejected() {
        let a = null_layer(LayerConfig::new(A, 8, 8));
        let b = null_layer(
            LayerConfig::new(B, 8, 8)
                .with_dependency(0, LayerDependency::new(A, 1, 4, 4)),
        );
        let err = RegistryBuilder::new().register(a).register(b).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDependencyLevel { .. }));
    }

    #[test]
    fn mutual_dependency_cycle_rejected() {
        let a = null_layer(
            LayerConfig::new(A, 8, 8)
                .with_dependency(0, LayerDependency::new(B, 0, 4, 4)),
        );
        let b = null_layer(
            LayerConfig::new(B, 8, 8)
                .with_dependency(0, LayerDependency::new(A, 0, 4, 4)),
        );
        let err = RegistryBuilder::new().register(a).register(b).build().unwrap_err();
        assert!(matches!(err, ConfigError::DependencyCycle { .. }));
    }

    #[test]
    fn self_dependency_at_same_level_rejected() {
        let a = null_layer(
            LayerConfig::new(A, 8, 8)
                .with_dependency(0, LayerDependency::new(A, 0, 4, 4)),
        );
        let err = RegistryBuilder::new().register(a).build().unwrap_err();
        assert!(matches!(err, ConfigError::DependencyCycle { .. }));
    }

    #[test]
    fn explicit_dependency_on_own_lower_level_is_fine() {
        let a = null_layer(
            LayerConfig::new(A, 8, 8)
                .with_level_count(2)
                .with_dependency(1, LayerDependency::new(A, 0, 16, 16)),
        );
        assert!(RegistryBuilder::new().register(a).build().is_ok());
    }
}
