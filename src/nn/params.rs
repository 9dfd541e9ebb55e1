use std::collections::HashMap;
use ndarray::IxDyn;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use crate::nn::error::LayerError;
use crate::utils::{ArrayDynF, GenericResult};

/// Declaration of one learnable tensor inside a layer config. `share_from`
/// names a parameter declared elsewhere in the graph whose storage this one
/// aliases.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub share_from: Option<String>,
    pub init: ParamInit,
}

impl ParamSpec {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned(), share_from: None, init: ParamInit::Zeros }
    }

    pub fn shared(name: &str, share_from: &str) -> Self {
        Self { name: name.to_owned(), share_from: Some(share_from.to_owned()), init: ParamInit::Zeros }
    }

    pub fn with_init(mut self, init: ParamInit) -> Self {
        self.init = init;
        self
    }
}

#[derive(Clone, Debug)]
pub enum ParamInit {
    Zeros,
    Constant(f32),
    Gaussian { std_dev: f32 },
}

struct ParamEntry {
    owner_layer: String,
    value: ArrayDynF,
    grad: ArrayDynF,
}

/// Process-wide registry of learnable parameters.
///
/// Layers declare parameters during setup. After every layer finished its
/// local setup, a single `resolve` pass binds `share_from` references:
/// exactly one member of each share group keeps storage, the rest become
/// aliases. Gradient contributions from every member are summed into the
/// owner's grad buffer, so the optimizer sees the whole group's gradient.
pub struct ParamRegistry {
    entries: HashMap<String, ParamEntry>,
    aliases: HashMap<String, String>,
    pending: Vec<(String, String)>,
    resolved: bool,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            aliases: HashMap::new(),
            pending: Vec::new(),
            resolved: false,
        }
    }

    pub fn declare(&mut self, owner_layer: &str, spec: &ParamSpec, shape: &[usize]) -> GenericResult<()> {
        if self.resolved {
            return Err(LayerError::configuration(owner_layer, "parameters cannot be declared after resolution"));
        }
        if self.entries.contains_key(&spec.name) {
            return Err(LayerError::configuration(
                owner_layer,
                format!("duplicate parameter name '{}'", spec.name),
            ));
        }

        let value = match &spec.init {
            ParamInit::Zeros => ArrayDynF::zeros(IxDyn(shape)),
            ParamInit::Constant(c) => ArrayDynF::from_elem(IxDyn(shape), *c),
            ParamInit::Gaussian { std_dev } => {
                let dist = Normal::new(0.0, *std_dev)?;
                ArrayDynF::random(IxDyn(shape), dist)
            }
        };
        let grad = ArrayDynF::zeros(IxDyn(shape));
        self.entries.insert(spec.name.clone(), ParamEntry {
            owner_layer: owner_layer.to_owned(),
            value,
            grad,
        });

        if let Some(target) = &spec.share_from {
            self.pending.push((spec.name.clone(), target.clone()));
        }
        Ok(())
    }

    /// Bind every `share_from` reference to its storage owner. Runs once,
    /// after all layers completed local setup and before any compute pass,
    /// so resolution does not depend on layer declaration order.
    pub fn resolve(&mut self) -> GenericResult<()> {
        let links: HashMap<String, String> = self.pending.iter().cloned().collect();

        for (name, target) in std::mem::take(&mut self.pending) {
            // Follow share_from chains to the storage owner.
            let mut canonical = target.clone();
            let mut hops = 0;
            while let Some(next) = links.get(&canonical) {
                canonical = next.clone();
                hops += 1;
                if hops > links.len() {
                    let layer = self.owner_of(&name);
                    return Err(LayerError::configuration(
                        &layer,
                        format!("cyclic share_from chain starting at parameter '{}'", name),
                    ));
                }
            }

            let layer = self.owner_of(&name);
            let owner_shape = match self.entries.get(&canonical) {
                Some(entry) => entry.value.shape().to_vec(),
                None => {
                    return Err(LayerError::configuration(
                        &layer,
                        format!("parameter '{}' shares from unknown parameter '{}'", name, target),
                    ));
                }
            };
            let own_shape = self.entries[&name].value.shape().to_vec();
            if own_shape != owner_shape {
                return Err(LayerError::configuration(
                    &layer,
                    format!(
                        "parameter '{}' (shape {:?}) cannot share storage with '{}' (shape {:?})",
                        name, own_shape, canonical, owner_shape
                    ),
                ));
            }

            // The sharing member drops its own storage and reads through the
            // owner from now on.
            self.entries.remove(&name);
            self.aliases.insert(name, canonical);
        }

        self.resolved = true;
        Ok(())
    }

    fn owner_of(&self, name: &str) -> String {
        self.entries
            .get(name)
            .map(|e| e.owner_layer.clone())
            .unwrap_or_else(|| "?".to_owned())
    }

    fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    fn entry(&self, name: &str) -> GenericResult<&ParamEntry> {
        let canonical = self.canonical(name);
        self.entries
            .get(canonical)
            .ok_or_else(|| anyhow::anyhow!("unknown parameter '{}'", name))
    }

    pub fn value(&self, name: &str) -> GenericResult<ndarray::ArrayViewD<f32>> {
        Ok(self.entry(name)?.value.view())
    }

    pub fn grad(&self, name: &str) -> GenericResult<ndarray::ArrayViewD<f32>> {
        Ok(self.entry(name)?.grad.view())
    }

    /// Sum `contribution` into the shared gradient storage. Callers never
    /// overwrite: sibling layers in a share group each add their part.
    pub fn add_grad(&mut self, name: &str, contribution: &ArrayDynF) -> GenericResult<()> {
        let canonical = self.canonical(name).to_owned();
        let entry = self.entries
            .get_mut(&canonical)
            .ok_or_else(|| anyhow::anyhow!("unknown parameter '{}'", name))?;
        if entry.grad.shape() != contribution.shape() {
            return Err(anyhow::anyhow!(
                "gradient shape mismatch for parameter '{}': expected {:?}, got {:?}",
                name,
                entry.grad.shape(),
                contribution.shape()
            ));
        }
        entry.grad.zip_mut_with(contribution, |a, b| *a += b);
        Ok(())
    }

    /// Replace a parameter's value, e.g. when loading a checkpoint. Resolves
    /// through aliases, so writing any member of a share group updates all.
    pub fn set_value(&mut self, name: &str, value: ArrayDynF) -> GenericResult<()> {
        let canonical = self.canonical(name).to_owned();
        let entry = self.entries
            .get_mut(&canonical)
            .ok_or_else(|| anyhow::anyhow!("unknown parameter '{}'", name))?;
        if entry.value.shape() != value.shape() {
            return Err(anyhow::anyhow!(
                "value shape mismatch for parameter '{}': expected {:?}, got {:?}",
                name,
                entry.value.shape(),
                value.shape()
            ));
        }
        entry.value = value;
        Ok(())
    }

    /// Driver hook: gradients are zeroed before each backward pass begins.
    pub fn zero_grads(&mut self) {
        for entry in self.entries.values_mut() {
            entry.grad.fill(0.0);
        }
    }

    /// Owner parameters with their accumulated gradients, for an external
    /// optimizer step. Aliased members are folded into their owner.
    pub fn owned_params(&self) -> impl Iterator<Item = (&str, &ArrayDynF, &ArrayDynF)> {
        self.entries.iter().map(|(name, e)| (name.as_str(), &e.value, &e.grad))
    }

    /// Plain SGD step; anything smarter lives outside this core.
    pub fn apply_step(&mut self, learning_rate: f32) {
        for entry in self.entries.values_mut() {
            let grad = &entry.grad;
            entry.value.zip_mut_with(grad, |v, g| *v -= learning_rate * g);
        }
    }
}

impl Default for ParamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use super::*;

    #[test]
    fn test_shared_grads_are_summed() {
        let mut registry = ParamRegistry::new();
        registry.declare("layer_a", &ParamSpec::new("w1"), &[2, 2]).unwrap();
        registry.declare("layer_b", &ParamSpec::shared("w2", "w1"), &[2, 2]).unwrap();
        registry.resolve().unwrap();

        let g1 = array![[1.0, 2.0], [3.0, 4.0]].into_dyn();
        let g2 = array![[10.0, 20.0], [30.0, 40.0]].into_dyn();
        registry.add_grad("w1", &g1).unwrap();
        registry.add_grad("w2", &g2).unwrap();

        let expected = array![[11.0, 22.0], [33.0, 44.0]].into_dyn();
        assert_eq!(registry.grad("w1").unwrap().to_owned(), expected);
        assert_eq!(registry.grad("w2").unwrap().to_owned(), expected);
    }

    #[test]
    fn test_share_resolves_to_single_storage() {
        let mut registry = ParamRegistry::new();
        registry.declare("layer_a", &ParamSpec::new("w1"), &[3]).unwrap();
        registry.declare("layer_b", &ParamSpec::shared("w2", "w1"), &[3]).unwrap();
        registry.resolve().unwrap();

        registry.set_value("w2", array![5.0, 6.0, 7.0].into_dyn()).unwrap();
        assert_eq!(registry.value("w1").unwrap().to_owned(), array![5.0, 6.0, 7.0].into_dyn());
        assert_eq!(registry.owned_params().count(), 1);
    }

    #[test]
    fn test_share_chain_follows_to_owner() {
        let mut registry = ParamRegistry::new();
        registry.declare("a", &ParamSpec::new("w1"), &[2]).unwrap();
        registry.declare("b", &ParamSpec::shared("w2", "w1"), &[2]).unwrap();
        registry.declare("c", &ParamSpec::shared("w3", "w2"), &[2]).unwrap();
        registry.resolve().unwrap();

        registry.add_grad("w3", &array![1.0, 1.0].into_dyn()).unwrap();
        assert_eq!(registry.grad("w1").unwrap().to_owned(), array![1.0, 1.0].into_dyn());
    }

    #[test]
    fn test_share_shape_mismatch_fails_fast() {
        let mut registry = ParamRegistry::new();
        registry.declare("a", &ParamSpec::new("w1"), &[2, 2]).unwrap();
        registry.declare("b", &ParamSpec::shared("w2", "w1"), &[2, 3]).unwrap();
        let err = registry.resolve().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LayerError>(),
            Some(LayerError::Configuration { .. })
        ));
    }

    #[test]
    fn test_share_from_unknown_fails() {
        let mut registry = ParamRegistry::new();
        registry.declare("b", &ParamSpec::shared("w2", "nope"), &[2]).unwrap();
        assert!(registry.resolve().is_err());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ParamRegistry::new();
        registry.declare("a", &ParamSpec::new("w"), &[2]).unwrap();
        let err = registry.declare("b", &ParamSpec::new("w"), &[2]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LayerError>(),
            Some(LayerError::Configuration { .. })
        ));
    }

    #[test]
    fn test_apply_step_moves_against_gradient() {
        let mut registry = ParamRegistry::new();
        registry
            .declare("a", &ParamSpec::new("w").with_init(ParamInit::Constant(1.0)), &[2])
            .unwrap();
        registry.resolve().unwrap();
        registry.add_grad("w", &array![0.5, -0.5].into_dyn()).unwrap();
        registry.apply_step(0.1);
        let value = registry.value("w").unwrap().to_owned();
        assert!(crate::utils::arrays_almost_equal(&value, &array![0.95, 1.05].into_dyn()));
    }
}
