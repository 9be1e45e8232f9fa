// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Modules: a bundle of functions plus the constants they share.
//!
//! After a module's networks are provisioned, the host strips constant
//! payloads ([`Module::strip`]) so one `Arc<Module>` can back every
//! function cheaply. Constants can also be temporarily frozen — payloads
//! moved aside so no optimization can bake them into the graph — and
//! restored later; the lifecycle coordinator uses this to delay constant
//! folding until after partitioning.

use crate::{Function, GraphError, TensorTy};
use std::collections::BTreeMap;

/// A named constant tensor. The payload is `None` after [`Module::strip`]
/// or while the module's constants are frozen.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Constant {
    pub name: String,
    pub ty: TensorTy,
    pub payload: Option<Vec<u8>>,
}

impl Constant {
    /// Creates a constant with a concrete payload.
    pub fn with_payload(name: impl Into<String>, ty: TensorTy, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            ty,
            payload: Some(payload),
        }
    }

    /// Creates a payload-less constant (a typed placeholder).
    pub fn placeholder(name: impl Into<String>, ty: TensorTy) -> Self {
        Self {
            name: name.into(),
            ty,
            payload: None,
        }
    }

    /// Returns the payload size this constant accounts for, whether or not
    /// the payload is currently materialized.
    pub fn size_bytes(&self) -> usize {
        self.ty.size_bytes()
    }
}

/// Constant payloads taken out of a module by [`Module::freeze_constants`].
///
/// Hand this back to [`Module::unfreeze_constants`] to restore them. The
/// bag is deliberately opaque; dropping it loses the payloads.
#[derive(Debug, Default)]
pub struct FrozenConstants {
    payloads: Vec<(String, Vec<u8>)>,
}

impl FrozenConstants {
    /// Returns the number of frozen payloads.
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// Returns `true` if nothing was frozen.
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

/// A bundle of functions and their shared constants.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Module {
    functions: Vec<Function>,
    constants: BTreeMap<String, Constant>,
}

impl Module {
    /// Creates an empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function. Fails if the name is already taken.
    pub fn add_function(&mut self, function: Function) -> Result<(), GraphError> {
        if self.functions.iter().any(|f| f.name() == function.name()) {
            return Err(GraphError::DuplicateName {
                function: function.name().to_string(),
                name: function.name().to_string(),
            });
        }
        self.functions.push(function);
        Ok(())
    }

    /// Adds a constant, replacing any previous one with the same name.
    pub fn add_constant(&mut self, constant: Constant) {
        self.constants.insert(constant.name.clone(), constant);
    }

    /// Returns the functions.
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Returns the functions mutably.
    pub fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }

    /// Looks up a function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name() == name)
    }

    /// Returns the constants.
    pub fn constants(&self) -> &BTreeMap<String, Constant> {
        &self.constants
    }

    /// Validates every function against the module constants.
    pub fn validate(&self) -> Result<(), GraphError> {
        for f in &self.functions {
            f.validate(&self.constants)?;
        }
        Ok(())
    }

    /// Total payload bytes of the constants referenced by `function`.
    pub fn function_constant_bytes(&self, function: &Function) -> usize {
        function
            .nodes()
            .iter()
            .flat_map(|n| n.inputs.iter())
            .filter_map(|v| self.constants.get(v))
            .map(|c| c.size_bytes())
            .sum()
    }

    /// Drops every constant payload so the module can be shared cheaply.
    /// Types stay behind, so validation and size accounting keep working.
    pub fn strip(&mut self) {
        for constant in self.constants.values_mut() {
            constant.payload = None;
        }
    }

    /// Moves every constant payload out of the module, leaving typed
    /// placeholders. While frozen, passes that would fold or rewrite
    /// constants see no payload and leave them alone.
    pub fn freeze_constants(&mut self) -> FrozenConstants {
        let mut frozen = FrozenConstants::default();
        for constant in self.constants.values_mut() {
            if let Some(payload) = constant.payload.take() {
                frozen.payloads.push((constant.name.clone(), payload));
            }
        }
        tracing::debug!("froze {} constant payload(s)", frozen.len());
        frozen
    }

    /// Restores payloads taken by [`Module::freeze_constants`].
    pub fn unfreeze_constants(&mut self, frozen: FrozenConstants) {
        for (name, payload) in frozen.payloads {
            if let Some(constant) = self.constants.get_mut(&name) {
                constant.payload = Some(payload);
            }
        }
    }

    /// Returns a one-line description of the module.
    pub fn summary(&self) -> String {
        let constant_bytes: usize = self.constants.values().map(|c| c.size_bytes()).sum();
        format!(
            "Module: {} function(s), {} constant(s) ({} bytes)",
            self.functions.len(),
            self.constants.len(),
            constant_bytes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ElemKind, NodeDef, OpKind, Shape};

    fn fty(n: usize) -> TensorTy {
        TensorTy::new(ElemKind::Float, Shape::vector(n))
    }

    fn module_with_constant() -> Module {
        let mut m = Module::new();
        m.add_constant(Constant::with_payload("w", fty(4), vec![1u8; 16]));
        let mut f = Function::new("f");
        f.add_input("in", fty(4));
        f.add_node(NodeDef::new(
            "out",
            OpKind::Add,
            vec!["in".into(), "w".into()],
            vec![fty(4), fty(4)],
            vec![fty(4)],
        ));
        f.add_output("out", fty(4));
        m.add_function(f).unwrap();
        m
    }

    #[test]
    fn test_validate() {
        module_with_constant().validate().unwrap();
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let mut m = module_with_constant();
        let dup = m.function("f").unwrap().clone();
        assert!(m.add_function(dup).is_err());
    }

    #[test]
    fn test_strip_drops_payloads_keeps_types() {
        let mut m = module_with_constant();
        m.strip();
        let c = &m.constants()["w"];
        assert!(c.payload.is_none());
        assert_eq!(c.size_bytes(), 16);
        // Still validates: resolution is by type, not payload.
        m.validate().unwrap();
    }

    #[test]
    fn test_freeze_unfreeze_roundtrip() {
        let mut m = module_with_constant();
        let frozen = m.freeze_constants();
        assert_eq!(frozen.len(), 1);
        assert!(m.constants()["w"].payload.is_none());

        m.unfreeze_constants(frozen);
        assert_eq!(m.constants()["w"].payload.as_deref(), Some(&[1u8; 16][..]));
    }

    #[test]
    fn test_function_constant_bytes() {
        let m = module_with_constant();
        let f = m.function("f").unwrap();
        assert_eq!(m.function_constant_bytes(f), 16);
    }

    #[test]
    fn test_summary() {
        let s = module_with_constant().summary();
        assert!(s.contains("1 function(s)"));
        assert!(s.contains("16 bytes"));
    }
}
