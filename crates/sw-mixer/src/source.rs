//! Mixin tree and the external loader boundary
//!
//! A `ShaderSource` names the fragments merged into one node plus the
//! compositions plugged into its slots. Fragments themselves come from the
//! excluded frontend collaborator through the `ShaderLoader` trait, already
//! lowered to an instruction stream with its own type context.

use sw_ir::{InstructionBuffer, SpirvContext};

use crate::error::Result;

/// A macro definition passed to the loader. Parent macros propagate to
/// children that do not define the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderMacro {
    pub name: String,
    pub value: String,
}

impl ShaderMacro {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// How a child source is attached to a parent's composition slot.
#[derive(Debug, Clone)]
pub enum Composition {
    /// Set into a named slot; the slot must hold exactly one mixin.
    Slot { name: String, source: ShaderSource },
    /// Appended into an array-valued slot.
    Array { name: String, sources: Vec<ShaderSource> },
}

/// One node of the mixin tree: the fragments merged at this level, in order,
/// plus generic arguments, macros and compositions.
#[derive(Debug, Clone, Default)]
pub struct ShaderSource {
    pub mixins: Vec<String>,
    pub generics: Vec<String>,
    pub macros: Vec<ShaderMacro>,
    pub compositions: Vec<Composition>,
}

impl ShaderSource {
    pub fn new(shader: impl Into<String>) -> Self {
        Self {
            mixins: vec![shader.into()],
            generics: Vec::new(),
            macros: Vec::new(),
            compositions: Vec::new(),
        }
    }

    pub fn with_mixin(mut self, shader: impl Into<String>) -> Self {
        self.mixins.push(shader.into());
        self
    }

    pub fn with_generic(mut self, value: impl Into<String>) -> Self {
        self.generics.push(value.into());
        self
    }

    pub fn with_macro(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.macros.push(ShaderMacro::new(name, value));
        self
    }

    pub fn with_composition(mut self, name: impl Into<String>, source: ShaderSource) -> Self {
        self.compositions.push(Composition::Slot { name: name.into(), source });
        self
    }

    pub fn with_composition_array(
        mut self,
        name: impl Into<String>,
        sources: Vec<ShaderSource>,
    ) -> Self {
        self.compositions.push(Composition::Array { name: name.into(), sources });
        self
    }
}

/// A fragment already lowered to IR: its own type context plus its code
/// stream. Ids are local to the fragment and are re-based during merging.
#[derive(Debug, Default)]
pub struct Fragment {
    pub context: SpirvContext,
    pub code: InstructionBuffer,
}

/// Boundary to the excluded shader frontend.
pub trait ShaderLoader {
    fn load_shader_ir(
        &self,
        name: &str,
        generics: &[String],
        macros: &[ShaderMacro],
    ) -> Result<Fragment>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_builders() {
        let source = ShaderSource::new("Base")
            .with_mixin("Extra")
            .with_macro("QUALITY", "2")
            .with_composition("lighting", ShaderSource::new("Phong"));
        assert_eq!(source.mixins, vec!["Base".to_string(), "Extra".to_string()]);
        assert_eq!(source.macros.len(), 1);
        assert_eq!(source.compositions.len(), 1);
    }
}
