//! shader-weld: a SPIR-V shader mixin linker and legalizer
//!
//! Takes independently lowered shader fragments, merges their declarations
//! into one module, legalizes the result for the target binary format, and
//! produces a reflection description for runtime parameter binding.

pub use sw_ir as ir;
pub use sw_mixer as mixer;

pub use sw_mixer::{CompiledShader, Mixer, MixerError, ShaderLoader, ShaderSource};
