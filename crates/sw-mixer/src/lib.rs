//! Shader mixin linking and legalization
//!
//! Takes a tree of pre-lowered shader fragments, merges them into one
//! module, folds same-named uniform blocks, sweeps loose uniforms into an
//! implicit `Globals` block, legalizes bool storage, and serializes the
//! result together with a reflection description of every constant buffer.
//!
//! Fragments come from an external frontend through the [`ShaderLoader`]
//! trait; [`Mixer::compile`] drives the whole pass sequence.

pub mod bools;
pub mod cbuffer;
pub mod error;
pub mod fragment;
pub mod metadata;
pub mod mixin;
pub mod pipeline;
pub mod reflect;
pub mod source;

pub use error::{MixerError, Result};
pub use fragment::FragmentBuilder;
pub use metadata::{MetadataTable, VariableMetadata};
pub use mixin::{merge_mixins, MixinNode};
pub use pipeline::{CompiledShader, Mixer};
pub use reflect::{ConstantBufferReflection, MemberReflection, Reflection, TypeDescriptor};
pub use source::{Composition, Fragment, ShaderLoader, ShaderMacro, ShaderSource};
