//! Schema synthesis: declarations become tables of a catalog.

mod foreign_key;
mod synthesizer;

pub use foreign_key::{ForeignKeyResolver, ResolvedReference};
pub use synthesizer::{
    DeclarationLookup, ResolvedField, StorageSchema, SynthesisCache, Synthesizer, ENUM_LENGTH,
};
