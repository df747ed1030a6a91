//! Test doubles for the retrieval collaborators.

pub mod fakes;

pub use fakes::{
	FakeChunk, FakeCrossEncoder, FakeEmbedder, FakeGenerator, FakeIndex, Faults,
	MemoryCacheBackend, embed_text,
};
