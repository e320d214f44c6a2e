use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub const META_TABLE: &str = "meta";
pub const META_EMBEDDER_ID: &str = "embedder_id";

/// Columns of the persisted chunk table. `ordinal` is the chunk's corpus
/// position and `vector` holds `dim` f32 values.
pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("source", DataType::Utf8, false),
		Field::new("page", DataType::Int32, true),
		Field::new("chunk_index", DataType::Int32, false),
		Field::new("ordinal", DataType::Int32, false),
		Field::new("content", DataType::Utf8, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}
