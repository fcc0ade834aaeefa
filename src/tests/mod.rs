// Test modules

pub mod common;

mod pipeline_test;
mod rag_test;
mod write_queue_test;
