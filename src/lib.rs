#![forbid(unsafe_code)]

pub mod character_cache;
pub mod characters;
pub mod cli;
pub mod error;
pub mod illustrator;
pub mod illustrator_query;
pub mod image_gen;
pub mod index;
pub mod llm;
pub mod logging;
pub mod openai;
pub mod pipeline;
pub mod query;
pub mod request;
pub mod retriever;
pub mod server;
pub mod settings;
pub mod story;
pub mod story_config;
pub mod vector_store;

#[cfg(test)]
mod testing;
