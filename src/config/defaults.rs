//! Default values for configuration

/// Default Qdrant gRPC URL for local development (port 6334, not 6333 REST)
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default prefix for per-identity vector collections
pub fn default_collection_prefix() -> String {
    "eidolon_identity".to_string()
}

/// Default embedding model (BAAI/bge-small-en-v1.5)
pub fn default_embedding_model() -> String {
    "BAAI/bge-small-en-v1.5".to_string()
}

/// Default embedding dimension (matches the default model)
pub fn default_embedding_dimension() -> usize {
    384
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default chat-completion endpoint (OpenAI-compatible)
pub fn default_chat_endpoint() -> String {
    std::env::var("EIDOLON_CHAT_ENDPOINT")
        .unwrap_or_else(|_| "http://127.0.0.1:11434/v1".to_string())
}

/// Default chat model identifier
pub fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Default environment variable holding the chat API key
pub fn default_chat_api_key_env() -> String {
    "EIDOLON_CHAT_API_KEY".to_string()
}

/// Default chat request timeout in seconds
pub fn default_chat_timeout() -> u64 {
    120
}

/// Default sampling temperature for chat calls
pub fn default_chat_temperature() -> f32 {
    0.7
}

/// Default speech-to-text endpoint (whisper-server compatible)
pub fn default_transcribe_endpoint() -> String {
    std::env::var("EIDOLON_TRANSCRIBE_ENDPOINT")
        .unwrap_or_else(|_| "http://127.0.0.1:8080/v1".to_string())
}

/// Default speech-to-text model identifier
pub fn default_transcribe_model() -> String {
    "whisper-base".to_string()
}

/// Default transcription request timeout in seconds
pub fn default_transcribe_timeout() -> u64 {
    300
}

/// Default captioning model identifier (vision chat model)
pub fn default_caption_model() -> String {
    "moondream2".to_string()
}

/// Default caption prompt
pub fn default_caption_prompt() -> String {
    "Describe this image in one short sentence.".to_string()
}

/// Default maximum characters per indexed passage
pub fn default_passage_max_chars() -> usize {
    1500
}

/// Default minimum characters per indexed passage
pub fn default_passage_min_chars() -> usize {
    20
}

/// Default number of similar passages retrieved per turn
pub fn default_turn_top_k() -> usize {
    5
}

/// Default maximum SQL statements the turn agent may run
pub fn default_turn_max_queries() -> usize {
    3
}

/// Default number of past turns included in the generation prompt
pub fn default_turn_history() -> usize {
    5
}

/// Default hard timeout for the final generation call, in seconds
pub fn default_generation_timeout() -> u64 {
    60
}

/// Default maximum SQL statements the profile analyzer may run
pub fn default_analyzer_max_queries() -> usize {
    5
}

/// Default maximum result rows fed back to the model per query
pub fn default_max_result_rows() -> usize {
    10
}
