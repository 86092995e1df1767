use std::collections::HashMap;
use std::sync::Arc;

use modelgate_core::{Adapter, AdapterDispatch, RelayFormat};

use crate::anthropic::AnthropicAdapter;
use crate::gemini::GeminiAdapter;
use crate::openai::OpenAiAdapter;

/// Closed (request format × channel type) dispatch table, built once at
/// bootstrap. Unlisted combinations are unsupported by construction.
pub struct AdapterTable {
    table: HashMap<(RelayFormat, String), Arc<dyn Adapter>>,
}

impl AdapterTable {
    /// The standard wiring: openai-compatible channels serve every OpenAI
    /// dialect, anthropic channels serve messages, gemini channels serve
    /// generate-content.
    pub fn standard() -> Self {
        let openai: Arc<dyn Adapter> = Arc::new(OpenAiAdapter);
        let anthropic: Arc<dyn Adapter> = Arc::new(AnthropicAdapter);
        let gemini: Arc<dyn Adapter> = Arc::new(GeminiAdapter);

        let mut table: HashMap<(RelayFormat, String), Arc<dyn Adapter>> = HashMap::new();
        let openai_formats = [
            RelayFormat::Chat,
            RelayFormat::Embeddings,
            RelayFormat::Rerank,
            RelayFormat::Image,
            RelayFormat::Audio,
            RelayFormat::Responses,
            RelayFormat::Realtime,
            RelayFormat::Task,
        ];
        for channel_type in ["openai", "custom"] {
            for format in openai_formats {
                table.insert((format, channel_type.to_string()), openai.clone());
            }
        }
        table.insert(
            (RelayFormat::Messages, "anthropic".to_string()),
            anthropic.clone(),
        );
        table.insert(
            (RelayFormat::GenerateContent, "gemini".to_string()),
            gemini.clone(),
        );
        Self { table }
    }

    pub fn insert(&mut self, format: RelayFormat, channel_type: &str, adapter: Arc<dyn Adapter>) {
        self.table.insert((format, channel_type.to_string()), adapter);
    }
}

impl AdapterDispatch for AdapterTable {
    fn adapter_for(&self, format: RelayFormat, channel_type: &str) -> Option<Arc<dyn Adapter>> {
        self.table
            .get(&(format, channel_type.to_string()))
            .cloned()
    }
}
