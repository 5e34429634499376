//! LLM 层：提供商目录、直连路由与客户端实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod provider;
pub mod router;
pub mod traits;

pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use provider::{
    first_match, resolve_model_type, ModelCatalog, ModelPredicate, ProviderKind, ProviderModels,
    AUTO_MODEL_TYPE, DISPATCH_PRECEDENCE, MODEL_TYPE_PRECEDENCE,
};
pub use router::{ProviderRouter, Route};
pub use traits::{LlmClient, LlmError, TokenStream};
