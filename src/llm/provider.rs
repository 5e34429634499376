//! 提供商与模型目录
//!
//! 每个提供商有一份已知模型列表。某个模型属于哪个提供商按固定顺序的 `(ProviderKind, 谓词)` 表逐项判断，
//! 第一个命中者胜出。大脑服务的 model_type 与直连分发使用两张顺序不同的表。

use std::fmt;

use crate::config::{ProviderSection, ProvidersSection};

/// 提供商
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Ollama,
    RestApi,
    Anthropic,
    GoogleGemini,
    Mistral,
    OpenAi,
    OpenRouter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 7] = [
        ProviderKind::Ollama,
        ProviderKind::RestApi,
        ProviderKind::Anthropic,
        ProviderKind::GoogleGemini,
        ProviderKind::Mistral,
        ProviderKind::OpenAi,
        ProviderKind::OpenRouter,
    ];

    /// 发往大脑服务的 model_type 标签
    pub fn model_type(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::RestApi => "rest_api",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::GoogleGemini => "google_gemini",
            ProviderKind::Mistral => "mistral",
            ProviderKind::OpenAi => "openai",
            ProviderKind::OpenRouter => "openrouter",
        }
    }

    /// 该提供商是否支持流式输出（Anthropic / Gemini 始终非流式）
    pub fn supports_streaming(&self) -> bool {
        !matches!(self, ProviderKind::Anthropic | ProviderKind::GoogleGemini)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_type())
    }
}

/// 没有任何提供商认领该模型时的 model_type
pub const AUTO_MODEL_TYPE: &str = "auto";

/// 单个提供商的模型列表与流式开关
#[derive(Debug, Clone, Default)]
pub struct ProviderModels {
    pub models: Vec<String>,
    pub allow_stream: bool,
}

impl From<&ProviderSection> for ProviderModels {
    fn from(section: &ProviderSection) -> Self {
        Self {
            models: section.models.clone(),
            allow_stream: section.allow_stream,
        }
    }
}

/// 全部提供商的模型目录
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    pub ollama: ProviderModels,
    pub rest_api: ProviderModels,
    pub anthropic: ProviderModels,
    pub google_gemini: ProviderModels,
    pub mistral: ProviderModels,
    pub openai: ProviderModels,
    pub openrouter: ProviderModels,
}

impl ModelCatalog {
    pub fn from_config(providers: &ProvidersSection) -> Self {
        Self {
            ollama: (&providers.ollama).into(),
            rest_api: (&providers.rest_api).into(),
            anthropic: (&providers.anthropic).into(),
            google_gemini: (&providers.google_gemini).into(),
            mistral: (&providers.mistral).into(),
            openai: (&providers.openai).into(),
            openrouter: (&providers.openrouter).into(),
        }
    }

    pub fn provider(&self, kind: ProviderKind) -> &ProviderModels {
        match kind {
            ProviderKind::Ollama => &self.ollama,
            ProviderKind::RestApi => &self.rest_api,
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::GoogleGemini => &self.google_gemini,
            ProviderKind::Mistral => &self.mistral,
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::OpenRouter => &self.openrouter,
        }
    }

    pub fn provider_mut(&mut self, kind: ProviderKind) -> &mut ProviderModels {
        match kind {
            ProviderKind::Ollama => &mut self.ollama,
            ProviderKind::RestApi => &mut self.rest_api,
            ProviderKind::Anthropic => &mut self.anthropic,
            ProviderKind::GoogleGemini => &mut self.google_gemini,
            ProviderKind::Mistral => &mut self.mistral,
            ProviderKind::OpenAi => &mut self.openai,
            ProviderKind::OpenRouter => &mut self.openrouter,
        }
    }

    /// 模型是否在该提供商的列表中
    pub fn lists(&self, kind: ProviderKind, model: &str) -> bool {
        self.provider(kind).models.iter().any(|m| m == model)
    }

    /// 该提供商本轮是否走流式
    pub fn streams(&self, kind: ProviderKind) -> bool {
        kind.supports_streaming() && self.provider(kind).allow_stream
    }
}

/// 判断模型是否归属某提供商
pub type ModelPredicate = fn(&ModelCatalog, &str) -> bool;

/// 大脑服务 model_type 的判定顺序
pub const MODEL_TYPE_PRECEDENCE: &[(ProviderKind, ModelPredicate)] = &[
    (ProviderKind::Ollama, |c, m| c.lists(ProviderKind::Ollama, m)),
    (ProviderKind::RestApi, |c, m| c.lists(ProviderKind::RestApi, m)),
    (ProviderKind::Anthropic, |c, m| c.lists(ProviderKind::Anthropic, m)),
    (ProviderKind::GoogleGemini, |c, m| c.lists(ProviderKind::GoogleGemini, m)),
    (ProviderKind::Mistral, |c, m| c.lists(ProviderKind::Mistral, m)),
    (ProviderKind::OpenAi, |c, m| c.lists(ProviderKind::OpenAi, m)),
    (ProviderKind::OpenRouter, |c, m| c.lists(ProviderKind::OpenRouter, m)),
];

/// 直连分发的判定顺序（Mistral 排在 Gemini 之前）
pub const DISPATCH_PRECEDENCE: &[(ProviderKind, ModelPredicate)] = &[
    (ProviderKind::Ollama, |c, m| c.lists(ProviderKind::Ollama, m)),
    (ProviderKind::RestApi, |c, m| c.lists(ProviderKind::RestApi, m)),
    (ProviderKind::Anthropic, |c, m| c.lists(ProviderKind::Anthropic, m)),
    (ProviderKind::Mistral, |c, m| c.lists(ProviderKind::Mistral, m)),
    (ProviderKind::GoogleGemini, |c, m| c.lists(ProviderKind::GoogleGemini, m)),
    (ProviderKind::OpenAi, |c, m| c.lists(ProviderKind::OpenAi, m)),
    (ProviderKind::OpenRouter, |c, m| c.lists(ProviderKind::OpenRouter, m)),
];

/// 按表顺序返回第一个认领该模型的提供商
pub fn first_match(
    table: &[(ProviderKind, ModelPredicate)],
    catalog: &ModelCatalog,
    model: &str,
) -> Option<ProviderKind> {
    table
        .iter()
        .find(|(_, claims)| claims(catalog, model))
        .map(|(kind, _)| *kind)
}

/// 大脑服务使用的 model_type；无提供商认领时为 "auto"
pub fn resolve_model_type(catalog: &ModelCatalog, model: &str) -> &'static str {
    first_match(MODEL_TYPE_PRECEDENCE, catalog, model)
        .map(|kind| kind.model_type())
        .unwrap_or(AUTO_MODEL_TYPE)
}
