//! Tipos de erro para o cliente da API de geração em streaming.
//!
//! Define [`DifyError`] com variantes para falhas de transporte, respostas
//! HTTP não-200 e eventos de erro do workflow. Usa `thiserror` para derivar
//! `Display` e `Error` a partir dos atributos `#[error(...)]`.

use thiserror::Error;

/// Erros que podem ocorrer ao chamar os endpoints de chat e workflow.
///
/// [`is_retryable`](DifyError::is_retryable) separa as falhas transitórias
/// (timeout, conexão, 429, 5xx, evento `error`) das terminais.
#[derive(Debug, Error)]
pub enum DifyError {
    /// A chave de API do endpoint não foi configurada.
    #[error("{0} API key is not configured")]
    MissingApiKey(&'static str),

    /// A requisição excedeu o timeout configurado.
    #[error("request timed out")]
    Timeout,

    /// Não foi possível conectar ao servidor.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// O servidor retornou HTTP 429.
    #[error("rate limited (status 429)")]
    RateLimited,

    /// O servidor retornou 500, 502, 503 ou 504.
    #[error("server error (status {status}): {message}")]
    Server { status: u16, message: String },

    /// Qualquer outro status não-200. Terminal para esta chamada.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// O stream do workflow emitiu um evento `error`.
    #[error("workflow error event: {0}")]
    Workflow(String),

    /// Outra falha de rede do `reqwest`.
    #[error("network error: {0}")]
    Network(reqwest::Error),
}

impl DifyError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Unavailable(_)
                | Self::RateLimited
                | Self::Server { .. }
                | Self::Workflow(_)
                | Self::Network(_)
        )
    }

    /// Classifica um status HTTP não-200.
    pub fn from_status(status: u16, body: &str) -> Self {
        // Corpo truncado: respostas de erro podem ser páginas HTML inteiras.
        let message: String = body.chars().take(500).collect();
        match status {
            429 => Self::RateLimited,
            500 | 502 | 503 | 504 => Self::Server { status, message },
            _ => Self::Api { status, message },
        }
    }
}

impl From<reqwest::Error> for DifyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Network(e)
        }
    }
}
