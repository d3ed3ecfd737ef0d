//! Tipos de dados para requisições e eventos da API de geração em streaming.
//!
//! As requisições derivam `Serialize` conforme o formato esperado pelos
//! endpoints `chat-messages` e `workflows/run`. Os eventos do stream são
//! decodificados uma única vez para uniões etiquetadas ([`ChatEvent`],
//! [`WorkflowEvent`]) com uma variante explícita para formatos desconhecidos.

use serde::Serialize;
use serde_json::Value;

/// Modo de resposta usado em todas as chamadas: sempre streaming.
const RESPONSE_MODE: &str = "streaming";

/// Variáveis de entrada do app de chat.
#[derive(Debug, Clone, Serialize)]
pub struct ChatInputs {
    #[serde(rename = "Company")]
    pub company: String,
}

/// Corpo da requisição para o endpoint de chat.
///
/// `conversation_id` vazio inicia uma nova conversa; um id retornado por um
/// passo anterior mantém a continuidade da sessão.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub inputs: ChatInputs,
    pub query: String,
    pub response_mode: &'static str,
    pub conversation_id: String,
    pub user: String,
}

impl ChatRequest {
    pub fn new(company: &str, query: &str, conversation_id: Option<&str>, user: &str) -> Self {
        Self {
            inputs: ChatInputs {
                company: company.to_string(),
            },
            query: query.to_string(),
            response_mode: RESPONSE_MODE,
            conversation_id: conversation_id.unwrap_or_default().to_string(),
            user: user.to_string(),
        }
    }
}

/// Variáveis de entrada do workflow de proposta.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowInputs {
    pub research_out: String,
}

/// Corpo da requisição para o endpoint de workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRequest {
    pub inputs: WorkflowInputs,
    pub response_mode: &'static str,
    pub user: String,
}

impl WorkflowRequest {
    pub fn new(research_out: String, user: &str) -> Self {
        Self {
            inputs: WorkflowInputs { research_out },
            response_mode: RESPONSE_MODE,
            user: user.to_string(),
        }
    }
}

/// Resultado agregado de uma chamada de chat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatReply {
    /// Id da conversa visto no stream (ou o que foi enviado, se nenhum veio).
    pub conversation_id: Option<String>,
    /// Concatenação de todos os fragmentos `answer`.
    pub answer: String,
}

// Retorna o valor string de `key` se existir e não estiver vazio.
fn non_empty_str<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Evento do stream de chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Fragmento de resposta.
    Answer {
        conversation_id: Option<String>,
        answer: String,
    },
    /// Evento `error` com mensagem.
    Error { message: String },
    /// Qualquer outro evento (ping, metadados, fim de mensagem).
    Other { conversation_id: Option<String> },
}

impl ChatEvent {
    pub fn decode(value: &Value) -> Self {
        let conversation_id = non_empty_str(value, "conversation_id").map(str::to_string);

        if let Some(answer) = non_empty_str(value, "answer") {
            return Self::Answer {
                conversation_id,
                answer: answer.to_string(),
            };
        }
        if value.get("event").and_then(Value::as_str) == Some("error")
            && let Some(message) = non_empty_str(value, "message")
        {
            return Self::Error {
                message: message.to_string(),
            };
        }
        Self::Other { conversation_id }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::Answer {
                conversation_id, ..
            }
            | Self::Other { conversation_id } => conversation_id.as_deref(),
            Self::Error { .. } => None,
        }
    }
}

/// Chaves preferidas em `data.outputs` de um `workflow_finished`, em ordem.
const OUTPUT_KEYS: [&str; 4] = ["text", "answer", "output", "result"];

/// Chaves que carregam texto em eventos genéricos, em ordem.
const FRAGMENT_KEYS: [&str; 3] = ["answer", "text", "output"];

/// Evento do stream de workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEvent {
    /// `workflow_finished`: saída final, se alguma string não vazia existir.
    Finished(Option<String>),
    /// `text_chunk`: texto incremental.
    TextChunk(String),
    /// Evento genérico com `answer`/`text`/`output` no topo ou em `data`.
    Fragment(String),
    /// Evento `error` com mensagem. Aborta a tentativa atual.
    Error(String),
    /// Formato não reconhecido; ignorado.
    Unrecognized,
}

impl WorkflowEvent {
    pub fn decode(value: &Value) -> Self {
        if !value.is_object() {
            return Self::Unrecognized;
        }
        let data = value.get("data").filter(|d| d.is_object());

        match value.get("event").and_then(Value::as_str) {
            Some("workflow_finished") => {
                let outputs = data.and_then(|d| d.get("outputs"));
                Self::Finished(outputs.and_then(pick_output))
            }
            Some("text_chunk") => non_empty_str(value, "text")
                .or_else(|| data.and_then(|d| non_empty_str(d, "text")))
                .map(|t| Self::TextChunk(t.to_string()))
                .unwrap_or(Self::Unrecognized),
            Some("error") if non_empty_str(value, "message").is_some() => {
                Self::Error(non_empty_str(value, "message").unwrap_or_default().to_string())
            }
            _ => FRAGMENT_KEYS
                .iter()
                .find_map(|k| non_empty_str(value, k))
                .or_else(|| data.and_then(|d| FRAGMENT_KEYS.iter().find_map(|k| non_empty_str(d, k))))
                .map(|t| Self::Fragment(t.to_string()))
                .unwrap_or(Self::Unrecognized),
        }
    }
}

// Escolhe o texto final de `outputs`: primeiro por prioridade de chave,
// depois a primeira string não vazia em qualquer chave.
fn pick_output(outputs: &Value) -> Option<String> {
    let map = outputs.as_object()?;
    let is_text = |v: &&Value| v.as_str().is_some_and(|s| !s.trim().is_empty());

    OUTPUT_KEYS
        .iter()
        .filter_map(|k| map.get(*k))
        .find(is_text)
        .or_else(|| map.values().find(is_text))
        .and_then(Value::as_str)
        .map(str::to_string)
}
