//! Configuração do briefrun carregada a partir de `briefrun.toml`.
//!
//! A struct [`BriefrunConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis. As variáveis de
//! ambiente (`DIFY_*`, `OUTPUTS_ROOT`, ...) têm precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::dify::DEFAULT_BASE_URL;
use crate::liveness::LivenessThresholds;
use crate::state_machine::RetryPolicy;

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "briefrun.toml";

/// Configuração de nível superior carregada de `briefrun.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BriefrunConfig {
    /// Chave da API do app de chat (uma consulta por passo).
    pub chat_api_key: String,

    /// Chave da API do workflow de proposta.
    pub workflow_api_key: String,

    /// URL base da API; os caminhos de chat e workflow são anexados.
    pub api_base_url: String,

    /// Identificador de usuário enviado em cada requisição.
    pub user_id: String,

    /// Timeout total de cada chamada à API, em segundos.
    pub api_timeout_secs: u64,

    /// Tentativas por passo antes de aceitar uma resposta vazia.
    pub max_retries: u32,

    /// Base do backoff linear entre tentativas, em segundos.
    pub retry_backoff_secs: u64,

    /// Pausa entre passos consecutivos, em segundos.
    pub inter_query_delay_secs: u64,

    /// Intervalo mínimo entre toques no heartbeat durante o stream.
    pub heartbeat_interval_secs: u64,

    /// Idade máxima do heartbeat para um job ser considerado vivo.
    pub heartbeat_stale_secs: u64,

    /// Duração máxima de um job antes de ser considerado abandonado.
    pub max_run_secs: u64,

    /// Tentativas por arquivo na geração da proposta.
    pub proposal_max_retries: u32,

    /// Base do backoff linear da proposta, em segundos.
    pub proposal_retry_delay_secs: u64,

    /// Diretório raiz dos artefatos.
    pub outputs_root: PathBuf,

    /// Títulos das consultas, na ordem de execução.
    pub queries: Vec<String>,
}

// Consultas padrão: os cinco tópicos de pesquisa.
fn default_queries() -> Vec<String> {
    [
        "事業の全体像",
        "外部環境と市場評価",
        "競争優位と差別化要因",
        "直近のニュース取得",
        "世間の評価",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for BriefrunConfig {
    fn default() -> Self {
        Self {
            chat_api_key: String::new(),
            workflow_api_key: String::new(),
            api_base_url: DEFAULT_BASE_URL.to_string(),
            user_id: "briefrun_agent".to_string(),
            api_timeout_secs: 10_800,
            max_retries: 3,
            retry_backoff_secs: 10,
            inter_query_delay_secs: 8,
            heartbeat_interval_secs: 15,
            heartbeat_stale_secs: 60,
            max_run_secs: 3 * 60 * 60,
            proposal_max_retries: 3,
            proposal_retry_delay_secs: 5,
            outputs_root: PathBuf::from("outputs"),
            queries: default_queries(),
        }
    }
}

impl BriefrunConfig {
    /// Carrega a configuração de `path` (ou de `briefrun.toml` no diretório
    /// atual) e aplica as variáveis de ambiente por cima.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or(Path::new(CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<BriefrunConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Sobrescreve campos com as variáveis de ambiente presentes e não vazias.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DIFY_API_KEY1") {
            self.chat_api_key = v;
        }
        if let Some(v) = get("DIFY_API_KEY2") {
            self.workflow_api_key = v;
        }
        if let Some(v) = get("DIFY_USER_ID") {
            self.user_id = v;
        }
        if let Some(v) = get("OUTPUTS_ROOT") {
            self.outputs_root = PathBuf::from(v);
        }

        let numeric: [(&str, &mut u64); 6] = [
            ("DIFY_TIMEOUT", &mut self.api_timeout_secs),
            ("DIFY_RETRY_BACKOFF_SECONDS", &mut self.retry_backoff_secs),
            ("DIFY_INTER_QUERY_DELAY_SECONDS", &mut self.inter_query_delay_secs),
            ("HEARTBEAT_STALE_SECONDS", &mut self.heartbeat_stale_secs),
            ("MAX_RUN_SECONDS", &mut self.max_run_secs),
            ("HEARTBEAT_INTERVAL_SECONDS", &mut self.heartbeat_interval_secs),
        ];
        for (name, slot) in numeric {
            if let Some(v) = get(name) {
                *slot = v
                    .trim()
                    .parse()
                    .with_context(|| format!("{name} must be a non-negative integer, got {v:?}"))?;
            }
        }
        if let Some(v) = get("DIFY_MAX_RETRIES") {
            self.max_retries = v
                .trim()
                .parse()
                .with_context(|| format!("DIFY_MAX_RETRIES must be a non-negative integer, got {v:?}"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.queries.is_empty() {
            bail!("at least one query must be configured");
        }
        if self.queries.iter().any(|q| q.trim().is_empty()) {
            bail!("queries must not be blank");
        }
        Ok(())
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn inter_query_delay(&self) -> Duration {
        Duration::from_secs(self.inter_query_delay_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Política de retentativa das consultas de chat.
    pub fn step_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.max(1),
            backoff: Duration::from_secs(self.retry_backoff_secs),
        }
    }

    /// Política de retentativa das chamadas de workflow da proposta.
    pub fn proposal_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.proposal_max_retries.max(1),
            backoff: Duration::from_secs(self.proposal_retry_delay_secs),
        }
    }

    pub fn liveness(&self) -> LivenessThresholds {
        LivenessThresholds {
            heartbeat_stale: Duration::from_secs(self.heartbeat_stale_secs),
            max_run: Duration::from_secs(self.max_run_secs),
        }
    }
}
