//! Interface de linha de comando do briefrun baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, status, results,
//! delete, proposal, ...) e flags globais (--config, --outputs-root, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// briefrun: pesquisa de empresas em etapas via Dify, com retomada em disco.
#[derive(Debug, Parser)]
#[command(name = "briefrun", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para o arquivo de configuração TOML.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Diretório raiz dos artefatos (sobrescreve config e ambiente).
    #[arg(long, global = true)]
    pub outputs_root: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa as consultas pendentes de uma empresa e aguarda o término.
    Run {
        /// Identificador da empresa.
        company: String,

        /// Título de uma consulta a executar (repetível). Sem títulos, todas.
        #[arg(long = "query", short = 'q')]
        queries: Vec<String>,
    },

    /// Mostra o status do job ativo ou de uma empresa.
    Status {
        /// Empresa a consultar.
        company: Option<String>,
    },

    /// Mostra os resultados de todas as etapas de uma empresa.
    Results {
        /// Identificador da empresa.
        company: String,
    },

    /// Remove todos os artefatos de uma empresa.
    Delete {
        /// Identificador da empresa.
        company: String,
    },

    /// Gera (ou retorna do cache) a proposta consolidada.
    Proposal {
        /// Identificador da empresa.
        company: String,

        /// Regenera a proposta mesmo se já existir uma em cache.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Mostra o progresso da geração da proposta.
    ProposalProgress {
        /// Identificador da empresa.
        company: String,
    },

    /// Lista as empresas com diretório de resultados.
    Companies,

    /// Lista as consultas configuradas com seus índices.
    Queries,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["briefrun", "run", "acme", "-q", "overview", "--query", "news"]);
        match cli.command {
            Command::Run { company, queries } => {
                assert_eq!(company, "acme");
                assert_eq!(queries, vec!["overview", "news"]);
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "briefrun",
            "--config",
            "custom.toml",
            "--outputs-root",
            "/tmp/out",
            "--verbose",
            "companies",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert_eq!(cli.outputs_root, Some(PathBuf::from("/tmp/out")));
        assert!(matches!(cli.command, Command::Companies));
    }

    #[test]
    fn cli_parses_proposal_subcommands() {
        let cli = Cli::parse_from(["briefrun", "proposal", "acme", "--force"]);
        assert!(matches!(cli.command, Command::Proposal { force: true, .. }));

        let cli = Cli::parse_from(["briefrun", "proposal-progress", "acme"]);
        match cli.command {
            Command::ProposalProgress { company } => assert_eq!(company, "acme"),
            _ => panic!("expected ProposalProgress command"),
        }
    }

    #[test]
    fn cli_status_company_is_optional() {
        let cli = Cli::parse_from(["briefrun", "status"]);
        assert!(matches!(cli.command, Command::Status { company: None }));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
