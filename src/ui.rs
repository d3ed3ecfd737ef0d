//! Interface de terminal do briefrun: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`RunProgress`] acompanha visualmente a execução
//! de um job no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use briefrun::markers::Terminal;
use briefrun::results::StepProgress;

/// Indicador visual de progresso para a execução de um job no terminal.
///
/// Exibe um spinner animado enquanto as etapas rodam e mensagens coloridas
/// para sucesso (verde), abortado (vermelho) e estado desconhecido (amarelo).
pub struct RunProgress {
    // Barra de progresso/spinner do indicatif.
    pb: ProgressBar,
    company: String,
    green: Style,
    red: Style,
    yellow: Style,
}

impl RunProgress {
    /// Inicia o spinner para a empresa e retorna a instância de progresso.
    pub fn start(company: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} [{elapsed}]")
                .expect("invalid template"),
        );
        pb.set_message(format!("{company}: starting"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            company: company.to_string(),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem com o número de etapas concluídas.
    pub fn update(&self, progress: StepProgress) {
        self.pb.set_message(format!(
            "{}: {}/{} steps with output",
            self.company, progress.completed, progress.total
        ));
    }

    /// Finaliza o spinner e exibe o resultado do job.
    pub fn complete(&self, terminal: Option<Terminal>, progress: StepProgress) {
        self.pb.finish_and_clear();
        let summary = format!("{}/{} steps with output", progress.completed, progress.total);
        match terminal {
            Some(Terminal::Done) => println!(
                "  {} {} finished: {summary}",
                self.green.apply_to("✓"),
                self.company
            ),
            Some(Terminal::Aborted) => println!(
                "  {} {} aborted: {summary}",
                self.red.apply_to("✗"),
                self.company
            ),
            None => println!(
                "  {} {} ended without a terminal marker: {summary}",
                self.yellow.apply_to("?"),
                self.company
            ),
        }
    }
}

/// Mensagem para quando não há nada a executar.
pub fn already_complete(company: &str) {
    let green = Style::new().green().bold();
    println!("  {} {company}: every step already has output", green.apply_to("✓"));
}

/// Imprime um valor serializável como JSON formatado.
pub fn print_json<T: Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}
