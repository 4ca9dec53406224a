//! O que o operador vê enquanto um job roda.
//!
//! [`ProcessIndicator`] mostra a porcentagem e troca a mensagem de espera
//! periodicamente. Nenhum dos seus dois timers sabe quando o worker
//! termina: quem os desliga é o `stop_all` do controlador. Os
//! [`ProgressCounters`] são lidos das mensagens `result` e zerados no
//! mesmo momento. O [`ConsoleLog`] guarda o histórico textual da sessão.

use std::time::Duration;

use chrono::{DateTime, Utc};
use console::Style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::task::JoinHandle;

use crate::task::TaskKind;

/// Mensagens exibidas em rodízio enquanto um job está em execução.
pub const LOADING_MESSAGES: [&str; 6] = [
    "Disclaimer: This software is only meant for internal usage.",
    "Processing images. Please be patient. This may take a while.",
    "Machine learning model processing the images",
    "If the volume of images is large, this may take a while",
    "Almost done...hang in there!",
    "Go get a cup of coffee, this may need a bit more time :)",
];

/// Primeira mensagem, antes da primeira rotação.
pub const INITIAL_MESSAGE: &str = "Initializing the modules";

/// Texto inicial do console após startup ou refresh.
pub const DEFAULT_STATUS: &str =
    "Ready. Select a task, choose the input and output folders, then start processing.";

// Intervalo de animação do spinner.
const SPINNER_TICK: Duration = Duration::from_millis(100);

/// Indicador visual de progresso para um job em execução.
///
/// Exibe um spinner animado com uma mensagem que muda a cada
/// `message_interval`. Ambos os timers são parados por [`stop_timers`]
/// e o indicador é removido da tela por [`dismiss`].
///
/// [`stop_timers`]: ProcessIndicator::stop_timers
/// [`dismiss`]: ProcessIndicator::dismiss
pub struct ProcessIndicator {
    // Barra atual; `None` quando o indicador não está visível.
    pb: Option<ProgressBar>,
    // Tarefa que troca a mensagem periodicamente.
    rotation: Option<JoinHandle<()>>,
    message_interval: Duration,
    // Desenha no terminal ou em lugar nenhum (testes, modo silencioso).
    hidden: bool,
}

impl ProcessIndicator {
    /// Cria um indicador que desenha no stderr.
    pub fn new(message_interval: Duration) -> Self {
        Self {
            pb: None,
            rotation: None,
            message_interval,
            hidden: false,
        }
    }

    /// Cria um indicador que nunca desenha nada.
    pub fn hidden(message_interval: Duration) -> Self {
        Self {
            hidden: true,
            ..Self::new(message_interval)
        }
    }

    /// Exibe o spinner e inicia os timers de animação e de mensagens.
    ///
    /// Precisa ser chamado de dentro de um runtime tokio.
    pub fn show(&mut self, task: TaskKind) {
        self.dismiss();

        let pb = if self.hidden {
            ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::hidden())
        } else {
            ProgressBar::new(100)
        };
        if let Ok(style) = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{pos:>3}%] {prefix:.bold} {msg}")
        {
            pb.set_style(style);
        }
        pb.set_prefix(task.label());
        pb.set_message(INITIAL_MESSAGE);
        pb.enable_steady_tick(SPINNER_TICK);

        let rotating = pb.clone();
        let interval = self.message_interval;
        self.rotation = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // O primeiro tick é imediato; mantém a mensagem inicial.
            ticker.tick().await;
            for message in LOADING_MESSAGES.iter().cycle() {
                ticker.tick().await;
                rotating.set_message(*message);
            }
        }));
        self.pb = Some(pb);
    }

    /// Atualiza a porcentagem exibida.
    pub fn set_progress(&self, percent: u8) {
        if let Some(pb) = &self.pb {
            pb.set_position(u64::from(percent.min(100)));
        }
    }

    /// Imprime uma linha acima do spinner sem corrompê-lo.
    pub fn println(&self, line: &str) {
        match &self.pb {
            Some(pb) if !self.hidden => pb.println(line),
            _ => {}
        }
    }

    /// Para a animação do spinner e o rodízio de mensagens.
    ///
    /// Retorna `false` se não havia timers ativos.
    pub fn stop_timers(&mut self) -> bool {
        let mut stopped = false;
        if let Some(rotation) = self.rotation.take() {
            rotation.abort();
            stopped = true;
        }
        if let Some(pb) = &self.pb {
            if !pb.is_finished() {
                pb.disable_steady_tick();
                stopped = true;
            }
        }
        stopped
    }

    /// Remove o indicador da tela. Retorna `false` se já não estava visível.
    pub fn dismiss(&mut self) -> bool {
        self.stop_timers();
        match self.pb.take() {
            Some(pb) => {
                pb.finish_and_clear();
                true
            }
            None => false,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.pb.is_some()
    }

    pub fn timers_running(&self) -> bool {
        self.rotation.is_some()
    }

    /// Mensagem exibida no momento, se o indicador estiver visível.
    pub fn message(&self) -> Option<String> {
        self.pb.as_ref().map(|pb| pb.message())
    }
}

/// Contadores transitórios alimentados pelas mensagens `result` do worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressCounters {
    pub preprocessed: usize,
    pub postprocessed: usize,
    pub percent: u8,
}

impl ProgressCounters {
    /// Extrai `pre-processed N/M`, `processed N/M` e `NN%` da mensagem.
    ///
    /// Retorna `true` se algum contador mudou.
    pub fn observe(&mut self, message: &str) -> bool {
        let before = *self;
        let lower = message.to_lowercase();
        let words: Vec<&str> = lower.split_whitespace().collect();

        for pair in words.windows(2) {
            let count = pair[1]
                .split('/')
                .next()
                .and_then(|n| n.parse::<usize>().ok());
            match (pair[0], count) {
                ("pre-processed" | "preprocessed", Some(n)) => self.preprocessed = n,
                ("processed" | "post-processed" | "postprocessed", Some(n)) => {
                    self.postprocessed = n
                }
                _ => {}
            }
        }

        for word in &words {
            let trimmed = word.trim_matches(|c: char| matches!(c, '(' | ')' | ',' | '.' | ':'));
            if let Some(value) = trimmed.strip_suffix('%') {
                if let Ok(percent) = value.parse::<u8>() {
                    if percent <= 100 {
                        self.percent = percent;
                    }
                }
            }
        }

        *self != before
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Gravidade de uma notificação.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Notificação destinada ao operador.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, title, message)
    }

    fn new(level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// Linha registrada no console: `<título>: <mensagem>`.
    pub fn console_line(&self) -> String {
        format!("{}: {}", self.title, self.message)
    }
}

/// Log do console exibido ao operador.
#[derive(Debug, Clone)]
pub struct ConsoleLog {
    lines: Vec<String>,
}

impl Default for ConsoleLog {
    fn default() -> Self {
        Self {
            lines: vec![DEFAULT_STATUS.to_string()],
        }
    }
}

impl ConsoleLog {
    /// Acrescenta uma linha. Mensagens contendo "sos" são ruído dos
    /// workers e são descartadas; retorna `false` nesse caso.
    pub fn append(&mut self, message: impl Into<String>) -> bool {
        let message = message.into();
        if message.to_lowercase().contains("sos") {
            return false;
        }
        self.lines.push(message);
        true
    }

    /// Volta ao texto inicial.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }
}

/// Formata uma notificação com cores para o terminal.
///
/// Sucesso em verde com checkmark; erro em vermelho com X.
pub fn render_notice(notice: &Notice) -> String {
    match notice.level {
        NoticeLevel::Info => format!(
            "  {} {}: {}",
            Style::new().green().bold().apply_to("✓"),
            notice.title,
            notice.message
        ),
        NoticeLevel::Error => format!(
            "  {} {}: {}",
            Style::new().red().bold().apply_to("✗"),
            notice.title,
            notice.message
        ),
    }
}

/// Lista as tarefas disponíveis com suas instruções.
pub fn render_catalog() -> String {
    let bold = Style::new().bold();
    let dim = Style::new().dim();
    TaskKind::ALL
        .iter()
        .map(|task| {
            let reference = if task.requires_reference() {
                "source + reference"
            } else {
                "source only"
            };
            format!(
                "{} ({}, {})\n    {}",
                bold.apply_to(task.label()),
                task.as_str(),
                dim.apply_to(reference),
                task.instruction()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
