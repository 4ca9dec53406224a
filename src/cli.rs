//! Interface de linha de comando do photolink baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, tasks, clean)
//! e flags globais (--cache-dir, --stop-timeout-ms, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::job::SubmissionForm;
use crate::task::TaskKind;

/// photolink: busca facial, clustering e DP2 match sobre pastas de imagens.
#[derive(Debug, Parser)]
#[command(name = "photolink", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Diretório de cache (sobrescreve config e ambiente).
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Tempo máximo, em ms, para um worker confirmar a parada.
    #[arg(long, global = true)]
    pub stop_timeout_ms: Option<u64>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Tarefa aceita pela CLI, mapeada para [`TaskKind`] internamente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TaskArg {
    /// Encontra as faces de referência nas imagens de origem.
    FaceSearch,
    /// Agrupa as imagens de origem por identidade.
    Cluster,
    /// Pareia imagens de origem com as de referência.
    Dp2Match,
}

impl From<TaskArg> for TaskKind {
    fn from(arg: TaskArg) -> Self {
        match arg {
            TaskArg::FaceSearch => TaskKind::FaceSearch,
            TaskArg::Cluster => TaskKind::Clustering,
            TaskArg::Dp2Match => TaskKind::Dp2Match,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Valida as pastas, grava o job e processa em segundo plano.
    Run {
        /// Tarefa a executar.
        #[arg(long, short, value_enum)]
        task: TaskArg,

        /// Pasta (ou arquivo) com as imagens de origem.
        #[arg(long, short, default_value = "")]
        source: String,

        /// Pasta com as imagens de referência (face-search e dp2-match).
        #[arg(long, short, default_value = "")]
        reference: String,

        /// Pasta onde os resultados serão gravados.
        #[arg(long, short, default_value = "")]
        output: String,

        /// Pausa artificial por imagem, em ms.
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },

    /// Lista as tarefas disponíveis e suas instruções.
    Tasks,

    /// Apaga e recria o diretório de cache.
    Clean,
}

impl Command {
    /// Formulário equivalente ao preenchido na interface, para `run`.
    pub fn submission_form(&self) -> Option<SubmissionForm> {
        match self {
            Command::Run {
                task,
                source,
                reference,
                output,
                ..
            } => Some(
                SubmissionForm::new(TaskKind::from(*task))
                    .source(source.as_str())
                    .reference(reference.as_str())
                    .output(output.as_str()),
            ),
            _ => None,
        }
    }
}
