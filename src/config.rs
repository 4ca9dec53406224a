//! Configuração do photolink carregada a partir de `photolink.toml`.
//!
//! A struct [`PhotolinkConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `PHOTOLINK_CACHE_DIR` tem precedência sobre o
//! arquivo; flags da CLI têm precedência sobre ambos.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::discovery::{DEFAULT_IMAGE_EXTENSIONS, FsImageDiscovery};
use crate::error::PhotolinkError;

/// Nome do arquivo procurado no diretório atual.
pub const CONFIG_FILE: &str = "photolink.toml";

/// Variável de ambiente que sobrescreve `cache_dir`.
pub const CACHE_DIR_OVERRIDE_ENV: &str = "PHOTOLINK_CACHE_DIR";

/// Configuração de nível superior carregada de `photolink.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PhotolinkConfig {
    /// Diretório de cache onde o `job.json` é gravado.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Tempo máximo de espera para um worker confirmar a parada.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Intervalo entre as mensagens rotativas do indicador.
    #[serde(default = "default_message_interval_ms")]
    pub message_interval_ms: u64,

    /// Extensões reconhecidas como imagem na busca de arquivos.
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

// Valor padrão para o cache: `./cache`.
fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

// Valor padrão para o timeout de parada: 10s.
fn default_stop_timeout_ms() -> u64 {
    10_000
}

// Valor padrão para a rotação de mensagens: 8s.
fn default_message_interval_ms() -> u64 {
    8_000
}

fn default_image_extensions() -> Vec<String> {
    DEFAULT_IMAGE_EXTENSIONS.iter().map(|ext| ext.to_string()).collect()
}

impl Default for PhotolinkConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            stop_timeout_ms: default_stop_timeout_ms(),
            message_interval_ms: default_message_interval_ms(),
            image_extensions: default_image_extensions(),
        }
    }
}

impl PhotolinkConfig {
    /// Carrega a configuração de `photolink.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    ///
    /// Não valida: as flags da CLI ainda podem corrigir os valores, então
    /// [`validate`](Self::validate) roda depois de [`with_cli_overrides`](Self::with_cli_overrides).
    pub fn load() -> Result<Self> {
        Ok(Self::load_from(Path::new(CONFIG_FILE))?
            .with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Lê um arquivo específico, sem aplicar variáveis de ambiente.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str::<PhotolinkConfig>(&contents)
            .map_err(PhotolinkError::from)
            .with_context(|| format!("invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Aplica as variáveis de ambiente obtidas por `lookup`.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(CACHE_DIR_OVERRIDE_ENV).filter(|dir| !dir.trim().is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        self
    }

    /// Aplica as flags globais da CLI, que vencem arquivo e ambiente.
    pub fn with_cli_overrides(
        mut self,
        cache_dir: Option<PathBuf>,
        stop_timeout_ms: Option<u64>,
    ) -> Self {
        if let Some(dir) = cache_dir {
            self.cache_dir = dir;
        }
        if let Some(ms) = stop_timeout_ms {
            self.stop_timeout_ms = ms;
        }
        self
    }

    /// Rejeita combinações que impediriam uma sessão de funcionar.
    pub fn validate(&self) -> Result<(), PhotolinkError> {
        if self.stop_timeout_ms == 0 {
            return Err(PhotolinkError::Config(
                "stop_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.message_interval_ms == 0 {
            return Err(PhotolinkError::Config(
                "message_interval_ms must be greater than zero".into(),
            ));
        }
        if self.image_extensions.is_empty() {
            return Err(PhotolinkError::Config(
                "image_extensions must list at least one extension".into(),
            ));
        }
        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn message_interval(&self) -> Duration {
        Duration::from_millis(self.message_interval_ms)
    }

    /// Busca de imagens usando as extensões configuradas.
    pub fn discovery(&self) -> FsImageDiscovery {
        FsImageDiscovery::new(self.image_extensions.iter().cloned())
    }
}
