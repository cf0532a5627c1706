use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{fmt, str::FromStr, time::Duration};

/// Canción reproducible tal como la resolvió un nodo de audio.
///
/// Es un valor inmutable: la cola la copia entre `previous`, `current` y
/// `upcoming` sin modificarla.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Handle opaco del nodo, necesario para volver a reproducir la pista
    pub encoded: String,
    pub identifier: String,
    pub title: String,
    pub author: String,
    pub uri: Option<String>,
    /// Duración en milisegundos, 0 para transmisiones en vivo
    pub duration_ms: u64,
    pub is_stream: bool,
    /// `None` cuando la agregó el autoplay
    pub requester: Option<UserId>,
    pub thumbnail: Option<String>,
    pub source_name: String,
}

impl Track {
    /// Duración indeterminada: stream o longitud desconocida
    pub fn is_live(&self) -> bool {
        self.is_stream || self.duration_ms == 0
    }

    pub fn duration(&self) -> Option<Duration> {
        if self.is_live() {
            None
        } else {
            Some(Duration::from_millis(self.duration_ms))
        }
    }

    /// Copia de la pista atribuida a otro usuario
    pub fn requested_by(mut self, requester: Option<UserId>) -> Self {
        self.requester = requester;
        self
    }

    /// Clave usada para detectar duplicados
    pub fn dedup_key(&self) -> &str {
        self.uri.as_deref().unwrap_or(&self.identifier)
    }

    pub fn is_youtube(&self) -> bool {
        self.source_name.eq_ignore_ascii_case("youtube")
    }
}

/// Motor de búsqueda usado cuando la consulta no es una URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    #[default]
    Youtube,
    YoutubeMusic,
    Soundcloud,
    Spotify,
    Deezer,
    Apple,
}

impl SearchEngine {
    pub fn prefix(&self) -> &'static str {
        match self {
            SearchEngine::Youtube => "ytsearch",
            SearchEngine::YoutubeMusic => "ytmsearch",
            SearchEngine::Soundcloud => "scsearch",
            SearchEngine::Spotify => "spsearch",
            SearchEngine::Deezer => "dzsearch",
            SearchEngine::Apple => "amsearch",
        }
    }

    /// Construye el identificador que entiende el nodo
    pub fn identifier_for(&self, query: &str) -> String {
        let query = query.trim();
        if query.starts_with("http://") || query.starts_with("https://") {
            query.to_string()
        } else {
            format!("{}:{}", self.prefix(), query)
        }
    }
}

impl fmt::Display for SearchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchEngine::Youtube => "youtube",
            SearchEngine::YoutubeMusic => "youtubemusic",
            SearchEngine::Soundcloud => "soundcloud",
            SearchEngine::Spotify => "spotify",
            SearchEngine::Deezer => "deezer",
            SearchEngine::Apple => "apple",
        };
        f.write_str(name)
    }
}

impl FromStr for SearchEngine {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube" | "yt" => Ok(SearchEngine::Youtube),
            "youtubemusic" | "ytm" => Ok(SearchEngine::YoutubeMusic),
            "soundcloud" | "sc" => Ok(SearchEngine::Soundcloud),
            "spotify" | "sp" => Ok(SearchEngine::Spotify),
            "deezer" | "dz" => Ok(SearchEngine::Deezer),
            "apple" | "applemusic" | "am" => Ok(SearchEngine::Apple),
            other => anyhow::bail!("Motor de búsqueda desconocido: {}", other),
        }
    }
}
