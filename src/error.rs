//! Error taxonomy of the player core.
//!
//! Command handlers and the binary keep using [`anyhow`]; everything that the
//! player state machine has to branch on is a typed error from this module.

use thiserror::Error;

/// Errores visibles para la capa de comandos
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("no hay nodos de audio disponibles")]
    NoNodesAvailable,

    #[error("la búsqueda falló: {0}")]
    SearchFailed(String),

    #[error("no se encontró una canción similar para autoplay")]
    NoSimilarTrack,

    #[error("la cola está llena (máximo {0} canciones)")]
    QueueFull(usize),

    #[error("no hay un reproductor activo en este servidor")]
    NoPlayer,

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Errores de comunicación con un nodo de audio
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("error HTTP con el nodo {node}: {source}")]
    Http {
        node: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("el nodo {node} respondió {status}: {message}")]
    Status {
        node: String,
        status: u16,
        message: String,
    },

    #[error("error de WebSocket con el nodo {node}: {message}")]
    WebSocket { node: String, message: String },

    #[error("respuesta inválida del nodo {node}: {source}")]
    Decode {
        node: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("el nodo {0} no tiene sesión activa")]
    NotConnected(String),

    #[error("URL inválida para el nodo {node}: {message}")]
    InvalidUrl { node: String, message: String },
}

/// Fallos del mensaje "now playing" (se registran y se descartan)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("el mensaje ya no existe")]
    NotFound,

    #[error("fallo al enviar o editar el mensaje: {0}")]
    Http(String),
}

pub type PlayerResult<T> = Result<T, PlayerError>;
