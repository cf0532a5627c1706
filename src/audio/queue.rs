use serde::{Deserialize, Serialize};
use std::{
    collections::{HashSet, VecDeque},
    fmt,
    time::Duration,
};
use tracing::{debug, info};

use crate::{audio::track::Track, error::PlayerError};

pub const DEFAULT_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoopMode::Off => "Off",
            LoopMode::Track => "Track",
            LoopMode::Queue => "Queue",
        })
    }
}

/// Cola de reproducción de un guild.
///
/// `previous` guarda el historial (el más reciente al final), `current` la
/// canción en curso y `upcoming` las siguientes en orden FIFO.
#[derive(Debug, Clone)]
pub struct Queue {
    previous: VecDeque<Track>,
    current: Option<Track>,
    upcoming: VecDeque<Track>,
    loop_mode: LoopMode,
    max_size: usize,
    max_history: usize,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new(1000, DEFAULT_HISTORY)
    }
}

impl Queue {
    pub fn new(max_size: usize, max_history: usize) -> Self {
        Self {
            previous: VecDeque::new(),
            current: None,
            upcoming: VecDeque::new(),
            loop_mode: LoopMode::Off,
            max_size,
            max_history: max_history.max(1),
        }
    }

    /// Agrega un track al final y devuelve su posición (1 = siguiente)
    pub fn enqueue(&mut self, track: Track) -> Result<usize, PlayerError> {
        if self.upcoming.len() >= self.max_size {
            return Err(PlayerError::QueueFull(self.max_size));
        }

        debug!("➕ Agregado a la cola: {}", track.title);
        self.upcoming.push_back(track);
        Ok(self.upcoming.len())
    }

    /// Avanza a la siguiente canción respetando el modo de repetición
    pub fn advance(&mut self) -> Option<Track> {
        if self.loop_mode == LoopMode::Track {
            if let Some(current) = &self.current {
                debug!("🔂 Repitiendo track: {}", current.title);
                return Some(current.clone());
            }
        }

        self.step()
    }

    /// Avanza ignorando la repetición de canción (el usuario saltó)
    pub fn skip_advance(&mut self) -> Option<Track> {
        self.step()
    }

    /// Vuelve a la canción anterior; la actual pasa al frente de `upcoming`
    pub fn rewind(&mut self) -> Option<Track> {
        let previous = self.previous.pop_back()?;

        if let Some(current) = self.current.take() {
            self.upcoming.push_front(current);
        }

        debug!("⏮️ Volviendo a: {}", previous.title);
        self.current = Some(previous.clone());
        Some(previous)
    }

    pub fn clear(&mut self) {
        self.upcoming.clear();
        info!("🗑️ Cola limpiada");
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
        match mode {
            LoopMode::Off => info!("➡️ Repetición desactivada"),
            LoopMode::Track => info!("🔂 Repetir canción activado"),
            LoopMode::Queue => info!("🔁 Repetir cola activado"),
        }
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> impl Iterator<Item = &Track> {
        self.previous.iter()
    }

    /// Última canción terminada
    pub fn last_played(&self) -> Option<&Track> {
        self.previous.back()
    }

    pub fn upcoming(&self) -> impl Iterator<Item = &Track> {
        self.upcoming.iter()
    }

    pub fn history_len(&self) -> usize {
        self.previous.len()
    }

    /// `current` cuenta como 1 si existe
    pub fn size(&self) -> usize {
        self.upcoming.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.upcoming.is_empty()
    }

    /// Suma de duraciones de `current` y `upcoming`; los streams aportan 0
    pub fn total_duration(&self) -> Duration {
        self.current
            .iter()
            .chain(self.upcoming.iter())
            .filter_map(Track::duration)
            .sum()
    }

    /// Claves de todas las canciones conocidas por la cola
    pub fn known_keys(&self) -> HashSet<String> {
        self.previous
            .iter()
            .chain(self.current.iter())
            .chain(self.upcoming.iter())
            .map(|track| track.dedup_key().to_string())
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.previous
            .iter()
            .chain(self.current.iter())
            .chain(self.upcoming.iter())
            .any(|track| track.dedup_key() == key)
    }

    // Funciones privadas

    fn step(&mut self) -> Option<Track> {
        if let Some(current) = self.current.take() {
            self.add_to_history(current);
        }

        if self.upcoming.is_empty() && self.loop_mode == LoopMode::Queue && !self.previous.is_empty() {
            info!("🔁 Rellenando la cola con {} canciones del historial", self.previous.len());
            self.upcoming.extend(self.previous.drain(..));
        }

        self.current = self.upcoming.pop_front();
        match &self.current {
            Some(next) => debug!("➡️ Siguiente en cola (FIFO): {}", next.title),
            None => debug!("📭 Cola vacía, no hay siguiente track"),
        }
        self.current.clone()
    }

    fn add_to_history(&mut self, track: Track) {
        self.previous.push_back(track);

        // Mantener solo los últimos N items
        while self.previous.len() > self.max_history {
            self.previous.pop_front();
        }
    }
}
