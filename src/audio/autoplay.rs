use async_trait::async_trait;
use regex::Regex;
use serenity::model::id::GuildId;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info, warn};

use super::{
    pool::NodePool,
    track::{SearchEngine, Track},
};
use crate::error::{PlayerError, PlayerResult};

/// Fuente de candidatos para el autoplay
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        engine: SearchEngine,
        guild_id: Option<GuildId>,
    ) -> PlayerResult<Vec<Track>>;
}

#[async_trait]
impl TrackSearch for NodePool {
    async fn search(
        &self,
        query: &str,
        engine: SearchEngine,
        guild_id: Option<GuildId>,
    ) -> PlayerResult<Vec<Track>> {
        NodePool::search(self, query, engine, guild_id).await
    }
}

/// Limpia el ruido típico de los títulos de YouTube
struct TitleCleaner {
    noise: Regex,
    featuring: Regex,
    spaces: Regex,
}

impl TitleCleaner {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            noise: Regex::new(
                r"(?i)\s*[\(\[][^\)\]]*\b(official|video|lyrics?|letra|audio|visuali[sz]er|hd|4k|remaster(ed)?|mv)\b[^\)\]]*[\)\]]",
            )?,
            featuring: Regex::new(r"(?i)\s+(ft\.?|feat\.?|featuring)\s+.*$")?,
            spaces: Regex::new(r"\s+")?,
        })
    }

    fn clean(&self, title: &str) -> String {
        let title = self.noise.replace_all(title, "");
        let title = self.featuring.replace(&title, "");
        self.spaces.replace_all(title.trim(), " ").into_owned()
    }
}

/// Busca una canción relacionada con la última reproducida
pub struct AutoplayResolver {
    search: Arc<dyn TrackSearch>,
    cleaner: TitleCleaner,
}

impl AutoplayResolver {
    pub fn new(search: Arc<dyn TrackSearch>) -> Result<Self, regex::Error> {
        Ok(Self {
            search,
            cleaner: TitleCleaner::new()?,
        })
    }

    /// Devuelve el primer candidato que no esté ya en la cola.
    ///
    /// `known` contiene las claves de deduplicación de `previous`, `current`
    /// y `upcoming`.
    pub async fn resolve(
        &self,
        last: &Track,
        known: &HashSet<String>,
        guild_id: GuildId,
    ) -> PlayerResult<Track> {
        let mut last_error = None;

        for (query, engine) in self.queries(last) {
            debug!("🎲 Autoplay: buscando '{}' en {}", query, engine);

            let candidates = match self.search.search(&query, engine, Some(guild_id)).await {
                Ok(candidates) => {
                    last_error = None;
                    candidates
                }
                Err(e) => {
                    warn!("⚠️ Autoplay: búsqueda fallida para '{}': {}", query, e);
                    last_error = Some(e);
                    continue;
                }
            };

            let pick = candidates.into_iter().find(|candidate| {
                candidate.identifier != last.identifier
                    && candidate.dedup_key() != last.dedup_key()
                    && !known.contains(candidate.dedup_key())
            });

            if let Some(track) = pick {
                info!("🎲 Autoplay eligió: {} - {}", track.title, track.author);
                return Ok(track.requested_by(None));
            }
        }

        match last_error {
            Some(PlayerError::SearchFailed(message)) => Err(PlayerError::SearchFailed(message)),
            _ => Err(PlayerError::NoSimilarTrack),
        }
    }

    /// Consultas en orden de preferencia
    fn queries(&self, last: &Track) -> Vec<(String, SearchEngine)> {
        let mut queries = Vec::with_capacity(2);

        if last.is_youtube() && !last.identifier.is_empty() {
            queries.push((
                format!(
                    "https://www.youtube.com/watch?v={id}&list=RD{id}",
                    id = last.identifier
                ),
                SearchEngine::Youtube,
            ));
        }

        let title = self.cleaner.clean(&last.title);
        let text = format!("{} {}", last.author, title);
        let text = text.trim();
        if !text.is_empty() {
            queries.push((text.to_string(), SearchEngine::YoutubeMusic));
        }

        queries
    }
}
