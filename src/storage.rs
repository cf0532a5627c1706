use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};
use tokio::{fs, sync::RwLock};
use tracing::{debug, info, warn};

/// Bases lógicas conocidas
pub mod namespaces {
    pub const LIKED_SONGS: &str = "likedSongs";
    pub const BOT_STAFF: &str = "botstaff";
    pub const NO_PREFIX: &str = "noPrefix";
    pub const GIVEAWAYS: &str = "giveaways";
}

/// Almacén clave-valor con un archivo JSON por namespace
pub struct KvStore {
    data_dir: PathBuf,
    databases: DashMap<String, Database>,
}

impl KvStore {
    pub async fn open(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("No se pudo crear {}", data_dir.display()))?;

        info!("📁 Storage inicializado en: {}", data_dir.display());
        Ok(Self {
            data_dir,
            databases: DashMap::new(),
        })
    }

    /// Devuelve el namespace, cargándolo del disco la primera vez
    pub async fn namespace(&self, name: &str) -> Result<Database> {
        if let Some(db) = self.databases.get(name) {
            return Ok(db.clone());
        }

        let path = self.data_dir.join(format!("{}.json", name));
        let data = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<BTreeMap<String, Value>>(&content)
                .with_context(|| format!("JSON inválido en {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("No se pudo leer {}", path.display()))
            }
        };
        debug!("📂 Namespace '{}' cargado ({} claves)", name, data.len());

        let db = Database {
            name: Arc::from(name),
            path,
            data: Arc::new(RwLock::new(data)),
        };
        // Otra tarea pudo cargarlo mientras leíamos el archivo
        Ok(self
            .databases
            .entry(name.to_string())
            .or_insert(db)
            .clone())
    }
}

/// Un namespace del almacén; clonarlo es barato
#[derive(Clone)]
pub struct Database {
    name: Arc<str>,
    path: PathBuf,
    data: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let data = self.data.read().await;
        data.get(key)
            .map(|value| {
                serde_json::from_value(value.clone())
                    .with_context(|| format!("Valor inválido para {}/{}", self.name, key))
            })
            .transpose()
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let mut data = self.data.write().await;
        data.insert(key.to_string(), value);
        self.persist(&data).await
    }

    /// `true` si la clave existía
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut data = self.data.write().await;
        if data.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&data).await?;
        Ok(true)
    }

    pub async fn has(&self, key: &str) -> bool {
        self.data.read().await.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.data.read().await.keys().cloned().collect()
    }

    pub async fn entries(&self) -> Vec<(String, Value)> {
        self.data
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub async fn size(&self) -> usize {
        self.data.read().await.len()
    }

    // Métodos privados

    async fn persist(&self, data: &BTreeMap<String, Value>) -> Result<()> {
        let content = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");

        fs::write(&tmp, content)
            .await
            .with_context(|| format!("No se pudo escribir {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            warn!("⚠️ No se pudo reemplazar {}: {}", self.path.display(), e);
            return Err(e.into());
        }
        Ok(())
    }
}
