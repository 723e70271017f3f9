//! The model registry
//!
//! [`Origraph`] owns every model of a session, shares one function registry
//! and one event bus between them, and persists them to a
//! [`KeyValueStore`]. Persistence is debounced: models only announce changes
//! on the bus, and [`Origraph::flush`] writes everything once per batch of
//! notifications.

use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::config::OrigraphConfig;
use crate::error::{OrigraphError, OrigraphResult};
use crate::events::{Consumer, MessageBus, ModelDeleted, ModelUpdated};
use crate::functions::FunctionRegistry;
use crate::model::{ModelSnapshot, NetworkModel};
use crate::store::KeyValueStore;

pub struct Origraph {
    store: Arc<dyn KeyValueStore>,
    config: OrigraphConfig,
    functions: FunctionRegistry,
    bus: MessageBus,
    updates: Mutex<Consumer<ModelUpdated>>,
    models: RwLock<BTreeMap<String, NetworkModel>>,
    current_model_id: RwLock<Option<String>>,
}

impl Origraph {
    /// Open a registry, restoring whatever `store` holds under the
    /// configured storage key
    pub fn new(store: Arc<dyn KeyValueStore>, config: OrigraphConfig) -> OrigraphResult<Self> {
        Self::with_functions(store, config, FunctionRegistry::new())
    }

    /// Registry whose function registry is supplied by the host, so functions
    /// can be registered before persisted models are restored
    pub fn with_functions(
        store: Arc<dyn KeyValueStore>,
        config: OrigraphConfig,
        functions: FunctionRegistry,
    ) -> OrigraphResult<Self> {
        config.validate()?;
        let bus = MessageBus::new();
        let updates = bus.subscribe::<ModelUpdated>();
        let registry = Self {
            store,
            config,
            functions,
            bus,
            updates: Mutex::new(updates),
            models: RwLock::new(BTreeMap::new()),
            current_model_id: RwLock::new(None),
        };
        registry.restore()?;
        Ok(registry)
    }

    fn models_read(&self) -> OrigraphResult<RwLockReadGuard<'_, BTreeMap<String, NetworkModel>>> {
        self.models
            .read()
            .map_err(|e| OrigraphError::Lock(format!("model registry: {}", e)))
    }

    fn models_write(&self) -> OrigraphResult<RwLockWriteGuard<'_, BTreeMap<String, NetworkModel>>> {
        self.models
            .write()
            .map_err(|e| OrigraphError::Lock(format!("model registry: {}", e)))
    }

    fn set_current(&self, model_id: Option<String>) -> OrigraphResult<()> {
        let mut current = self
            .current_model_id
            .write()
            .map_err(|e| OrigraphError::Lock(format!("current model: {}", e)))?;
        *current = model_id;
        Ok(())
    }

    fn restore(&self) -> OrigraphResult<()> {
        let Some(stored) = self.store.get(&self.config.storage_key)? else {
            debug!("No models stored under '{}'", self.config.storage_key);
            return Ok(());
        };
        let snapshots: BTreeMap<String, ModelSnapshot> = serde_json::from_value(stored)?;
        let mut models = self.models_write()?;
        for (model_id, snapshot) in snapshots {
            let model = NetworkModel::from_snapshot(
                snapshot,
                self.functions.clone(),
                self.bus.clone(),
                self.config.clone(),
            )?;
            models.insert(model_id, model);
        }
        let first = models.keys().next().cloned();
        info!("Restored {} model(s) from '{}'", models.len(), self.config.storage_key);
        drop(models);
        self.set_current(first)
    }

    pub fn config(&self) -> &OrigraphConfig {
        &self.config
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Create an empty model and make it the current one
    pub fn create_model(&self, name: Option<&str>) -> OrigraphResult<NetworkModel> {
        let name = name.unwrap_or(&self.config.default_model_name).to_string();
        let model = NetworkModel::with_parts(
            Uuid::new_v4().to_string(),
            name,
            self.functions.clone(),
            self.bus.clone(),
            self.config.clone(),
        );
        self.register(model.clone())?;
        info!("Created model {} ({})", model.model_id(), model.name()?);
        Ok(model)
    }

    fn register(&self, model: NetworkModel) -> OrigraphResult<()> {
        let model_id = model.model_id().to_string();
        self.models_write()?.insert(model_id.clone(), model);
        self.set_current(Some(model_id.clone()))?;
        self.announce(ModelUpdated::new(model_id));
        Ok(())
    }

    fn announce(&self, event: ModelUpdated) {
        if let Err(e) = self.bus.publish(event) {
            warn!("Failed to announce model update: {}", e);
        }
    }

    /// Describe a model's classes and tables as a new, registered model
    pub fn create_schema_model(&self, model_id: &str) -> OrigraphResult<NetworkModel> {
        let schema = self.model(model_id)?.create_schema_model()?;
        self.register(schema.clone())?;
        Ok(schema)
    }

    pub fn model(&self, model_id: &str) -> OrigraphResult<NetworkModel> {
        self.models_read()?
            .get(model_id)
            .cloned()
            .ok_or_else(|| OrigraphError::ModelNotFound(model_id.to_string()))
    }

    pub fn models(&self) -> OrigraphResult<Vec<NetworkModel>> {
        Ok(self.models_read()?.values().cloned().collect())
    }

    pub fn current_model(&self) -> OrigraphResult<Option<NetworkModel>> {
        let current = self
            .current_model_id
            .read()
            .map_err(|e| OrigraphError::Lock(format!("current model: {}", e)))?
            .clone();
        match current {
            Some(model_id) => Ok(self.models_read()?.get(&model_id).cloned()),
            None => Ok(None),
        }
    }

    pub fn set_current_model(&self, model_id: &str) -> OrigraphResult<()> {
        self.model(model_id)?;
        self.set_current(Some(model_id.to_string()))
    }

    pub fn delete_model(&self, model_id: &str) -> OrigraphResult<()> {
        let remaining_first = {
            let mut models = self.models_write()?;
            models
                .remove(model_id)
                .ok_or_else(|| OrigraphError::ModelNotFound(model_id.to_string()))?;
            models.keys().next().cloned()
        };
        let current_lost = self.current_model()?.is_none();
        if current_lost {
            self.set_current(remaining_first)?;
        }
        if let Err(e) = self.bus.publish(ModelDeleted::new(model_id)) {
            warn!("Failed to announce deletion of model {}: {}", model_id, e);
        }
        self.announce(ModelUpdated::new(model_id));
        info!("Deleted model {}", model_id);
        Ok(())
    }

    pub fn delete_all_models(&self) -> OrigraphResult<()> {
        let model_ids: Vec<String> = self.models_read()?.keys().cloned().collect();
        for model_id in model_ids {
            self.delete_model(&model_id)?;
        }
        Ok(())
    }

    /// Persist every model if any change was announced since the last flush.
    /// Returns whether anything was written.
    pub fn flush(&self) -> OrigraphResult<bool> {
        let pending = self
            .updates
            .lock()
            .map_err(|e| OrigraphError::Lock(format!("update consumer: {}", e)))?
            .drain();
        if pending.is_empty() {
            return Ok(false);
        }
        debug!("Flushing after {} model update(s)", pending.len());
        self.save()?;
        Ok(true)
    }

    /// Write every model to the store now
    pub fn save(&self) -> OrigraphResult<()> {
        let models = self.models()?;
        let mut snapshots = Map::new();
        for model in &models {
            snapshots.insert(
                model.model_id().to_string(),
                serde_json::to_value(model.to_snapshot()?)?,
            );
        }
        self.store
            .put(&self.config.storage_key, &Value::Object(snapshots))?;
        info!("Saved {} model(s) to '{}'", models.len(), self.config.storage_key);
        Ok(())
    }
}

impl std::fmt::Debug for Origraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Origraph")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
