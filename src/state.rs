use std::sync::Arc;

use anyhow::Result;

use crate::config::CONFIG;
use crate::imagegen::ModelsLabClient;
use crate::studio::gallery::Gallery;
use crate::studio::repository::StudioRepository;
use crate::studio::StudioSettings;

pub struct AppState<R> {
    pub gallery: Gallery<R>,
    pub settings: StudioSettings,
    pub owner_id: i64,
}

impl<R> Clone for AppState<R> {
    fn clone(&self) -> Self {
        AppState {
            gallery: self.gallery.clone(),
            settings: self.settings.clone(),
            owner_id: self.owner_id,
        }
    }
}

impl<R: StudioRepository> AppState<R> {
    pub fn new(repo: Arc<R>, settings: StudioSettings, owner_id: i64) -> Self {
        AppState {
            gallery: Gallery::new(repo),
            settings,
            owner_id,
        }
    }

    /// Only commands that talk to the backend need an API key, so the client
    /// is built on demand.
    pub fn backend(&self) -> Result<Arc<ModelsLabClient>> {
        let client = ModelsLabClient::new(&CONFIG.modelslab_api_key, &CONFIG.modelslab_base_url)?;
        Ok(Arc::new(client))
    }
}
