//! Homepage content.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::accounts::{Account, AccountError, Principal};
use crate::storage::Store;

#[derive(Clone, Debug, Serialize)]
pub struct Homepage {
    pub content: BTreeMap<String, String>,
    /// First admin account, shown as the site owner.
    pub owner: Option<Account>,
    /// The viewer's own account when logged in.
    pub viewer: Option<Account>,
}

/// Full replacement of the editable homepage fields. Blank fields are saved
/// as blank.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct SiteContentUpdate {
    pub site_title: String,
    pub tagline: String,
    pub about_me: String,
    pub dream_job_title: String,
    pub dream_job_text: String,
}

impl SiteContentUpdate {
    fn entries(&self) -> [(&'static str, &str); 5] {
        [
            ("site_title", self.site_title.as_str()),
            ("tagline", self.tagline.as_str()),
            ("about_me", self.about_me.as_str()),
            ("dream_job_title", self.dream_job_title.as_str()),
            ("dream_job_text", self.dream_job_text.as_str()),
        ]
    }
}

pub struct SiteService {
    store: Arc<dyn Store>,
}

impl SiteService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// # Errors
    /// Returns an error on storage failures.
    pub async fn homepage(&self, viewer: Option<&Principal>) -> Result<Homepage, AccountError> {
        let content = self.store.load_site_content().await?;
        let owner = self.store.find_first_admin().await?;
        let viewer = match viewer {
            Some(principal) => self.store.find_account(principal.user_id).await?,
            None => None,
        };
        Ok(Homepage {
            content,
            owner,
            viewer,
        })
    }

    /// # Errors
    /// Fails the admin role gate or on storage errors.
    pub async fn update_content(
        &self,
        admin: Option<&Principal>,
        update: &SiteContentUpdate,
    ) -> Result<(), AccountError> {
        let admin = Principal::require_admin(admin)?;
        for (key, value) in update.entries() {
            self.store.upsert_site_content(key, value).await?;
        }
        info!(admin_id = admin.user_id, "homepage content updated");
        Ok(())
    }
}
