//! Mock cloud client for exercising the sync plane without a broker.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use um_protocol::errors::ShadowError;

use crate::sync::cloud::CloudClient;

/// Records cloud writes and serves canned cloud documents.
pub struct MockCloudClient {
    updates: Mutex<Vec<(String, String, Value)>>,
    deletes: Mutex<Vec<(String, String, Value)>>,
    shadows: Mutex<HashMap<(String, String), Value>>,
    fail_with: Mutex<Option<ShadowError>>,
    next_version: Mutex<u64>,
}

impl MockCloudClient {
    pub fn new() -> Self {
        Self {
            updates: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            shadows: Mutex::new(HashMap::new()),
            fail_with: Mutex::new(None),
            next_version: Mutex::new(0),
        }
    }

    /// Serve `document` for subsequent `get_shadow` calls.
    pub fn set_shadow(&self, thing_name: &str, shadow_name: &str, document: Value) {
        self.shadows
            .lock()
            .unwrap()
            .insert((thing_name.to_string(), shadow_name.to_string()), document);
    }

    /// Fail every call with `error` until cleared.
    pub fn fail_with(&self, error: Option<ShadowError>) {
        *self.fail_with.lock().unwrap() = error;
    }

    pub fn updates(&self) -> Vec<(String, String, Value)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<(String, String, Value)> {
        self.deletes.lock().unwrap().clone()
    }

    fn check_failure(&self) -> Result<(), ShadowError> {
        match &*self.fail_with.lock().unwrap() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl Default for MockCloudClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudClient for MockCloudClient {
    async fn get_shadow(
        &self,
        thing_name: &str,
        shadow_name: &str,
    ) -> Result<Option<Value>, ShadowError> {
        self.check_failure()?;
        Ok(self
            .shadows
            .lock()
            .unwrap()
            .get(&(thing_name.to_string(), shadow_name.to_string()))
            .cloned())
    }

    async fn update_shadow(
        &self,
        thing_name: &str,
        shadow_name: &str,
        payload: &Value,
    ) -> Result<Option<u64>, ShadowError> {
        self.check_failure()?;
        self.updates.lock().unwrap().push((
            thing_name.to_string(),
            shadow_name.to_string(),
            payload.clone(),
        ));
        let mut version = self.next_version.lock().unwrap();
        *version += 1;
        Ok(Some(*version))
    }

    async fn delete_shadow(
        &self,
        thing_name: &str,
        shadow_name: &str,
        payload: &Value,
    ) -> Result<(), ShadowError> {
        self.check_failure()?;
        self.deletes.lock().unwrap().push((
            thing_name.to_string(),
            shadow_name.to_string(),
            payload.clone(),
        ));
        Ok(())
    }
}
