//! In-memory [`ContainerRuntime`] recording every call, for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{ContainerOptions, ContainerRuntime, ContainerState, RuntimeError};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create {
        image: String,
        options: ContainerOptions,
    },
    Start(String),
    Stop(String),
    Remove {
        id: String,
        force: bool,
    },
    Inspect(String),
    LoadImage(usize),
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    containers: HashMap<String, ContainerState>,
    next_id: usize,
    fail_create: Option<String>,
    fail_remove: Option<String>,
    fail_load: Option<String>,
}

#[derive(Clone, Default)]
pub struct FakeRuntime {
    inner: Arc<Mutex<Inner>>,
}

impl FakeRuntime {
    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn removals(&self, id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Remove { id: removed, .. } if removed == id))
            .count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().unwrap().containers.contains_key(id)
    }

    pub fn set_state(&self, id: &str, state: ContainerState) {
        self.inner
            .lock()
            .unwrap()
            .containers
            .insert(id.to_owned(), state);
    }

    pub fn fail_create(&self, message: &str) {
        self.inner.lock().unwrap().fail_create = Some(message.to_owned());
    }

    pub fn fail_remove(&self, message: &str) {
        self.inner.lock().unwrap().fail_remove = Some(message.to_owned());
    }

    pub fn fail_load(&self, message: &str) {
        self.inner.lock().unwrap().fail_load = Some(message.to_owned());
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_container(
        &self,
        image: &str,
        options: &ContainerOptions,
    ) -> Result<String, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Create {
            image: image.to_owned(),
            options: options.clone(),
        });
        if let Some(message) = &inner.fail_create {
            return Err(RuntimeError::Failure(message.clone()));
        }

        inner.next_id += 1;
        let id = format!("c{}", inner.next_id);
        inner.containers.insert(
            id.clone(),
            ContainerState {
                status: Some("created".to_owned()),
                ..Default::default()
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Start(id.to_owned()));
        match inner.containers.get_mut(id) {
            Some(state) => {
                state.running = true;
                state.status = Some("running".to_owned());
                Ok(())
            }
            None => Err(RuntimeError::NotFound(id.to_owned())),
        }
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Stop(id.to_owned()));
        match inner.containers.get_mut(id) {
            Some(state) => {
                state.running = false;
                state.status = Some("exited".to_owned());
                Ok(())
            }
            None => Err(RuntimeError::NotFound(id.to_owned())),
        }
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Remove {
            id: id.to_owned(),
            force,
        });
        if let Some(message) = &inner.fail_remove {
            return Err(RuntimeError::Failure(message.clone()));
        }
        match inner.containers.remove(id) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NotFound(id.to_owned())),
        }
    }

    async fn inspect(&self, id: &str) -> Result<Option<ContainerState>, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Inspect(id.to_owned()));
        match inner.containers.get(id) {
            Some(state) => Ok(Some(state.clone())),
            None => Err(RuntimeError::NotFound(id.to_owned())),
        }
    }

    async fn load_image(&self, image: Vec<u8>) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::LoadImage(image.len()));
        match &inner.fail_load {
            Some(message) => Err(RuntimeError::Failure(message.clone())),
            None => Ok(()),
        }
    }
}
