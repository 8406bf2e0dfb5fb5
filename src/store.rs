use crate::compose::write_replacing;
use crate::environment::Environment;
use crate::{Result, TankerError, log_debug};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Durable, insertion-ordered collection of environment records.
pub trait EnvironmentStore: Send + Sync {
    fn list(&self) -> Result<Vec<Environment>>;

    fn get(&self, id: Uuid) -> Result<Environment>;

    /// Add a record. Fails if the id is already present.
    fn append(&self, environment: Environment) -> Result<()>;

    /// Apply `mutator` to the record and persist the whole collection.
    fn update(&self, id: Uuid, mutator: &mut dyn FnMut(&mut Environment)) -> Result<Environment>;

    fn remove(&self, id: Uuid) -> Result<Environment>;
}

/// On-disk layout: a single `environments` key holding the full list.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    environments: Vec<Environment>,
}

fn not_found(id: Uuid) -> TankerError {
    TankerError::EnvironmentNotFound(id.to_string())
}

fn append_to(environments: &mut Vec<Environment>, environment: Environment) -> Result<()> {
    if environments.iter().any(|e| e.id == environment.id) {
        return Err(TankerError::Validation(format!(
            "Environment id {} already exists",
            environment.id
        )));
    }
    environments.push(environment);
    Ok(())
}

fn update_in(
    environments: &mut [Environment],
    id: Uuid,
    mutator: &mut dyn FnMut(&mut Environment),
) -> Result<Environment> {
    let env = environments
        .iter_mut()
        .find(|e| e.id == id)
        .ok_or_else(|| not_found(id))?;
    mutator(env);
    // The id is the key; a mutator cannot re-key a record.
    env.id = id;
    Ok(env.clone())
}

fn remove_from(environments: &mut Vec<Environment>, id: Uuid) -> Result<Environment> {
    let index = environments
        .iter()
        .position(|e| e.id == id)
        .ok_or_else(|| not_found(id))?;
    Ok(environments.remove(index))
}

/// JSON file store. Every mutation is a whole-document read-modify-write,
/// replaced atomically on disk.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<Environment>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path).map_err(|e| TankerError::io(&self.path, e))?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        let document: StoreDocument = serde_json::from_str(&contents)?;
        Ok(document.environments)
    }

    fn write(&self, environments: Vec<Environment>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| TankerError::io(parent, e))?;
        }
        let count = environments.len();
        let contents = serde_json::to_string_pretty(&StoreDocument { environments })?;
        write_replacing(&self.path, contents.as_bytes())?;
        log_debug!("Persisted {} environments to {}", count, self.path.display());
        Ok(())
    }

    fn modify<T>(&self, change: impl FnOnce(&mut Vec<Environment>) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut environments = self.read()?;
        let outcome = change(&mut environments)?;
        self.write(environments)?;
        Ok(outcome)
    }
}

impl EnvironmentStore for JsonFileStore {
    fn list(&self) -> Result<Vec<Environment>> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.read()
    }

    fn get(&self, id: Uuid) -> Result<Environment> {
        self.list()?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| not_found(id))
    }

    fn append(&self, environment: Environment) -> Result<()> {
        self.modify(|environments| append_to(environments, environment))
    }

    fn update(&self, id: Uuid, mutator: &mut dyn FnMut(&mut Environment)) -> Result<Environment> {
        self.modify(|environments| update_in(environments, id, mutator))
    }

    fn remove(&self, id: Uuid) -> Result<Environment> {
        self.modify(|environments| remove_from(environments, id))
    }
}

/// Process-local store, used by tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryStore {
    environments: Mutex<Vec<Environment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, Vec<Environment>> {
        self.environments.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl EnvironmentStore for MemoryStore {
    fn list(&self) -> Result<Vec<Environment>> {
        Ok(self.entries().clone())
    }

    fn get(&self, id: Uuid) -> Result<Environment> {
        self.entries()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    fn append(&self, environment: Environment) -> Result<()> {
        append_to(&mut self.entries(), environment)
    }

    fn update(&self, id: Uuid, mutator: &mut dyn FnMut(&mut Environment)) -> Result<Environment> {
        update_in(&mut self.entries(), id, mutator)
    }

    fn remove(&self, id: Uuid) -> Result<Environment> {
        remove_from(&mut self.entries(), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentStatus;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn sample(name: &str) -> Environment {
        Environment::new(
            name.to_string(),
            "node-react".to_string(),
            PathBuf::from(format!("/tmp/{}", name)),
        )
    }

    fn exercise(store: &dyn EnvironmentStore) {
        let first = sample("alpha");
        let second = sample("beta");
        let third = sample("gamma");
        store.append(first.clone()).unwrap();
        store.append(second.clone()).unwrap();
        store.append(third.clone()).unwrap();

        let dup = store.append(first.clone()).unwrap_err();
        assert_eq!(dup.kind(), crate::ErrorKind::Validation);

        let updated = store
            .update(second.id, &mut |env| env.mark_running())
            .unwrap();
        assert_eq!(updated.status, EnvironmentStatus::Running);
        assert_eq!(store.get(second.id).unwrap().status, EnvironmentStatus::Running);

        let removed = store.remove(first.id).unwrap();
        assert_eq!(removed.name, "alpha");
        assert!(store.get(first.id).unwrap_err().is_not_found());
        assert!(store.remove(first.id).unwrap_err().is_not_found());
        assert!(
            store
                .update(first.id, &mut |env| env.mark_stopped())
                .unwrap_err()
                .is_not_found()
        );

        let names: Vec<String> = store.list().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["beta", "gamma"]);

        let ids: HashSet<Uuid> = store.list().unwrap().iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn memory_store_semantics() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn json_store_semantics() {
        let dir = tempdir().unwrap();
        exercise(&JsonFileStore::new(dir.path().join("environments.json")));
    }

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("environments.json");

        let env = sample("persisted");
        JsonFileStore::new(&path).append(env.clone()).unwrap();

        let reopened = JsonFileStore::new(&path);
        let loaded = reopened.get(env.id).unwrap();
        assert_eq!(loaded, env);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["environments"][0]["name"], "persisted");
        assert_eq!(raw["environments"][0]["status"], "stopped");
    }

    #[test]
    fn missing_or_empty_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("environments.json");
        let store = JsonFileStore::new(&path);
        assert!(store.list().unwrap().is_empty());

        fs::write(&path, "").unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_a_serialization_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("environments.json");
        fs::write(&path, "{\"environments\": [").unwrap();
        let err = JsonFileStore::new(&path).list().unwrap_err();
        assert!(matches!(err, TankerError::Serialization(_)));
    }

    #[test]
    fn mutator_cannot_change_the_key() {
        let store = MemoryStore::new();
        let env = sample("keyed");
        store.append(env.clone()).unwrap();
        let updated = store
            .update(env.id, &mut |e| e.id = Uuid::new_v4())
            .unwrap();
        assert_eq!(updated.id, env.id);
    }
}
