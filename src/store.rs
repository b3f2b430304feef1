use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result, ValidationError};
use crate::procedure::{Procedure, ProcedureDraft, ProcedurePatch, DEFAULT_IMPLEMENTATION};
use crate::schema::ParameterSchema;

/// In-memory procedure registry.
///
/// Constructed once at startup and shared by reference. Records are kept
/// in insertion order. Each mutation runs under a single write-lock
/// acquisition, so readers never observe a half-applied change.
/// Nothing is persisted.
#[derive(Default)]
pub struct ProcedureStore {
    procedures: RwLock<IndexMap<String, Procedure>>,
}

impl ProcedureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new procedure, assigning its id and timestamp.
    pub fn create(&self, draft: ProcedureDraft) -> Result<Procedure> {
        let name = required(draft.name, "name")?;
        let framework = required(draft.framework, "framework")?;
        let protocol = required(draft.protocol, "protocol")?;
        let method = required(draft.method, "method")?;

        let params = draft.params.unwrap_or_default();
        ParameterSchema::new(&params).check_declarations()?;

        let procedure = Procedure {
            id: Uuid::new_v4().to_string(),
            name,
            framework,
            protocol,
            method,
            params,
            implementation: draft
                .implementation
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_IMPLEMENTATION.to_string()),
            description: draft.description.unwrap_or_default(),
            created_at: Utc::now(),
        };

        self.write()
            .insert(procedure.id.clone(), procedure.clone());
        info!("Procedure created: {} ({})", procedure.name, procedure.id);
        Ok(procedure)
    }

    /// All procedures in insertion order.
    pub fn list(&self) -> Vec<Procedure> {
        self.read().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Result<Procedure> {
        self.read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Merges `patch` over the stored record. The record keeps its id
    /// and its position in the listing.
    pub fn update(&self, id: &str, patch: ProcedurePatch) -> Result<Procedure> {
        if let Some(params) = &patch.params {
            ParameterSchema::new(params).check_declarations()?;
        }
        if patch.id.as_deref().is_some_and(|other| other != id) {
            debug!("Ignoring id in update payload for {id}");
        }

        let mut procedures = self.write();
        let current = procedures
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        current.apply(patch);
        info!("Procedure updated: {} ({id})", current.name);
        Ok(current.clone())
    }

    /// Removes a procedure. Deleting an unknown id is not an error; the
    /// return value only says whether something was removed.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self.write().shift_remove(id).is_some();
        if removed {
            info!("Procedure deleted: {id}");
        } else {
            debug!("Delete of unknown procedure {id} ignored");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, Procedure>> {
        self.procedures.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, Procedure>> {
        self.procedures.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn required(value: Option<String>, field: &str) -> std::result::Result<String, ValidationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField(field.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::{ParamSpec, ParamType};
    use serde_json::json;

    fn draft(name: &str) -> ProcedureDraft {
        ProcedureDraft {
            name: Some(name.to_string()),
            framework: Some("grpc".to_string()),
            protocol: Some("tcp".to_string()),
            method: Some("POST".to_string()),
            ..Default::default()
        }
    }

    fn names(store: &ProcedureStore) -> Vec<String> {
        store.list().into_iter().map(|p| p.name).collect()
    }

    #[test]
    fn test_create_assigns_id_and_defaults() {
        let store = ProcedureStore::new();
        let proc = store.create(draft("ping")).unwrap();
        assert!(!proc.id.is_empty());
        assert!(proc.params.is_empty());
        assert_eq!(proc.implementation, DEFAULT_IMPLEMENTATION);
        assert_eq!(proc.description, "");
        assert_eq!(store.get(&proc.id).unwrap(), proc);
    }

    #[test]
    fn test_create_ids_are_unique() {
        let store = ProcedureStore::new();
        let a = store.create(draft("a")).unwrap();
        let b = store.create(draft("b")).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_create_each_required_field_blank() {
        let store = ProcedureStore::new();
        for field in ["name", "framework", "protocol", "method"] {
            let mut d = draft("x");
            match field {
                "name" => d.name = Some("   ".to_string()),
                "framework" => d.framework = None,
                "protocol" => d.protocol = Some(String::new()),
                _ => d.method = None,
            }
            let err = store.create(d).unwrap_err();
            assert_eq!(
                err,
                Error::Validation(ValidationError::MissingField(field.to_string()))
            );
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_create_all_blank_fails() {
        let store = ProcedureStore::new();
        let err = store.create(ProcedureDraft::default()).unwrap_err();
        assert_eq!(
            err,
            Error::Validation(ValidationError::MissingField("name".to_string()))
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_create_empty_implementation_gets_default() {
        let store = ProcedureStore::new();
        let mut d = draft("x");
        d.implementation = Some(String::new());
        assert_eq!(
            store.create(d).unwrap().implementation,
            DEFAULT_IMPLEMENTATION
        );
    }

    #[test]
    fn test_create_rejects_duplicate_params() {
        let store = ProcedureStore::new();
        let mut d = draft("x");
        d.params = Some(vec![
            ParamSpec::new("a", ParamType::Number, true),
            ParamSpec::new("a", ParamType::Number, false),
        ]);
        assert!(matches!(
            store.create(d),
            Err(Error::Validation(ValidationError::DuplicateParam(_)))
        ));
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let store = ProcedureStore::new();
        assert_eq!(
            store.get("missing").unwrap_err(),
            Error::NotFound("missing".to_string())
        );
    }

    #[test]
    fn test_update_keeps_id() {
        let store = ProcedureStore::new();
        let proc = store.create(draft("original")).unwrap();
        let patch: ProcedurePatch =
            serde_json::from_value(json!({ "id": "other", "name": "renamed" })).unwrap();

        let updated = store.update(&proc.id, patch).unwrap();
        assert_eq!(updated.id, proc.id);
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.created_at, proc.created_at);
        assert!(store.get("other").is_err());
        assert_eq!(store.get(&proc.id).unwrap().name, "renamed");
    }

    #[test]
    fn test_update_unknown_is_not_found() {
        let store = ProcedureStore::new();
        let err = store
            .update("nope", ProcedurePatch::default())
            .unwrap_err();
        assert_eq!(err, Error::NotFound("nope".to_string()));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = ProcedureStore::new();
        store.create(draft("a")).unwrap();
        let before = store.list();

        assert!(!store.delete("never-created"));
        assert_eq!(store.list(), before);

        let id = before[0].id.clone();
        assert!(store.delete(&id));
        assert!(!store.delete(&id));
        assert!(store.is_empty());
    }

    #[test]
    fn test_list_preserves_creation_order() {
        let store = ProcedureStore::new();
        let a = store.create(draft("a")).unwrap();
        let b = store.create(draft("b")).unwrap();
        let c = store.create(draft("c")).unwrap();

        let patch = ProcedurePatch {
            name: Some("a2".to_string()),
            ..Default::default()
        };
        store.update(&a.id, patch).unwrap();
        store.delete(&b.id);
        store.create(draft("d")).unwrap();
        store
            .update(
                &c.id,
                ProcedurePatch {
                    description: Some("third".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(names(&store), vec!["a2", "c", "d"]);
    }
}
