//! Sample services hosted by the `pipewright` binary.
//!
//! `contacts` is a CRUD service over the document store that relays every
//! change to [`CONTACT_CHANGES_TOPIC`]. `audit` subscribes to that topic and
//! writes one audit entry per change, committing its idempotency record in
//! the same transaction as the entry.

use std::sync::Arc;

use chrono::Utc;
use http::StatusCode;
use pipewright_core::{
    CallerContext, Change, ChangeType, FieldRule, FnDefault, Record, Schema, ValueKind,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::events::{ChangeRelay, EventCall, EventSubscription, FnEventHandler};
use crate::service::{
    FnHandler, HandlerError, HandlerResponse, HandlerSelector, Route, RouteRequest,
    ServiceDefinition,
};
use crate::storage::{SharedStore, StoreError, Transaction};

pub const CONTACTS_COLLECTION: &str = "contacts";
pub const AUDIT_COLLECTION: &str = "audit";
pub const CONTACT_CHANGES_TOPIC: &str = "contact-changes";

fn store_failure(err: StoreError) -> HandlerError {
    HandlerError::from(anyhow::Error::from(err))
}

fn not_found(id: &str) -> HandlerError {
    HandlerError::new(StatusCode::NOT_FOUND, format!("contact {id} not found"))
}

fn contact_id(req: &RouteRequest) -> Result<String, HandlerError> {
    req.ctx
        .param("id")
        .map(str::to_string)
        .ok_or_else(|| HandlerError::new(StatusCode::BAD_REQUEST, "missing contact id"))
}

fn contacts_schema() -> Schema {
    Schema::builder()
        .field("name", FieldRule::new(ValueKind::String).required())
        .field(
            "email",
            FieldRule::new(ValueKind::String)
                .visibility("internal")
                .modify_with(|value: Value, _record: &Record, _ctx| {
                    Ok(match value {
                        Value::String(email) => Value::String(email.trim().to_lowercase()),
                        other => other,
                    })
                }),
        )
        .field(
            "tags",
            FieldRule::new(ValueKind::Array).default_value(json!([])),
        )
        .field(
            "createdAt",
            FieldRule::new(ValueKind::String)
                .read_only()
                .default_with(FnDefault(|_: &Record, _: &CallerContext| {
                    Ok::<_, anyhow::Error>(Value::String(Utc::now().to_rfc3339()))
                })),
        )
        .build()
}

async fn publish_change(relay: &ChangeRelay, source: &ServiceDefinition, change: Change) {
    match relay.relay(source, change).await {
        Ok(results) => {
            for (function, result) in results {
                if let Err(e) = result {
                    warn!(%function, error = %e, "change subscriber failed");
                }
            }
        }
        Err(e) => warn!(error = %e, "change could not be relayed"),
    }
}

/// CRUD over [`CONTACTS_COLLECTION`]. Deleting requires the `admin` label.
#[must_use]
pub fn contacts_service(store: SharedStore, changes: Arc<ChangeRelay>) -> ServiceDefinition {
    let source = Arc::new(
        ServiceDefinition::new(CONTACTS_COLLECTION).publish_changes(CONTACT_CHANGES_TOPIC),
    );

    let create = {
        let (store, changes, source) = (SharedStore::clone(&store), Arc::clone(&changes), Arc::clone(&source));
        FnHandler(move |req: RouteRequest| {
            let (store, changes, source) = (SharedStore::clone(&store), Arc::clone(&changes), Arc::clone(&source));
            async move {
                let id = uuid::Uuid::new_v4().to_string();
                let mut record = req.body;
                if let Value::Object(fields) = &mut record {
                    fields.insert("id".into(), Value::String(id.clone()));
                }
                store
                    .store(CONTACTS_COLLECTION, &id, record.clone())
                    .await
                    .map_err(store_failure)?;
                publish_change(&changes, &source, Change::Created(record.clone())).await;
                Ok::<_, HandlerError>(Some(HandlerResponse::new(StatusCode::CREATED, record)))
            }
        })
    };

    let list = {
        let store = SharedStore::clone(&store);
        FnHandler(move |_req: RouteRequest| {
            let store = SharedStore::clone(&store);
            async move {
                let contacts: Vec<Value> = store
                    .scan(CONTACTS_COLLECTION)
                    .await
                    .map_err(store_failure)?
                    .into_iter()
                    .map(|(_, document)| document)
                    .collect();
                Ok::<_, HandlerError>(Some(HandlerResponse::ok(Value::Array(contacts))))
            }
        })
    };

    let fetch = {
        let store = SharedStore::clone(&store);
        FnHandler(move |req: RouteRequest| {
            let store = SharedStore::clone(&store);
            async move {
                let id = contact_id(&req)?;
                match store.load(CONTACTS_COLLECTION, &id).await.map_err(store_failure)? {
                    Some(contact) => Ok(Some(HandlerResponse::ok(contact))),
                    None => Err(not_found(&id)),
                }
            }
        })
    };

    let update = {
        let (store, changes, source) = (SharedStore::clone(&store), Arc::clone(&changes), Arc::clone(&source));
        FnHandler(move |req: RouteRequest| {
            let (store, changes, source) = (SharedStore::clone(&store), Arc::clone(&changes), Arc::clone(&source));
            async move {
                let id = contact_id(&req)?;
                let mut tx = Transaction::begin(SharedStore::clone(&store));
                let before = tx
                    .get(CONTACTS_COLLECTION, &id)
                    .await
                    .map_err(store_failure)?
                    .ok_or_else(|| not_found(&id))?;
                let mut after = before.clone();
                if let (Value::Object(target), Value::Object(patch)) = (&mut after, req.body) {
                    target.extend(patch);
                }
                tx.set(CONTACTS_COLLECTION, &id, after.clone());
                tx.commit().await.map_err(|e| match e {
                    StoreError::Conflict { .. } => {
                        HandlerError::new(StatusCode::CONFLICT, "contact changed concurrently")
                    }
                    other => store_failure(other),
                })?;
                publish_change(&changes, &source, Change::Updated { before, after: after.clone() }).await;
                Ok::<_, HandlerError>(Some(HandlerResponse::ok(after)))
            }
        })
    };

    let remove = {
        let (store, changes, source) = (SharedStore::clone(&store), Arc::clone(&changes), Arc::clone(&source));
        FnHandler(move |req: RouteRequest| {
            let (store, changes, source) = (SharedStore::clone(&store), Arc::clone(&changes), Arc::clone(&source));
            async move {
                let id = contact_id(&req)?;
                let Some(contact) = store.load(CONTACTS_COLLECTION, &id).await.map_err(store_failure)? else {
                    return Err(not_found(&id));
                };
                store.delete(CONTACTS_COLLECTION, &id).await.map_err(store_failure)?;
                publish_change(&changes, &source, Change::Deleted(contact)).await;
                Ok::<Option<HandlerResponse>, HandlerError>(None)
            }
        })
    };

    ServiceDefinition::new(CONTACTS_COLLECTION)
        .schema(contacts_schema())
        .with_modifiers()
        .keep_alive()
        .publish_changes(CONTACT_CHANGES_TOPIC)
        .route(Route::post("/", HandlerSelector::single(create)))
        .route(Route::get("/", HandlerSelector::single(list)).ignore_body())
        .route(Route::get("/{id}", HandlerSelector::single(fetch)).ignore_body())
        .route(Route::put("/{id}", HandlerSelector::single(update)))
        .route(
            Route::delete("/{id}", HandlerSelector::single(remove))
                .privilege("admin")
                .ignore_body(),
        )
}

/// Writes one [`AUDIT_COLLECTION`] entry per relayed contact change.
#[must_use]
pub fn audit_service(store: SharedStore) -> ServiceDefinition {
    let record = FnEventHandler(move |call: EventCall| {
        let store = SharedStore::clone(&store);
        async move {
            let mut tx = Transaction::begin(store);
            if let Some(commit) = &call.commit {
                if commit.is_complete_in(&mut tx).await? {
                    return Ok(());
                }
                commit.mark_complete_in(&mut tx)?;
            }
            let envelope = &call.delivery.envelope;
            tx.set(
                AUDIT_COLLECTION,
                call.delivery.event_id(),
                json!({
                    "change": envelope.change_type.map(ChangeType::as_str),
                    "contact": envelope.data.get("id"),
                    "recordedAt": Utc::now().to_rfc3339(),
                }),
            );
            tx.commit().await?;
            Ok::<_, anyhow::Error>(())
        }
    });

    ServiceDefinition::new(AUDIT_COLLECTION).event(
        EventSubscription::new(CONTACT_CHANGES_TOPIC, record).ensure_idempotent(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventDispatcher;
    use crate::service::{build_route_pipeline, PipelineConfig, RouteBinding};
    use crate::storage::MemoryDocumentStore;
    use tower::ServiceExt;

    fn wiring() -> (SharedStore, ServiceDefinition) {
        let store: SharedStore = Arc::new(MemoryDocumentStore::new());
        let config = PipelineConfig::builder().build();
        let audit = audit_service(SharedStore::clone(&store));
        let dispatcher = Arc::new(EventDispatcher::new([&audit], &store, &config));
        let contacts = contacts_service(SharedStore::clone(&store), Arc::new(ChangeRelay::new(dispatcher)));
        (store, contacts)
    }

    #[tokio::test]
    async fn created_contacts_are_prepared_stored_and_audited() {
        let (store, contacts) = wiring();
        let route = contacts.routes[0].clone();
        let pipeline = build_route_pipeline(
            Arc::new(RouteBinding::new(&contacts, route)),
            &PipelineConfig::builder().build(),
        );

        let req = RouteRequest::new(http::Method::POST, "/contacts")
            .with_body(json!({"name": "Ada", "email": "  ADA@Example.com "}));
        let resp = pipeline.oneshot(req).await.unwrap();
        assert_eq!(resp.status, StatusCode::CREATED);

        let body = resp.body.unwrap();
        assert_eq!(body["email"], "ada@example.com");
        assert_eq!(body["tags"], json!([]));
        assert!(body["createdAt"].is_string());

        let stored = store.scan(CONTACTS_COLLECTION).await.unwrap();
        assert_eq!(stored.len(), 1);
        let audit = store.scan(AUDIT_COLLECTION).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].1["change"], "create");
    }

    #[tokio::test]
    async fn missing_contacts_are_not_found() {
        let (_store, contacts) = wiring();
        let route = contacts.routes[2].clone();
        let pipeline = build_route_pipeline(
            Arc::new(RouteBinding::new(&contacts, route)),
            &PipelineConfig::builder().build(),
        );
        let mut req = RouteRequest::new(http::Method::GET, "/contacts/nope");
        req.ctx.params.insert("id".into(), "nope".into());
        let err = pipeline.oneshot(req).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
