//! PostgreSQL store integration tests
//!
//! These need a reachable database in `DATABASE_URL`; without one each test
//! prints a skip notice and returns. Every test works in fresh tenants, so
//! runs do not interfere with each other.

use chrono::{Duration, Utc};
use switchboard_core::config::DatabaseConfig;
use switchboard_core::models::ChatKind;
use switchboard_core::store::{ChatFilter, ChatUpsert, NewGrant, NewMessage, PageRequest, PgStore};
use switchboard_core::{db, Store};
use uuid::Uuid;

async fn make_store() -> Option<PgStore> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let config = DatabaseConfig {
        backend: "postgres".to_string(),
        url,
        max_connections: 2,
    };
    let pool = db::create_pool(&config).await.ok()?;
    db::run_migrations(&pool).await.ok()?;
    Some(PgStore::new(pool))
}

fn upsert(session_id: Uuid, tenant_id: Uuid, external_id: &str, unread: i32) -> ChatUpsert {
    ChatUpsert {
        session_id,
        tenant_id,
        external_id: external_id.to_string(),
        name: format!("Customer {}", external_id),
        kind: ChatKind::Individual,
        last_message_at: Utc::now(),
        last_message_text: "hello".to_string(),
        unread_increment: unread,
    }
}

fn message(chat_id: Uuid, session_id: Uuid, tenant_id: Uuid, external_id: &str) -> NewMessage {
    NewMessage {
        chat_id,
        session_id,
        tenant_id,
        external_id: external_id.to_string(),
        from_me: false,
        sender_id: "+2000".to_string(),
        sender_name: None,
        body: "hello".to_string(),
        message_type: "text".to_string(),
        sent_at: Utc::now(),
        manager_id: None,
    }
}

// ===========================================================================
// TEST 1: session rows through their lifecycle
// ===========================================================================
#[tokio::test]
async fn test_session_lifecycle_rows() {
    let store = match make_store().await {
        Some(s) => s,
        None => {
            eprintln!("Skipping test_session_lifecycle_rows: DATABASE_URL unavailable");
            return;
        }
    };
    let tenant = Uuid::new_v4();
    let admin = Uuid::new_v4();

    let session = store.insert_session(tenant, admin).await.unwrap();
    assert!(session.is_active);
    assert!(session.is_placeholder());
    assert_eq!(
        store.active_session_for_tenant(tenant).await.unwrap().map(|s| s.id),
        Some(session.id)
    );

    let paired = store
        .mark_connected(session.id, "+1000", Some("Shop"))
        .await
        .unwrap()
        .unwrap();
    assert!(paired.is_connected);
    assert_eq!(paired.phone_number.as_deref(), Some("+1000"));

    // A second row of the same tenant may not claim the same identity.
    let other = store.insert_session(tenant, admin).await.unwrap();
    let err = store.mark_connected(other.id, "+1000", None).await.unwrap_err();
    assert!(err.is_conflict());
    let holders = store
        .find_sessions_by_phone(tenant, "+1000", other.id)
        .await
        .unwrap();
    assert_eq!(holders.len(), 1);
    assert!(store.delete_session(other.id).await.unwrap());

    // Tenant scoping.
    assert!(store
        .get_tenant_session(Uuid::new_v4(), session.id)
        .await
        .unwrap()
        .is_none());

    let gone = store.deactivate_session(session.id).await.unwrap().unwrap();
    assert!(!gone.is_active);
    assert!(store.active_session_for_tenant(tenant).await.unwrap().is_none());
    assert!(store.delete_session(session.id).await.unwrap());
}

// ===========================================================================
// TEST 2: chats, messages and read acknowledgement
// ===========================================================================
#[tokio::test]
async fn test_chat_and_message_rows() {
    let store = match make_store().await {
        Some(s) => s,
        None => {
            eprintln!("Skipping test_chat_and_message_rows: DATABASE_URL unavailable");
            return;
        }
    };
    let tenant = Uuid::new_v4();
    let session = store.insert_session(tenant, Uuid::new_v4()).await.unwrap();

    let chat = store.upsert_chat(upsert(session.id, tenant, "C1", 1)).await.unwrap();
    let chat = store.upsert_chat(upsert(session.id, tenant, "C1", 1)).await.unwrap();
    assert_eq!(chat.unread_count, 2);

    assert!(store
        .insert_message(message(chat.id, session.id, tenant, "m1"))
        .await
        .unwrap()
        .is_some());
    assert!(store
        .insert_message(message(chat.id, session.id, tenant, "m1"))
        .await
        .unwrap()
        .is_none());
    assert!(store.message_exists(session.id, "m1").await.unwrap());
    store
        .insert_message(message(chat.id, session.id, tenant, "m2"))
        .await
        .unwrap();

    let chats = store
        .list_chats(
            tenant,
            session.id,
            &ChatFilter {
                unread_only: true,
                ..Default::default()
            },
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(chats.total, 1);

    let read = store
        .mark_chat_read(tenant, session.id, chat.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read.marked, 2);
    assert_eq!(read.chat.unread_count, 0);

    let messages = store
        .list_messages(tenant, session.id, chat.id, PageRequest::new(1, 1))
        .await
        .unwrap();
    assert_eq!(messages.total, 2);
    assert_eq!(messages.items.len(), 1);
    assert!(messages.items[0].is_read);

    assert!(store.delete_session(session.id).await.unwrap());
}

// ===========================================================================
// TEST 3: grants upsert in place; retention purge spares active rows
// ===========================================================================
#[tokio::test]
async fn test_grants_and_purge() {
    let store = match make_store().await {
        Some(s) => s,
        None => {
            eprintln!("Skipping test_grants_and_purge: DATABASE_URL unavailable");
            return;
        }
    };
    let tenant = Uuid::new_v4();
    let admin = Uuid::new_v4();
    let manager = Uuid::new_v4();
    let session = store.insert_session(tenant, admin).await.unwrap();

    let grant = |can_write| NewGrant {
        session_id: session.id,
        manager_id: manager,
        tenant_id: tenant,
        can_read: true,
        can_write,
        can_manage_chats: false,
        granted_by: admin,
    };
    store.upsert_grant(grant(true)).await.unwrap();
    let updated = store.upsert_grant(grant(false)).await.unwrap();
    assert!(!updated.can_write);
    assert_eq!(store.list_grants(tenant, session.id).await.unwrap().len(), 1);
    assert!(store
        .find_grant(Uuid::new_v4(), session.id, manager)
        .await
        .unwrap()
        .is_none());
    assert!(store.delete_grant(tenant, session.id, manager).await.unwrap());
    assert!(!store.delete_grant(tenant, session.id, manager).await.unwrap());

    // An active row survives any cutoff; once inactive and unpaired it goes.
    let purged = store
        .purge_stale_sessions(Utc::now() + Duration::hours(1))
        .await
        .unwrap();
    assert!(purged.iter().all(|s| s.id != session.id));

    store.deactivate_session(session.id).await.unwrap();
    let purged = store
        .purge_stale_sessions(Utc::now() - Duration::hours(24))
        .await
        .unwrap();
    assert!(purged.iter().any(|s| s.id == session.id));
    assert!(store.get_session(session.id).await.unwrap().is_none());
}
