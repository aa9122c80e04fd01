mod common;

use std::collections::HashSet;

use chat_delivery_service::error::AppError;
use chat_delivery_service::models::{MemberRole, Principal};

use common::{test_state, MemoryStore};

#[tokio::test]
async fn test_start_direct_rejects_self_and_unknown_users() {
    let store = MemoryStore::with_users(&[(1, "Ann")]);
    let state = test_state(store.clone());

    let err = state
        .conversations
        .start_direct(Principal::new(1), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = state
        .conversations
        .start_direct(Principal::new(1), 404)
        .await
        .unwrap_err();
    assert_eq!(err, AppError::NotFound);
    assert_eq!(store.conversation_count(), 0);
}

#[tokio::test]
async fn test_start_direct_is_idempotent_in_either_direction() {
    let store = MemoryStore::with_users(&[(1, "Ann"), (2, "Bob")]);
    let state = test_state(store.clone());

    let first = state
        .conversations
        .start_direct(Principal::new(1), 2)
        .await
        .unwrap();
    let second = state
        .conversations
        .start_direct(Principal::new(2), 1)
        .await
        .unwrap();

    assert_eq!(first.conversation_id, second.conversation_id);
    assert_eq!(first.display_name.as_deref(), Some("Bob"));
    assert_eq!(second.display_name.as_deref(), Some("Ann"));
    assert_eq!(store.conversation_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_direct_starts_converge_on_one_conversation() {
    let store = MemoryStore::with_users(&[(1, "Ann"), (2, "Bob")]);
    let state = test_state(store.clone());

    let mut handles = Vec::new();
    for n in 0..16 {
        let conversations = state.conversations.clone();
        let (caller, other) = if n % 2 == 0 { (1, 2) } else { (2, 1) };
        handles.push(tokio::spawn(async move {
            conversations
                .start_direct(Principal::new(caller), other)
                .await
                .map(|s| s.conversation_id)
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap().unwrap());
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(store.conversation_count(), 1);

    let conversation_id = ids.into_iter().next().unwrap();
    let participants = state
        .conversations
        .participants(Principal::new(1), conversation_id)
        .await
        .unwrap();
    assert_eq!(participants.len(), 2);
    assert!(participants.iter().all(|p| p.role == MemberRole::Member));
}

#[tokio::test]
async fn test_group_creation_dedups_and_makes_creator_admin() {
    let store = MemoryStore::with_users(&[(1, "Ann"), (2, "Bob"), (3, "Cat")]);
    let state = test_state(store.clone());

    let err = state
        .conversations
        .create_group(Principal::new(1), "empty", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(store.conversation_count(), 0);

    let group = state
        .conversations
        .create_group(Principal::new(1), "team", &[2, 2, 3, 1])
        .await
        .unwrap();
    assert!(group.is_group);
    assert_eq!(group.title.as_deref(), Some("team"));

    let participants = state
        .conversations
        .participants(Principal::new(2), group.conversation_id)
        .await
        .unwrap();
    assert_eq!(participants.len(), 3);

    let admins: Vec<i64> = participants
        .iter()
        .filter(|p| p.role == MemberRole::Admin)
        .map(|p| p.id)
        .collect();
    assert_eq!(admins, vec![1]);
}

#[tokio::test]
async fn test_add_users_authorization() {
    let store = MemoryStore::with_users(&[(1, "Ann"), (2, "Bob"), (3, "Cat"), (4, "Dan")]);
    let state = test_state(store.clone());
    let group = state
        .conversations
        .create_group(Principal::new(1), "team", &[2])
        .await
        .unwrap()
        .conversation_id;
    let direct = state
        .conversations
        .start_direct(Principal::new(1), 3)
        .await
        .unwrap()
        .conversation_id;

    assert_eq!(
        state.conversations.add_users(Principal::new(2), group, &[4]).await,
        Err(AppError::Forbidden)
    );
    assert_eq!(
        state.conversations.add_users(Principal::new(3), group, &[4]).await,
        Err(AppError::Forbidden)
    );
    assert_eq!(
        state.conversations.add_users(Principal::new(1), 999, &[4]).await,
        Err(AppError::NotFound)
    );
    assert_eq!(
        state.conversations.add_users(Principal::new(1), direct, &[4]).await,
        Err(AppError::NotFound)
    );
}

#[tokio::test]
async fn test_add_users_is_idempotent() {
    let store = MemoryStore::with_users(&[(1, "Ann"), (2, "Bob"), (3, "Cat")]);
    let state = test_state(store.clone());
    let group = state
        .conversations
        .create_group(Principal::new(1), "team", &[2])
        .await
        .unwrap()
        .conversation_id;

    let added = state
        .conversations
        .add_users(Principal::new(1), group, &[3, 3, 2])
        .await
        .unwrap();
    assert_eq!(added, 1);

    let again = state
        .conversations
        .add_users(Principal::new(1), group, &[3])
        .await
        .unwrap();
    assert_eq!(again, 0);

    let empty = state
        .conversations
        .add_users(Principal::new(1), group, &[])
        .await
        .unwrap();
    assert_eq!(empty, 0);

    let participants = state
        .conversations
        .participants(Principal::new(3), group)
        .await
        .unwrap();
    assert_eq!(participants.len(), 3);
}

#[tokio::test]
async fn test_participants_hidden_from_outsiders() {
    let store = MemoryStore::with_users(&[(1, "Ann"), (2, "Bob"), (3, "Eve")]);
    let state = test_state(store.clone());
    let conversation_id = state
        .conversations
        .start_direct(Principal::new(1), 2)
        .await
        .unwrap()
        .conversation_id;

    assert_eq!(
        state
            .conversations
            .participants(Principal::new(3), conversation_id)
            .await,
        Err(AppError::NotFound)
    );
}

#[tokio::test]
async fn test_conversation_list_names_and_previews() {
    let store = MemoryStore::with_users(&[(1, "Ann"), (2, "Bob"), (3, "Cat")]);
    let state = test_state(store.clone());
    let direct = state
        .conversations
        .start_direct(Principal::new(1), 2)
        .await
        .unwrap()
        .conversation_id;
    let untitled = state
        .conversations
        .create_group(Principal::new(1), "", &[3])
        .await
        .unwrap()
        .conversation_id;

    state
        .delivery
        .post_message(direct, Principal::new(2), "first".into())
        .await
        .unwrap();
    state
        .delivery
        .post_message(direct, Principal::new(1), "second".into())
        .await
        .unwrap();

    let list = state.conversations.list_for(Principal::new(1)).await.unwrap();
    assert_eq!(list.len(), 2);

    let dm = list.iter().find(|c| c.conversation_id == direct).unwrap();
    assert_eq!(dm.display_name.as_deref(), Some("Bob"));
    assert_eq!(dm.last_message.as_deref(), Some("second"));
    assert!(dm.last_message_at.is_some());

    let group = list.iter().find(|c| c.conversation_id == untitled).unwrap();
    assert_eq!(group.display_name, Some(format!("Group {untitled}")));
    assert!(group.last_message.is_none());

    let bobs = state.conversations.list_for(Principal::new(2)).await.unwrap();
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].display_name.as_deref(), Some("Ann"));
}

#[tokio::test]
async fn test_user_search() {
    let store = MemoryStore::with_users(&[(1, "Ann"), (2, "Annabel"), (3, "Bob")]);
    let state = test_state(store);

    let found = state.conversations.search_users(Some("  ANN ")).await.unwrap();
    let ids: Vec<i64> = found.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![1, 2]);

    let by_email = state
        .conversations
        .search_users(Some("bob@example"))
        .await
        .unwrap();
    assert_eq!(by_email.len(), 1);

    let everyone = state.conversations.search_users(None).await.unwrap();
    assert_eq!(everyone.len(), 3);
}
