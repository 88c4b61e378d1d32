mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{profile, Harness, EMAIL, PASSWORD};
use humonix_core::{
    CommunityPost, ConversationKind, ConversationRecord, IdentityId, PortError, PostKind,
};
use std::sync::{Arc, Mutex};
use tokio_test::{assert_err, assert_ok};

fn post(author: &IdentityId, content: &str, minutes: i64) -> CommunityPost {
    CommunityPost {
        id: None,
        user_id: author.clone(),
        author_name: "Asha".to_string(),
        content: content.to_string(),
        kind: PostKind::Text,
        tags: vec!["gratitude".to_string()],
        likes: 0,
        comments: 0,
        is_anonymous: false,
        timestamp: Utc::now() + ChronoDuration::minutes(minutes),
    }
}

#[tokio::test]
async fn posts_come_back_newest_first() {
    let h = Harness::new();
    let user = assert_ok!(h.session.signup(profile(EMAIL, "Asha"), PASSWORD).await);

    for (i, content) in ["first", "second", "third"].into_iter().enumerate() {
        assert_ok!(h.gateway.create_community_post(&post(&user.id, content, i as i64)).await);
    }

    let posts = assert_ok!(h.gateway.fetch_community_posts(2).await);
    let contents: Vec<_> = posts.iter().map(|p| p.content.as_str()).collect();
    assert_eq!(contents, vec!["third", "second"]);
    assert!(posts.iter().all(|p| p.id.is_some()));
}

#[tokio::test]
async fn likes_update_in_place() {
    let h = Harness::new();
    let user = assert_ok!(h.session.signup(profile(EMAIL, "Asha"), PASSWORD).await);
    let id = assert_ok!(h.gateway.create_community_post(&post(&user.id, "hello", 0)).await);

    assert_ok!(h.gateway.update_post_likes(&id, 3).await);
    let posts = assert_ok!(h.gateway.fetch_community_posts(10).await);
    assert_eq!(posts[0].likes, 3);

    let err = assert_err!(h.gateway.update_post_likes("missing", 1).await);
    assert!(matches!(err, PortError::NotFound(_)));
}

#[tokio::test]
async fn feed_subscription_follows_new_posts_until_released() {
    let h = Harness::new();
    let user = assert_ok!(h.session.signup(profile(EMAIL, "Asha"), PASSWORD).await);
    let seen: Arc<Mutex<Vec<usize>>> = Arc::default();

    let sink = Arc::clone(&seen);
    let subscription = assert_ok!(
        h.gateway
            .subscribe_community_posts(20, move |posts| sink.lock().unwrap().push(posts.len()))
            .await
    );
    assert_ok!(h.gateway.create_community_post(&post(&user.id, "one", 0)).await);
    assert_ok!(h.gateway.create_community_post(&post(&user.id, "two", 1)).await);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);

    subscription.unsubscribe();
    assert_ok!(h.gateway.create_community_post(&post(&user.id, "three", 2)).await);
    assert_eq!(seen.lock().unwrap().len(), 3);
    // Only the session's own user feed remains.
    assert_eq!(h.store.active_watches(), 1);
}

#[tokio::test]
async fn conversations_are_listed_per_user() {
    let h = Harness::new();
    let asha = assert_ok!(h.session.signup(profile(EMAIL, "Asha"), PASSWORD).await);
    let start = Utc::now();

    for (minutes, kind) in [(0, ConversationKind::Ai), (5, ConversationKind::Peer)] {
        let record = ConversationRecord {
            id: None,
            user_id: asha.id.clone(),
            kind,
            duration: 600,
            mood: "calm".to_string(),
            satisfaction: 4,
            timestamp: start + ChronoDuration::minutes(minutes),
        };
        assert_ok!(h.gateway.save_conversation(&record).await);
    }

    let conversations = assert_ok!(h.gateway.fetch_conversations(&asha.id).await);
    let kinds: Vec<_> = conversations.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![ConversationKind::Peer, ConversationKind::Ai]);

    let nobody = assert_ok!(h.gateway.fetch_conversations(&IdentityId::new("nobody")).await);
    assert!(nobody.is_empty());
}
