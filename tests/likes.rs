mod common;

use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn toggling_twice_returns_to_unliked() {
    let app = common::app().await;
    let author = app.create_user("likes_author").await;
    let fan = app.create_user("likes_fan").await;
    let post_id = app.create_post(&author, "Weekend plans").await;

    let body = json!({ "target_type": "post", "target_id": post_id });
    let first = app
        .post_json("/v1/likes/toggle", body.clone(), Some(&fan.access_token))
        .await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.json()["liked"], true);

    let summary = app
        .get(&format!("/v1/posts/{}/likes", post_id), Some(&fan.access_token))
        .await;
    assert_eq!(summary.json(), json!({ "count": 1, "liked": true }));

    let second = app
        .post_json("/v1/likes/toggle", body, Some(&fan.access_token))
        .await;
    assert_eq!(second.json()["liked"], false);

    let summary = app
        .get(&format!("/v1/posts/{}/likes", post_id), Some(&author.access_token))
        .await;
    assert_eq!(summary.json(), json!({ "count": 0, "liked": false }));
}

#[tokio::test]
async fn concurrent_toggles_leave_at_most_one_like() {
    let app = common::app().await;
    let author = app.create_user("race_author").await;
    let fan = app.create_user("race_fan").await;
    let post_id = app.create_post(&author, "Race").await;
    let body = json!({ "target_type": "POST", "target_id": post_id });

    let toggles = (0..6).map(|_| app.post_json("/v1/likes/toggle", body.clone(), Some(&fan.access_token)));
    let responses = futures::future::join_all(toggles).await;
    assert!(responses.iter().all(|r| r.status == StatusCode::OK));

    // an even number of flips nets out to no like
    let summary = app
        .get(&format!("/v1/posts/{}/likes", post_id), Some(&fan.access_token))
        .await;
    assert_eq!(summary.json(), json!({ "count": 0, "liked": false }));
}

#[tokio::test]
async fn comments_can_be_liked_independently_of_their_post() {
    let app = common::app().await;
    let author = app.create_user("c_author").await;
    let fan = app.create_user("c_fan").await;
    let post_id = app.create_post(&author, "Thread").await;
    let comment = app
        .post_json(
            &format!("/v1/posts/{}/comments", post_id),
            json!({ "content": "first!" }),
            Some(&author.access_token),
        )
        .await;
    let comment_id = comment.json()["id"].as_str().unwrap().to_string();

    let resp = app
        .post_json(
            "/v1/likes/toggle",
            json!({ "target_type": "comment", "target_id": comment_id }),
            Some(&fan.access_token),
        )
        .await;
    assert_eq!(resp.json()["liked"], true);

    let comment_summary = app
        .get(&format!("/v1/comments/{}/likes", comment_id), Some(&fan.access_token))
        .await;
    assert_eq!(comment_summary.json()["count"], 1);
    let post_summary = app
        .get(&format!("/v1/posts/{}/likes", post_id), Some(&fan.access_token))
        .await;
    assert_eq!(post_summary.json()["count"], 0);
}

#[tokio::test]
async fn invalid_like_requests_are_rejected() {
    let app = common::app().await;
    let fan = app.create_user("picky").await;

    let unknown_type = app
        .post_json(
            "/v1/likes/toggle",
            json!({ "target_type": "story", "target_id": uuid::Uuid::new_v4() }),
            Some(&fan.access_token),
        )
        .await;
    assert_eq!(unknown_type.status, StatusCode::BAD_REQUEST);

    let missing_target = app
        .post_json(
            "/v1/likes/toggle",
            json!({ "target_type": "post", "target_id": uuid::Uuid::new_v4() }),
            Some(&fan.access_token),
        )
        .await;
    assert_eq!(missing_target.status, StatusCode::NOT_FOUND);

    let anonymous = app
        .post_json(
            "/v1/likes/toggle",
            json!({ "target_type": "post", "target_id": uuid::Uuid::new_v4() }),
            None,
        )
        .await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn tombstoned_posts_cannot_be_liked() {
    let app = common::app().await;
    let author = app.create_user("tomb_author").await;
    let fan = app.create_user("tomb_fan").await;
    let post_id = app.create_post(&author, "Soon gone").await;

    let deleted = app
        .delete(&format!("/v1/posts/{}", post_id), Some(&author.access_token))
        .await;
    assert_eq!(deleted.status, StatusCode::OK);

    let resp = app
        .post_json(
            "/v1/likes/toggle",
            json!({ "target_type": "post", "target_id": post_id }),
            Some(&fan.access_token),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}
