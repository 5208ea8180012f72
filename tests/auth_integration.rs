// Token lifecycle through the client: login, bearer headers, scheduled and forced refresh.
mod common;

use std::time::Duration;

use tonic::Status;

use common::{Row, ScriptedTransport, client_with, key, message, token};
use kvgate::api::{ClientConfig, ErrorKind, ReadPolicy, TokenManager};
use kvgate::core::envelope::ProxyResponse;

fn config() -> ClientConfig {
    ClientConfig::default().with_credentials("admin", "secret")
}

async fn wait_for_token(tokens: &TokenManager, expected: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if tokens
                .current()
                .is_some_and(|current| current.token == expected)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("token refreshed");
}

#[tokio::test]
async fn calls_carry_the_bearer_token() {
    let transport = ScriptedTransport::new();
    let issued = token(1_000, 4_600);
    transport.push_token(Ok(issued.clone()));
    transport.reply(ProxyResponse::last(message(Row::ok(1, 0))));
    let client = client_with(&transport, config());

    client
        .get(&ReadPolicy::default(), &key(1), None)
        .await
        .expect("get");
    let requests = transport.requests();
    assert_eq!(
        requests[0].authorization.as_deref(),
        Some(format!("Bearer {issued}").as_str())
    );
    assert_eq!(transport.auth_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn token_is_refreshed_at_eighty_percent_of_its_ttl() {
    let transport = ScriptedTransport::new();
    let first = token(1_000, 1_010);
    let second = token(1_010, 1_020);
    transport.push_token(Ok(first.clone()));
    transport.push_token(Ok(second.clone()));
    let tokens = TokenManager::spawn(
        transport.clone(),
        config().credentials.expect("credentials"),
        &config(),
    );

    let current = tokens.token(None).await.expect("first token");
    assert_eq!(current.token, first);
    assert_eq!(current.refresh_at - current.received_at, Duration::from_secs(8));

    tokio::time::sleep(Duration::from_millis(7_900)).await;
    assert_eq!(transport.auth_calls(), 1);

    wait_for_token(&tokens, &second).await;
    assert_eq!(transport.auth_calls(), 2);
}

#[tokio::test]
async fn rejected_credentials_surface_as_not_authenticated() {
    let transport = ScriptedTransport::new();
    transport.push_token(Err(Status::permission_denied("bad password")));
    let client = client_with(&transport, config());

    let err = client
        .get(&ReadPolicy::default(), &key(1), None)
        .await
        .expect_err("login failed");
    assert_eq!(err.kind(), ErrorKind::NotAuthenticated);
    assert!(err.message().expect("message").contains("bad password"));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn unauthenticated_replies_force_a_refresh() {
    let transport = ScriptedTransport::new();
    let first = token(1_000, 4_600);
    let second = token(2_000, 5_600);
    transport.push_token(Ok(first.clone()));
    transport.push_token(Ok(second.clone()));
    transport.fail(Status::unauthenticated("token revoked"));
    transport.reply(ProxyResponse::last(message(Row::ok(1, 0))));
    let client = client_with(&transport, config());

    let err = client
        .get(&ReadPolicy::default(), &key(1), None)
        .await
        .expect_err("revoked");
    assert_eq!(err.kind(), ErrorKind::NotAuthenticated);

    let tokens = client.tokens().expect("token manager");
    wait_for_token(tokens, &second).await;
    client
        .get(&ReadPolicy::default(), &key(1), None)
        .await
        .expect("get after refresh");
    let requests = transport.requests();
    assert_eq!(
        requests[1].authorization.as_deref(),
        Some(format!("Bearer {second}").as_str())
    );
}

#[tokio::test]
async fn malformed_tokens_fail_the_login() {
    let transport = ScriptedTransport::new();
    transport.push_token(Ok("not-a-token".to_string()));
    let client = client_with(&transport, config());

    let err = client
        .exists(&ReadPolicy::default(), &key(1))
        .await
        .expect_err("malformed");
    assert_eq!(err.kind(), ErrorKind::NotAuthenticated);
}
