use goose::prelude::*;
use std::env;

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

async fn health_check(user: &mut GooseUser) -> TransactionResult {
    let _goose_metrics = user.get("/healthz").await?;
    Ok(())
}

async fn login_page(user: &mut GooseUser) -> TransactionResult {
    let _goose_metrics = user.get("/login").await?;
    Ok(())
}

/// Password verification dominates this transaction.
async fn login_submit(user: &mut GooseUser) -> TransactionResult {
    let account = env_or("LOADTEST_ACCOUNT", "alice");
    let password = env_or("LOADTEST_PASSWORD", "secret123");
    let params = [("account", account.as_str()), ("password", password.as_str())];
    let _goose_metrics = user.post_form("/login", &params).await?;
    Ok(())
}

async fn refresh_token(user: &mut GooseUser) -> TransactionResult {
    let (Ok(client_id), Ok(client_secret), Ok(token)) = (
        env::var("LOADTEST_CLIENT_ID"),
        env::var("LOADTEST_CLIENT_SECRET"),
        env::var("LOADTEST_REFRESH_TOKEN"),
    ) else {
        return Ok(());
    };
    let params = [
        ("grant_type", "refresh_token"),
        ("client_id", client_id.as_str()),
        ("client_secret", client_secret.as_str()),
        ("refresh_token", token.as_str()),
    ];
    let _goose_metrics = user.post_form("/oauth/token", &params).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), GooseError> {
    println!(
        "Logging in as '{}'; refresh scenario {}",
        env_or("LOADTEST_ACCOUNT", "alice"),
        if env::var("LOADTEST_REFRESH_TOKEN").is_ok() {
            "enabled"
        } else {
            "disabled (set LOADTEST_CLIENT_ID, LOADTEST_CLIENT_SECRET, LOADTEST_REFRESH_TOKEN)"
        }
    );

    GooseAttack::initialize()?
        .register_scenario(
            scenario!("HealthCheck").register_transaction(transaction!(health_check)),
        )
        .register_scenario(
            scenario!("BrowserLogin")
                .register_transaction(transaction!(login_page))
                .register_transaction(transaction!(login_submit)),
        )
        .register_scenario(
            scenario!("TokenRefresh").register_transaction(transaction!(refresh_token)),
        )
        .execute()
        .await?;

    Ok(())
}
