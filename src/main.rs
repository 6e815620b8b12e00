use std::time::Duration;

use tracing::{info, Instrument};
use user_middleware::action::UserAction;
use user_middleware::config::MiddlewareConfig;
use user_middleware::gateway::{MemoryGateway, ProviderError, UserGateway};
use user_middleware::lifecycle::{setup_tracing, UserSystem};
use user_middleware::model::{UserInfo, UserState, UserUpdate};

/// Polls the gateway until the stored record for `key` satisfies `done`.
async fn until_stored(
    gateway: &MemoryGateway,
    key: &str,
    done: impl Fn(Option<&UserState>) -> bool,
) -> Result<UserState, String> {
    loop {
        let stored = match gateway.read(key).await {
            Ok(json) => {
                Some(serde_json::from_str::<UserState>(&json).map_err(|e| e.to_string())?)
            }
            Err(ProviderError::NotFound(_)) => None,
            Err(e) => return Err(e.to_string()),
        };
        if done(stored.as_ref()) {
            return Ok(stored.unwrap_or_default());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let config = MiddlewareConfig::from_env();
    info!(?config, "Starting user middleware demo");

    // The user filled in the sign-up form but has no provider key yet.
    let initial = UserState {
        key: None,
        value: UserInfo::new("ada@example.com", "Ada", "Lovelace"),
    };
    let system = UserSystem::new(config, initial);
    let store = &system.store;

    let span = tracing::info_span!("registration");
    let registered = async {
        info!("Registering and creating the record");
        store
            .dispatch(UserAction::Register("ada".into()))
            .map_err(|e| e.to_string())?;
        store
            .dispatch(UserAction::Create)
            .map_err(|e| e.to_string())?;
        store
            .wait_for(|state| state.value.beacon_id.is_some())
            .await
            .map_err(|e| e.to_string())
    }
    .instrument(span)
    .await?;

    info!(user = %registered, beacon_id = ?registered.value.beacon_id, "Record created");

    let span = tracing::info_span!("profile_edit");
    let edited = async {
        let update = UserUpdate {
            family_name: Some("King".into()),
            tracking: Some(false),
            ..Default::default()
        };
        info!(?update, "Editing profile");
        store
            .dispatch(UserAction::Update(update))
            .map_err(|e| e.to_string())?;
        // The reducer commits the edit optimistically; wait for the gateway.
        until_stored(&system.gateway, "ada", |stored| {
            stored.is_some_and(|user| user.value.family_name == "King")
        })
        .await
    }
    .instrument(span)
    .await?;

    info!(
        user = %edited,
        tracking = edited.value.tracking_enabled(),
        "Profile updated"
    );

    let span = tracing::info_span!("removal");
    async {
        info!("Deleting the record");
        store
            .dispatch(UserAction::Delete)
            .map_err(|e| e.to_string())?;
        until_stored(&system.gateway, "ada", |stored| stored.is_none()).await
    }
    .instrument(span)
    .await?;

    info!(state = %store.state(), "Record deleted");

    system.shutdown().await.map_err(|e| e.to_string())
}
