use {
    super::AppState,
    crate::{domain::eth::ChainId, infra::metrics},
    axum::{extract::State, http::StatusCode, Json},
    serde::{Deserialize, Serialize},
};

pub async fn healthz() -> &'static str {
    "ok\n"
}

pub async fn metrics(State(state): State<AppState>) -> String {
    metrics::encode(&state.registry)
}

/// `POST /enableUnderwriting` / `POST /disableUnderwriting` body. Without
/// chain ids the command applies to every chain.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UnderwritingCommand {
    #[serde(default)]
    pub chain_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnderwritingResponse {
    pub updated: Vec<String>,
    pub unknown: Vec<String>,
}

pub async fn enable_underwriting(
    state: State<AppState>,
    command: Json<UnderwritingCommand>,
) -> (StatusCode, Json<UnderwritingResponse>) {
    set_underwriting(state, command, true)
}

pub async fn disable_underwriting(
    state: State<AppState>,
    command: Json<UnderwritingCommand>,
) -> (StatusCode, Json<UnderwritingResponse>) {
    set_underwriting(state, command, false)
}

fn set_underwriting(
    State(state): State<AppState>,
    Json(command): Json<UnderwritingCommand>,
    enabled: bool,
) -> (StatusCode, Json<UnderwritingResponse>) {
    let controls = &state.controls.0;
    let targets: Vec<ChainId> = match command.chain_ids {
        Some(ids) => ids.iter().map(ChainId::new).collect(),
        None => controls.keys().cloned().collect(),
    };

    let mut response = UnderwritingResponse {
        updated: Vec::new(),
        unknown: Vec::new(),
    };
    for chain_id in targets {
        match controls.get(&chain_id) {
            Some(control) => {
                // Receivers only disappear with the worker itself.
                let _ = control.send(enabled);
                tracing::info!(chain = %chain_id, enabled, "underwriting toggled");
                response.updated.push(chain_id.to_string());
            }
            None => response.unknown.push(chain_id.to_string()),
        }
    }

    let status = if response.unknown.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(response))
}
