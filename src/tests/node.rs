//! A minimal JSON-RPC node double. Answers the handful of queries the
//! pipeline issues from canned state and records which methods were hit.

use {
    crate::domain::eth::{Address, U256},
    axum::{extract::State, routing::post, Json, Router},
    serde_json::{json, Value},
    std::sync::{Arc, Mutex},
    web3::{ethabi, signing::keccak256},
};

pub struct NodeState {
    pub is_created_by_factory: bool,
    pub vault_code: Vec<u8>,
    pub to_asset: Address,
    pub expected_return: U256,
    pub gas_price: U256,
    pub gas_estimate: U256,
    pub balance: U256,
    pub allowance: U256,
    pub calls: Mutex<Vec<String>>,
}

pub struct MockNode {
    pub url: String,
    pub state: Arc<NodeState>,
}

impl MockNode {
    pub async fn spawn(state: NodeState) -> Self {
        let state = Arc::new(state);
        let app = Router::new()
            .route("/", post(handler))
            .with_state(Arc::clone(&state));
        let server =
            axum::Server::bind(&"127.0.0.1:0".parse().unwrap()).serve(app.into_make_service());
        let url = format!("http://{}", server.local_addr());
        tokio::spawn(server);
        Self { url, state }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().unwrap().clone()
    }
}

fn selector(signature: &str) -> String {
    hex::encode(&keccak256(signature.as_bytes())[..4])
}

async fn handler(State(state): State<Arc<NodeState>>, Json(request): Json<Value>) -> Json<Value> {
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let id = request["id"].clone();

    let result = match method.as_str() {
        "eth_gasPrice" => json!(format!("0x{:x}", state.gas_price)),
        "eth_estimateGas" => json!(format!("0x{:x}", state.gas_estimate)),
        "eth_getCode" => json!(format!("0x{}", hex::encode(&state.vault_code))),
        "eth_call" => {
            let data = request["params"][0]["data"].as_str().unwrap_or_default();
            let data = data.strip_prefix("0x").unwrap_or(data);
            let tokens = if data.starts_with(&selector("isCreatedByFactory(address,address)")) {
                vec![ethabi::Token::Bool(state.is_created_by_factory)]
            } else if data.starts_with(&selector("_tokenIndexing(uint256)")) {
                vec![ethabi::Token::Address(state.to_asset)]
            } else if data.starts_with(&selector("calcReceiveAsset(address,uint256)")) {
                vec![ethabi::Token::Uint(state.expected_return)]
            } else if data.starts_with(&selector("allowance(address,address)")) {
                vec![ethabi::Token::Uint(state.allowance)]
            } else if data.starts_with(&selector("balanceOf(address)")) {
                vec![ethabi::Token::Uint(state.balance)]
            } else {
                vec![ethabi::Token::Uint(U256::zero())]
            };
            json!(format!("0x{}", hex::encode(ethabi::encode(&tokens))))
        }
        _ => Value::Null,
    };
    state.calls.lock().unwrap().push(method);

    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    }))
}
