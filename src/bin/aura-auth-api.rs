use std::net::SocketAddr;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use aura_auth::web_api::{run_http_server, AppState};
use aura_auth::Config;

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = Config::load();
    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    if config.stub_mode() {
        info!("running with stub platform credentials; no live calls will be made");
    }

    let state = AppState::new(config);
    run_http_server(addr, state).await;
}
