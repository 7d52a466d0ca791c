use kube::Client;
use stackset_controller::{errors::*, manager};

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = libmain().await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn libmain() -> Result<()> {
    // Reads the environment to find config for the kube client: tries an
    // in-cluster configuration first, then falls back to a kubeconfig file.
    let client = Client::try_default().await?;
    manager::run(client).await
}
