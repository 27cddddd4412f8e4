use anyhow::Result;

use deye_bridge::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let options = Options::new();
    deye_bridge::run(options).await
}
